//! Port to service-name tables in `/etc/services` format.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use unmatched_core::{Protocol, ServiceNames};

pub const DEFAULT_SERVICES_FILE: &str = "/etc/services";

/// Lookup table loaded from a services(5) file.
#[derive(Debug, Default, Clone)]
pub struct ServicesTable {
    names: HashMap<(u16, Protocol), String>,
}

impl ServicesTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading services file {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    /// Like [`ServicesTable::load`], but an unreadable file yields an empty
    /// table. Names are a convenience and never block ingestion.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        match Self::load(&path) {
            Ok(t) => {
                tracing::debug!(entries = t.len(), "loaded service names");
                t
            }
            Err(e) => {
                tracing::warn!("service names unavailable: {e:#}");
                Self::default()
            }
        }
    }

    /// Parse `name port/proto [aliases...] [# comment]` lines. Unknown
    /// protocols and garbage lines are ignored; the first name listed for a
    /// port wins, as with getservbyport(3).
    pub fn parse(text: &str) -> Self {
        let mut names = HashMap::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("");
            let mut fields = line.split_whitespace();
            let (Some(name), Some(port_proto)) = (fields.next(), fields.next()) else { continue };
            let Some((port, proto)) = port_proto.split_once('/') else { continue };
            let (Ok(port), Ok(proto)) = (port.parse::<u16>(), proto.parse::<Protocol>()) else { continue };
            names.entry((port, proto)).or_insert_with(|| name.to_string());
        }
        ServicesTable { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl ServiceNames for ServicesTable {
    fn lookup(&self, port: u16, protocol: Protocol) -> Option<String> {
        self.names.get(&(port, protocol)).cloned()
    }
}

/// Never resolves anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Disabled;

impl ServiceNames for Disabled {
    fn lookup(&self, _port: u16, _protocol: Protocol) -> Option<String> {
        None
    }
}
