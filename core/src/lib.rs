//! Core types shared between the decoder, filter, store and collector.

pub mod error;

pub use error::RecordError;

use serde::{Deserialize, Serialize};
use std::fmt;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Log prefix the nftables rule attaches to unmatched inbound packets.
pub const DEFAULT_LOG_PREFIX: &str = "nft_in_unmtch";

/// Transport protocols tracked by the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Map an IP protocol number to a tracked transport. Anything other than
    /// TCP (6) and UDP (17) is out of scope and yields `None`.
    pub fn from_ip_number(n: i64) -> Option<Self> {
        match n {
            6 => Some(Protocol::Tcp),
            17 => Some(Protocol::Udp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// A normalized inbound packet: who knocked, on which port, over what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub dest_port: u16,
    pub protocol: Protocol,
    pub src_ip: String,
}

/// Port to service-name resolution. Implementations are best effort: a
/// missing entry or a lookup failure is simply `None`.
pub trait ServiceNames {
    fn lookup(&self, port: u16, protocol: Protocol) -> Option<String>;
}

impl<F> ServiceNames for F
where
    F: Fn(u16, Protocol) -> Option<String>,
{
    fn lookup(&self, port: u16, protocol: Protocol) -> Option<String> {
        self(port, protocol)
    }
}
