use event_filter::{EventFilter, Verdict};
use inventory_sqlite::Db;
use record_decoder::Frame;
use serde_json::Value;
use unmatched_core::{InboundEvent, ServiceNames};

/// Per-connection counters, logged when the connection ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes: u64,
    pub recorded: u64,
    pub skipped: u64,
    pub malformed: u64,
    pub failed: u64,
}

/// Turns decoded frames into inventory updates. Every error is contained
/// here: a bad record is counted, logged and dropped, and the next one is
/// processed as if nothing happened.
pub struct Pipeline {
    store: Option<Db>,
    filter: EventFilter,
    names: Box<dyn ServiceNames>,
}

impl Pipeline {
    pub fn new(store: Db, filter: EventFilter, names: Box<dyn ServiceNames>) -> Self {
        Pipeline { store: Some(store), filter, names }
    }

    #[cfg(test)]
    pub fn store(&self) -> Option<&Db> {
        self.store.as_ref()
    }

    pub fn handle(&mut self, frame: Frame, stats: &mut ConnectionStats) {
        let record = match frame {
            Frame::Record(v) => v,
            Frame::Malformed { text, reason } => {
                stats.malformed += 1;
                tracing::warn!(%reason, record = %excerpt(&text), "skipping undecodable record");
                return;
            }
        };
        match self.filter.evaluate(&record) {
            Ok(Verdict::Accept(event)) => self.apply(&event, stats),
            Ok(Verdict::WrongPrefix) => {
                stats.skipped += 1;
                tracing::trace!(prefix = ?record.get(event_filter::FIELD_PREFIX), "foreign log prefix");
            }
            Ok(Verdict::UnsupportedProtocol(protocol)) => {
                stats.skipped += 1;
                tracing::trace!(protocol, "ignoring non TCP/UDP packet");
            }
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(error = %e, record = %excerpt_value(&record), "skipping malformed record");
            }
        }
    }

    fn apply(&mut self, event: &InboundEvent, stats: &mut ConnectionStats) {
        let Some(store) = self.store.as_mut() else {
            stats.failed += 1;
            tracing::error!("database already closed, dropping event");
            return;
        };
        match store.record(event, self.names.as_ref()) {
            Ok(r) => {
                stats.recorded += 1;
                tracing::debug!(
                    src = %event.src_ip,
                    port = event.dest_port,
                    proto = %event.protocol,
                    count = r.count,
                    "recorded call"
                );
            }
            Err(e) => {
                stats.failed += 1;
                tracing::error!("failed to record {}:{}/{}: {e:#}; continuing with next packet",
                    event.src_ip, event.dest_port, event.protocol);
            }
        }
    }

    /// Close the database handle. Safe to call repeatedly.
    pub fn close_store(&mut self) {
        if let Some(db) = self.store.take() {
            match db.close() {
                Ok(()) => tracing::info!("closed database"),
                Err(e) => tracing::warn!("closing database: {e:#}"),
            }
        }
    }
}

const EXCERPT_LEN: usize = 256;

fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(EXCERPT_LEN) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn excerpt_value(v: &Value) -> String {
    excerpt(&v.to_string()).to_string()
}
