//! The accept/read loop. One ulogd connection is serviced at a time; accept
//! is not called again until the current connection ends.

use crate::config::Settings;
use crate::notify::Notifier;
use crate::pipeline::{ConnectionStats, Pipeline};
use anyhow::{Context, Result};
use event_filter::EventFilter;
use inventory_sqlite::Db;
use record_decoder::RecordDecoder;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use unmatched_core::ServiceNames;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(250);

pub const STATUS_WAITING: &str = "Waiting for ulog daemon to connect…";
pub const STATUS_CONNECTED: &str = "Ulog is connected. Interpreting data...";

/// Why a connection stopped being serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    Closed,
    Reset,
    Shutdown,
}

/// Owns every resource the collector holds: the listening socket, the
/// database (inside the pipeline) and the supervisor channel.
pub struct Collector {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    pipeline: Pipeline,
    notifier: Box<dyn Notifier>,
    read_buffer_size: usize,
    max_pending_bytes: usize,
}

impl Collector {
    /// Bind the ulogd socket, replacing a stale socket file. Must be called
    /// from within a tokio runtime.
    pub fn bind(
        settings: &Settings,
        store: Db,
        names: Box<dyn ServiceNames>,
        notifier: Box<dyn Notifier>,
    ) -> Result<Self> {
        let path = settings.socket_path.clone();
        remove_stale_socket(&path).with_context(|| format!("removing stale socket {}", path.display()))?;
        let listener = UnixListener::bind(&path).with_context(|| format!("binding {}", path.display()))?;
        tracing::info!(socket = %path.display(), "listening for ulogd");
        Ok(Collector {
            socket_path: path,
            listener: Some(listener),
            pipeline: Pipeline::new(store, EventFilter::new(settings.log_prefix.clone()), names),
            notifier,
            read_buffer_size: settings.read_buffer_size,
            max_pending_bytes: settings.max_pending_bytes,
        })
    }

    /// Serve connections until `shutdown` flips to true (or its sender goes
    /// away), then release everything.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.notifier.ready();
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            let Some(listener) = self.listener.as_ref() else { break };
            tracing::info!("waiting for ulogd to connect");
            self.notifier.status(STATUS_WAITING);

            let accepted = tokio::select! {
                _ = shutdown.changed() => break,
                r = listener.accept() => r,
            };
            match accepted {
                Ok((stream, _)) => {
                    tracing::info!("ulogd connected, interpreting data");
                    self.notifier.status(STATUS_CONNECTED);
                    let (end, stats) = self.serve(stream, &mut shutdown).await;
                    tracing::info!(
                        ?end,
                        bytes = stats.bytes,
                        recorded = stats.recorded,
                        skipped = stats.skipped,
                        malformed = stats.malformed,
                        failed = stats.failed,
                        "ulogd connection finished"
                    );
                    if end == ConnectionEnd::Shutdown {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    if accept_backoff(&mut shutdown).await {
                        break;
                    }
                }
            }
        }
        self.shutdown();
        Ok(())
    }

    async fn serve(
        &mut self,
        mut stream: UnixStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> (ConnectionEnd, ConnectionStats) {
        let mut decoder = RecordDecoder::new(self.max_pending_bytes);
        let mut buf = vec![0u8; self.read_buffer_size];
        let mut stats = ConnectionStats::default();

        let end = loop {
            // Shutdown is polled first so a socket that always has data
            // ready cannot hold off a stop request.
            let n = tokio::select! {
                biased;
                _ = shutdown.changed() => break ConnectionEnd::Shutdown,
                r = stream.read(&mut buf) => match r {
                    Ok(0) => break ConnectionEnd::Closed,
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(error = %e, "reading from ulogd failed");
                        break ConnectionEnd::Reset;
                    }
                },
            };
            stats.bytes += n as u64;
            for frame in decoder.feed(&buf[..n]) {
                self.pipeline.handle(frame, &mut stats);
            }
        };

        let dropped = decoder.reset();
        if dropped > 0 {
            tracing::debug!(bytes = dropped, "discarding incomplete trailing record");
        }
        (end, stats)
    }

    /// Release the listening socket (unlinking its path) and then the
    /// database. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            drop(listener);
            match std::fs::remove_file(&self.socket_path) {
                Ok(()) => tracing::info!(socket = %self.socket_path.display(), "closed socket"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(error = %e, "removing socket file"),
            }
        }
        self.pipeline.close_store();
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pause after a failed accept. Returns true if shutdown was requested (or
/// its sender went away) in the meantime.
async fn accept_backoff(shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => false,
    }
}

/// Remove whatever sits at `path`. A missing file is fine; any other failure
/// is returned so binding does not go on to fail in a more confusing way.
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(socket = %path.display(), "removed stale socket file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
