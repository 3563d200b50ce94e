//! Readiness and status reporting to a process supervisor.
//!
//! Under systemd (`Type=notify`) messages go to the datagram socket named by
//! `$NOTIFY_SOCKET`. Elsewhere they are only logged. Delivery failures are
//! warnings: supervision is a courtesy, not a dependency of ingestion.

use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;

pub trait Notifier {
    fn notify(&self, state: &str);

    fn ready(&self) {
        self.notify("READY=1");
    }

    fn status(&self, text: &str) {
        self.notify(&format!("STATUS={text}"));
    }
}

/// Used when no supervisor is listening.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupervised;

impl Notifier for Unsupervised {
    fn notify(&self, state: &str) {
        tracing::trace!(state, "no supervisor to notify");
    }
}

#[derive(Debug, Clone)]
enum Target {
    Path(PathBuf),
    #[cfg(target_os = "linux")]
    Abstract(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Systemd {
    target: Target,
}

impl Systemd {
    pub fn from_env() -> Option<Self> {
        let raw = std::env::var_os("NOTIFY_SOCKET")?;
        Self::new(raw.to_string_lossy().as_ref())
    }

    /// `@name` refers to a Linux abstract socket, anything else to a path.
    pub fn new(socket: &str) -> Option<Self> {
        if socket.is_empty() {
            return None;
        }
        if let Some(name) = socket.strip_prefix('@') {
            #[cfg(target_os = "linux")]
            return Some(Systemd { target: Target::Abstract(name.as_bytes().to_vec()) });
            #[cfg(not(target_os = "linux"))]
            {
                tracing::warn!(name, "abstract NOTIFY_SOCKET is not supported on this platform");
                return None;
            }
        }
        Some(Systemd { target: Target::Path(socket.into()) })
    }

    fn send(&self, state: &str) -> io::Result<()> {
        let sock = UnixDatagram::unbound()?;
        match &self.target {
            Target::Path(p) => sock.send_to(state.as_bytes(), p)?,
            #[cfg(target_os = "linux")]
            Target::Abstract(name) => {
                use std::os::linux::net::SocketAddrExt;
                let addr = std::os::unix::net::SocketAddr::from_abstract_name(name)?;
                sock.send_to_addr(state.as_bytes(), &addr)?
            }
        };
        Ok(())
    }
}

impl Notifier for Systemd {
    fn notify(&self, state: &str) {
        if let Err(e) = self.send(state) {
            tracing::warn!(error = %e, state, "supervisor notification failed");
        }
    }
}

/// Pick the systemd notifier when `$NOTIFY_SOCKET` is set.
pub fn from_env() -> Box<dyn Notifier> {
    match Systemd::from_env() {
        Some(n) => {
            tracing::debug!("notifying supervisor via NOTIFY_SOCKET");
            Box::new(n)
        }
        None => Box::new(Unsupervised),
    }
}
