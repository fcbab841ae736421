//! Unix socket command server.
//!
//! The REST layer talks to the daemon through this socket: one JSON
//! request per line, one JSON response per line. Commands that change
//! behaviour are broadcast to the subsystems; queries are answered from
//! the shared state; maintenance actions run on the connection's task.
//!
//! ```text
//! ┌─────────────────┐
//! │    IpcServer    │   accept (1 s poll, cancel token)
//! │  UnixListener   │
//! └───────┬─────────┘
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│   Broadcaster   │──▶ monitor / keypad / notifier
//! │   (per client)  │     └─────────────────┘
//! │                 │────▶ SharedStateStore (get_*)
//! │                 │────▶ Maintenance
//! │                 │◀──── EventPublisher (subscribe)
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` in production code
//! - Accept errors are logged and the loop keeps serving

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, MAX_MESSAGE_SIZE};

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::SocketConfig;
use crate::events::EventPublisher;
use crate::maintenance::Maintenance;
use crate::state::SharedStateStore;

/// How long one accept waits before checking for shutdown again.
const ACCEPT_POLL: Duration = Duration::from_secs(1);

/// What a connection needs to answer requests.
#[derive(Clone)]
pub struct ServerContext {
    pub broadcaster: Broadcaster,
    pub state: SharedStateStore,
    pub events: EventPublisher,
    pub maintenance: Arc<dyn Maintenance>,
}

pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
    context: ServerContext,
    cancel: CancellationToken,
    connection_counter: u64,
}

impl IpcServer {
    /// Binds the socket, replacing a stale one, and applies the configured
    /// mode and owner.
    pub fn bind(
        config: &SocketConfig,
        context: ServerContext,
        cancel: CancellationToken,
    ) -> Result<Self, ServerError> {
        let path = config.path.clone();
        let setup_error = |error: String| ServerError::SocketSetup {
            path: path.clone(),
            error,
        };

        match fs::remove_file(&path) {
            Ok(()) => debug!(socket = %path.display(), "Removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(setup_error(e.to_string())),
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                info!(dir = %parent.display(), "Creating socket directory");
                fs::create_dir_all(parent).map_err(|e| setup_error(e.to_string()))?;
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| setup_error(e.to_string()))?;

        let mode = config.mode().map_err(|e| setup_error(e.to_string()))?;
        if let Some(mode) = mode {
            fs::set_permissions(&path, fs::Permissions::from_mode(mode))
                .map_err(|e| setup_error(e.to_string()))?;
        }
        match (config.user_id, config.group_id) {
            (None, None) => debug!("No socket owner configured"),
            (uid, gid) => {
                std::os::unix::fs::chown(&path, uid, gid)
                    .map_err(|e| setup_error(e.to_string()))?;
                info!(uid = ?uid, gid = ?gid, "Socket owner set");
            }
        }

        info!(socket = %path.display(), "IPC server listening");
        Ok(Self {
            socket_path: path,
            listener,
            context,
            cancel,
            connection_counter: 0,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serves connections until the cancellation token fires.
    pub async fn run(mut self) {
        loop {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("IPC server shutdown requested");
                    break;
                }
                accepted = timeout(ACCEPT_POLL, self.listener.accept()) => accepted,
            };

            match accepted {
                Ok(Ok((stream, _addr))) => {
                    self.connection_counter += 1;
                    let (reader, writer) = stream.into_split();
                    let handler = ConnectionHandler::new(
                        reader,
                        writer,
                        self.context.clone(),
                        self.cancel.child_token(),
                        self.connection_counter,
                    );
                    tokio::spawn(handler.run());
                }
                Ok(Err(e)) => error!(error = %e, "Failed to accept connection"),
                Err(_) => {}
            }
        }

        self.cleanup();
    }

    fn cleanup(&self) {
        if let Err(e) = fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }
        info!("IPC server stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
