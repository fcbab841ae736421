//! Per-client connection handling.
//!
//! Each line from the client is one request and gets exactly one response
//! line. A `subscribe` request turns the connection into a one-way stream
//! of push events until the client goes away or the daemon stops.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` in production code
//! - Malformed input gets a failure response; the connection stays open
//! - Write failures end the connection quietly

use std::io;
use std::time::Duration;

use argus_protocol::{PushEvent, Request, Response};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ServerContext;
use crate::broadcast::ControlToken;
use crate::maintenance::MaintenanceResult;

/// Maximum request line size (1 MB)
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Idle connections are closed after 5 minutes.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl ConnectionError {
    /// The peer went away mid-write.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
            )
        )
    }
}

pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    context: ServerContext,
    cancel: CancellationToken,
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        context: ServerContext,
        cancel: CancellationToken,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            context,
            cancel,
            connection_number,
        }
    }

    pub async fn run(mut self) {
        debug!(connection = self.connection_number, "Client connected");

        match self.process_requests().await {
            Ok(()) => {}
            Err(e) if e.is_disconnect() => {
                debug!(connection = self.connection_number, "Client hung up during write");
            }
            Err(e) => {
                debug!(connection = self.connection_number, error = %e, "Connection closed");
            }
        }

        debug!(connection = self.connection_number, "Client disconnected");
    }

    async fn process_requests(&mut self) -> Result<(), ConnectionError> {
        let cancel = self.cancel.clone();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                read = timeout(READ_TIMEOUT, self.read_line()) => match read {
                    Ok(Ok(Some(line))) => line,
                    Ok(Ok(None)) => return Ok(()),
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(ConnectionError::Timeout),
                },
            };

            if line.len() > MAX_MESSAGE_SIZE {
                let err = ConnectionError::MessageTooLarge {
                    size: line.len(),
                    max: MAX_MESSAGE_SIZE,
                };
                self.send(&Response::failure(err.to_string())).await?;
                return Err(err);
            }
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }

            let request = match Request::parse_bytes(line) {
                Ok(request) => request,
                Err(e) => {
                    warn!(connection = self.connection_number, error = %e, "Rejected request");
                    self.send(&Response::rejected(&e)).await?;
                    continue;
                }
            };

            if request == Request::Subscribe {
                return self.stream_events().await;
            }

            let response = self.dispatch(request).await;
            self.send(&response).await?;
        }
    }

    async fn dispatch(&self, request: Request) -> Response {
        debug!(
            connection = self.connection_number,
            action = request.action(),
            "Received request"
        );
        let ctx = &self.context;

        match request {
            Request::ArmAway => self.broadcast("Action: arm away", ControlToken::ArmAway),
            Request::ArmStay => self.broadcast("Action: arm stay", ControlToken::ArmStay),
            Request::Disarm => self.broadcast("Action: disarm", ControlToken::Disarm),
            Request::UpdateConfig => {
                self.broadcast("Update configuration", ControlToken::UpdateConfig)
            }
            Request::UpdateKeypad => self.broadcast("Update keypad", ControlToken::UpdateKeypad),

            Request::GetArm => Response::ok_with(json!({ "type": ctx.state.arm() })),
            Request::GetState => Response::ok_with(json!({ "state": ctx.state.monitoring() })),
            Request::GetPowerState => Response::ok_with(json!({ "source": ctx.state.power() })),

            Request::UpdateSecureConnection => {
                maintenance_response(ctx.maintenance.update_secure_connection().await)
            }
            Request::UpdateSsh => maintenance_response(ctx.maintenance.update_ssh().await),
            Request::SyncClock => maintenance_response(ctx.maintenance.sync_clock().await),
            Request::SetClock(settings) => {
                maintenance_response(ctx.maintenance.set_clock(&settings).await)
            }

            // Handled by the caller.
            Request::Subscribe => Response::ok(),
        }
    }

    fn broadcast(&self, what: &str, token: ControlToken) -> Response {
        info!(connection = self.connection_number, "{what}");
        match self.context.broadcaster.send(token) {
            Ok(_) => Response::ok(),
            Err(e) => {
                warn!(connection = self.connection_number, error = %e, "Broadcast failed");
                Response::failure(e.to_string())
            }
        }
    }

    /// Forwards push events until the client hangs up or the daemon stops.
    ///
    /// The current arm and system state go out first so a fresh subscriber
    /// does not have to wait for the next change.
    async fn stream_events(&mut self) -> Result<(), ConnectionError> {
        let mut events = self.context.events.subscribe();
        info!(connection = self.connection_number, "Client subscribed to events");

        let snapshot = self.context.state.snapshot();
        self.send(&PushEvent::ArmStateChange(snapshot.arm)).await?;
        self.send(&PushEvent::SystemStateChange(snapshot.monitoring))
            .await?;

        let mut discard = Vec::new();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                read = self.reader.read_until(b'\n', &mut discard) => {
                    match read {
                        Ok(0) | Err(_) => return Ok(()),
                        Ok(_) => discard.clear(),
                    }
                }
                received = events.recv() => match received {
                    Ok(event) => self.send(&event).await?,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            connection = self.connection_number,
                            skipped = n,
                            "Subscriber lagged, skipped events"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    /// Reads one raw line; `None` on EOF. UTF-8 is checked by the parser.
    async fn read_line(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        let mut line = Vec::new();
        let read = self.reader.read_until(b'\n', &mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ConnectionError> {
        let json = serde_json::to_string(message)?;

        let write = async {
            self.writer.write_all(json.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await?;
            Ok::<(), io::Error>(())
        };

        match timeout(WRITE_TIMEOUT, write).await {
            Ok(result) => result.map_err(ConnectionError::from),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

fn maintenance_response(result: MaintenanceResult<()>) -> Response {
    match result {
        Ok(()) => Response::ok(),
        Err(e) => {
            warn!(error = %e, "Maintenance action failed");
            Response::failure(e.to_string())
        }
    }
}
