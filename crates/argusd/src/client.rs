//! Client side of the IPC socket.

use std::io;
use std::path::Path;
use std::time::Duration;

use argus_protocol::{PushEvent, Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;

/// How long a request may wait for its response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Cannot connect to {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid reply: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Daemon closed the connection")]
    Closed,

    #[error("No response within {0:?}")]
    Timeout(Duration),
}

pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl IpcClient {
    pub async fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| ClientError::Connect {
                path: path.display().to_string(),
                source,
            })?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Sends one request and waits for its response.
    pub async fn request(&mut self, request: &Request) -> Result<Response, ClientError> {
        let line = serde_json::to_string(request)?;
        self.send_line(&line).await?;
        self.read_response().await
    }

    /// Sends a raw line; for talking to the daemon with hand-written JSON.
    pub async fn send_line(&mut self, line: &str) -> Result<(), ClientError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn read_response(&mut self) -> Result<Response, ClientError> {
        let line = match timeout(RESPONSE_TIMEOUT, self.read_line()).await {
            Ok(line) => line?,
            Err(_) => return Err(ClientError::Timeout(RESPONSE_TIMEOUT)),
        };
        Ok(serde_json::from_str(&line)?)
    }

    /// Switches the connection to the event stream.
    pub async fn subscribe(mut self) -> Result<EventStream, ClientError> {
        self.send_line(&serde_json::to_string(&Request::Subscribe)?)
            .await?;
        Ok(EventStream { client: self })
    }

    async fn read_line(&mut self) -> Result<String, ClientError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(ClientError::Closed);
        }
        Ok(line)
    }
}

/// Push events from a subscribed connection.
pub struct EventStream {
    client: IpcClient,
}

impl EventStream {
    /// Waits for the next event; `None` once the daemon hangs up.
    pub async fn next_event(&mut self) -> Result<Option<PushEvent>, ClientError> {
        match self.client.read_line().await {
            Ok(line) => Ok(Some(serde_json::from_str(&line)?)),
            Err(ClientError::Closed) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
