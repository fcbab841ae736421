//! Control-token fan-out.
//!
//! The IPC server and the keypad push a [`ControlToken`] once; the
//! [`Broadcaster`] hands a copy to every registered subsystem queue that
//! accepts it. The queues are unbounded, so delivery never blocks and
//! never drops a token while the receiving subsystem is alive. A closed
//! queue is reported back to the sender.
//!
//! ```text
//!  IpcServer ──┐                 ┌──▶ monitor queue
//!              ├──▶ Broadcaster ─┼──▶ keypad queue
//!  Keypad ─────┘                 └──▶ notifier queue (Stop, UpdateConfig)
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Commands fanned out to the subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlToken {
    ArmAway,
    ArmStay,
    Disarm,
    UpdateConfig,
    UpdateKeypad,
    Stop,
}

impl fmt::Display for ControlToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ArmAway => "arm_away",
            Self::ArmStay => "arm_stay",
            Self::Disarm => "disarm",
            Self::UpdateConfig => "update_config",
            Self::UpdateKeypad => "update_keypad",
            Self::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// Why a sink refused a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("queue closed")]
    Closed,
}

impl<T> From<mpsc::error::SendError<T>> for SinkError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Self::Closed
    }
}

/// A token that at least one accepting sink did not take.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{token} not delivered to {}", .sinks.join(", "))]
pub struct DeliveryError {
    pub token: ControlToken,
    pub sinks: Vec<&'static str>,
}

/// A subsystem queue registered with the broadcaster.
pub trait ControlSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Tokens this sink wants. Defaults to all of them.
    fn accepts(&self, _token: ControlToken) -> bool {
        true
    }

    fn deliver(&self, token: ControlToken) -> Result<(), SinkError>;
}

/// Sink over a plain token queue.
pub struct QueueSink {
    name: &'static str,
    tx: mpsc::UnboundedSender<ControlToken>,
}

impl QueueSink {
    pub fn new(name: &'static str, tx: mpsc::UnboundedSender<ControlToken>) -> Self {
        Self { name, tx }
    }
}

impl ControlSink for QueueSink {
    fn name(&self) -> &'static str {
        self.name
    }

    fn deliver(&self, token: ControlToken) -> Result<(), SinkError> {
        self.tx.send(token).map_err(SinkError::from)
    }
}

/// Fan-out dispatcher. Cheap to clone.
#[derive(Clone, Default)]
pub struct Broadcaster {
    sinks: Vec<Arc<dyn ControlSink>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn ControlSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Delivers `token` to every accepting sink and returns how many took
    /// it. A sink that fails does not stop delivery to the others.
    pub fn send(&self, token: ControlToken) -> Result<usize, DeliveryError> {
        let mut delivered = 0;
        let mut failed = Vec::new();
        for sink in self.sinks.iter().filter(|s| s.accepts(token)) {
            match sink.deliver(token) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(sink = sink.name(), token = %token, error = %e, "Token not delivered");
                    failed.push(sink.name());
                }
            }
        }
        debug!(token = %token, delivered, "Token broadcast");
        if failed.is_empty() {
            Ok(delivered)
        } else {
            Err(DeliveryError {
                token,
                sinks: failed,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StopOnly(mpsc::UnboundedSender<ControlToken>);

    impl ControlSink for StopOnly {
        fn name(&self) -> &'static str {
            "stop-only"
        }

        fn accepts(&self, token: ControlToken) -> bool {
            token == ControlToken::Stop
        }

        fn deliver(&self, token: ControlToken) -> Result<(), SinkError> {
            self.0.send(token).map_err(SinkError::from)
        }
    }

    #[tokio::test]
    async fn test_fan_out_respects_filters() {
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let broadcaster = Broadcaster::new()
            .with_sink(Arc::new(QueueSink::new("a", a_tx)))
            .with_sink(Arc::new(StopOnly(b_tx)));

        assert_eq!(broadcaster.send(ControlToken::ArmAway), Ok(1));
        assert_eq!(broadcaster.send(ControlToken::Stop), Ok(2));

        assert_eq!(a_rx.recv().await, Some(ControlToken::ArmAway));
        assert_eq!(a_rx.recv().await, Some(ControlToken::Stop));
        assert_eq!(b_rx.recv().await, Some(ControlToken::Stop));
    }

    #[tokio::test]
    async fn test_backlog_is_never_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broadcaster = Broadcaster::new().with_sink(Arc::new(QueueSink::new("slow", tx)));

        for _ in 0..100 {
            broadcaster.send(ControlToken::UpdateKeypad).unwrap();
        }
        broadcaster.send(ControlToken::Stop).unwrap();

        for _ in 0..100 {
            assert_eq!(rx.recv().await, Some(ControlToken::UpdateKeypad));
        }
        assert_eq!(rx.recv().await, Some(ControlToken::Stop));
    }

    #[tokio::test]
    async fn test_closed_sink_is_reported_and_others_still_served() {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        drop(closed_rx);
        let (ok_tx, mut ok_rx) = mpsc::unbounded_channel();

        let broadcaster = Broadcaster::new()
            .with_sink(Arc::new(QueueSink::new("closed", closed_tx)))
            .with_sink(Arc::new(QueueSink::new("ok", ok_tx)));

        let err = broadcaster.send(ControlToken::Disarm).unwrap_err();
        assert_eq!(err.token, ControlToken::Disarm);
        assert_eq!(err.sinks, vec!["closed"]);
        assert_eq!(err.to_string(), "disarm not delivered to closed");
        assert_eq!(ok_rx.recv().await, Some(ControlToken::Disarm));
    }
}
