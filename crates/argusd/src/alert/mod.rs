//! Alert escalation: per-sensor delay timers feeding one siren alert.
//!
//! ```text
//!  Monitor ── start() ──▶ escalation timer (one task per sensor)
//!                              │ delay elapsed, not cancelled
//!                              ▼
//!                         siren slot (Mutex) ── creates at most one ──▶ SirenAlert task
//!                              │                                         │
//!                              └── sensor snapshot ──▶ sensor queue ─────┘
//! ```
//!
//! Cancellation goes through one [`AlertSignal`]. Setting it bumps an epoch
//! counter; every timer and siren remembers the epoch it started in, so a
//! disarm is observed even if the flag is cleared again before the waiter
//! gets scheduled.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` in production code
//! - Storage and siren failures are logged; the alert keeps running

mod siren;

pub use siren::SirenTiming;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use argus_core::{AlertType, MonitoringState, SensorId, SensorSnapshot};
use argus_hw::SirenOutput;
use argus_protocol::PushEvent;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info};

use crate::events::EventPublisher;
use crate::notifier::NotifierHandle;
use crate::state::SharedStateStore;
use crate::storage::Store;

use siren::Sirens;

// ============================================================================
// Alert Signal
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct SignalState {
    set: bool,
    epoch: u64,
}

/// The shared "stop all escalations" signal.
#[derive(Clone)]
pub struct AlertSignal {
    tx: Arc<watch::Sender<SignalState>>,
}

impl AlertSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SignalState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Cancels every waiter started before this call.
    pub fn set(&self) {
        self.tx.send_modify(|s| {
            s.set = true;
            s.epoch = s.epoch.wrapping_add(1);
        });
    }

    pub fn clear(&self) {
        self.tx.send_if_modified(|s| std::mem::replace(&mut s.set, false));
    }

    pub fn is_set(&self) -> bool {
        self.tx.borrow().set
    }

    /// Current epoch; captured by waiters when they start.
    pub fn epoch(&self) -> u64 {
        self.tx.borrow().epoch
    }

    /// Waits up to `limit` for a cancellation.
    ///
    /// Returns true if the signal is set or was set at any time after
    /// `epoch` was captured.
    pub async fn wait(&self, epoch: u64, limit: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let cancelled = timeout(limit, rx.wait_for(|s| s.set || s.epoch != epoch))
            .await
            .is_ok();
        cancelled
    }
}

impl Default for AlertSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Escalator
// ============================================================================

/// Collaborators of the siren alert.
pub struct SirenContext {
    pub siren: Arc<dyn SirenOutput>,
    pub store: Arc<dyn Store>,
    pub events: EventPublisher,
    pub state: SharedStateStore,
    pub notifier: NotifierHandle,
    pub timing: SirenTiming,
    /// Installation name used in notifications.
    pub source_name: String,
}

/// A running or finished escalation timer.
pub struct Escalation {
    pub sensor_id: SensorId,
    pub alert_type: AlertType,
    fired: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Escalation {
    /// True once the delay elapsed without cancellation.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the timer task to end.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(sensor_id = %self.sensor_id, error = %e, "Escalation task failed");
        }
    }
}

/// Starts escalation timers and owns the siren slot.
#[derive(Clone)]
pub struct Escalator {
    signal: AlertSignal,
    sirens: Arc<Sirens>,
    ctx: Arc<SirenContext>,
}

impl Escalator {
    pub fn new(signal: AlertSignal, ctx: SirenContext) -> Self {
        Self {
            signal,
            sirens: Arc::new(Sirens::default()),
            ctx: Arc::new(ctx),
        }
    }

    pub fn signal(&self) -> &AlertSignal {
        &self.signal
    }

    /// Starts the delay timer of a sensor that just began alerting.
    pub fn start(&self, sensor: SensorSnapshot, alert_type: AlertType, delay: Duration) -> Escalation {
        let epoch = self.signal.epoch();
        let fired = Arc::new(AtomicBool::new(false));
        let sensor_id = sensor.id;
        let task = tokio::spawn(self.clone().run_timer(
            sensor,
            alert_type,
            delay,
            epoch,
            Arc::clone(&fired),
        ));

        Escalation {
            sensor_id,
            alert_type,
            fired,
            task,
        }
    }

    async fn run_timer(
        self,
        sensor: SensorSnapshot,
        alert_type: AlertType,
        delay: Duration,
        epoch: u64,
        fired: Arc<AtomicBool>,
    ) {
        info!(
            sensor_id = %sensor.id,
            alert_type = %alert_type,
            delay_secs = delay.as_secs(),
            "Sensor alert started, waiting before siren"
        );

        if self.signal.wait(epoch, delay).await {
            info!(sensor_id = %sensor.id, "Sensor alert cancelled");
            return;
        }

        info!(
            sensor_id = %sensor.id,
            alert_type = %alert_type,
            "Not disarmed in time, starting siren"
        );
        let sensor_id = sensor.id;
        self.sirens
            .join(&self.ctx, &self.signal, epoch, alert_type, sensor)
            .await;
        fired.store(true, Ordering::SeqCst);

        if alert_type == AlertType::Sabotage {
            info!(sensor_id = %sensor_id, "Sabotage detected");
            self.ctx.state.set_monitoring(MonitoringState::Sabotage);
            self.ctx
                .events
                .publish(PushEvent::SystemStateChange(MonitoringState::Sabotage));
        }
    }

    /// Whether a siren alert currently occupies the slot.
    pub async fn siren_active(&self) -> bool {
        self.sirens.is_active().await
    }

    /// Waits for the current siren alert, if any, to finish its teardown.
    pub async fn finish(&self) {
        self.sirens.finish().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_signal() {
        let signal = AlertSignal::new();
        assert!(!signal.wait(signal.epoch(), Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_then_clear_still_cancels_old_waiters() {
        let signal = AlertSignal::new();
        let epoch = signal.epoch();

        signal.set();
        signal.clear();
        assert!(!signal.is_set());

        assert!(signal.wait(epoch, Duration::from_secs(5)).await);
        // a waiter from the new epoch is not affected
        assert!(!signal.wait(signal.epoch(), Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_wakes_pending_waiter() {
        let signal = AlertSignal::new();
        let epoch = signal.epoch();

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait(epoch, Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_secs(10)).await;
        signal.set();

        assert!(waiter.await.unwrap());
    }
}
