//! The singleton siren alert.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use argus_core::{Alert, AlertId, AlertType, NotificationMessage, SensorSnapshot};
use argus_protocol::PushEvent;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{AlertSignal, SirenContext};

/// Siren on/off cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SirenTiming {
    /// How long the siren sounds before a pause.
    pub alert_time: Duration,
    /// Length of the pause.
    pub suspend_time: Duration,
    /// How often the alert checks for disarm and new sensors.
    pub tick: Duration,
}

impl Default for SirenTiming {
    fn default() -> Self {
        Self {
            alert_time: Duration::from_secs(10),
            suspend_time: Duration::from_secs(5),
            tick: Duration::from_secs(1),
        }
    }
}

struct SirenHandle {
    instance: u64,
    epoch: u64,
    tx: mpsc::UnboundedSender<SensorSnapshot>,
}

/// Slot holding the running siren alert, if any.
///
/// Creation and teardown both happen under the lock, so a sensor is
/// either handed to a live alert or starts a fresh one.
#[derive(Default)]
pub(super) struct Sirens {
    slot: Mutex<Option<SirenHandle>>,
    next_instance: AtomicU64,
    /// Task of the most recently started alert.
    latest: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Sirens {
    pub(super) async fn is_active(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Waits for the most recent siren alert task to end.
    pub(super) async fn finish(&self) {
        let task = self
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Siren alert task failed");
            }
        }
    }

    /// Hands `sensor` to the siren alert of `epoch`, starting one if needed.
    pub(super) async fn join(
        self: &Arc<Self>,
        ctx: &Arc<SirenContext>,
        signal: &AlertSignal,
        epoch: u64,
        alert_type: AlertType,
        sensor: SensorSnapshot,
    ) {
        let mut slot = self.slot.lock().await;

        let reusable = matches!(
            slot.as_ref(),
            Some(handle) if handle.epoch == epoch && !handle.tx.is_closed()
        );
        let mut created = None;
        if !reusable {
            let (tx, rx) = mpsc::unbounded_channel();
            let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
            *slot = Some(SirenHandle {
                instance,
                epoch,
                tx,
            });
            created = Some(SirenAlert {
                instance,
                epoch,
                alert_type,
                rx,
                sirens: Arc::clone(self),
                ctx: Arc::clone(ctx),
                signal: signal.clone(),
            });
        }

        if let Some(handle) = slot.as_ref() {
            if handle.tx.send(sensor).is_err() {
                warn!(epoch, "Siren alert queue closed, sensor dropped");
            }
        }

        // Spawned after the send so the first drain sees the sensor.
        if let Some(alert) = created {
            let task = tokio::spawn(alert.run());
            *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        }
    }
}

// ============================================================================
// Siren Alert
// ============================================================================

struct SirenAlert {
    instance: u64,
    epoch: u64,
    alert_type: AlertType,
    rx: mpsc::UnboundedReceiver<SensorSnapshot>,
    sirens: Arc<Sirens>,
    ctx: Arc<SirenContext>,
    signal: AlertSignal,
}

impl SirenAlert {
    async fn run(mut self) {
        let start_time = Utc::now();
        let mut alert = match self.ctx.store.create_alert(self.alert_type, start_time) {
            Ok(alert) => alert,
            Err(e) => {
                error!(error = %e, "Failed to persist alert, keeping it in memory");
                Alert::open(AlertId::default(), self.alert_type, start_time)
            }
        };

        self.switch(true);
        self.ctx.events.publish(PushEvent::SyrenStateChange(Some(true)));
        self.drain(&mut alert);
        self.ctx
            .events
            .publish(PushEvent::AlertStateChange(Some(alert.view())));
        info!(
            alert_id = %alert.id,
            alert_type = %self.alert_type,
            sensors = alert.sensors.len(),
            "Alert started"
        );
        self.ctx
            .notifier
            .notify(NotificationMessage::alert_started(
                alert.id,
                self.ctx.source_name.clone(),
                alert.sensor_descriptions(),
                start_time,
            ));

        let timing = self.ctx.timing;
        let mut siren_on = true;
        let mut phase_start = Instant::now();

        while !self.signal.wait(self.epoch, timing.tick).await {
            let elapsed = phase_start.elapsed();
            if siren_on && elapsed >= timing.alert_time {
                siren_on = false;
                phase_start = Instant::now();
                self.switch(false);
                self.ctx.events.publish(PushEvent::SyrenStateChange(Some(false)));
                debug!(alert_id = %alert.id, "Siren suspended");
            } else if !siren_on && elapsed >= timing.suspend_time {
                siren_on = true;
                phase_start = Instant::now();
                self.switch(true);
                self.ctx.events.publish(PushEvent::SyrenStateChange(Some(true)));
                debug!(alert_id = %alert.id, "Siren resumed");
            }

            if self.drain(&mut alert) {
                self.ctx
                    .events
                    .publish(PushEvent::AlertStateChange(Some(alert.view())));
            }
        }

        self.stop(alert).await;
    }

    async fn stop(mut self, mut alert: Alert) {
        let sirens = Arc::clone(&self.sirens);
        let mut slot = sirens.slot.lock().await;
        let owned = slot.as_ref().map(|h| h.instance) == Some(self.instance);
        if owned {
            *slot = None;
        }

        // Nothing can be queued once the slot is released.
        self.rx.close();
        self.drain(&mut alert);

        let end_time = Utc::now();
        alert.close(end_time);
        if let Err(e) = self.ctx.store.update_alert(&alert) {
            error!(alert_id = %alert.id, error = %e, "Failed to persist closed alert");
        }

        // A newer alert already owns the siren and the front-end view.
        if owned {
            self.switch(false);
            self.ctx.events.publish(PushEvent::AlertStateChange(None));
            self.ctx.events.publish(PushEvent::SyrenStateChange(None));
        }
        drop(slot);

        info!(alert_id = %alert.id, sensors = alert.sensors.len(), "Alert stopped");
        self.ctx
            .notifier
            .notify(NotificationMessage::alert_stopped(
                alert.id,
                self.ctx.source_name.clone(),
                end_time,
            ));
    }

    /// Moves queued sensors into the alert; returns true if any joined.
    fn drain(&mut self, alert: &mut Alert) -> bool {
        let mut changed = false;
        while let Ok(sensor) = self.rx.try_recv() {
            let sensor_id = sensor.id;
            if alert.add_sensor(sensor) {
                debug!(alert_id = %alert.id, sensor_id = %sensor_id, "Sensor joined alert");
                changed = true;
            }
        }

        if changed {
            if let Err(e) = self.ctx.store.update_alert(alert) {
                error!(alert_id = %alert.id, error = %e, "Failed to persist alert sensors");
            }
        }
        changed
    }

    fn switch(&self, on: bool) {
        if let Err(e) = self.ctx.siren.set(on) {
            error!(on, error = %e, "Failed to switch siren");
        }
    }
}
