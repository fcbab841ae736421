//! The arm state machine and sensor scan loop.
//!
//! The monitor is the single writer of arm and monitoring state. Every
//! sample period it applies at most one control token, then checks the
//! power source, scans the sensors and starts escalations for sensors that
//! just began alerting.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` in production code
//! - Hardware read failures skip the sensor for this cycle
//! - Persistence failures are logged; in-memory state stays authoritative

mod loader;

pub use loader::{assign_references, measure_references, validate, LoadError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use argus_core::{
    AlertType, ArmType, MonitoringState, PowerSource, Sensor, SensorId, Zone, ZoneId,
};
use argus_hw::{PowerAdapter, SensorAdapter};
use argus_protocol::PushEvent;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::alert::{Escalation, Escalator};
use crate::broadcast::ControlToken;
use crate::config::MonitorConfig;
use crate::events::EventPublisher;
use crate::state::SharedStateStore;
use crate::storage::Store;

/// Loop and calibration parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    pub sample_period: Duration,
    pub tolerance: f64,
    pub calibration_cycles: u32,
    pub calibration_interval: Duration,
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            sample_period: config.sample_period(),
            tolerance: config.tolerance,
            calibration_cycles: config.calibration_cycles,
            calibration_interval: Duration::from_secs(config.calibration_interval_secs),
        }
    }
}

/// Hardware the monitor samples.
pub struct MonitorInputs {
    pub sensors: Arc<dyn SensorAdapter>,
    pub power: Arc<dyn PowerAdapter>,
}

pub struct Monitor {
    rx: mpsc::UnboundedReceiver<ControlToken>,
    inputs: MonitorInputs,
    store: Arc<dyn Store>,
    state: SharedStateStore,
    events: EventPublisher,
    escalator: Escalator,
    settings: MonitorSettings,

    sensors: Vec<Sensor>,
    zones: HashMap<ZoneId, Zone>,
    tracked: HashMap<SensorId, Escalation>,
    power: Option<PowerSource>,
}

impl Monitor {
    pub fn new(
        rx: mpsc::UnboundedReceiver<ControlToken>,
        inputs: MonitorInputs,
        store: Arc<dyn Store>,
        state: SharedStateStore,
        events: EventPublisher,
        escalator: Escalator,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            rx,
            inputs,
            store,
            state,
            events,
            escalator,
            settings,
            sensors: Vec::new(),
            zones: HashMap::new(),
            tracked: HashMap::new(),
            power: None,
        }
    }

    /// Runs until a Stop token arrives or the queue closes.
    pub async fn run(mut self) {
        info!("Monitor started");
        self.startup().await;

        loop {
            match timeout(self.settings.sample_period, self.rx.recv()).await {
                Ok(Some(ControlToken::Stop)) | Ok(None) => break,
                Ok(Some(token)) => self.handle_token(token).await,
                Err(_) => {}
            }

            self.check_power();
            self.scan_sensors();
            self.handle_alerts();
        }

        self.stop().await;
        info!("Monitor stopped");
    }

    async fn startup(&mut self) {
        self.state.set_monitoring(MonitoringState::Startup);
        self.state.set_arm(ArmType::Disarm);

        match self.store.cleanup(Utc::now()) {
            Ok(report) => debug!(
                cleared_sensors = report.cleared_sensors,
                closed_alerts = report.closed_alerts,
                "Stale state cleaned up"
            ),
            Err(e) => error!(error = %e, "Failed to clean up stale state"),
        }

        self.events.publish(PushEvent::AlertStateChange(None));
        self.events.publish(PushEvent::SyrenStateChange(None));
        self.events.publish(PushEvent::ArmStateChange(ArmType::Disarm));

        self.load_config().await;
    }

    async fn stop(&mut self) {
        self.escalator.signal().set();
        for (_, escalation) in self.tracked.drain() {
            escalation.join().await;
        }
        self.escalator.finish().await;
    }

    async fn handle_token(&mut self, token: ControlToken) {
        debug!(token = %token, "Monitor token");
        match token {
            ControlToken::ArmAway => self.arm(ArmType::Away),
            ControlToken::ArmStay => self.arm(ArmType::Stay),
            ControlToken::Disarm => self.disarm(),
            ControlToken::UpdateConfig => self.load_config().await,
            ControlToken::UpdateKeypad | ControlToken::Stop => {}
        }
    }

    // ========================================================================
    // Arm state
    // ========================================================================

    fn arm(&mut self, arm: ArmType) {
        let current = self.state.monitoring();
        if current != MonitoringState::Ready {
            warn!(arm = %arm, state = %current, "Cannot arm in current state, ignored");
            return;
        }

        self.state.set_arm(arm);
        self.state.set_monitoring(MonitoringState::Armed);
        self.escalator.signal().clear();
        self.events.publish(PushEvent::ArmStateChange(arm));
        self.events
            .publish(PushEvent::SystemStateChange(MonitoringState::Armed));
        info!(arm = %arm, "System armed");
    }

    fn disarm(&mut self) {
        let current = self.state.snapshot();
        let disarmable = (current.monitoring == MonitoringState::Armed && current.arm.is_armed())
            || current.monitoring == MonitoringState::Sabotage;

        if disarmable {
            self.state.set_arm(ArmType::Disarm);
            self.state.set_monitoring(MonitoringState::Ready);
            self.events.publish(PushEvent::ArmStateChange(ArmType::Disarm));
            self.events
                .publish(PushEvent::SystemStateChange(MonitoringState::Ready));
            info!(from = %current.monitoring, "System disarmed");
        } else {
            debug!(state = %current.monitoring, "Nothing to disarm");
        }

        // Aborts in-flight escalations and a running siren in any case.
        self.escalator.signal().set();
    }

    fn set_state(&self, state: MonitoringState) {
        self.state.set_monitoring(state);
        self.events.publish(PushEvent::SystemStateChange(state));
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Reloads sensors and zones. An armed system is disarmed first, since
    /// the reload always ends in Ready or InvalidConfig.
    async fn load_config(&mut self) {
        let arm = self.state.arm();
        if arm.is_armed() {
            info!(arm = %arm, "Disarming for config reload");
            self.state.set_arm(ArmType::Disarm);
            self.escalator.signal().set();
            self.events.publish(PushEvent::ArmStateChange(ArmType::Disarm));
        }
        self.set_state(MonitoringState::UpdatingConfig);
        self.events.publish(PushEvent::SensorsStateChange(None));

        match self.try_load_config().await {
            Ok(()) => {
                info!(sensors = self.sensors.len(), "Sensor config loaded");
                self.set_state(MonitoringState::Ready);
            }
            Err(e) => {
                error!(error = %e, "Invalid sensor config");
                self.sensors.clear();
                self.set_state(MonitoringState::InvalidConfig);
            }
        }

        self.events.publish(PushEvent::SensorsStateChange(Some(false)));
    }

    async fn try_load_config(&mut self) -> Result<(), LoadError> {
        self.sensors.clear();
        let mut sensors = self.store.load_sensors()?;
        let zones: HashMap<ZoneId, Zone> = self
            .store
            .load_zones()?
            .into_iter()
            .map(|zone| (zone.id, zone))
            .collect();

        validate(&sensors, &zones, self.inputs.sensors.channel_count())?;

        if sensors.iter().any(|s| s.reference_value.is_none()) {
            info!("Found sensor(s) without reference value, calibrating");
            let references = measure_references(
                self.inputs.sensors.as_ref(),
                self.settings.calibration_cycles,
                self.settings.calibration_interval,
            )
            .await?;
            let saved = assign_references(&mut sensors, &references);
            self.store.save_sensor_references(&saved)?;
            info!(references = ?references, "Sensor references saved");
        }

        self.sensors = sensors;
        self.zones = zones;
        Ok(())
    }

    // ========================================================================
    // Sampling
    // ========================================================================

    fn check_power(&mut self) {
        let source = match self.inputs.power.source() {
            Ok(source) => source,
            Err(e) => {
                debug!(error = %e, "Failed to read power source");
                return;
            }
        };

        match (self.power, source) {
            (None, _) => info!(source = %source, "Power source detected"),
            (Some(PowerSource::Network), PowerSource::Battery) => warn!("Power outage started"),
            (Some(PowerSource::Battery), PowerSource::Network) => info!("Power outage ended"),
            _ => {}
        }
        self.power = Some(source);
        self.state.set_power(source);
    }

    fn scan_sensors(&mut self) {
        let mut changed = false;
        for sensor in &mut self.sensors {
            let value = match self.inputs.sensors.read_channel(sensor.channel) {
                Ok(value) => value,
                Err(e) => {
                    debug!(sensor_id = %sensor.id, error = %e, "Failed to read sensor");
                    continue;
                }
            };

            let alerting = sensor.is_triggered_by(value, self.settings.tolerance);
            if alerting != sensor.alert {
                debug!(
                    sensor_id = %sensor.id,
                    channel = sensor.channel,
                    reference = ?sensor.reference_value,
                    value,
                    alerting,
                    "Sensor state changed"
                );
                sensor.alert = alerting;
                changed = true;
            }
        }

        if !changed {
            return;
        }

        let any_alerting = self.sensors.iter().any(|s| s.alert);
        self.events
            .publish(PushEvent::SensorsStateChange(Some(any_alerting)));

        let flags: Vec<(SensorId, bool)> = self.sensors.iter().map(|s| (s.id, s.alert)).collect();
        if let Err(e) = self.store.save_sensor_alerts(&flags) {
            error!(error = %e, "Failed to persist sensor alert flags");
        }
    }

    fn handle_alerts(&mut self) {
        let arm = self.state.arm();

        for sensor in &self.sensors {
            let tracked = self.tracked.contains_key(&sensor.id);

            if sensor.alert && !tracked && sensor.enabled {
                let Some(zone) = self.zones.get(&sensor.zone_id) else {
                    continue;
                };
                let Some((alert_type, delay)) = zone.escalation(arm) else {
                    continue;
                };

                // A stale set signal would cancel the new timer at once.
                self.escalator.signal().clear();
                let escalation = self.escalator.start(sensor.snapshot(), alert_type, delay);
                self.tracked.insert(sensor.id, escalation);
            } else if !sensor.alert && tracked {
                let Some(escalation) = self.tracked.remove(&sensor.id) else {
                    continue;
                };
                if escalation.alert_type == AlertType::Sabotage && escalation.has_fired() {
                    let back_to = if arm.is_armed() {
                        MonitoringState::Armed
                    } else {
                        MonitoringState::Ready
                    };
                    info!(sensor_id = %sensor.id, state = %back_to, "Sabotage cleared");
                    self.set_state(back_to);
                }
            }
        }
    }
}
