//! End-to-end escalation scenarios on simulated hardware.
//!
//! The monitor runs against in-memory sensors, a logging siren and a
//! memory store, with tokio's clock paused so the zone delays elapse
//! instantly and deterministically.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::sync::Arc;
use std::time::Duration;

use argus_core::{
    AlertType, ArmType, MonitoringState, NotificationKind, Sensor, SensorId, Zone, ZoneId,
};
use argus_hw::{LoggingSiren, SimulatedPower, SimulatedSensors};
use argusd::alert::{AlertSignal, Escalator, SirenContext, SirenTiming};
use argusd::broadcast::{Broadcaster, ControlToken, QueueSink};
use argusd::events::EventPublisher;
use argusd::monitor::{Monitor, MonitorInputs, MonitorSettings};
use argusd::notifier::{self, NotifierItem};
use argusd::state::SharedStateStore;
use argusd::storage::{MemoryStore, Store, StoreData};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

// ============================================================================
// Test Helpers
// ============================================================================

const TRIGGERED: f64 = 1.0;
const IDLE: f64 = 0.0;

fn zone(id: u32, disarmed: Option<u64>, away: Option<u64>, stay: Option<u64>) -> Zone {
    Zone {
        id: ZoneId(id),
        name: format!("zone {id}"),
        description: String::new(),
        disarmed_delay: disarmed,
        away_delay: away,
        stay_delay: stay,
        deleted: false,
    }
}

fn sensor(id: u32, channel: u32, zone: u32) -> Sensor {
    Sensor {
        id: SensorId(id),
        channel,
        zone_id: ZoneId(zone),
        type_id: 1,
        description: format!("sensor {id}"),
        reference_value: Some(IDLE),
        alert: false,
        enabled: true,
        deleted: false,
    }
}

struct Harness {
    broadcaster: Broadcaster,
    state: SharedStateStore,
    store: Arc<MemoryStore>,
    sensors: Arc<SimulatedSensors>,
    siren: Arc<LoggingSiren>,
    notifications: mpsc::UnboundedReceiver<NotifierItem>,
    task: JoinHandle<()>,
}

impl Harness {
    fn start(channels: usize, data: StoreData) -> Self {
        let store = Arc::new(MemoryStore::new(data));
        let sensors = Arc::new(SimulatedSensors::new(channels));
        let siren = Arc::new(LoggingSiren::default());
        let state = SharedStateStore::new();
        let events = EventPublisher::new();
        let (notifier, notifications) = notifier::queue();
        let (tx, rx) = mpsc::unbounded_channel();

        let dyn_store: Arc<dyn Store> = store.clone();
        let escalator = Escalator::new(
            AlertSignal::new(),
            SirenContext {
                siren: siren.clone(),
                store: Arc::clone(&dyn_store),
                events: events.clone(),
                state: state.clone(),
                notifier,
                timing: SirenTiming::default(),
                source_name: "test house".to_string(),
            },
        );

        let monitor = Monitor::new(
            rx,
            MonitorInputs {
                sensors: sensors.clone(),
                power: Arc::new(SimulatedPower::default()),
            },
            dyn_store,
            state.clone(),
            events,
            escalator,
            MonitorSettings {
                sample_period: Duration::from_millis(500),
                tolerance: 0.1,
                calibration_cycles: 1,
                calibration_interval: Duration::from_secs(1),
            },
        );

        Self {
            broadcaster: Broadcaster::new().with_sink(Arc::new(QueueSink::new("monitor", tx))),
            state,
            store,
            sensors,
            siren,
            notifications,
            task: tokio::spawn(monitor.run()),
        }
    }

    fn send(&self, token: ControlToken) {
        assert_eq!(self.broadcaster.send(token), Ok(1));
    }

    async fn wait_for(&self, want: MonitoringState) {
        for _ in 0..100 {
            if self.state.monitoring() == want {
                return;
            }
            sleep(Duration::from_millis(100)).await;
        }
        panic!(
            "state {:?} not reached, still {:?}",
            want,
            self.state.monitoring()
        );
    }

    async fn arm(&self, token: ControlToken) {
        self.wait_for(MonitoringState::Ready).await;
        self.send(token);
        self.wait_for(MonitoringState::Armed).await;
    }

    fn alerts(&self) -> Vec<argus_core::Alert> {
        self.store.data().alerts
    }

    fn drain_notifications(&mut self) -> Vec<NotificationKind> {
        let mut kinds = Vec::new();
        while let Ok(item) = self.notifications.try_recv() {
            if let NotifierItem::Message(message) = item {
                kinds.push(message.kind);
            }
        }
        kinds
    }

    async fn stop(self) {
        self.send(ControlToken::Stop);
        self.task.await.unwrap();
    }
}

fn single_zone(disarmed: Option<u64>, away: Option<u64>, stay: Option<u64>) -> StoreData {
    StoreData {
        sensors: vec![sensor(1, 0, 1), sensor(2, 1, 1)],
        zones: vec![zone(1, disarmed, away, stay)],
        ..StoreData::default()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_away_alert_after_delay() {
    let mut h = Harness::start(4, single_zone(None, Some(20), None));
    h.arm(ControlToken::ArmAway).await;

    h.sensors.set(0, TRIGGERED);
    sleep(Duration::from_secs(19)).await;
    assert!(h.alerts().is_empty(), "alert before the zone delay");
    assert!(!h.siren.is_on());

    sleep(Duration::from_secs(2)).await;
    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::Away);
    assert!(alerts[0].is_open());
    assert!(h.siren.is_on());
    assert_eq!(h.drain_notifications(), vec![NotificationKind::AlertStarted]);

    h.send(ControlToken::Disarm);
    h.wait_for(MonitoringState::Ready).await;
    sleep(Duration::from_secs(2)).await;

    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1, "disarm must not open another alert");
    assert!(!alerts[0].is_open());
    assert!(!h.siren.is_on());
    assert_eq!(h.state.arm(), ArmType::Disarm);
    assert_eq!(h.drain_notifications(), vec![NotificationKind::AlertStopped]);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_disarm_before_delay_prevents_alert() {
    let mut h = Harness::start(4, single_zone(None, Some(20), None));
    h.arm(ControlToken::ArmAway).await;

    h.sensors.set(0, TRIGGERED);
    sleep(Duration::from_secs(19)).await;
    h.send(ControlToken::Disarm);

    sleep(Duration::from_secs(30)).await;
    assert!(h.alerts().is_empty());
    assert_eq!(h.siren.switch_count(), 0);
    assert!(h.drain_notifications().is_empty());

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_two_sensors_share_one_alert() {
    let h = Harness::start(4, single_zone(None, Some(20), None));
    h.arm(ControlToken::ArmAway).await;

    h.sensors.set(0, TRIGGERED);
    sleep(Duration::from_secs(1)).await;
    h.sensors.set(1, TRIGGERED);

    sleep(Duration::from_secs(25)).await;
    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains(SensorId(1)));
    assert!(alerts[0].contains(SensorId(2)));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stay_zone_ignored_when_armed_away() {
    let h = Harness::start(4, single_zone(None, None, Some(5)));
    h.arm(ControlToken::ArmAway).await;

    h.sensors.set(0, TRIGGERED);
    sleep(Duration::from_secs(30)).await;
    assert!(h.alerts().is_empty());

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sabotage_while_disarmed() {
    let h = Harness::start(4, single_zone(Some(2), None, None));
    h.wait_for(MonitoringState::Ready).await;

    h.sensors.set(0, TRIGGERED);
    h.wait_for(MonitoringState::Sabotage).await;

    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::Sabotage);
    assert!(h.siren.is_on());

    h.send(ControlToken::Disarm);
    h.wait_for(MonitoringState::Ready).await;
    sleep(Duration::from_secs(2)).await;
    assert!(!h.siren.is_on());

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sabotage_wins_over_arm_delay() {
    let h = Harness::start(4, single_zone(Some(2), Some(20), Some(20)));
    h.arm(ControlToken::ArmStay).await;

    h.sensors.set(0, TRIGGERED);
    sleep(Duration::from_secs(4)).await;

    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::Sabotage);
    assert_eq!(h.state.monitoring(), MonitoringState::Sabotage);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_too_many_sensors_is_invalid_config() {
    let data = StoreData {
        sensors: vec![sensor(1, 0, 1), sensor(2, 1, 1), sensor(3, 2, 1)],
        zones: vec![zone(1, Some(1), Some(1), Some(1))],
        ..StoreData::default()
    };
    let h = Harness::start(2, data);
    h.wait_for(MonitoringState::InvalidConfig).await;

    // Nothing is monitored and arming is refused.
    h.send(ControlToken::ArmAway);
    h.sensors.set(0, TRIGGERED);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.state.monitoring(), MonitoringState::InvalidConfig);
    assert_eq!(h.state.arm(), ArmType::Disarm);
    assert!(h.alerts().is_empty());

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_update_config_recovers_and_calibrates() {
    let data = StoreData {
        sensors: vec![sensor(1, 0, 1), sensor(2, 1, 1), sensor(3, 2, 1)],
        zones: vec![zone(1, None, Some(1), None)],
        ..StoreData::default()
    };
    let h = Harness::start(2, data);
    h.wait_for(MonitoringState::InvalidConfig).await;

    let mut fixed = h.store.data();
    fixed.sensors.truncate(2);
    fixed.sensors[1].reference_value = None;
    h.store.replace(fixed);
    h.sensors.set(1, 0.5);

    h.send(ControlToken::UpdateConfig);
    h.wait_for(MonitoringState::Ready).await;

    let stored = h.store.data();
    assert_eq!(stored.sensors[1].reference_value, Some(0.5));

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sabotage_clearing_returns_to_ready() {
    let h = Harness::start(4, single_zone(Some(2), None, None));
    h.wait_for(MonitoringState::Ready).await;

    h.sensors.set(0, TRIGGERED);
    h.wait_for(MonitoringState::Sabotage).await;

    h.sensors.set(0, IDLE);
    h.wait_for(MonitoringState::Ready).await;
    assert_eq!(h.state.arm(), ArmType::Disarm);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sabotage_clearing_while_armed_returns_to_armed() {
    let h = Harness::start(4, single_zone(Some(2), Some(20), None));
    h.arm(ControlToken::ArmAway).await;

    h.sensors.set(0, TRIGGERED);
    h.wait_for(MonitoringState::Sabotage).await;
    assert_eq!(h.state.arm(), ArmType::Away);

    h.sensors.set(0, IDLE);
    h.wait_for(MonitoringState::Armed).await;
    assert_eq!(h.state.arm(), ArmType::Away);

    // Still disarmable from the restored state.
    h.send(ControlToken::Disarm);
    h.wait_for(MonitoringState::Ready).await;
    assert_eq!(h.state.arm(), ArmType::Disarm);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_update_config_while_armed_disarms() {
    let h = Harness::start(4, single_zone(None, Some(5), None));
    h.arm(ControlToken::ArmAway).await;

    h.send(ControlToken::UpdateConfig);
    h.wait_for(MonitoringState::Ready).await;
    assert_eq!(h.state.arm(), ArmType::Disarm);

    // Away zones stay quiet once disarmed.
    h.sensors.set(0, TRIGGERED);
    sleep(Duration::from_secs(30)).await;
    assert!(h.alerts().is_empty());
    assert_eq!(h.siren.switch_count(), 0);

    h.sensors.set(0, IDLE);
    sleep(Duration::from_secs(1)).await;
    h.arm(ControlToken::ArmAway).await;
    assert_eq!(h.state.arm(), ArmType::Away);

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_tokens_queued_during_calibration_are_kept() {
    let h = Harness::start(4, single_zone(None, Some(20), None));
    h.wait_for(MonitoringState::Ready).await;

    let mut data = h.store.data();
    data.sensors[0].reference_value = None;
    h.store.replace(data);

    // The monitor does not read its queue while it calibrates.
    h.send(ControlToken::UpdateConfig);
    for _ in 0..40 {
        h.send(ControlToken::UpdateKeypad);
    }
    h.send(ControlToken::ArmAway);

    h.wait_for(MonitoringState::Armed).await;
    assert_eq!(h.state.arm(), ArmType::Away);
    assert!(h.store.data().sensors[0].reference_value.is_some());

    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_siren_cycles_on_and_off() {
    let h = Harness::start(4, single_zone(None, Some(5), None));
    h.arm(ControlToken::ArmAway).await;

    h.sensors.set(0, TRIGGERED);
    for _ in 0..100 {
        if h.siren.is_on() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    assert!(h.siren.is_on(), "siren did not start");
    assert_eq!(h.siren.switch_count(), 1);

    // 10 s on, 5 s off, checked half a second away from each edge.
    sleep(Duration::from_millis(9_500)).await;
    assert!(h.siren.is_on());
    sleep(Duration::from_secs(1)).await;
    assert!(!h.siren.is_on());
    assert_eq!(h.siren.switch_count(), 2);

    sleep(Duration::from_secs(4)).await;
    assert!(!h.siren.is_on());
    sleep(Duration::from_secs(1)).await;
    assert!(h.siren.is_on());
    assert_eq!(h.siren.switch_count(), 3);

    sleep(Duration::from_secs(9)).await;
    assert!(h.siren.is_on());
    sleep(Duration::from_secs(1)).await;
    assert!(!h.siren.is_on());
    assert_eq!(h.siren.switch_count(), 4);

    h.send(ControlToken::Disarm);
    h.wait_for(MonitoringState::Ready).await;
    h.stop().await;
}
