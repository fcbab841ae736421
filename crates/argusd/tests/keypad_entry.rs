//! Keypad controller against the simulated panel.
//!
//! Presses are queued on a `MockPanel` and read one per communication
//! cycle, so each test runs for a few real seconds.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::sync::Arc;
use std::time::Duration;

use argus_core::{hash_access_code, KeypadSettings, KeypadType, MonitoringState, User};
use argusd::broadcast::{Broadcaster, ControlToken, QueueSink};
use argusd::keypad::{KeypadController, MockPanel, SimulatedDrivers};
use argusd::state::SharedStateStore;
use argusd::storage::{MemoryStore, StoreData};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

// ============================================================================
// Test Helpers
// ============================================================================

const SALT: &str = "keypad-test";

/// Longest wait for anything a few communication cycles away.
const CYCLES_TIMEOUT: Duration = Duration::from_secs(6);

struct TestKeypad {
    panel: MockPanel,
    state: SharedStateStore,
    store: Arc<MemoryStore>,
    control: mpsc::UnboundedSender<ControlToken>,
    broadcast: mpsc::UnboundedReceiver<ControlToken>,
    task: JoinHandle<()>,
}

impl TestKeypad {
    fn start(settings: Option<KeypadSettings>) -> Self {
        let store = Arc::new(MemoryStore::new(StoreData {
            users: vec![User {
                id: 1,
                name: "owner".to_string(),
                fourkey_code: hash_access_code("1234", SALT),
            }],
            keypad: settings,
            ..StoreData::default()
        }));
        let panel = MockPanel::new();
        let state = SharedStateStore::new();
        let (broadcast_tx, broadcast) = mpsc::unbounded_channel();
        let (control, rx) = mpsc::unbounded_channel();

        let controller = KeypadController::new(
            rx,
            Broadcaster::new().with_sink(Arc::new(QueueSink::new("test", broadcast_tx))),
            store.clone(),
            state.subscribe(),
            Arc::new(SimulatedDrivers {
                panel: panel.clone(),
            }),
            SALT,
        );

        Self {
            panel,
            state,
            store,
            control,
            broadcast,
            task: tokio::spawn(controller.run()),
        }
    }

    async fn eventually(&self, what: &str, check: impl Fn(&MockPanel) -> bool) {
        let deadline = tokio::time::Instant::now() + CYCLES_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if check(&self.panel) {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("{what} did not happen within {CYCLES_TIMEOUT:?}");
    }

    async fn stop(self) {
        self.control.send(ControlToken::Stop).unwrap();
        timeout(CYCLES_TIMEOUT, self.task).await.unwrap().unwrap();
    }
}

fn dsc(enabled: bool) -> Option<KeypadSettings> {
    Some(KeypadSettings {
        keypad_type: Some(KeypadType::Dsc),
        enabled,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_valid_code_broadcasts_disarm() {
    let mut keypad = TestKeypad::start(dsc(true));
    keypad
        .eventually("initialisation", MockPanel::is_initialised)
        .await;

    keypad.panel.type_code("1234");
    let token = timeout(CYCLES_TIMEOUT, keypad.broadcast.recv())
        .await
        .expect("disarm broadcast")
        .unwrap();
    assert_eq!(token, ControlToken::Disarm);
    assert_eq!(keypad.panel.invalid_codes(), 0);

    keypad.stop().await;
}

#[tokio::test]
async fn test_wrong_code_is_signalled_on_the_keypad() {
    let mut keypad = TestKeypad::start(dsc(true));
    keypad
        .eventually("initialisation", MockPanel::is_initialised)
        .await;

    keypad.panel.type_code("9999");
    keypad
        .eventually("invalid code signal", |p| p.invalid_codes() == 1)
        .await;
    assert!(keypad.broadcast.try_recv().is_err());

    keypad.stop().await;
}

#[tokio::test]
async fn test_lights_follow_arm_and_state() {
    let keypad = TestKeypad::start(dsc(true));

    keypad.state.set_monitoring(MonitoringState::Ready);
    keypad.eventually("ready light", MockPanel::is_ready).await;

    keypad.control.send(ControlToken::ArmAway).unwrap();
    keypad.eventually("armed light", MockPanel::is_armed).await;

    keypad.state.set_monitoring(MonitoringState::InvalidConfig);
    keypad.eventually("error light", MockPanel::has_error).await;
    assert!(!keypad.panel.is_ready());

    keypad.control.send(ControlToken::Disarm).unwrap();
    keypad.eventually("armed light off", |p| !p.is_armed()).await;

    keypad.stop().await;
}

#[tokio::test]
async fn test_disabled_keypad_ignores_presses_until_enabled() {
    let mut keypad = TestKeypad::start(dsc(false));

    keypad.panel.type_code("1234");
    keypad.control.send(ControlToken::ArmAway).unwrap();
    sleep(Duration::from_secs(3)).await;
    assert!(!keypad.panel.is_initialised());
    assert!(!keypad.panel.is_armed());
    assert!(keypad.broadcast.try_recv().is_err());

    let mut data = keypad.store.data();
    data.keypad = dsc(true);
    keypad.store.replace(data);
    keypad.control.send(ControlToken::UpdateKeypad).unwrap();

    // The presses queued while disabled are still on the panel.
    let token = timeout(CYCLES_TIMEOUT, keypad.broadcast.recv())
        .await
        .expect("disarm after enabling")
        .unwrap();
    assert_eq!(token, ControlToken::Disarm);
    assert!(keypad.panel.is_initialised());

    keypad.stop().await;
}
