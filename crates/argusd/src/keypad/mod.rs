//! Keypad controller.
//!
//! Runs one communication cycle every [`COMMUNICATION_PERIOD`]: apply at
//! most one control token, mirror the monitoring state onto the keypad
//! lights, exchange the status message and feed any key press into code
//! entry. A valid code broadcasts `Disarm`; the token comes back through
//! the keypad's own queue and switches the armed light off.
//!
//! The bit-banged exchange blocks for milliseconds, so the driver is moved
//! onto tokio's blocking pool for every call and moved back afterwards.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` in production code
//! - A failed exchange is logged and retried next cycle

pub mod code;
pub mod dsc;
pub mod mock;
pub mod protocol;

pub use code::{CodeEntry, CodeOutcome, CODE_LENGTH, CODE_TIMEOUT};
pub use dsc::DscKeypad;
pub use mock::{DisabledKeypad, MockKeypad, MockPanel};
pub use protocol::{Button, Lights};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use argus_core::{KeypadSettings, KeypadType, MonitoringState};
use argus_hw::{GpioKeybus, HwResult};
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::broadcast::{Broadcaster, ControlToken};
use crate::state::SharedState;
use crate::storage::Store;

/// Interval between keypad exchanges.
pub const COMMUNICATION_PERIOD: Duration = Duration::from_millis(500);

/// Driver capabilities shared by every keypad variant.
pub trait Keypad: Send {
    fn initialise(&mut self) -> HwResult<()>;

    /// Runs one status exchange.
    fn communicate(&mut self) -> HwResult<()>;

    fn set_armed(&mut self, armed: bool) -> HwResult<()>;

    fn set_error(&mut self, error: bool) -> HwResult<()>;

    fn set_ready(&mut self, ready: bool) -> HwResult<()>;

    fn invalid_code(&mut self) -> HwResult<()>;

    /// Takes the button seen during the last exchange, if any.
    fn last_pressed(&mut self) -> Option<Button>;
}

// ============================================================================
// Driver selection
// ============================================================================

/// Builds the driver matching the configured keypad.
pub trait DriverFactory: Send + Sync {
    fn create(&self, settings: &KeypadSettings) -> HwResult<Box<dyn Keypad>>;
}

/// Real drivers on GPIO.
#[derive(Debug, Clone)]
pub struct HardwareDrivers {
    pub gpio_root: PathBuf,
    pub clock_pin: u32,
    pub data_pin: u32,
}

impl DriverFactory for HardwareDrivers {
    fn create(&self, settings: &KeypadSettings) -> HwResult<Box<dyn Keypad>> {
        match settings.keypad_type {
            Some(KeypadType::Dsc) => {
                let line = GpioKeybus::open(&self.gpio_root, self.clock_pin, self.data_pin)?;
                Ok(Box::new(DscKeypad::new(line)))
            }
            None => Ok(Box::new(DisabledKeypad)),
        }
    }
}

/// Simulated hardware always gets the mock panel.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDrivers {
    pub panel: MockPanel,
}

impl DriverFactory for SimulatedDrivers {
    fn create(&self, _settings: &KeypadSettings) -> HwResult<Box<dyn Keypad>> {
        Ok(Box::new(self.panel.keypad()))
    }
}

// ============================================================================
// Controller
// ============================================================================

pub struct KeypadController {
    rx: mpsc::UnboundedReceiver<ControlToken>,
    broadcaster: Broadcaster,
    store: Arc<dyn Store>,
    state: watch::Receiver<SharedState>,
    factory: Arc<dyn DriverFactory>,
    code: CodeEntry,
    settings: KeypadSettings,
    driver: Option<Box<dyn Keypad>>,
}

impl KeypadController {
    pub fn new(
        rx: mpsc::UnboundedReceiver<ControlToken>,
        broadcaster: Broadcaster,
        store: Arc<dyn Store>,
        state: watch::Receiver<SharedState>,
        factory: Arc<dyn DriverFactory>,
        salt: impl Into<String>,
    ) -> Self {
        Self {
            rx,
            broadcaster,
            store,
            state,
            factory,
            code: CodeEntry::new(salt),
            settings: KeypadSettings::default(),
            driver: None,
        }
    }

    pub async fn run(mut self) {
        info!("Keypad started");
        if !self.configure(false).await {
            info!("Keypad stopped");
            return;
        }

        loop {
            match timeout(COMMUNICATION_PERIOD, self.rx.recv()).await {
                Ok(Some(ControlToken::Stop)) | Ok(None) => break,
                Ok(Some(token)) => {
                    if !self.handle_token(token).await {
                        break;
                    }
                }
                Err(_) => {}
            }

            if self.settings.enabled {
                self.mirror_state(false).await;
                self.communicate().await;
            }
        }

        info!("Keypad stopped");
    }

    /// Returns false when the controller should stop.
    async fn handle_token(&mut self, token: ControlToken) -> bool {
        debug!(token = %token, "Keypad token");
        match token {
            ControlToken::UpdateKeypad => return self.configure(true).await,
            ControlToken::ArmAway | ControlToken::ArmStay if self.settings.enabled => {
                info!("Keypad armed");
                self.with_driver(|k| k.set_armed(true)).await;
            }
            ControlToken::Disarm if self.settings.enabled => {
                self.with_driver(|k| k.set_armed(false)).await;
            }
            ControlToken::ArmAway | ControlToken::ArmStay | ControlToken::Disarm => {}
            ControlToken::UpdateConfig | ControlToken::Stop => {}
        }
        true
    }

    /// Loads users and keypad settings and swaps the driver if the keypad
    /// type changed. Returns false if a Stop token was found while
    /// flushing the queue.
    async fn configure(&mut self, reconfigure: bool) -> bool {
        match self.store.load_users() {
            Ok(users) => {
                self.code
                    .set_codes(users.into_iter().map(|u| u.fourkey_code).collect());
            }
            Err(e) => warn!(error = %e, "Failed to load users, keeping previous codes"),
        }
        self.code.clear();

        let settings = match self.store.load_keypad() {
            Ok(settings) => settings.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to load keypad settings");
                self.settings
            }
        };

        let type_changed = settings.keypad_type != self.settings.keypad_type;
        let mut keep_running = true;
        if reconfigure && type_changed {
            while let Ok(token) = self.rx.try_recv() {
                if token == ControlToken::Stop {
                    keep_running = false;
                }
                debug!(token = %token, "Dropped queued keypad token");
            }
        }

        if type_changed || self.driver.is_none() {
            self.driver = match self.factory.create(&settings) {
                Ok(driver) => Some(driver),
                Err(e) => {
                    error!(error = %e, "Failed to create keypad driver");
                    None
                }
            };
            debug!(keypad_type = ?settings.keypad_type, "Keypad driver created");
        }
        self.settings = settings;

        if keep_running && self.settings.enabled {
            self.with_driver(|k| k.initialise()).await;
            self.mirror_state(true).await;
        }
        keep_running
    }

    async fn mirror_state(&mut self, force: bool) {
        if !force && !self.state.has_changed().unwrap_or(false) {
            return;
        }
        let monitoring = self.state.borrow_and_update().monitoring;
        let ready = monitoring == MonitoringState::Ready;
        let fault = monitoring.is_fault();

        self.with_driver(move |k| {
            k.set_ready(ready)?;
            k.set_error(fault)
        })
        .await;
    }

    async fn communicate(&mut self) {
        let now = Instant::now();
        if self.code.expire(now) {
            info!("Cleared presses after timeout");
        }

        let pressed = self
            .with_driver(|k| {
                k.communicate()?;
                Ok(k.last_pressed())
            })
            .await
            .flatten();
        let Some(button) = pressed else {
            return;
        };

        debug!(button = %button, pending = self.code.pending_digits(), "Key pressed");
        match self.code.press(button, now) {
            CodeOutcome::Pending => {}
            CodeOutcome::Accepted => {
                info!("Valid code entered, disarming");
                if let Err(e) = self.broadcaster.send(ControlToken::Disarm) {
                    error!(error = %e, "Disarm from keypad not delivered");
                }
            }
            CodeOutcome::Rejected => {
                info!("Invalid code");
                self.with_driver(|k| k.invalid_code()).await;
            }
        }
    }

    /// Runs `f` on the driver in the blocking pool.
    async fn with_driver<F, R>(&mut self, f: F) -> Option<R>
    where
        F: FnOnce(&mut dyn Keypad) -> HwResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let mut driver = self.driver.take()?;
        let joined = tokio::task::spawn_blocking(move || {
            let result = f(driver.as_mut());
            (driver, result)
        })
        .await;

        match joined {
            Ok((driver, result)) => {
                self.driver = Some(driver);
                match result {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(error = %e, "Keypad exchange failed");
                        None
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Keypad task failed, driver dropped");
                None
            }
        }
    }
}
