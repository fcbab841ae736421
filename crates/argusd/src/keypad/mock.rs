//! Keypads without a Keybus: the simulated panel and the "no keypad" stub.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use argus_hw::HwResult;
use tracing::debug;

use super::protocol::Button;
use super::Keypad;

#[derive(Debug, Default)]
struct PanelState {
    presses: VecDeque<Button>,
    armed: bool,
    ready: bool,
    error: bool,
    invalid_codes: usize,
    initialised: bool,
}

/// Shared view of a simulated keypad: queue presses, inspect its lights.
#[derive(Debug, Clone, Default)]
pub struct MockPanel {
    inner: Arc<Mutex<PanelState>>,
}

impl MockPanel {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PanelState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues button presses, delivered one per communication cycle.
    pub fn press(&self, buttons: impl IntoIterator<Item = Button>) {
        self.state().presses.extend(buttons);
    }

    /// Queues the digits of `code`; other characters are skipped.
    pub fn type_code(&self, code: &str) {
        let digits = code
            .chars()
            .filter_map(|c| c.to_digit(10))
            .map(|d| Button::Digit(d as u8));
        self.press(digits);
    }

    pub fn is_armed(&self) -> bool {
        self.state().armed
    }

    pub fn is_ready(&self) -> bool {
        self.state().ready
    }

    pub fn has_error(&self) -> bool {
        self.state().error
    }

    pub fn invalid_codes(&self) -> usize {
        self.state().invalid_codes
    }

    pub fn is_initialised(&self) -> bool {
        self.state().initialised
    }

    /// Creates a driver attached to this panel.
    pub fn keypad(&self) -> MockKeypad {
        MockKeypad {
            panel: self.clone(),
            pressed: None,
        }
    }
}

pub struct MockKeypad {
    panel: MockPanel,
    pressed: Option<Button>,
}

impl Keypad for MockKeypad {
    fn initialise(&mut self) -> HwResult<()> {
        self.panel.state().initialised = true;
        debug!("Mock keypad initialised");
        Ok(())
    }

    fn communicate(&mut self) -> HwResult<()> {
        self.pressed = self.panel.state().presses.pop_front();
        Ok(())
    }

    fn set_armed(&mut self, armed: bool) -> HwResult<()> {
        self.panel.state().armed = armed;
        debug!(armed, "Mock keypad armed light");
        Ok(())
    }

    fn set_error(&mut self, error: bool) -> HwResult<()> {
        self.panel.state().error = error;
        Ok(())
    }

    fn set_ready(&mut self, ready: bool) -> HwResult<()> {
        self.panel.state().ready = ready;
        Ok(())
    }

    fn invalid_code(&mut self) -> HwResult<()> {
        self.panel.state().invalid_codes += 1;
        Ok(())
    }

    fn last_pressed(&mut self) -> Option<Button> {
        self.pressed.take()
    }
}

/// Stands in when no keypad is attached.
#[derive(Debug, Default)]
pub struct DisabledKeypad;

impl Keypad for DisabledKeypad {
    fn initialise(&mut self) -> HwResult<()> {
        Ok(())
    }

    fn communicate(&mut self) -> HwResult<()> {
        Ok(())
    }

    fn set_armed(&mut self, _armed: bool) -> HwResult<()> {
        Ok(())
    }

    fn set_error(&mut self, _error: bool) -> HwResult<()> {
        Ok(())
    }

    fn set_ready(&mut self, _ready: bool) -> HwResult<()> {
        Ok(())
    }

    fn invalid_code(&mut self) -> HwResult<()> {
        Ok(())
    }

    fn last_pressed(&mut self) -> Option<Button> {
        None
    }
}
