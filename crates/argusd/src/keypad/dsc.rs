//! DSC keypad driver on the Keybus.

use argus_hw::{transaction, HwResult, KeybusLine};
use chrono::Local;
use tracing::{debug, trace, warn};

use super::protocol::{self, Button, Lights};
use super::Keypad;

/// Communication cycles between zone/datetime refreshes.
pub const REFRESH_CYCLES: u32 = 240;

pub struct DscKeypad<L> {
    line: L,
    lights: Lights,
    cycle: u32,
    pressed: Option<Button>,
}

impl<L: KeybusLine> DscKeypad<L> {
    pub fn new(line: L) -> Self {
        Self {
            line,
            lights: Lights::default(),
            cycle: 0,
            pressed: None,
        }
    }

    pub fn lights(&self) -> Lights {
        self.lights
    }

    /// Runs one transaction and interprets what the keypad sent back.
    fn send(&mut self, message: &[u8]) -> HwResult<()> {
        let received = transaction(&mut self.line, message)?;
        trace!(sent = ?message, received = ?received, "Keybus transaction");

        if let Some(&code) = received.get(protocol::KEY_CODE_INDEX) {
            if code != protocol::VOID {
                match Button::from_code(code) {
                    Some(button) => {
                        debug!(button = %button, "Key pressed");
                        self.pressed = Some(button);
                    }
                    None => warn!(code = %format!("{code:#04x}"), "Unknown key code"),
                }
            }
        }

        if received.get(protocol::UNKNOWN_COMMAND_INDEX) == Some(&protocol::UNKNOWN_COMMAND) {
            debug!("Keypad reported unknown command, sending keybus query");
            transaction(&mut self.line, &protocol::keybus_query())?;
        }
        Ok(())
    }

    fn send_refresh(&mut self) -> HwResult<()> {
        self.send(&protocol::zone_status(self.lights))?;
        self.send(&protocol::zone_lights(self.lights))?;
        self.send(&protocol::datetime_status(&Local::now()))
    }

    fn beep(&mut self, count: u8) -> HwResult<()> {
        match protocol::beep(count) {
            Some(message) => self.send(&message),
            None => Ok(()),
        }
    }
}

impl<L: KeybusLine> Keypad for DscKeypad<L> {
    fn initialise(&mut self) -> HwResult<()> {
        self.send(&protocol::partition_status(self.lights))?;
        self.send_refresh()
    }

    fn communicate(&mut self) -> HwResult<()> {
        self.send(&protocol::partition_status(self.lights))?;

        self.cycle += 1;
        if self.cycle >= REFRESH_CYCLES {
            self.cycle = 0;
            self.send_refresh()?;
        }
        Ok(())
    }

    fn set_armed(&mut self, armed: bool) -> HwResult<()> {
        self.lights.set(Lights::ARMED, armed);
        self.beep(4)
    }

    fn set_error(&mut self, error: bool) -> HwResult<()> {
        self.lights.set(Lights::ERROR, error);
        Ok(())
    }

    fn set_ready(&mut self, ready: bool) -> HwResult<()> {
        self.lights.set(Lights::READY, ready);
        Ok(())
    }

    fn invalid_code(&mut self) -> HwResult<()> {
        self.beep(2)
    }

    fn last_pressed(&mut self) -> Option<Button> {
        self.pressed.take()
    }
}
