//! Keybus: the two-wire half-duplex keypad bus.
//!
//! The controller owns the clock line. Every byte the controller clocks
//! out also clocks one byte in from the keypad (full duplex per byte).
//! A transaction is the first byte, one status bit, then the remaining
//! bytes. Timing is in microseconds and must be reproduced exactly for the
//! keypad to follow.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::HwResult;
use crate::gpio::GpioPin;

/// Byte a silent keypad leaves on the idle-high data line.
pub const IDLE_BYTE: u8 = 0xFF;

/// Bit-level access to the bus.
pub trait KeybusLine: Send {
    /// Clocks `byte` out MSB first, sampling one byte from the keypad.
    fn exchange_byte(&mut self, byte: u8) -> HwResult<u8>;

    /// Clocks the status bit and returns the sampled level.
    fn exchange_status_bit(&mut self) -> HwResult<bool>;
}

/// Sends one transaction and returns the bytes received, aligned with the
/// bytes sent.
pub fn transaction<L: KeybusLine + ?Sized>(line: &mut L, bytes: &[u8]) -> HwResult<Vec<u8>> {
    let Some((first, rest)) = bytes.split_first() else {
        return Ok(Vec::new());
    };

    let mut received = Vec::with_capacity(bytes.len());
    received.push(line.exchange_byte(*first)?);
    line.exchange_status_bit()?;
    for byte in rest {
        received.push(line.exchange_byte(*byte)?);
    }
    Ok(received)
}

// ============================================================================
// GPIO implementation
// ============================================================================

fn pause(micros: u64) {
    thread::sleep(Duration::from_micros(micros));
}

/// Keybus driven from two sysfs GPIO outputs.
#[derive(Debug)]
pub struct GpioKeybus {
    clock: GpioPin,
    data: GpioPin,
}

impl GpioKeybus {
    pub fn open(root: &Path, clock_pin: u32, data_pin: u32) -> HwResult<Self> {
        Ok(Self {
            clock: GpioPin::output(root, clock_pin, true)?,
            data: GpioPin::output(root, data_pin, true)?,
        })
    }
}

impl KeybusLine for GpioKeybus {
    fn exchange_byte(&mut self, byte: u8) -> HwResult<u8> {
        let mut received = 0u8;
        self.data.write(true)?;
        for shift in (0..8).rev() {
            self.clock.write(false)?;
            pause(200);

            let level = self.data.read()?;
            received = (received << 1) | u8::from(level);
            self.data.write((byte >> shift) & 1 == 1)?;
            pause(20);
            self.clock.write(true)?;
            pause(20);
            self.data.write(true)?;
            pause(350);
        }
        Ok(received)
    }

    fn exchange_status_bit(&mut self) -> HwResult<bool> {
        self.clock.write(false)?;
        self.data.write(true)?;
        pause(200);
        let level = self.data.read()?;
        pause(200);
        self.data.write(true)?;
        self.clock.write(true)?;
        pause(450);
        Ok(level)
    }
}

// ============================================================================
// Scripted implementation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEvent {
    Byte(u8),
    StatusBit,
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<u8>,
    events: Vec<LineEvent>,
}

/// In-memory bus that records what was sent and answers from a script.
///
/// Clones share the same script, so a test can keep one handle while the
/// driver owns another. Once the script runs out the keypad is silent
/// ([`IDLE_BYTE`]).
#[derive(Debug, Clone, Default)]
pub struct ScriptedKeybus {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedKeybus {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues bytes the keypad will answer with, one per exchanged byte.
    pub fn respond(&self, bytes: &[u8]) {
        self.script().responses.extend(bytes.iter().copied());
    }

    /// Sent transactions, split at status bits.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let mut current: Vec<u8> = Vec::new();
        for event in &self.script().events {
            match event {
                LineEvent::Byte(b) => current.push(*b),
                LineEvent::StatusBit => {
                    let first = current.pop();
                    if !current.is_empty() {
                        frames.push(std::mem::take(&mut current));
                    }
                    current.extend(first);
                }
            }
        }
        if !current.is_empty() {
            frames.push(current);
        }
        frames
    }

    /// Forgets everything sent so far.
    pub fn clear_sent(&self) {
        self.script().events.clear();
    }
}

impl KeybusLine for ScriptedKeybus {
    fn exchange_byte(&mut self, byte: u8) -> HwResult<u8> {
        let mut script = self.script();
        script.events.push(LineEvent::Byte(byte));
        Ok(script.responses.pop_front().unwrap_or(IDLE_BYTE))
    }

    fn exchange_status_bit(&mut self) -> HwResult<bool> {
        self.script().events.push(LineEvent::StatusBit);
        Ok(true)
    }
}
