//! Siren relay output.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::info;

use crate::error::HwResult;
use crate::gpio::GpioPin;

pub trait SirenOutput: Send + Sync {
    fn set(&self, on: bool) -> HwResult<()>;
}

/// Siren relay on a GPIO output.
#[derive(Debug)]
pub struct GpioSiren {
    pin: Mutex<GpioPin>,
}

impl GpioSiren {
    pub fn new(pin: GpioPin) -> Self {
        Self { pin: Mutex::new(pin) }
    }
}

impl SirenOutput for GpioSiren {
    fn set(&self, on: bool) -> HwResult<()> {
        let mut pin = self.pin.lock().unwrap_or_else(|e| e.into_inner());
        pin.write(on)?;
        info!(pin = pin.number(), on, "Siren switched");
        Ok(())
    }
}

/// Siren stand-in that only logs and remembers its state.
#[derive(Debug, Default)]
pub struct LoggingSiren {
    on: AtomicBool,
    switches: AtomicUsize,
}

impl LoggingSiren {
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    /// Number of `set` calls so far.
    pub fn switch_count(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }
}

impl SirenOutput for LoggingSiren {
    fn set(&self, on: bool) -> HwResult<()> {
        self.on.store(on, Ordering::SeqCst);
        self.switches.fetch_add(1, Ordering::SeqCst);
        info!(on, "Siren switched (simulated)");
        Ok(())
    }
}
