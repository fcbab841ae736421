//! Argus HW - hardware adapters behind small synchronous traits.
//!
//! Every adapter has a real implementation (Linux sysfs GPIO and IIO ADC)
//! and a simulated one used off-target and in tests. The engine only sees
//! the traits:
//!
//! - [`SensorAdapter`] - analog sensor channels scaled to `0.0..=1.0`
//! - [`PowerAdapter`] - mains/battery classification
//! - [`SirenOutput`] - the siren relay
//! - [`KeybusLine`] - bit-banged two-wire keypad bus

pub mod error;
pub mod gpio;
pub mod keybus;
pub mod power;
pub mod sensor;
pub mod siren;

pub use error::{HwError, HwResult};
pub use gpio::{GpioPin, SYSFS_GPIO_ROOT};
pub use keybus::{transaction, GpioKeybus, KeybusLine, ScriptedKeybus};
pub use power::{AdcPowerSense, PowerAdapter, SimulatedPower};
pub use sensor::{IioAdc, SensorAdapter, SimulatedSensors};
pub use siren::{GpioSiren, LoggingSiren, SirenOutput};
