//! Analog sensor channels.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, trace};

use crate::error::{HwError, HwResult};

/// Channels per MCP3008 converter.
pub const CHANNELS_PER_DEVICE: usize = 8;

/// Full-scale raw reading of a 10-bit converter.
const FULL_SCALE: f64 = 1023.0;

/// Source of normalized (`0.0..=1.0`) sensor readings.
pub trait SensorAdapter: Send + Sync {
    /// Number of usable channels on the board.
    fn channel_count(&self) -> usize;

    fn read_channel(&self, channel: u32) -> HwResult<f64>;

    /// Reads every channel in order.
    fn read_all(&self) -> HwResult<Vec<f64>> {
        (0..self.channel_count())
            .map(|channel| self.read_channel(channel as u32))
            .collect()
    }
}

fn check_range(channel: u32, count: usize) -> HwResult<()> {
    if (channel as usize) < count {
        Ok(())
    } else {
        Err(HwError::ChannelOutOfRange { channel, count })
    }
}

// ============================================================================
// Linux IIO
// ============================================================================

/// MCP3008 converters exposed by the kernel IIO driver.
///
/// Board channel `n` is `in_voltage{n % 8}_raw` on device `n / 8`.
#[derive(Debug, Clone)]
pub struct IioAdc {
    devices: Vec<PathBuf>,
    channel_count: usize,
}

impl IioAdc {
    pub fn new(devices: Vec<PathBuf>, channel_count: usize) -> Self {
        debug!(devices = ?devices, channel_count, "IIO ADC configured");
        Self {
            devices,
            channel_count,
        }
    }

    fn raw_path(&self, channel: u32) -> HwResult<PathBuf> {
        let index = channel as usize;
        let device = self
            .devices
            .get(index / CHANNELS_PER_DEVICE)
            .ok_or(HwError::ChannelOutOfRange {
                channel,
                count: self.devices.len() * CHANNELS_PER_DEVICE,
            })?;
        Ok(device.join(format!("in_voltage{}_raw", index % CHANNELS_PER_DEVICE)))
    }
}

impl SensorAdapter for IioAdc {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn read_channel(&self, channel: u32) -> HwResult<f64> {
        check_range(channel, self.channel_count)?;
        let path = self.raw_path(channel)?;
        let text = fs::read_to_string(&path).map_err(|e| HwError::io(&path, e))?;
        let raw: f64 = text.trim().parse().map_err(|_| HwError::Parse {
            path: path.clone(),
            value: text.trim().to_string(),
        })?;
        let value = (raw / FULL_SCALE).clamp(0.0, 1.0);
        trace!(channel, value, "ADC read");
        Ok(value)
    }
}

// ============================================================================
// Simulation
// ============================================================================

/// In-memory channels whose values are set from outside.
#[derive(Debug)]
pub struct SimulatedSensors {
    values: Mutex<Vec<f64>>,
}

impl SimulatedSensors {
    /// Creates `count` channels reading `0.0`.
    pub fn new(count: usize) -> Self {
        Self {
            values: Mutex::new(vec![0.0; count]),
        }
    }

    /// Sets the value a channel reports. Out-of-range channels are ignored.
    pub fn set(&self, channel: u32, value: f64) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = values.get_mut(channel as usize) {
            *slot = value;
        }
    }
}

impl SensorAdapter for SimulatedSensors {
    fn channel_count(&self) -> usize {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn read_channel(&self, channel: u32) -> HwResult<f64> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        check_range(channel, values.len())?;
        Ok(values[channel as usize])
    }
}
