//! Sensor configuration validation and calibration.

use std::collections::HashMap;
use std::time::Duration;

use argus_core::{Sensor, SensorId, Zone, ZoneId};
use argus_hw::{HwError, SensorAdapter};
use thiserror::Error;
use tracing::debug;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Invalid number of sensors to monitor (found {found} > max {max})")]
    TooManySensors { found: usize, max: usize },

    #[error("Channel {channel} is used by sensor {first} and sensor {second}")]
    DuplicateChannel {
        channel: u32,
        first: SensorId,
        second: SensorId,
    },

    #[error("Sensor {sensor} uses channel {channel}, hardware has {count} channels")]
    ChannelOutOfRange {
        sensor: SensorId,
        channel: u32,
        count: usize,
    },

    #[error("Sensor {sensor} references missing zone {zone}")]
    MissingZone { sensor: SensorId, zone: ZoneId },

    #[error("Failed to measure sensor references: {0}")]
    Calibration(#[from] HwError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Checks a freshly loaded sensor set against the hardware and zones.
pub fn validate(
    sensors: &[Sensor],
    zones: &HashMap<ZoneId, Zone>,
    channel_count: usize,
) -> Result<(), LoadError> {
    if sensors.len() > channel_count {
        return Err(LoadError::TooManySensors {
            found: sensors.len(),
            max: channel_count,
        });
    }

    let mut channels: HashMap<u32, SensorId> = HashMap::new();
    for sensor in sensors {
        if sensor.channel as usize >= channel_count {
            return Err(LoadError::ChannelOutOfRange {
                sensor: sensor.id,
                channel: sensor.channel,
                count: channel_count,
            });
        }
        if !zones.contains_key(&sensor.zone_id) {
            return Err(LoadError::MissingZone {
                sensor: sensor.id,
                zone: sensor.zone_id,
            });
        }
        if !sensor.enabled {
            continue;
        }
        if let Some(first) = channels.insert(sensor.channel, sensor.id) {
            return Err(LoadError::DuplicateChannel {
                channel: sensor.channel,
                first,
                second: sensor.id,
            });
        }
    }

    debug!(channels = ?channels.keys().collect::<Vec<_>>(), "Sensor config valid");
    Ok(())
}

/// Samples every channel `cycles` times, `interval` apart, and returns the
/// per-channel average.
pub async fn measure_references(
    adapter: &dyn SensorAdapter,
    cycles: u32,
    interval: Duration,
) -> Result<Vec<f64>, LoadError> {
    let cycles = cycles.max(1);
    let expected = adapter.channel_count();
    let mut sums = vec![0.0; expected];

    for cycle in 0..cycles {
        if cycle > 0 {
            tokio::time::sleep(interval).await;
        }
        let values = adapter.read_all()?;
        debug!(cycle, values = ?values, "Measured values");
        if values.len() != expected {
            return Err(HwError::ShortRead {
                expected,
                got: values.len(),
            }
            .into());
        }
        for (sum, value) in sums.iter_mut().zip(values) {
            *sum += value;
        }
    }

    Ok(sums.into_iter().map(|sum| sum / f64::from(cycles)).collect())
}

/// Pairs each sensor with the reference measured on its channel.
pub fn assign_references(sensors: &mut [Sensor], references: &[f64]) -> Vec<(SensorId, f64)> {
    sensors
        .iter_mut()
        .filter_map(|sensor| {
            let value = *references.get(sensor.channel as usize)?;
            sensor.reference_value = Some(value);
            Some((sensor.id, value))
        })
        .collect()
}
