//! Power source classification.

use std::sync::{Arc, Mutex};

use argus_core::PowerSource;

use crate::error::HwResult;
use crate::sensor::SensorAdapter;

/// Sense channel reading above which mains power is present.
pub const NETWORK_THRESHOLD: f64 = 0.2;

pub trait PowerAdapter: Send + Sync {
    fn source(&self) -> HwResult<PowerSource>;
}

/// Classifies the supply from an ADC channel wired to the mains sense.
pub struct AdcPowerSense {
    adc: Arc<dyn SensorAdapter>,
    channel: u32,
}

impl AdcPowerSense {
    pub fn new(adc: Arc<dyn SensorAdapter>, channel: u32) -> Self {
        Self { adc, channel }
    }
}

impl PowerAdapter for AdcPowerSense {
    fn source(&self) -> HwResult<PowerSource> {
        let value = self.adc.read_channel(self.channel)?;
        Ok(if value > NETWORK_THRESHOLD {
            PowerSource::Network
        } else {
            PowerSource::Battery
        })
    }
}

/// Settable power source for simulation and tests.
#[derive(Debug)]
pub struct SimulatedPower(Mutex<PowerSource>);

impl SimulatedPower {
    pub fn new(source: PowerSource) -> Self {
        Self(Mutex::new(source))
    }

    pub fn set(&self, source: PowerSource) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = source;
    }
}

impl Default for SimulatedPower {
    fn default() -> Self {
        Self::new(PowerSource::Network)
    }
}

impl PowerAdapter for SimulatedPower {
    fn source(&self) -> HwResult<PowerSource> {
        Ok(*self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SimulatedSensors;

    #[test]
    fn test_threshold_is_exclusive() {
        let adc = Arc::new(SimulatedSensors::new(8));
        let sense = AdcPowerSense::new(adc.clone(), 7);

        adc.set(7, 0.2);
        assert_eq!(sense.source().unwrap(), PowerSource::Battery);
        adc.set(7, 0.21);
        assert_eq!(sense.source().unwrap(), PowerSource::Network);
    }
}
