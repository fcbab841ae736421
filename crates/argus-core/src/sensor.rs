//! Sensor and zone entities.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::{AlertType, ArmType};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Persistent identifier of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(pub u32);

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persistent identifier of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub u32);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Zone
// ============================================================================

/// A group of sensors sharing one escalation policy per arm mode.
///
/// Delays are whole seconds. `None` means "no escalation in that mode";
/// the unsigned type keeps every configured delay non-negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Sabotage delay. When set the zone is watched even while disarmed.
    #[serde(default)]
    pub disarmed_delay: Option<u64>,
    #[serde(default)]
    pub away_delay: Option<u64>,
    #[serde(default)]
    pub stay_delay: Option<u64>,
    #[serde(default)]
    pub deleted: bool,
}

impl Zone {
    /// Selects the escalation for a sensor of this zone that just started
    /// alerting while the system is in `arm` mode.
    ///
    /// Sabotage wins unconditionally; otherwise only the delay matching the
    /// arm type applies.
    pub fn escalation(&self, arm: ArmType) -> Option<(AlertType, Duration)> {
        if let Some(delay) = self.disarmed_delay {
            return Some((AlertType::Sabotage, Duration::from_secs(delay)));
        }

        match arm {
            ArmType::Away => self
                .away_delay
                .map(|d| (AlertType::Away, Duration::from_secs(d))),
            ArmType::Stay => self
                .stay_delay
                .map(|d| (AlertType::Stay, Duration::from_secs(d))),
            ArmType::Disarm => None,
        }
    }
}

// ============================================================================
// Sensor
// ============================================================================

/// A physical sensor wired to one ADC channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    /// Hardware channel (0-based).
    pub channel: u32,
    pub zone_id: ZoneId,
    pub type_id: u32,
    #[serde(default)]
    pub description: String,
    /// Calibrated idle value, `None` until calibration ran.
    #[serde(default)]
    pub reference_value: Option<f64>,
    #[serde(default)]
    pub alert: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub deleted: bool,
}

fn default_true() -> bool {
    true
}

impl Sensor {
    /// Captures the fields an alert records at trigger time.
    pub fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            id: self.id,
            channel: self.channel,
            type_id: self.type_id,
            description: self.description.clone(),
        }
    }

    /// Returns true if `value` deviates from the reference by at least
    /// `tolerance`. An uncalibrated sensor never alerts.
    pub fn is_triggered_by(&self, value: f64, tolerance: f64) -> bool {
        match self.reference_value {
            Some(reference) => !((value - reference).abs() < tolerance),
            None => false,
        }
    }
}

/// Sensor data frozen into an alert when its escalation fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub id: SensorId,
    pub channel: u32,
    pub type_id: u32,
    pub description: String,
}
