//! Process-wide state enums: arm type, monitoring state, alert type and
//! power source.
//!
//! The wire names (`as_str`) are shared with the REST layer and the web
//! front end, so they must not change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ============================================================================
// Arm Type
// ============================================================================

/// How the system is armed. Selects which zone delay applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmType {
    /// Not armed; only sabotage zones are watched.
    #[default]
    Disarm,
    /// Armed with everybody away from home.
    Away,
    /// Armed with people at home (perimeter only).
    Stay,
}

impl ArmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disarm => "disarm",
            Self::Away => "away",
            Self::Stay => "stay",
        }
    }

    /// Returns true for the two armed variants.
    pub fn is_armed(&self) -> bool {
        matches!(self, Self::Away | Self::Stay)
    }
}

impl fmt::Display for ArmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArmType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disarm" => Ok(Self::Disarm),
            "away" => Ok(Self::Away),
            "stay" => Ok(Self::Stay),
            other => Err(DomainError::unknown("arm type", other)),
        }
    }
}

// ============================================================================
// Monitoring State
// ============================================================================

/// The single authoritative state of the monitoring engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MonitoringState {
    #[default]
    #[serde(rename = "monitoring_startup")]
    Startup,
    #[serde(rename = "monitoring_updating_config")]
    UpdatingConfig,
    #[serde(rename = "monitoring_invalid_config")]
    InvalidConfig,
    #[serde(rename = "monitoring_ready")]
    Ready,
    #[serde(rename = "monitoring_armed")]
    Armed,
    #[serde(rename = "monitoring_sabotage")]
    Sabotage,
    #[serde(rename = "monitoring_error")]
    Error,
}

impl MonitoringState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "monitoring_startup",
            Self::UpdatingConfig => "monitoring_updating_config",
            Self::InvalidConfig => "monitoring_invalid_config",
            Self::Ready => "monitoring_ready",
            Self::Armed => "monitoring_armed",
            Self::Sabotage => "monitoring_sabotage",
            Self::Error => "monitoring_error",
        }
    }

    /// States in which the keypad shows the error light.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::InvalidConfig | Self::Error)
    }
}

impl fmt::Display for MonitoringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitoringState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monitoring_startup" => Ok(Self::Startup),
            "monitoring_updating_config" => Ok(Self::UpdatingConfig),
            "monitoring_invalid_config" => Ok(Self::InvalidConfig),
            "monitoring_ready" => Ok(Self::Ready),
            "monitoring_armed" => Ok(Self::Armed),
            "monitoring_sabotage" => Ok(Self::Sabotage),
            "monitoring_error" => Ok(Self::Error),
            other => Err(DomainError::unknown("monitoring state", other)),
        }
    }
}

// ============================================================================
// Alert Type
// ============================================================================

/// Kind of alert an escalation produces.
///
/// Sabotage always wins over away/stay for the same sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Away,
    Stay,
    Sabotage,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Away => "away",
            Self::Stay => "stay",
            Self::Sabotage => "sabotage",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Power Source
// ============================================================================

/// Where the controller currently draws power from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerSource {
    Network,
    Battery,
}

impl PowerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Battery => "battery",
        }
    }
}

impl fmt::Display for PowerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
