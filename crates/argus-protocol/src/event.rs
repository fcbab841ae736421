//! Named state-change events pushed to the realtime collaborator.

use argus_core::{AlertView, ArmType, MonitoringState};
use serde::{Deserialize, Serialize};

/// One outward event. Serialized as `{"event": <name>, "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum PushEvent {
    /// Active alert changed; `None` once it closed.
    AlertStateChange(Option<AlertView>),
    ArmStateChange(ArmType),
    /// Whether any sensor is currently alerting; `None` while the
    /// configuration is reloading.
    SensorsStateChange(Option<bool>),
    /// Siren alert running; `None` once it stopped.
    SyrenStateChange(Option<bool>),
    SystemStateChange(MonitoringState),
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AlertStateChange(_) => "alert_state_change",
            Self::ArmStateChange(_) => "arm_state_change",
            Self::SensorsStateChange(_) => "sensors_state_change",
            Self::SyrenStateChange(_) => "syren_state_change",
            Self::SystemStateChange(_) => "system_state_change",
        }
    }
}
