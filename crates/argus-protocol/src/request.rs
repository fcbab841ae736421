//! Requests sent by the REST layer to the daemon.
//!
//! A request is one JSON object per line with an `"action"` member naming
//! the command. Extra members carry parameters (only `set_clock` has any).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Optional parameters of `set_clock`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSettings {
    /// Olson zone name, e.g. `Europe/Budapest`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Anything `date --set` accepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
}

/// A command accepted on the IPC socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    ArmAway,
    ArmStay,
    Disarm,
    GetArm,
    GetState,
    GetPowerState,
    UpdateConfig,
    UpdateKeypad,
    UpdateSecureConnection,
    UpdateSsh,
    SyncClock,
    SetClock(ClockSettings),
    /// Turn the connection into a push-event stream.
    Subscribe,
}

/// Why a line could not be turned into a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("not valid JSON: {0}")]
    Malformed(String),

    #[error("not valid UTF-8")]
    NotUtf8,

    #[error("request must be a JSON object")]
    NotAnObject,

    #[error("missing string field 'action'")]
    MissingAction,

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("invalid parameters for '{action}': {reason}")]
    InvalidParams { action: String, reason: String },
}

impl Request {
    /// Parses one request line.
    pub fn parse_line(line: &str) -> Result<Self, RequestError> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| RequestError::Malformed(e.to_string()))?;
        let object = value.as_object().ok_or(RequestError::NotAnObject)?;
        Self::from_object(object)
    }

    /// Parses one raw request line as read off the socket.
    pub fn parse_bytes(line: &[u8]) -> Result<Self, RequestError> {
        let line = std::str::from_utf8(line).map_err(|_| RequestError::NotUtf8)?;
        Self::parse_line(line)
    }

    fn from_object(object: &Map<String, Value>) -> Result<Self, RequestError> {
        let action = object
            .get("action")
            .and_then(Value::as_str)
            .ok_or(RequestError::MissingAction)?;

        let request = match action {
            "arm_away" => Self::ArmAway,
            "arm_stay" => Self::ArmStay,
            "disarm" => Self::Disarm,
            "get_arm" => Self::GetArm,
            "get_state" => Self::GetState,
            "get_power_state" => Self::GetPowerState,
            "update_config" => Self::UpdateConfig,
            "update_keypad" => Self::UpdateKeypad,
            "update_secure_connection" => Self::UpdateSecureConnection,
            "update_ssh" => Self::UpdateSsh,
            "sync_clock" => Self::SyncClock,
            "set_clock" => {
                let settings = ClockSettings::deserialize(Value::Object(object.clone()))
                    .map_err(|e| RequestError::InvalidParams {
                        action: action.to_string(),
                        reason: e.to_string(),
                    })?;
                Self::SetClock(settings)
            }
            "subscribe" => Self::Subscribe,
            other => return Err(RequestError::UnknownAction(other.to_string())),
        };
        Ok(request)
    }

    /// Wire name of the action.
    pub fn action(&self) -> &'static str {
        match self {
            Self::ArmAway => "arm_away",
            Self::ArmStay => "arm_stay",
            Self::Disarm => "disarm",
            Self::GetArm => "get_arm",
            Self::GetState => "get_state",
            Self::GetPowerState => "get_power_state",
            Self::UpdateConfig => "update_config",
            Self::UpdateKeypad => "update_keypad",
            Self::UpdateSecureConnection => "update_secure_connection",
            Self::UpdateSsh => "update_ssh",
            Self::SyncClock => "sync_clock",
            Self::SetClock(_) => "set_clock",
            Self::Subscribe => "subscribe",
        }
    }
}
