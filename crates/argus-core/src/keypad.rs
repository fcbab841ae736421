//! Keypad settings as stored by the configuration layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol variant of the attached keypad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeypadType {
    /// DSC keypad on the Keybus.
    Dsc,
}

impl fmt::Display for KeypadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dsc => f.write_str("dsc"),
        }
    }
}

/// Which keypad is attached and whether it is in use.
///
/// `keypad_type == None` means no keypad is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeypadSettings {
    #[serde(rename = "type", default)]
    pub keypad_type: Option<KeypadType>,
    #[serde(default)]
    pub enabled: bool,
}

impl KeypadSettings {
    pub fn is_active(&self) -> bool {
        self.enabled && self.keypad_type.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_wire_format() {
        let settings: KeypadSettings =
            serde_json::from_str(r#"{"type": "dsc", "enabled": true}"#).unwrap();
        assert_eq!(settings.keypad_type, Some(KeypadType::Dsc));
        assert!(settings.is_active());

        let none: KeypadSettings = serde_json::from_str("{}").unwrap();
        assert!(!none.is_active());
    }
}
