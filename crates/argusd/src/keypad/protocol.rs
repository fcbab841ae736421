//! DSC Keybus message layout.
//!
//! Payloads are sent byte for byte; [`frame`] appends the one-byte
//! additive checksum where the keypad expects it. Partition status and the
//! keybus query go out unframed.

use std::fmt;

use chrono::{Datelike, Timelike};

// ============================================================================
// Commands and sentinels
// ============================================================================

pub const KEYBUS_QUERY: u8 = 0x4C;
pub const PARTITION_STATUS: u8 = 0x05;
pub const ZONE_STATUS: u8 = 0x27;
pub const ZONE_LIGHTS: u8 = 0x0A;
pub const DATETIME_STATUS: u8 = 0xA5;
pub const BEEP: u8 = 0x64;

pub const NULL: u8 = 0x00;
pub const PLACEHOLDER: u8 = 0xAA;
pub const UNKNOWN_DATA: u8 = 0x91;
pub const PARTITION_DISABLED: u8 = 0xC7;
pub const UNKNOWN_COMMAND: u8 = 0xFE;
pub const VOID: u8 = 0xFF;

/// Index of the received byte carrying a key code.
pub const KEY_CODE_INDEX: usize = 1;

/// Index of the received byte flagging an unknown command.
pub const UNKNOWN_COMMAND_INDEX: usize = 3;

/// Appends `sum(payload) mod 256`.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = payload.to_vec();
    framed.push(checksum(payload));
    framed
}

pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

// ============================================================================
// Lights
// ============================================================================

/// Status LED bitmask shown on the keypad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lights(u8);

impl Lights {
    pub const BACKLIGHT: u8 = 0x80;
    pub const FIRE: u8 = 0x40;
    pub const PROGRAM: u8 = 0x20;
    pub const ERROR: u8 = 0x10;
    pub const BYPASS: u8 = 0x08;
    pub const MEMORY: u8 = 0x04;
    pub const ARMED: u8 = 0x02;
    pub const READY: u8 = 0x01;

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, light: u8) -> bool {
        self.0 & light == light
    }

    pub fn set(&mut self, light: u8, on: bool) {
        if on {
            self.0 |= light;
        } else {
            self.0 &= !light;
        }
    }
}

impl Default for Lights {
    /// Backlight and ready on.
    fn default() -> Self {
        Self(Self::BACKLIGHT | Self::READY)
    }
}

// ============================================================================
// Buttons
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Digit(u8),
    Star,
    Hash,
    Stay,
    Away,
}

impl Button {
    /// Decodes a key code received from the keypad.
    pub fn from_code(code: u8) -> Option<Self> {
        let button = match code {
            0x00 => Self::Digit(0),
            0x05 => Self::Digit(1),
            0x0A => Self::Digit(2),
            0x0F => Self::Digit(3),
            0x11 => Self::Digit(4),
            0x16 => Self::Digit(5),
            0x1B => Self::Digit(6),
            0x1C => Self::Digit(7),
            0x22 => Self::Digit(8),
            0x27 => Self::Digit(9),
            0x28 => Self::Star,
            0x2D => Self::Hash,
            0xAF => Self::Stay,
            0xB1 => Self::Away,
            _ => return None,
        };
        Some(button)
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Digit(d) => write!(f, "{d}"),
            Self::Star => f.write_str("*"),
            Self::Hash => f.write_str("#"),
            Self::Stay => f.write_str("Stay"),
            Self::Away => f.write_str("Away"),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

pub fn partition_status(lights: Lights) -> Vec<u8> {
    vec![
        PARTITION_STATUS,
        lights.bits(),
        0x01,
        UNKNOWN_DATA,
        PARTITION_DISABLED,
    ]
}

pub fn zone_status(lights: Lights) -> Vec<u8> {
    frame(&[
        ZONE_STATUS,
        lights.bits(),
        0x01,
        UNKNOWN_DATA,
        PARTITION_DISABLED,
        0x02,
    ])
}

pub fn zone_lights(lights: Lights) -> Vec<u8> {
    frame(&[ZONE_LIGHTS, lights.bits(), 0x01, 0x65, NULL, NULL, NULL, NULL])
}

/// Packs a timestamp into the four date bytes of the datetime message.
pub fn datetime_bytes<T: Datelike + Timelike>(time: &T) -> [u8; 4] {
    let year = u32::try_from(time.year()).unwrap_or(0).saturating_sub(2000) % 100;
    let month = time.month();
    let day = time.day();

    let b1 = ((year / 10) << 4) | (year % 10);
    let b2 = (0x3C & (month << 2)) | ((day & 0x18) >> 3);
    let b3 = ((day & 0x07) << 5) | (time.hour() & 0x1F);
    let b4 = time.minute() << 2;

    [b1 as u8, b2 as u8, b3 as u8, b4 as u8]
}

pub fn datetime_status<T: Datelike + Timelike>(time: &T) -> Vec<u8> {
    let [b1, b2, b3, b4] = datetime_bytes(time);
    frame(&[DATETIME_STATUS, b1, b2, b3, b4, NULL, NULL])
}

pub fn keybus_query() -> Vec<u8> {
    let mut query = vec![KEYBUS_QUERY];
    query.extend([PLACEHOLDER; 11]);
    query
}

/// Beep message for 2, 3, 4 or 6 beeps.
pub fn beep(count: u8) -> Option<Vec<u8>> {
    let param = match count {
        2 => 0x04,
        3 => 0x06,
        4 => 0x08,
        6 => 0x0C,
        _ => return None,
    };
    Some(frame(&[BEEP, param]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_frame_checksum_law() {
        for payload in [
            vec![],
            vec![0x64, 0x08],
            vec![0xFF, 0xFF, 0x03],
            zone_lights(Lights::default())[..8].to_vec(),
        ] {
            let framed = frame(&payload);
            assert_eq!(framed.len(), payload.len() + 1);
            let sum: u32 = payload.iter().map(|b| u32::from(*b)).sum();
            assert_eq!(u32::from(*framed.last().unwrap()), sum % 256);
        }
    }

    #[test]
    fn test_partition_status_is_unframed() {
        assert_eq!(
            partition_status(Lights::default()),
            vec![0x05, 0x81, 0x01, 0x91, 0xC7]
        );
    }

    #[test]
    fn test_zone_messages() {
        let lights = Lights::default();
        assert_eq!(
            zone_status(lights),
            vec![0x27, 0x81, 0x01, 0x91, 0xC7, 0x02, 0x03]
        );
        assert_eq!(
            zone_lights(lights),
            vec![0x0A, 0x81, 0x01, 0x65, 0, 0, 0, 0, 0xF1]
        );
    }

    #[test]
    fn test_lights_toggle() {
        let mut lights = Lights::default();
        lights.set(Lights::ARMED, true);
        lights.set(Lights::READY, false);
        assert_eq!(lights.bits(), 0x82);
        assert!(lights.contains(Lights::ARMED));
        assert!(!lights.contains(Lights::READY));
    }

    #[test]
    fn test_button_table() {
        assert_eq!(Button::from_code(0x00), Some(Button::Digit(0)));
        assert_eq!(Button::from_code(0x27), Some(Button::Digit(9)));
        assert_eq!(Button::from_code(0x2D), Some(Button::Hash));
        assert_eq!(Button::from_code(0xB1), Some(Button::Away));
        assert_eq!(Button::from_code(0x01), None);
        assert_eq!(Button::Stay.to_string(), "Stay");
    }

    #[test]
    fn test_datetime_packing() {
        let time = NaiveDate::from_ymd_opt(2024, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 0)
            .unwrap();
        // year 24 -> 0x24; month 12 -> 0x30 | day bits 0x03; day 31 low bits 7 -> 0xE0 | 23
        assert_eq!(datetime_bytes(&time), [0x24, 0x33, 0xF7, 0xEC]);

        let status = datetime_status(&time);
        assert_eq!(status[0], DATETIME_STATUS);
        assert_eq!(status.len(), 8);
    }

    #[test]
    fn test_beep_params() {
        assert_eq!(beep(2), Some(vec![0x64, 0x04, 0x68]));
        assert_eq!(beep(4), Some(vec![0x64, 0x08, 0x6C]));
        assert_eq!(beep(6), Some(vec![0x64, 0x0C, 0x70]));
        assert_eq!(beep(5), None);
    }

    #[test]
    fn test_keybus_query() {
        let query = keybus_query();
        assert_eq!(query.len(), 12);
        assert_eq!(query[0], 0x4C);
        assert!(query[1..].iter().all(|b| *b == PLACEHOLDER));
    }
}
