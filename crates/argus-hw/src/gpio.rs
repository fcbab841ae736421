//! Minimal sysfs GPIO access.
//!
//! Pins are exported on demand and their `value` file is kept open so the
//! Keybus bit-banging loop does not pay an `open` per edge.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{HwError, HwResult};

/// Default sysfs GPIO class directory.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// One exported GPIO line configured as output.
///
/// Reading an output line returns the level actually present on the pin,
/// which is how the Keybus data line samples the keypad's bits.
#[derive(Debug)]
pub struct GpioPin {
    number: u32,
    value_path: PathBuf,
    value: File,
}

impl GpioPin {
    /// Exports `number` under `root` (if needed) and drives it as an
    /// output starting at `initial`.
    pub fn output(root: &Path, number: u32, initial: bool) -> HwResult<Self> {
        let pin_dir = root.join(format!("gpio{number}"));
        if !pin_dir.exists() {
            let export = root.join("export");
            fs::write(&export, number.to_string()).map_err(|e| HwError::io(&export, e))?;
            debug!(pin = number, "GPIO exported");
        }

        let direction = pin_dir.join("direction");
        let mode = if initial { "high" } else { "low" };
        fs::write(&direction, mode).map_err(|e| HwError::io(&direction, e))?;

        let value_path = pin_dir.join("value");
        let value = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&value_path)
            .map_err(|e| HwError::io(&value_path, e))?;

        Ok(Self {
            number,
            value_path,
            value,
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn write(&mut self, high: bool) -> HwResult<()> {
        let byte: &[u8] = if high { b"1" } else { b"0" };
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.write_all(byte))
            .map_err(|e| HwError::io(&self.value_path, e))
    }

    pub fn read(&mut self) -> HwResult<bool> {
        let mut buf = [0u8; 1];
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.read_exact(&mut buf))
            .map_err(|e| HwError::io(&self.value_path, e))?;
        Ok(buf[0] == b'1')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_pin(root: &Path, number: u32) {
        let dir = root.join(format!("gpio{number}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("value"), "0").unwrap();
    }

    #[test]
    fn test_output_sets_direction_and_level() {
        let root = tempfile::tempdir().unwrap();
        fake_pin(root.path(), 22);

        let mut pin = GpioPin::output(root.path(), 22, true).unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join("gpio22/direction")).unwrap(),
            "high"
        );

        pin.write(true).unwrap();
        assert!(pin.read().unwrap());
        pin.write(false).unwrap();
        assert!(!pin.read().unwrap());
    }

    #[test]
    fn test_unexported_pin_without_sysfs_fails() {
        let root = tempfile::tempdir().unwrap();
        // `export` exists but nothing creates the gpio directory
        fs::write(root.path().join("export"), "").unwrap();
        let err = GpioPin::output(root.path(), 5, false).unwrap_err();
        assert!(matches!(err, HwError::Io { .. }));
    }
}
