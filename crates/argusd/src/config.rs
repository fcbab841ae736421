//! Daemon configuration.
//!
//! Read from a TOML file (every section and key optional) and then
//! overridden from the environment:
//!
//! | variable | key |
//! |---|---|
//! | `ARGUS_SOCKET` | `socket.path` |
//! | `ARGUS_DATA` | `storage.path` |
//! | `ARGUS_SALT` | `security.salt` |
//! | `ARGUS_SIMULATE` | `hardware.simulate` |

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/argus/argusd.toml";

/// Default IPC socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/run/argus/monitor.sock";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub path: PathBuf,
    /// Octal mode string, e.g. `"0660"`.
    pub permissions: Option<String>,
    pub user_id: Option<u32>,
    pub group_id: Option<u32>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_SOCKET_PATH),
            permissions: None,
            user_id: None,
            group_id: None,
        }
    }
}

impl SocketConfig {
    /// Parsed permission bits, if configured.
    pub fn mode(&self) -> Result<Option<u32>, ConfigError> {
        self.permissions
            .as_deref()
            .map(|p| {
                u32::from_str_radix(p, 8).map_err(|_| ConfigError::InvalidValue {
                    key: "socket.permissions",
                    value: p.to_string(),
                })
            })
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Scan cycles per second.
    pub sample_rate: f64,
    /// Deviation from the reference value that counts as an alert.
    pub tolerance: f64,
    pub calibration_cycles: u32,
    pub calibration_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 2.0,
            tolerance: 0.1,
            calibration_cycles: 2,
            calibration_interval_secs: 3,
        }
    }
}

impl MonitorConfig {
    pub fn sample_period(&self) -> Duration {
        if self.sample_rate > 0.0 {
            Duration::from_secs_f64(1.0 / self.sample_rate)
        } else {
            Duration::from_secs(1)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Siren on-phase length.
    pub alert_time_secs: u64,
    /// Siren off-phase length.
    pub suspend_time_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            alert_time_secs: 10,
            suspend_time_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Use simulated adapters instead of GPIO and ADC.
    pub simulate: bool,
    /// Number of sensor inputs on the board.
    pub input_count: usize,
    pub gpio_root: PathBuf,
    /// IIO device directories, eight channels each.
    pub adc_devices: Vec<PathBuf>,
    /// IIO device carrying the mains sense input.
    pub power_device: PathBuf,
    pub power_channel: u32,
    pub siren_pin: u32,
    pub keypad_clock_pin: u32,
    pub keypad_data_pin: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            simulate: false,
            input_count: 15,
            gpio_root: PathBuf::from(argus_hw::SYSFS_GPIO_ROOT),
            adc_devices: vec![
                PathBuf::from("/sys/bus/iio/devices/iio:device0"),
                PathBuf::from("/sys/bus/iio/devices/iio:device1"),
            ],
            power_device: PathBuf::from("/sys/bus/iio/devices/iio:device1"),
            power_channel: 7,
            siren_pin: 22,
            keypad_clock_pin: 5,
            keypad_data_pin: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Salt of the four-key code hashes.
    pub salt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Submission relay; the session is upgraded with STARTTLS before AUTH.
    pub host: String,
    pub port: u16,
    pub sender: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            sender: "info@argus".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Name of this installation in notifications.
    pub source_name: String,
    /// Serial device of the GSM modem.
    pub gsm_port: PathBuf,
    /// Line speed of the modem; 8N1 without flow control.
    pub gsm_baud: u32,
    pub smtp: SmtpConfig,
    pub retry_wait_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            source_name: "argus113".to_string(),
            gsm_port: PathBuf::from("/dev/ttyS0"),
            gsm_baud: 115_200,
            smtp: SmtpConfig::default(),
            retry_wait_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/argus/store.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// argv run for `update_secure_connection`; empty = not available.
    pub secure_connection_command: Vec<String>,
    pub ssh_command: Vec<String>,
    pub sync_clock_command: Vec<String>,
    pub date_command: String,
    pub zoneinfo_dir: PathBuf,
    pub localtime_path: PathBuf,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            secure_connection_command: Vec::new(),
            ssh_command: Vec::new(),
            sync_clock_command: Vec::new(),
            date_command: "date".to_string(),
            zoneinfo_dir: PathBuf::from("/usr/share/zoneinfo"),
            localtime_path: PathBuf::from("/etc/localtime"),
        }
    }
}

// ============================================================================
// Daemon Config
// ============================================================================

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket: SocketConfig,
    pub monitor: MonitorConfig,
    pub alert: AlertConfig,
    pub hardware: HardwareConfig,
    pub security: SecurityConfig,
    pub notifier: NotifierConfig,
    pub storage: StorageConfig,
    pub maintenance: MaintenanceConfig,
}

impl DaemonConfig {
    /// Loads `path` (defaults if it does not exist) and applies the
    /// process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Reads a TOML file; a missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `ARGUS_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ARGUS_SOCKET") {
            self.socket.path = PathBuf::from(path);
        }
        if let Some(path) = lookup("ARGUS_DATA") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(salt) = lookup("ARGUS_SALT") {
            self.security.salt = salt;
        }
        if let Some(value) = lookup("ARGUS_SIMULATE") {
            self.hardware.simulate = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "ARGUS_SIMULATE",
                        value,
                    })
                }
            };
        }
        debug!(config = ?self, "Configuration resolved");
        Ok(())
    }
}
