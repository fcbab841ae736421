//! Persistence collaborator.
//!
//! The engine treats storage as a synchronous, best-effort collaborator:
//! callers log failures and keep running. Two backends share one document
//! model:
//!
//! - [`JsonFileStore`] - a whole-document JSON file, re-read on every load
//!   so edits made by the REST layer are seen on the next reload, written
//!   atomically (temp file + rename)
//! - [`MemoryStore`] - in-process, for tests and simulation

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use argus_core::{
    Alert, AlertId, AlertType, KeypadSettings, NotificationOptions, Sensor, SensorId, User, Zone,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt store {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// What the startup cleanup changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupReport {
    pub cleared_sensors: usize,
    pub closed_alerts: usize,
}

/// Persistence operations the engine needs.
pub trait Store: Send + Sync {
    /// Non-deleted sensors.
    fn load_sensors(&self) -> StorageResult<Vec<Sensor>>;

    /// Non-deleted zones.
    fn load_zones(&self) -> StorageResult<Vec<Zone>>;

    fn load_users(&self) -> StorageResult<Vec<User>>;

    /// `None` when no keypad was ever configured.
    fn load_keypad(&self) -> StorageResult<Option<KeypadSettings>>;

    fn load_notification_options(&self) -> StorageResult<NotificationOptions>;

    fn save_sensor_references(&self, references: &[(SensorId, f64)]) -> StorageResult<()>;

    fn save_sensor_alerts(&self, flags: &[(SensorId, bool)]) -> StorageResult<()>;

    /// Opens and persists a new alert with a fresh id.
    fn create_alert(&self, alert_type: AlertType, start_time: DateTime<Utc>)
        -> StorageResult<Alert>;

    fn update_alert(&self, alert: &Alert) -> StorageResult<()>;

    /// Clears stale alert flags and closes alerts left open at `closed_at`.
    fn cleanup(&self, closed_at: DateTime<Utc>) -> StorageResult<CleanupReport>;
}

// ============================================================================
// Document Model
// ============================================================================

/// Everything the store persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreData {
    pub sensors: Vec<Sensor>,
    pub zones: Vec<Zone>,
    pub users: Vec<User>,
    pub keypad: Option<KeypadSettings>,
    pub notifications: NotificationOptions,
    pub alerts: Vec<Alert>,
}

impl StoreData {
    fn sensor_mut(&mut self, id: SensorId) -> StorageResult<&mut Sensor> {
        self.sensors
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StorageError::NotFound {
                kind: "sensor",
                id: id.to_string(),
            })
    }

    fn save_references(&mut self, references: &[(SensorId, f64)]) -> StorageResult<()> {
        for (id, value) in references {
            self.sensor_mut(*id)?.reference_value = Some(*value);
        }
        Ok(())
    }

    fn save_alerts(&mut self, flags: &[(SensorId, bool)]) -> StorageResult<()> {
        for (id, alert) in flags {
            self.sensor_mut(*id)?.alert = *alert;
        }
        Ok(())
    }

    fn create_alert(&mut self, alert_type: AlertType, start_time: DateTime<Utc>) -> Alert {
        let next = self.alerts.iter().map(|a| a.id.0).max().unwrap_or(0) + 1;
        let alert = Alert::open(AlertId(next), alert_type, start_time);
        self.alerts.push(alert.clone());
        alert
    }

    fn update_alert(&mut self, alert: &Alert) -> StorageResult<()> {
        let slot = self
            .alerts
            .iter_mut()
            .find(|a| a.id == alert.id)
            .ok_or_else(|| StorageError::NotFound {
                kind: "alert",
                id: alert.id.to_string(),
            })?;
        *slot = alert.clone();
        Ok(())
    }

    fn cleanup(&mut self, closed_at: DateTime<Utc>) -> CleanupReport {
        let mut report = CleanupReport::default();
        for sensor in self.sensors.iter_mut().filter(|s| s.alert) {
            sensor.alert = false;
            report.cleared_sensors += 1;
        }
        for alert in self.alerts.iter_mut().filter(|a| a.is_open()) {
            alert.close(closed_at);
            report.closed_alerts += 1;
        }
        report
    }

    fn live_sensors(&self) -> Vec<Sensor> {
        self.sensors.iter().filter(|s| !s.deleted).cloned().collect()
    }

    fn live_zones(&self) -> Vec<Zone> {
        self.zones.iter().filter(|z| !z.deleted).cloned().collect()
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new(data: StoreData) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }

    /// Copy of the current document.
    pub fn data(&self) -> StoreData {
        self.lock().clone()
    }

    /// Replaces the document, as an external editor would.
    pub fn replace(&self, data: StoreData) {
        *self.lock() = data;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Store for MemoryStore {
    fn load_sensors(&self) -> StorageResult<Vec<Sensor>> {
        Ok(self.lock().live_sensors())
    }

    fn load_zones(&self) -> StorageResult<Vec<Zone>> {
        Ok(self.lock().live_zones())
    }

    fn load_users(&self) -> StorageResult<Vec<User>> {
        Ok(self.lock().users.clone())
    }

    fn load_keypad(&self) -> StorageResult<Option<KeypadSettings>> {
        Ok(self.lock().keypad)
    }

    fn load_notification_options(&self) -> StorageResult<NotificationOptions> {
        Ok(self.lock().notifications.clone())
    }

    fn save_sensor_references(&self, references: &[(SensorId, f64)]) -> StorageResult<()> {
        self.lock().save_references(references)
    }

    fn save_sensor_alerts(&self, flags: &[(SensorId, bool)]) -> StorageResult<()> {
        self.lock().save_alerts(flags)
    }

    fn create_alert(
        &self,
        alert_type: AlertType,
        start_time: DateTime<Utc>,
    ) -> StorageResult<Alert> {
        Ok(self.lock().create_alert(alert_type, start_time))
    }

    fn update_alert(&self, alert: &Alert) -> StorageResult<()> {
        self.lock().update_alert(alert)
    }

    fn cleanup(&self, closed_at: DateTime<Utc>) -> StorageResult<CleanupReport> {
        Ok(self.lock().cleanup(closed_at))
    }
}

// ============================================================================
// JSON File Store
// ============================================================================

/// Whole-document JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Opens the store, creating an empty document if none exists.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let store = Self {
            path: path.into(),
            lock: Mutex::new(()),
        };
        if !store.path.exists() {
            if let Some(parent) = store.path.parent() {
                fs::create_dir_all(parent).map_err(|e| store.io_error(e))?;
            }
            store.write(&StoreData::default())?;
            debug!(path = %store.path.display(), "Created empty store");
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read(&self) -> StorageResult<StoreData> {
        let text = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        serde_json::from_str(&text).map_err(|e| StorageError::Parse {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn write(&self, data: &StoreData) -> StorageResult<()> {
        let text = serde_json::to_string_pretty(data).map_err(|e| StorageError::Parse {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }

    fn view<R>(&self, f: impl FnOnce(&StoreData) -> R) -> StorageResult<R> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let data = self.read()?;
        Ok(f(&data))
    }

    fn modify<R>(&self, f: impl FnOnce(&mut StoreData) -> StorageResult<R>) -> StorageResult<R> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut data = self.read()?;
        let result = f(&mut data)?;
        self.write(&data)?;
        Ok(result)
    }
}

impl Store for JsonFileStore {
    fn load_sensors(&self) -> StorageResult<Vec<Sensor>> {
        self.view(StoreData::live_sensors)
    }

    fn load_zones(&self) -> StorageResult<Vec<Zone>> {
        self.view(StoreData::live_zones)
    }

    fn load_users(&self) -> StorageResult<Vec<User>> {
        self.view(|d| d.users.clone())
    }

    fn load_keypad(&self) -> StorageResult<Option<KeypadSettings>> {
        self.view(|d| d.keypad)
    }

    fn load_notification_options(&self) -> StorageResult<NotificationOptions> {
        self.view(|d| d.notifications.clone())
    }

    fn save_sensor_references(&self, references: &[(SensorId, f64)]) -> StorageResult<()> {
        self.modify(|d| d.save_references(references))
    }

    fn save_sensor_alerts(&self, flags: &[(SensorId, bool)]) -> StorageResult<()> {
        self.modify(|d| d.save_alerts(flags))
    }

    fn create_alert(
        &self,
        alert_type: AlertType,
        start_time: DateTime<Utc>,
    ) -> StorageResult<Alert> {
        self.modify(|d| Ok(d.create_alert(alert_type, start_time)))
    }

    fn update_alert(&self, alert: &Alert) -> StorageResult<()> {
        self.modify(|d| d.update_alert(alert))
    }

    fn cleanup(&self, closed_at: DateTime<Utc>) -> StorageResult<CleanupReport> {
        self.modify(|d| Ok(d.cleanup(closed_at)))
    }
}
