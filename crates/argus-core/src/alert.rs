//! Alert episodes created when an escalation fires.

use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::sensor::{SensorId, SensorSnapshot};
use crate::state::AlertType;

/// Format used for alert timestamps on the wire.
const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Persistent identifier of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sensor that joined an alert, as it looked when it joined.
pub type AlertSensor = SensorSnapshot;

/// One alert episode: a siren run and the sensors that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub alert_type: AlertType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Ordered by join time, unique by sensor id.
    pub sensors: Vec<AlertSensor>,
}

impl Alert {
    /// Opens a new alert with an empty sensor set.
    pub fn open(id: AlertId, alert_type: AlertType, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            alert_type,
            start_time,
            end_time: None,
            sensors: Vec::new(),
        }
    }

    /// Adds a sensor unless one with the same id already joined.
    ///
    /// Returns true if the set changed.
    pub fn add_sensor(&mut self, sensor: SensorSnapshot) -> bool {
        if self.contains(sensor.id) {
            return false;
        }
        self.sensors.push(sensor);
        true
    }

    pub fn contains(&self, id: SensorId) -> bool {
        self.sensors.iter().any(|s| s.id == id)
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn close(&mut self, end_time: DateTime<Utc>) {
        self.end_time = Some(end_time);
    }

    /// Descriptions of the joined sensors, in join order.
    pub fn sensor_descriptions(&self) -> Vec<String> {
        self.sensors.iter().map(|s| s.description.clone()).collect()
    }

    /// Serialized form pushed to the front end.
    pub fn view(&self) -> AlertView {
        AlertView {
            id: self.id,
            alert_type: self.alert_type,
            start_time: format_wire_time(self.start_time),
            end_time: self.end_time.map(format_wire_time).unwrap_or_default(),
            sensors: self.sensors.clone(),
        }
    }
}

/// Wire representation of an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertView {
    pub id: AlertId,
    pub alert_type: AlertType,
    pub start_time: String,
    /// Empty while the alert is still open.
    pub end_time: String,
    pub sensors: Vec<AlertSensor>,
}

/// Formats a timestamp in local time without sub-second precision.
pub fn format_wire_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format(WIRE_TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: u32) -> SensorSnapshot {
        SensorSnapshot {
            id: SensorId(id),
            channel: id,
            type_id: 1,
            description: format!("sensor {id}"),
        }
    }

    #[test]
    fn test_add_sensor_deduplicates_by_id() {
        let mut alert = Alert::open(AlertId(1), AlertType::Away, Utc::now());
        assert!(alert.add_sensor(snapshot(1)));
        assert!(alert.add_sensor(snapshot(2)));
        assert!(!alert.add_sensor(snapshot(1)));
        assert_eq!(alert.sensors.len(), 2);
        assert_eq!(
            alert.sensor_descriptions(),
            vec!["sensor 1".to_string(), "sensor 2".to_string()]
        );
    }

    #[test]
    fn test_view_of_open_alert_has_empty_end_time() {
        let mut alert = Alert::open(AlertId(7), AlertType::Sabotage, Utc::now());
        let view = alert.view();
        assert_eq!(view.end_time, "");
        assert_eq!(view.start_time.len(), 19);

        alert.close(Utc::now());
        assert!(!alert.is_open());
        assert_eq!(alert.view().end_time.len(), 19);
    }
}
