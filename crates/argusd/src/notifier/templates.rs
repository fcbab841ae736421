//! Message texts.

use argus_core::{format_wire_time, NotificationKind, NotificationMessage};

const SIGNATURE: &str = "Argus Home Security";

/// Short text for SMS.
pub fn sms_text(message: &NotificationMessage) -> String {
    let time = format_wire_time(message.time);
    match message.kind {
        NotificationKind::AlertStarted => format!("Alert({}) started at {}!", message.alert_id, time),
        NotificationKind::AlertStopped => format!("Alert({}) stopped at {}!", message.alert_id, time),
    }
}

pub fn email_subject(message: &NotificationMessage) -> &'static str {
    match message.kind {
        NotificationKind::AlertStarted => "Alert started",
        NotificationKind::AlertStopped => "Alert stopped",
    }
}

pub fn email_body(message: &NotificationMessage) -> String {
    let time = format_wire_time(message.time);
    match message.kind {
        NotificationKind::AlertStarted => format!(
            "Hi,\n\nYou have an alert({}) since {}.\nThe alert started on sensor(s): {}!\n\n{}\n",
            message.alert_id,
            time,
            message.sensors.join(", "),
            SIGNATURE
        ),
        NotificationKind::AlertStopped => format!(
            "Hi,\n\nThe alert({}) stopped at {}!\n\n{}\n",
            message.alert_id, time, SIGNATURE
        ),
    }
}
