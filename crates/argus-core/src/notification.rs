//! Outbound notification messages and the options that route them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::AlertId;

/// Which alert event a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AlertStarted,
    AlertStopped,
}

/// One queued notification.
///
/// Created by the siren alert, mutated (retry counter) only by the
/// notifier, dropped on delivery or after the retry budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub kind: NotificationKind,
    pub alert_id: AlertId,
    /// Name of the installation sending the message.
    pub source: String,
    /// Sensor descriptions; empty for stop messages.
    pub sensors: Vec<String>,
    pub time: DateTime<Utc>,
    pub retries: u32,
}

impl NotificationMessage {
    pub fn alert_started(
        alert_id: AlertId,
        source: impl Into<String>,
        sensors: Vec<String>,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: NotificationKind::AlertStarted,
            alert_id,
            source: source.into(),
            sensors,
            time,
            retries: 0,
        }
    }

    pub fn alert_stopped(alert_id: AlertId, source: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            kind: NotificationKind::AlertStopped,
            alert_id,
            source: source.into(),
            sensors: Vec::new(),
            time,
            retries: 0,
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Per-event subscription flags of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelSubscription {
    #[serde(default)]
    pub alert_started: bool,
    #[serde(default)]
    pub alert_stopped: bool,
}

impl ChannelSubscription {
    pub fn wants(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::AlertStarted => self.alert_started,
            NotificationKind::AlertStopped => self.alert_stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Subscriptions {
    #[serde(default)]
    pub sms: ChannelSubscription,
    #[serde(default)]
    pub email: ChannelSubscription,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmailOptions {
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
    /// Recipient of alert e-mails.
    #[serde(default)]
    pub email_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GsmOptions {
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub pin_code: String,
}

/// Notification settings edited through the REST layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationOptions {
    #[serde(default)]
    pub subscriptions: Subscriptions,
    #[serde(default)]
    pub email: EmailOptions,
    #[serde(default)]
    pub gsm: GsmOptions,
}
