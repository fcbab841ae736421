//! Argus Core - Shared domain types for the monitoring controller
//!
//! This crate provides the domain types shared between the daemon
//! (argusd), the IPC protocol and the control client.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod alert;
pub mod error;
pub mod keypad;
pub mod notification;
pub mod sensor;
pub mod state;
pub mod user;

// Re-exports for convenience
pub use alert::{format_wire_time, Alert, AlertId, AlertSensor, AlertView};
pub use error::{DomainError, DomainResult};
pub use keypad::{KeypadSettings, KeypadType};
pub use notification::{
    ChannelSubscription, EmailOptions, GsmOptions, NotificationKind, NotificationMessage,
    NotificationOptions, Subscriptions,
};
pub use sensor::{Sensor, SensorId, SensorSnapshot, Zone, ZoneId};
pub use state::{AlertType, ArmType, MonitoringState, PowerSource};
pub use user::{hash_access_code, FourKeyHash, User};
