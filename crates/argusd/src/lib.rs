//! Argus daemon - monitoring engine and its collaborators
//!
//! - `monitor` - arm/disarm state machine and sensor scanning
//! - `alert` - delayed escalation and the siren alert
//! - `keypad` - DSC Keybus keypad and access code entry
//! - `notifier` - SMS/e-mail retry queue
//! - `server` - Unix socket command server
//! - `broadcast`, `state`, `events` - plumbing between the tasks
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            argusd                                │
//! │                                                                  │
//! │  ┌────────────┐  tokens   ┌─────────────┐                        │
//! │  │ IpcServer  │──────────▶│ Broadcaster │──┬──▶ Monitor ──────┐   │
//! │  └─────┬──────┘           └─────────────┘  ├──▶ Keypad        │   │
//! │        │ get_*                   ▲          └──▶ Notifier ◀──┐ │   │
//! │        ▼                         │ Disarm (valid code)       │ ▼   │
//! │  ┌──────────────────┐            └── Keypad         Escalator    │
//! │  │ SharedStateStore │◀──────────────────────────── (siren alert) │
//! │  └──────────────────┘                                            │
//! │        ▲ subscribe ── EventPublisher ◀── monitor / escalator     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//!   in production code
//! - All fallible operations return `Result` or `Option`
//! - Hardware, storage and channel failures are logged and the loops
//!   carry on

pub mod alert;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod events;
pub mod keypad;
pub mod maintenance;
pub mod monitor;
pub mod notifier;
pub mod server;
pub mod service;
pub mod state;
pub mod storage;

pub use broadcast::{Broadcaster, ControlToken};
pub use client::{ClientError, EventStream, IpcClient};
pub use config::DaemonConfig;
pub use service::{Hardware, Service, ServiceError};
pub use state::{SharedState, SharedStateStore};
