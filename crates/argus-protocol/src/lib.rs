//! Argus Protocol - IPC wire protocol for daemon communication
//!
//! Line-oriented JSON over a Unix stream socket:
//! - `request` - `{"action": <name>, ...}` messages sent by the REST layer
//! - `response` - `{"result": bool, "message"?, "value"?}` replies
//! - `event` - named state-change events pushed to subscribers

pub mod event;
pub mod request;
pub mod response;

pub use event::PushEvent;
pub use request::{ClockSettings, Request, RequestError};
pub use response::Response;
