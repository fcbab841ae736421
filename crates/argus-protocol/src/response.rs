//! Replies sent by the daemon, one JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::RequestError;

/// `{"result": bool, "message"?: string, "value"?: object}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Response {
    /// Plain success.
    pub fn ok() -> Self {
        Self {
            result: true,
            message: None,
            value: None,
        }
    }

    /// Success carrying a value.
    pub fn ok_with(value: Value) -> Self {
        Self {
            result: true,
            message: None,
            value: Some(value),
        }
    }

    /// Failure with a human-readable message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result: false,
            message: Some(message.into()),
            value: None,
        }
    }

    /// Failure reply for a line that did not parse.
    ///
    /// Unknown actions get the fixed `"Unknown command"` text the REST
    /// layer matches on.
    pub fn rejected(error: &RequestError) -> Self {
        match error {
            RequestError::UnknownAction(_) => Self::failure("Unknown command"),
            other => Self::failure(format!("Invalid request: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_optional_members_omitted() {
        let line = serde_json::to_string(&Response::ok()).unwrap();
        assert_eq!(line, r#"{"result":true}"#);

        let line = serde_json::to_string(&Response::ok_with(json!({"type": "away"}))).unwrap();
        assert_eq!(line, r#"{"result":true,"value":{"type":"away"}}"#);
    }

    #[test]
    fn test_rejected_messages() {
        let unknown = Response::rejected(&RequestError::UnknownAction("x".to_string()));
        assert!(!unknown.result);
        assert_eq!(unknown.message.as_deref(), Some("Unknown command"));

        let missing = Response::rejected(&RequestError::MissingAction);
        assert!(missing
            .message
            .as_deref()
            .unwrap()
            .starts_with("Invalid request: "));
    }
}
