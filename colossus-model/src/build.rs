use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Message;

/// Structured failure reported by a `build.status` event with code `fail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFailure {
    pub code: String,
    pub message: String,
    /// `body.details.errorCode`, when the backend classified the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl BuildFailure {
    pub fn from_message(message: &Message) -> Self {
        Self {
            code: message.body_code().unwrap_or("fail").to_owned(),
            message: message
                .body_message()
                .unwrap_or("build failed without a message")
                .to_owned(),
            error_code: message.detail_str("errorCode").map(str::to_owned),
        }
    }

    /// Key used to pick a caller-registered failure handler.
    pub fn handler_key(&self) -> &str {
        self.error_code.as_deref().unwrap_or(&self.code)
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "build failed ({}): {}", self.code, self.message)
    }
}

impl std::error::Error for BuildFailure {}

/// Interpretation of a `build.status` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Success,
    Fail(BuildFailure),
    /// Any non-terminal code (`start`, `queued`, ...).
    Other(String),
}

impl BuildStatus {
    pub fn from_message(message: &Message) -> Self {
        match message.body_code() {
            Some("success") => BuildStatus::Success,
            Some("fail") => BuildStatus::Fail(BuildFailure::from_message(message)),
            Some(other) => BuildStatus::Other(other.to_owned()),
            None => BuildStatus::Other(String::new()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Fail(_))
    }
}

/// Upload progress carried by `receive.status` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveProgress {
    pub code: Option<String>,
    /// Percentage of the payload the backend has received, 0-100.
    pub percentage: Option<f64>,
    pub message: Option<String>,
}

impl ReceiveProgress {
    pub fn from_message(message: &Message) -> Self {
        let percentage = message
            .body
            .get("details")
            .and_then(|details| details.get("percentage"))
            .and_then(Value::as_f64);

        Self {
            code: message.body_code().map(str::to_owned),
            percentage,
            message: message.body_message().map(str::to_owned),
        }
    }
}
