use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EMBEDDED_SUBJECT, Level};

/// One frame published on the event bus.
///
/// `subject` may be the [`EMBEDDED_SUBJECT`] marker, in which case the real
/// topic is carried in `body.subject`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub subject: String,
    #[serde(default)]
    pub level: Level,
    #[serde(default)]
    pub body: Value,
}

impl Message {
    /// Sender with any `@version` suffix removed.
    pub fn sender_name(&self) -> &str {
        strip_version(&self.sender)
    }

    pub fn has_embedded_subject(&self) -> bool {
        self.subject == EMBEDDED_SUBJECT
    }

    /// `body.subject`, used when the frame subject is the embedded marker.
    pub fn embedded_subject(&self) -> Option<&str> {
        self.body.get("subject").and_then(Value::as_str)
    }

    pub fn body_code(&self) -> Option<&str> {
        self.body.get("code").and_then(Value::as_str)
    }

    pub fn body_message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }

    /// `body.details.<key>` as a string.
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.body
            .get("details")
            .and_then(|details| details.get(key))
            .and_then(Value::as_str)
    }
}

/// `vtex.builder-hub@0.271.0` -> `vtex.builder-hub`.
pub fn strip_version(sender: &str) -> &str {
    match sender.split_once('@') {
        Some((name, _)) => name,
        None => sender,
    }
}
