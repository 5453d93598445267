use std::collections::HashMap;

use serde_json::Value;

use colossus_model::Message;

/// Renders a log message the way it is shown to users.
pub fn format_log_line(message: &Message) -> String {
    let text = match (&message.body, message.body_message()) {
        (_, Some(text)) => text.to_owned(),
        (Value::String(text), None) => text.clone(),
        (Value::Null, None) => String::new(),
        (body, None) => body.to_string(),
    };
    format!("{} {}: {}", message.sender, message.level, text.trim_end())
}

/// Suppresses consecutive identical lines from the same sender.
///
/// Backend output is buffered and frequently replayed, so the same line can
/// arrive several times in a row.
#[derive(Debug, Default)]
pub struct LogDeduper {
    last: HashMap<String, String>,
}

impl LogDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Formatted line for `message`, or `None` if it repeats the previous
    /// line of the same sender.
    pub fn admit(&mut self, message: &Message) -> Option<String> {
        let line = format_log_line(message);
        match self.last.get_mut(&message.sender) {
            Some(previous) if *previous == line => None,
            Some(previous) => {
                previous.clone_from(&line);
                Some(line)
            }
            None => {
                self.last.insert(message.sender.clone(), line.clone());
                Some(line)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colossus_model::Level;
    use serde_json::json;

    fn log(sender: &str, text: &str) -> Message {
        Message {
            sender: sender.into(),
            subject: "-".into(),
            level: Level::Info,
            body: json!({ "message": text }),
        }
    }

    #[test]
    fn repeated_line_is_emitted_once() {
        let mut deduper = LogDeduper::new();
        assert!(deduper.admit(&log("vtex.builder-hub", "Linking")).is_some());
        assert!(deduper.admit(&log("vtex.builder-hub", "Linking")).is_none());
        assert_eq!(
            deduper.admit(&log("vtex.builder-hub", "Linked")).as_deref(),
            Some("vtex.builder-hub info: Linked")
        );
    }

    #[test]
    fn senders_are_tracked_independently() {
        let mut deduper = LogDeduper::new();
        assert!(deduper.admit(&log("a", "same")).is_some());
        assert!(deduper.admit(&log("b", "same")).is_some());
        assert!(deduper.admit(&log("a", "same")).is_none());
    }

    #[test]
    fn non_message_bodies_are_rendered() {
        let mut message = log("a", "");
        message.body = json!("plain text\n");
        assert_eq!(format_log_line(&message), "a info: plain text");
        message.body = json!({ "code": 3 });
        assert_eq!(format_log_line(&message), r#"a info: {"code":3}"#);
    }
}
