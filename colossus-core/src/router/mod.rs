//! Turns raw stream frames into typed [`Message`]s and decides which of them
//! a subscriber gets to see.

mod dedupe;
mod endpoints;

use futures::StreamExt;
use futures::stream::BoxStream;

use colossus_model::{Message, strip_version};

use crate::error::{RouterError, TransportError};
use crate::transport::{EventStream, Listen, StreamEvent};

pub use dedupe::{LogDeduper, format_log_line};
pub use endpoints::{events_url, logs_url};

/// What a routed channel yields.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(Message),
    /// The frame was dropped; the stream goes on.
    Malformed(RouterError),
    /// The transport gave up. Nothing follows this event.
    Lost(TransportError),
}

pub type RoutedStream = BoxStream<'static, ChannelEvent>;

pub fn parse(raw: &str) -> Result<Message, RouterError> {
    serde_json::from_str(raw).map_err(|err| RouterError::Malformed {
        raw: raw.to_owned(),
        reason: err.to_string(),
    })
}

/// Subject/sender predicate for one subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Prefix the message subject must start with. Empty matches everything.
    pub subject: String,
    /// Allowed sender names, compared without their `@version` suffix.
    pub senders: Option<Vec<String>>,
    /// Accept every message whose subject is carried in its body.
    pub log_any: bool,
}

impl Filter {
    pub fn subject(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    pub fn with_senders<I, S>(mut self, senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.senders = Some(senders.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_log_any(mut self, log_any: bool) -> Self {
        self.log_any = log_any;
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.subject_matches(message) && self.sender_allowed(message)
    }

    fn subject_matches(&self, message: &Message) -> bool {
        if message.subject.starts_with(&self.subject) {
            return true;
        }
        if !message.has_embedded_subject() {
            return false;
        }
        self.log_any
            || message
                .embedded_subject()
                .is_some_and(|subject| subject.starts_with(&self.subject))
    }

    fn sender_allowed(&self, message: &Message) -> bool {
        let Some(senders) = &self.senders else {
            return true;
        };
        let sender = message.sender_name();
        senders
            .iter()
            .any(|allowed| strip_version(allowed) == sender)
    }
}

/// Routes `message` frames of `stream` through `filter`.
///
/// Non-matching messages are skipped, malformed frames are reported in place.
/// Transport errors below the retry budget are left to the transport; the
/// terminal one becomes [`ChannelEvent::Lost`]. The routed stream ends when
/// the transport closes.
pub fn route(stream: &EventStream, filter: Filter) -> RoutedStream {
    let mut events = stream.events(&[Listen::message(), Listen::Error]);

    async_stream::stream! {
        while let Some(event) = events.next().await {
            match event {
                StreamEvent::Message(frame) => match parse(&frame.data) {
                    Ok(message) if filter.matches(&message) => {
                        yield ChannelEvent::Message(message);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!(error = %err, "dropping malformed frame");
                        yield ChannelEvent::Malformed(err);
                    }
                },
                StreamEvent::Error(err) if err.terminal => {
                    yield ChannelEvent::Lost(err);
                    break;
                }
                StreamEvent::Error(_) | StreamEvent::Open => {}
            }
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use colossus_model::Level;
    use serde_json::json;

    fn message(sender: &str, subject: &str, body: serde_json::Value) -> Message {
        Message {
            sender: sender.into(),
            subject: subject.into(),
            level: Level::Info,
            body,
        }
    }

    #[test]
    fn parse_reports_raw_payload_on_failure() {
        let err = parse("{not json").unwrap_err();
        let RouterError::Malformed { raw, .. } = err;
        assert_eq!(raw, "{not json");
    }

    #[test]
    fn parse_reads_frame_payload() {
        let parsed = parse(
            r#"{"sender":"vtex.builder-hub@0.1.0","subject":"build.status","level":"info","body":{"code":"success"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.subject, "build.status");
        assert_eq!(parsed.body_code(), Some("success"));
    }

    #[test]
    fn subject_is_a_prefix_match() {
        let filter = Filter::subject("vtex.store");
        assert!(filter.matches(&message("x", "vtex.store-theme", json!(null))));
        assert!(!filter.matches(&message("x", "vtex.admin", json!(null))));
    }

    #[test]
    fn embedded_subject_is_read_from_body() {
        let filter = Filter::subject("vtex.store");
        let embedded = message("x", "-", json!({ "subject": "vtex.store@1.x" }));
        let other = message("x", "-", json!({ "subject": "vtex.admin@1.x" }));
        assert!(filter.matches(&embedded));
        assert!(!filter.matches(&other));
        assert!(filter.clone().with_log_any(true).matches(&other));
    }

    #[test]
    fn log_any_does_not_widen_explicit_subjects() {
        let filter = Filter::subject("vtex.store").with_log_any(true);
        assert!(!filter.matches(&message("x", "vtex.admin", json!(null))));
    }

    #[test]
    fn sender_allow_list_ignores_versions() {
        let filter = Filter::subject("build.status").with_senders(["vtex.builder-hub"]);
        assert!(filter.matches(&message("vtex.builder-hub@0.271.0", "build.status", json!(null))));
        assert!(!filter.matches(&message("vtex.render-server@8.0.0", "build.status", json!(null))));
    }
}
