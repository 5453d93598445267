use std::sync::Arc;

use tracing::debug;
use url::Url;

use colossus_model::{
    BUILD_STATUS_SUBJECT, BUILDER_HUB_SENDER, Context, Level, RECEIVE_STATUS_SUBJECT,
    strip_version,
};

use super::session::Unsubscribe;
use crate::config::StreamConfig;
use crate::error::ClientError;
use crate::router::{Filter, RoutedStream, events_url, logs_url, route};
use crate::transport::{Connector, EventStream, StreamRequest};

pub const LOGS_CHANNEL: &str = "logs";

/// Where a channel's frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSource {
    /// The `events` endpoint, narrowed server-side to one sender and a set
    /// of keys.
    Events { sender: String, keys: Vec<String> },
    /// The `logs` endpoint at a minimum level.
    Logs { level: Level },
}

/// One logical channel of a build session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: &'static str,
    pub source: ChannelSource,
    pub filter: Filter,
}

impl ChannelSpec {
    pub fn build_status(resource: &str) -> Self {
        Self::builder_hub(BUILD_STATUS_SUBJECT, resource)
    }

    pub fn receive_status(resource: &str) -> Self {
        Self::builder_hub(RECEIVE_STATUS_SUBJECT, resource)
    }

    /// Log lines carry the concrete app version, so the filter matches on the
    /// app name alone.
    pub fn logs(resource: &str, level: Level, senders: Option<Vec<String>>, log_any: bool) -> Self {
        let mut filter = Filter::subject(strip_version(resource)).with_log_any(log_any);
        filter.senders = senders;
        Self {
            name: LOGS_CHANNEL,
            source: ChannelSource::Logs { level },
            filter,
        }
    }

    fn builder_hub(key: &'static str, resource: &str) -> Self {
        Self {
            name: key,
            source: ChannelSource::Events {
                sender: BUILDER_HUB_SENDER.to_owned(),
                keys: vec![key.to_owned()],
            },
            filter: Filter::subject(resource),
        }
    }
}

/// A live channel. Dropping it releases the underlying stream.
pub struct Subscription {
    pub events: RoutedStream,
    pub unsubscribe: Unsubscribe,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("unsubscribe", &self.unsubscribe)
            .finish_non_exhaustive()
    }
}

/// Opens channels for build sessions.
pub trait EventChannels: Send + Sync + 'static {
    fn subscribe(&self, ctx: &Context, spec: &ChannelSpec) -> Result<Subscription, ClientError>;
}

/// Channels backed by one [`EventStream`] per subscription.
pub struct ColossusChannels {
    endpoint: Url,
    connector: Arc<dyn Connector>,
    config: StreamConfig,
}

impl std::fmt::Debug for ColossusChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColossusChannels")
            .field("endpoint", &self.endpoint.as_str())
            .field("config", &self.config)
            .finish()
    }
}

impl ColossusChannels {
    pub fn new(endpoint: Url, connector: Arc<dyn Connector>, config: StreamConfig) -> Self {
        Self {
            endpoint,
            connector,
            config,
        }
    }

    fn url_for(&self, ctx: &Context, source: &ChannelSource) -> Result<Url, ClientError> {
        match source {
            ChannelSource::Events { sender, keys } => {
                let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                events_url(&self.endpoint, ctx, sender, &keys)
            }
            ChannelSource::Logs { level } => logs_url(&self.endpoint, ctx, *level),
        }
    }
}

impl EventChannels for ColossusChannels {
    fn subscribe(&self, ctx: &Context, spec: &ChannelSpec) -> Result<Subscription, ClientError> {
        let url = self.url_for(ctx, &spec.source)?;
        let request = StreamRequest::for_context(url, ctx)?;
        let stream = EventStream::new(request, Arc::clone(&self.connector), self.config.clone());
        let events = route(&stream, spec.filter.clone());
        stream.connect();
        debug!(
            channel = spec.name,
            account = %ctx.account,
            workspace = %ctx.workspace,
            "channel subscribed"
        );

        Ok(Subscription {
            events,
            unsubscribe: Unsubscribe::new(move || stream.close()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConnector;
    use futures::StreamExt;
    use serde_json::json;

    fn log_line(subject: &str) -> colossus_model::Message {
        colossus_model::Message {
            sender: "vtex.builder-hub@0.271.0".into(),
            subject: subject.into(),
            level: Level::Info,
            body: json!({ "message": "Linking" }),
        }
    }

    #[test]
    fn logs_filter_ignores_the_version_range() {
        let spec = ChannelSpec::logs("vendor.app@4.x", Level::Info, None, false);
        assert_eq!(spec.filter.subject, "vendor.app");
        assert!(spec.filter.matches(&log_line("vendor.app@4.2.1")));
        assert!(!spec.filter.matches(&log_line("vendor.other@4.2.1")));

        let status = ChannelSpec::build_status("vendor.app@4.x");
        assert_eq!(status.filter.subject, "vendor.app@4.x");
    }

    #[tokio::test(start_paused = true)]
    async fn colossus_channel_routes_matching_frames() {
        let connector = ScriptedConnector::new();
        let socket = connector.push_socket();
        socket
            .open()
            .data(r#"{"sender":"vtex.builder-hub@0.1.0","subject":"vtex.other@1.x","body":{"code":"success"}}"#)
            .data(r#"{"sender":"vtex.builder-hub@0.1.0","subject":"vtex.app@1.x","body":{"code":"success"}}"#);

        let channels = ColossusChannels::new(
            Url::parse("https://colossus.test/v0").unwrap(),
            Arc::new(connector.clone()),
            StreamConfig::default(),
        );
        let ctx = Context::new("acme", "dev", "token");
        let mut subscription = channels
            .subscribe(&ctx, &ChannelSpec::build_status("vtex.app"))
            .unwrap();

        let Some(crate::router::ChannelEvent::Message(message)) = subscription.events.next().await
        else {
            panic!("expected a routed message");
        };
        assert_eq!(message.subject, "vtex.app@1.x");

        let request = &connector.requests()[0];
        assert_eq!(
            request.url.as_str(),
            "https://colossus.test/v0/acme/dev/events?onUnsubscribe=link_interrupted&sender=vtex.builder-hub&keys=build.status"
        );
        assert_eq!(request.headers["authorization"], "bearer token");

        subscription.unsubscribe.call();
        assert!(subscription.events.next().await.is_none());
    }
}
