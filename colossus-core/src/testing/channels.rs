use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use colossus_model::{BUILDER_HUB_SENDER, Context, Level, Message};

use crate::coordinator::{ChannelSpec, EventChannels, Subscription, Unsubscribe};
use crate::error::ClientError;
use crate::router::ChannelEvent;

/// Channels fed by hand, keyed by channel name.
///
/// Every subscription gets its own queue; [`emit`](Self::emit) pushes to all
/// live queues of a channel. Unsubscribe calls are counted per channel.
#[derive(Clone, Default)]
pub struct ScriptedChannels {
    inner: Arc<Mutex<ChannelsState>>,
}

#[derive(Default)]
struct ChannelsState {
    queues: HashMap<&'static str, Vec<mpsc::UnboundedSender<ChannelEvent>>>,
    subscribed: Vec<ChannelSpec>,
    unsubscribed: HashMap<&'static str, usize>,
}

impl std::fmt::Debug for ScriptedChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ScriptedChannels")
            .field("subscribed", &state.subscribed.len())
            .field("unsubscribed", &state.unsubscribed)
            .finish()
    }
}

impl ScriptedChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every live subscription of `channel`. Returns how
    /// many received it.
    pub fn emit(&self, channel: &str, event: ChannelEvent) -> usize {
        let mut state = self.inner.lock();
        let Some(queues) = state.queues.get_mut(channel) else {
            return 0;
        };
        queues.retain(|tx| !tx.is_closed());
        queues
            .iter()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Emits a builder-hub message with `subject` and `body` on `channel`.
    pub fn emit_message(&self, channel: &str, subject: &str, body: Value) -> usize {
        self.emit(
            channel,
            ChannelEvent::Message(Message {
                sender: format!("{BUILDER_HUB_SENDER}@0.1.0"),
                subject: subject.to_owned(),
                level: Level::Info,
                body,
            }),
        )
    }

    /// Ends every live subscription of `channel`.
    pub fn hang_up(&self, channel: &str) {
        self.inner.lock().queues.remove(channel);
    }

    /// Names of subscribed channels, in subscription order.
    pub fn subscribed(&self) -> Vec<&'static str> {
        self.inner
            .lock()
            .subscribed
            .iter()
            .map(|spec| spec.name)
            .collect()
    }

    pub fn specs(&self) -> Vec<ChannelSpec> {
        self.inner.lock().subscribed.clone()
    }

    pub fn unsubscribe_count(&self, channel: &str) -> usize {
        self.inner
            .lock()
            .unsubscribed
            .get(channel)
            .copied()
            .unwrap_or(0)
    }
}

impl EventChannels for ScriptedChannels {
    fn subscribe(&self, _ctx: &Context, spec: &ChannelSpec) -> Result<Subscription, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.inner.lock();
            state.queues.entry(spec.name).or_default().push(tx);
            state.subscribed.push(spec.clone());
        }

        let inner = Arc::clone(&self.inner);
        let name = spec.name;
        Ok(Subscription {
            events: UnboundedReceiverStream::new(rx).boxed(),
            unsubscribe: Unsubscribe::new(move || {
                *inner.lock().unsubscribed.entry(name).or_default() += 1;
            }),
        })
    }
}
