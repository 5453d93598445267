use std::sync::Arc;

use super::{Listen, ListenerToken, StreamEvent};

pub(crate) type Handler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Listeners in registration order. Lives on the transport rather than on a
/// socket, so a reconnect picks every listener up without re-registration.
#[derive(Default)]
pub(crate) struct Registry {
    next_token: u64,
    entries: Vec<(ListenerToken, Listen, Handler)>,
}

impl Registry {
    pub(crate) fn insert(&mut self, listen: Listen, handler: Handler) -> ListenerToken {
        self.next_token += 1;
        let token = ListenerToken(self.next_token);
        self.entries.push((token, listen, handler));
        token
    }

    pub(crate) fn remove(&mut self, token: ListenerToken) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _, _)| *existing != token);
        before != self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Handlers interested in `event`, cloned so they can run without the
    /// registry lock held.
    pub(crate) fn matching(&self, event: &StreamEvent) -> Vec<Handler> {
        self.entries
            .iter()
            .filter(|(_, listen, _)| listen.accepts(event))
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect()
    }
}
