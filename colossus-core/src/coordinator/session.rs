use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Closure releasing one channel subscription. Runs at most once, either
/// explicitly through [`call`](Self::call) or on drop.
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscribe {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Some(Box::new(release)))
    }

    pub fn noop() -> Self {
        Self(None)
    }

    /// Returns `true` if this call ran the closure.
    pub fn call(&mut self) -> bool {
        match self.0.take() {
            Some(release) => {
                release();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Unsubscribe")
            .field(&if self.0.is_some() { "pending" } else { "done" })
            .finish()
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.call();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Resolved,
    Rejected,
    /// Cancelled by the caller, or returned without waiting and later
    /// released.
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Resolved | SessionState::Rejected | SessionState::Cancelled
        )
    }
}

pub(crate) struct SessionInner {
    resource: String,
    state: Mutex<SessionState>,
    subscriptions: Mutex<Vec<Unsubscribe>>,
    cancel: CancellationToken,
}

impl SessionInner {
    pub(crate) fn new(resource: String) -> Arc<Self> {
        Arc::new(Self {
            resource,
            state: Mutex::new(SessionState::Idle),
            subscriptions: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub(crate) fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    /// `Idle -> Listening`. Fails if the session was cancelled before it
    /// started.
    pub(crate) fn start(&self) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Idle {
            return false;
        }
        *state = SessionState::Listening;
        true
    }

    /// Keeps `unsubscribe` until the session settles. A session that already
    /// settled releases it right away.
    pub(crate) fn hold(&self, mut unsubscribe: Unsubscribe) {
        let state = self.state.lock();
        if state.is_terminal() {
            drop(state);
            unsubscribe.call();
            return;
        }
        self.subscriptions.lock().push(unsubscribe);
    }

    /// Moves to a terminal state and releases every subscription. Only the
    /// first transition out of `Idle`/`Listening` wins.
    pub(crate) fn finish(&self, outcome: SessionState) -> bool {
        debug_assert!(outcome.is_terminal());
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return false;
            }
            *state = outcome;
        }
        trace!(resource = %self.resource, state = ?outcome, "build session settled");

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for mut unsubscribe in subscriptions {
            unsubscribe.call();
        }
        self.cancel.cancel();
        true
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock()
    }
}

/// Caller-side handle on a build session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("resource", &self.inner.resource)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    pub(crate) fn new(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Stops listening. Safe to call any number of times and after the
    /// session settled; only the first effective call unsubscribes.
    pub fn cancel(&self) {
        self.inner.finish(SessionState::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(count: &Arc<AtomicUsize>) -> Unsubscribe {
        let count = Arc::clone(count);
        Unsubscribe::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn unsubscribe_runs_once_even_when_dropped_after_call() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut unsubscribe = counted(&count);
        assert!(unsubscribe.call());
        assert!(!unsubscribe.call());
        drop(unsubscribe);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_first_terminal_transition_wins() {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = SessionInner::new("vtex.app".into());
        assert!(inner.start());
        inner.hold(counted(&count));
        inner.hold(counted(&count));

        assert!(inner.finish(SessionState::Resolved));
        assert!(!inner.finish(SessionState::Rejected));
        let handle = SessionHandle::new(Arc::clone(&inner));
        handle.cancel();
        handle.cancel();

        assert_eq!(handle.state(), SessionState::Resolved);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(inner.cancelled().is_cancelled());
    }

    #[test]
    fn subscriptions_added_after_settling_are_released_immediately() {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = SessionInner::new("vtex.app".into());
        SessionHandle::new(Arc::clone(&inner)).cancel();
        assert!(!inner.start());
        inner.hold(counted(&count));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
