//! Correlates a triggering request with the asynchronous completion events
//! of the remote build it starts.
//!
//! A session subscribes to its channels before the trigger runs, so no
//! terminal event can slip past between the request and the subscription.

mod channels;
mod session;

use std::collections::HashMap;
use std::future::{Future, IntoFuture};
use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use colossus_model::{BuildFailure, BuildStatus, Context, Level, Message, ReceiveProgress};

use crate::error::BuildError;
use crate::router::{ChannelEvent, LogDeduper, RoutedStream};

pub use channels::{
    ChannelSource, ChannelSpec, ColossusChannels, EventChannels, LOGS_CHANNEL, Subscription,
};
pub use session::{SessionHandle, SessionState, Unsubscribe};
use session::SessionInner;

pub type ProgressHandler = Arc<dyn Fn(&ReceiveProgress) + Send + Sync>;
pub type FailureHandler = Arc<dyn Fn(&BuildFailure) + Send + Sync>;
pub type LogHandler = Arc<dyn Fn(Level, &str) + Send + Sync>;

/// Per-session knobs.
#[derive(Clone)]
pub struct ListenOptions {
    /// Wait for a terminal `build.status` event. When unset the session
    /// returns as soon as the trigger does and keeps tailing logs until the
    /// handle is cancelled.
    pub wait_completion: bool,
    /// Sender allow-list for the logs channel.
    pub senders: Option<Vec<String>>,
    /// Upload progress from `receive.status`. Subscribed only when set.
    pub on_progress: Option<ProgressHandler>,
    /// Fail handlers keyed by backend error code.
    pub on_error: HashMap<String, FailureHandler>,
    /// Receives deduplicated log lines instead of `tracing`.
    pub on_log: Option<LogHandler>,
    /// Minimum level requested from the logs channel; `None` skips logs.
    pub log_level: Option<Level>,
    pub log_any: bool,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            wait_completion: true,
            senders: None,
            on_progress: None,
            on_error: HashMap::new(),
            on_log: None,
            log_level: Some(Level::Info),
            log_any: false,
        }
    }
}

impl std::fmt::Debug for ListenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut codes: Vec<&str> = self.on_error.keys().map(String::as_str).collect();
        codes.sort_unstable();
        f.debug_struct("ListenOptions")
            .field("wait_completion", &self.wait_completion)
            .field("senders", &self.senders)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_error", &codes)
            .field("on_log", &self.on_log.is_some())
            .field("log_level", &self.log_level)
            .field("log_any", &self.log_any)
            .finish()
    }
}

impl ListenOptions {
    pub fn wait_completion(mut self, wait: bool) -> Self {
        self.wait_completion = wait;
        self
    }

    pub fn with_senders<I, S>(mut self, senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.senders = Some(senders.into_iter().map(Into::into).collect());
        self
    }

    pub fn on_progress<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ReceiveProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(handler));
        self
    }

    pub fn on_error<F>(mut self, code: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&BuildFailure) + Send + Sync + 'static,
    {
        self.on_error.insert(code.into(), Arc::new(handler));
        self
    }

    pub fn on_log<F>(mut self, handler: F) -> Self
    where
        F: Fn(Level, &str) + Send + Sync + 'static,
    {
        self.on_log = Some(Arc::new(handler));
        self
    }

    pub fn log_level(mut self, level: Option<Level>) -> Self {
        self.log_level = level;
        self
    }

    pub fn log_any(mut self, log_any: bool) -> Self {
        self.log_any = log_any;
        self
    }

    fn failure_handler(&self, failure: &BuildFailure) -> Option<&FailureHandler> {
        failure
            .error_code
            .as_deref()
            .and_then(|code| self.on_error.get(code))
            .or_else(|| self.on_error.get(&failure.code))
    }
}

/// Outcome of a settled session.
#[derive(Debug)]
pub struct Listened<T> {
    /// Value returned by the trigger.
    pub response: T,
    /// Still `Listening` for sessions that did not wait for completion.
    pub handle: SessionHandle,
}

/// A build session that has not settled yet. Await it for the outcome; use
/// [`handle`](Self::handle) to cancel from elsewhere.
#[must_use = "a build session does nothing unless awaited"]
pub struct BuildSession<T> {
    handle: SessionHandle,
    future: BoxFuture<'static, Result<Listened<T>, BuildError>>,
}

impl<T> std::fmt::Debug for BuildSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildSession")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl<T> BuildSession<T> {
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl<T> IntoFuture for BuildSession<T> {
    type Output = Result<Listened<T>, BuildError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.future
    }
}

/// Starts build sessions over a set of event channels.
#[derive(Clone)]
pub struct BuildCoordinator {
    channels: Arc<dyn EventChannels>,
}

impl std::fmt::Debug for BuildCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCoordinator").finish_non_exhaustive()
    }
}

impl BuildCoordinator {
    pub fn new(channels: Arc<dyn EventChannels>) -> Self {
        Self { channels }
    }

    /// Subscribes to the session's channels, then runs `trigger`.
    ///
    /// With `wait_completion` the session resolves with the trigger's value
    /// once `build.status` reports `success`, and rejects on `fail`, on a
    /// trigger error, or when the status channel is lost. Without it the
    /// session resolves as soon as the trigger returns.
    ///
    /// The trigger runs on its own task and always runs to completion, even
    /// when the session settles or is cancelled first.
    pub fn listen_then_trigger<T, F, Fut>(
        &self,
        ctx: Context,
        resource: impl Into<String>,
        trigger: F,
        options: ListenOptions,
    ) -> BuildSession<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let resource = resource.into();
        let inner = SessionInner::new(resource.clone());
        let handle = SessionHandle::new(Arc::clone(&inner));
        let run = Run {
            channels: Arc::clone(&self.channels),
            ctx,
            resource,
            options,
            inner,
            handle: handle.clone(),
        };

        BuildSession {
            handle,
            future: Box::pin(run.execute(trigger)),
        }
    }
}

/// Cancels the session if its future is dropped before settling.
struct SettleGuard {
    inner: Option<Arc<SessionInner>>,
}

impl SettleGuard {
    fn disarm(&mut self) {
        self.inner = None;
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.finish(SessionState::Cancelled);
        }
    }
}

struct Run {
    channels: Arc<dyn EventChannels>,
    ctx: Context,
    resource: String,
    options: ListenOptions,
    inner: Arc<SessionInner>,
    handle: SessionHandle,
}

impl Run {
    async fn execute<T, F, Fut>(self, trigger: F) -> Result<Listened<T>, BuildError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut guard = SettleGuard {
            inner: Some(Arc::clone(&self.inner)),
        };
        if !self.inner.start() {
            return Err(BuildError::Cancelled);
        }

        let result = self.listen(trigger).await;
        match &result {
            Ok(_) if !self.options.wait_completion => guard.disarm(),
            Ok(_) => {
                self.inner.finish(SessionState::Resolved);
            }
            Err(BuildError::Cancelled) => {
                self.inner.finish(SessionState::Cancelled);
            }
            Err(err) => {
                debug!(resource = %self.resource, error = %err, "build session rejected");
                self.inner.finish(SessionState::Rejected);
            }
        }
        result
    }

    async fn listen<T, F, Fut>(&self, trigger: F) -> Result<Listened<T>, BuildError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut status = None;
        let mut progress = None;
        if self.options.wait_completion {
            status = Some(self.open(ChannelSpec::build_status(&self.resource))?);
            if self.options.on_progress.is_some() {
                progress = Some(self.open(ChannelSpec::receive_status(&self.resource))?);
            }
        }
        if let Some(level) = self.options.log_level {
            let spec = ChannelSpec::logs(
                &self.resource,
                level,
                self.options.senders.clone(),
                self.options.log_any,
            );
            let logs = self.open(spec)?;
            self.pump_logs(logs);
        }

        trace!(resource = %self.resource, "channels ready; running trigger");
        let mut trigger: JoinHandle<anyhow::Result<T>> = tokio::spawn(trigger());

        let Some(mut status) = status else {
            let response = tokio::select! {
                biased;
                _ = self.inner.cancelled().cancelled() => return Err(BuildError::Cancelled),
                joined = &mut trigger => settle_trigger(joined)?,
            };
            return Ok(Listened {
                response,
                handle: self.handle.clone(),
            });
        };

        let mut response: Option<T> = None;
        let mut succeeded = false;

        loop {
            if succeeded && let Some(response) = response.take() {
                info!(resource = %self.resource, "build finished");
                return Ok(Listened {
                    response,
                    handle: self.handle.clone(),
                });
            }

            tokio::select! {
                biased;
                _ = self.inner.cancelled().cancelled() => return Err(BuildError::Cancelled),
                joined = &mut trigger, if response.is_none() => {
                    response = Some(settle_trigger(joined)?);
                }
                event = status.next(), if !succeeded => match event {
                    Some(ChannelEvent::Message(message)) => {
                        match BuildStatus::from_message(&message) {
                            BuildStatus::Success => succeeded = true,
                            BuildStatus::Fail(failure) => {
                                self.report_failure(&failure);
                                return Err(BuildError::Failed(failure));
                            }
                            BuildStatus::Other(code) => {
                                debug!(resource = %self.resource, code = %code, "build status");
                            }
                        }
                    }
                    Some(ChannelEvent::Malformed(err)) => {
                        warn!(resource = %self.resource, error = %err, "ignoring malformed build event");
                    }
                    Some(ChannelEvent::Lost(err)) => return Err(BuildError::StreamLost(err)),
                    None => return Err(BuildError::ChannelClosed),
                },
                Some(event) = next_event(&mut progress) => {
                    if let ChannelEvent::Message(message) = event {
                        self.report_progress(&message);
                    }
                }
            }
        }
    }

    fn open(&self, spec: ChannelSpec) -> Result<RoutedStream, BuildError> {
        let Subscription {
            events,
            unsubscribe,
        } = self
            .channels
            .subscribe(&self.ctx, &spec)
            .map_err(|source| BuildError::Subscribe {
                channel: spec.name,
                source,
            })?;
        self.inner.hold(unsubscribe);
        Ok(events)
    }

    fn pump_logs(&self, mut logs: RoutedStream) {
        let on_log = self.options.on_log.clone();
        let task = tokio::spawn(async move {
            let mut deduper = LogDeduper::new();
            while let Some(event) = logs.next().await {
                let ChannelEvent::Message(message) = event else {
                    continue;
                };
                let Some(line) = deduper.admit(&message) else {
                    continue;
                };
                match &on_log {
                    Some(on_log) => on_log(message.level, &line),
                    None => emit_log(message.level, &line),
                }
            }
        });
        self.inner.hold(Unsubscribe::new(move || task.abort()));
    }

    fn report_progress(&self, message: &Message) {
        let progress = ReceiveProgress::from_message(message);
        if let Some(on_progress) = &self.options.on_progress {
            on_progress(&progress);
        }
    }

    fn report_failure(&self, failure: &BuildFailure) {
        match self.options.failure_handler(failure) {
            Some(handler) => handler(failure),
            None => error!(
                resource = %self.resource,
                code = %failure.code,
                error_code = failure.error_code.as_deref().unwrap_or(""),
                "{}",
                failure.message
            ),
        }
    }
}

fn settle_trigger<T>(
    joined: Result<anyhow::Result<T>, tokio::task::JoinError>,
) -> Result<T, BuildError> {
    match joined {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(err)) => Err(BuildError::Trigger(err)),
        Err(err) => Err(BuildError::TriggerAborted(err.to_string())),
    }
}

/// Next event of an optional channel. A missing or finished channel never
/// yields, so its `select!` branch stays quiet.
async fn next_event(slot: &mut Option<RoutedStream>) -> Option<ChannelEvent> {
    let Some(stream) = slot else {
        return std::future::pending().await;
    };
    let event = stream.next().await;
    if event.is_none() {
        *slot = None;
    }
    event
}

fn emit_log(level: Level, line: &str) {
    match level {
        Level::Debug => debug!(target: "colossus::remote", "{line}"),
        Level::Warn => warn!(target: "colossus::remote", "{line}"),
        Level::Error => error!(target: "colossus::remote", "{line}"),
        Level::Info | Level::Other => info!(target: "colossus::remote", "{line}"),
    }
}
