use std::sync::Arc;

use colossus_model::PING_EVENT;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, error, trace, warn};

use super::{Connector, ConnectionState, Shared, SseFrame, StreamEvent, StreamRequest};
use crate::config::StreamConfig;
use crate::error::TransportErrorKind;

type Socket = BoxStream<'static, Result<SseFrame, TransportErrorKind>>;

/// How a socket stopped.
enum Disconnect {
    Closed,
    Failed(TransportErrorKind),
}

/// Heartbeat deadlines for the current socket.
#[derive(Default)]
struct Watchdog {
    /// `H - ε`: flips `heartbeat_due` when reached.
    due_at: Option<Instant>,
    /// `H + ε`: liveness failure when reached.
    reconnect_at: Option<Instant>,
}

impl Watchdog {
    /// A deadline past the end of the clock never fires.
    fn arm(&mut self, now: Instant, config: &StreamConfig) {
        self.due_at = now.checked_add(config.heartbeat_due_after());
        self.reconnect_at = now.checked_add(config.heartbeat_deadline());
    }

    fn disarm(&mut self) {
        *self = Watchdog::default();
    }
}

/// Owns the socket. Runs on its own task until the stream closes.
pub(crate) struct Driver {
    request: StreamRequest,
    connector: Arc<dyn Connector>,
    config: StreamConfig,
    shared: Arc<Shared>,
    watchdog: Watchdog,
}

impl Driver {
    pub(crate) fn new(
        request: StreamRequest,
        connector: Arc<dyn Connector>,
        config: StreamConfig,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            request,
            connector,
            config,
            shared,
            watchdog: Watchdog::default(),
        }
    }

    pub(crate) async fn run(mut self) {
        let url = self.request.url.to_string();

        loop {
            if self.shared.is_closed() {
                break;
            }

            self.shared.set_state(ConnectionState::Connecting);
            self.watchdog.disarm();
            let socket = self.connector.open(&self.request);

            let kind = match self.pump(socket).await {
                Disconnect::Closed => break,
                Disconnect::Failed(kind) => kind,
            };

            if !self.fail(&url, kind) {
                break;
            }

            tokio::select! {
                biased;
                _ = self.shared.cancelled().cancelled() => break,
                _ = sleep(self.config.reconnect_backoff()) => {}
            }

            let restarts = self.shared.record_restart();
            debug!(url = %url, restarts, "reconnecting event stream");
        }

        self.shared.close();
        trace!(url = %url, "event stream driver stopped");
    }

    /// Delivers frames from one socket until it fails or the stream closes.
    async fn pump(&mut self, mut socket: Socket) -> Disconnect {
        loop {
            let due_at = self.watchdog.due_at;
            let reconnect_at = self.watchdog.reconnect_at;

            tokio::select! {
                biased;
                _ = self.shared.cancelled().cancelled() => return Disconnect::Closed,
                frame = socket.next() => match frame {
                    Some(Ok(SseFrame::Open)) => {
                        self.shared.set_state(ConnectionState::Open);
                        self.watchdog.arm(Instant::now(), &self.config);
                        self.shared.dispatch(&StreamEvent::Open);
                    }
                    Some(Ok(SseFrame::Message(message))) => {
                        if message.event == PING_EVENT {
                            let now = Instant::now();
                            self.shared.record_heartbeat(now);
                            self.watchdog.arm(now, &self.config);
                        } else {
                            self.shared.record_message();
                        }
                        self.shared.dispatch(&StreamEvent::Message(message));
                    }
                    Some(Err(kind)) => return Disconnect::Failed(kind),
                    None => return Disconnect::Failed(TransportErrorKind::StreamEnded),
                },
                _ = sleep_until_opt(due_at) => {
                    self.watchdog.due_at = None;
                    self.shared.mark_heartbeat_due();
                    trace!(url = %self.request.url, "heartbeat due");
                }
                _ = sleep_until_opt(reconnect_at) => {
                    self.watchdog.disarm();
                    return Disconnect::Failed(TransportErrorKind::HeartbeatTimeout(
                        self.config.heartbeat_deadline(),
                    ));
                }
            }
        }
    }

    /// Reports a failure. Returns `false` once the retry budget is spent.
    fn fail(&mut self, url: &str, kind: TransportErrorKind) -> bool {
        let err = self.shared.record_error(kind, self.config.max_retries);
        warn!(
            url = %url,
            restarts = err.restart_count,
            errors = err.error_count,
            "event stream error: {}",
            err.kind
        );
        self.shared.dispatch(&StreamEvent::Error(err.clone()));

        if err.terminal {
            error!(
                url = %url,
                max_retries = self.config.max_retries,
                "event stream retry budget exhausted; closing"
            );
            self.shared.close();
            return false;
        }

        !self.shared.is_closed()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
