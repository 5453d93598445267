use std::time::Duration;

use colossus_model::BuildFailure;
use thiserror::Error;

/// Why a single socket stopped delivering frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportErrorKind {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("stream ended by the server")]
    StreamEnded,

    #[error("no heartbeat within {0:?}")]
    HeartbeatTimeout(Duration),
}

/// Transport failure as delivered to error listeners, with the stream's
/// counters at the time it happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (restarts: {restart_count}, errors: {error_count})")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub restart_count: u32,
    pub error_count: u32,
    /// Set on the error that exhausted the retry budget.
    pub terminal: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("malformed frame ({reason}): {raw}")]
    Malformed { raw: String, reason: String },
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Failed(#[from] BuildFailure),

    #[error("failed to subscribe to {channel}: {source}")]
    Subscribe {
        channel: &'static str,
        source: ClientError,
    },

    #[error("trigger request failed: {0:#}")]
    Trigger(anyhow::Error),

    #[error("trigger task did not complete: {0}")]
    TriggerAborted(String),

    #[error("event stream lost: {0}")]
    StreamLost(TransportError),

    #[error("build status channel closed before a terminal event")]
    ChannelClosed,

    #[error("build session cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum StickyHostError {
    /// A strict sequence landed on a different replica than the one holding
    /// its incremental state. The sequence must restart from a full payload.
    #[error(
        "sticky host for {resource} changed from {previous} to {current}; restart from a full (non-incremental) state"
    )]
    StrictDrift {
        resource: String,
        previous: String,
        current: String,
    },

    #[error("availability probe failed: {0}")]
    Probe(#[from] reqwest::Error),

    #[error("availability response for {0} carried no sticky host")]
    MissingHost(String),

    #[error("invalid availability request: {0}")]
    InvalidRequest(String),

    #[error("host cache error: {0}")]
    Cache(String),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: &'static str, reason: String },

    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("request failed with status {status} (trace {trace_id}): {body}")]
    Status {
        status: reqwest::StatusCode,
        trace_id: String,
        body: String,
    },

    #[error(transparent)]
    StickyHost(#[from] StickyHostError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
