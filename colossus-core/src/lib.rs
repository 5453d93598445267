//! Resilient build-event streaming and sticky-host coordination.
//!
//! - [`transport`] keeps one server-sent event stream alive across socket
//!   failures, with heartbeat liveness and a bounded retry budget.
//! - [`router`] parses frames into [`Message`](colossus_model::Message)s and
//!   filters them per subscriber.
//! - [`coordinator`] ties a triggering request to the terminal build events
//!   it causes.
//! - [`sticky`] pins related requests to one backend replica and reports
//!   drift.
//! - [`client`] attaches context and sticky headers to backend requests.
#![allow(missing_docs)]

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod router;
pub mod sticky;
pub mod testing;
pub mod transport;

pub use client::{ColossusClient, StickyResponse, context_headers};
pub use config::{StickyHostConfig, StreamConfig};
pub use coordinator::{
    BuildCoordinator, BuildSession, ChannelSpec, ColossusChannels, EventChannels, ListenOptions,
    Listened, SessionHandle, SessionState, Subscription, Unsubscribe,
};
pub use error::{
    BuildError, ClientError, Result, RouterError, StickyHostError, TransportError,
    TransportErrorKind,
};
pub use router::{ChannelEvent, Filter, LogDeduper};
pub use sticky::{
    AvailabilityProbe, BindingUpdate, HostAvailability, HostCache, HttpAvailabilityProbe,
    StickyHostBinding, StickyHostResolver, sticky_hint,
};
pub use transport::{
    ConnectionState, Connector, EventStream, Listen, ReqwestConnector, StreamEvent,
    StreamRequest, TransportStats,
};
