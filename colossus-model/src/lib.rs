//! Wire-level data model shared by the Colossus crates.
//!
//! Everything here is plain data: frames received from the event bus, the
//! bodies of the build/receive status subjects, the caller context that
//! scopes every request, and the header names both sides agree on.
#![allow(missing_docs)]

pub mod build;
pub mod context;
pub mod headers;
pub mod level;
pub mod message;

pub use build::{BuildFailure, BuildStatus, ReceiveProgress};
pub use context::Context;
pub use level::{Level, ParseLevelError};
pub use message::{Message, strip_version};

/// Subject carried by terminal build events.
pub const BUILD_STATUS_SUBJECT: &str = "build.status";
/// Subject carried by upload progress events.
pub const RECEIVE_STATUS_SUBJECT: &str = "receive.status";
/// Placeholder subject meaning "the real subject lives in `body.subject`".
pub const EMBEDDED_SUBJECT: &str = "-";
/// SSE event name used by the backend for liveness frames.
pub const PING_EVENT: &str = "ping";
/// Producer of build and receive status events.
pub const BUILDER_HUB_SENDER: &str = "vtex.builder-hub";
