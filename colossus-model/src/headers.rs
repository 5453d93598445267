//! Header names exchanged with the backend.

/// Sticky-host hint on requests, opaque replica token on responses.
pub const STICKY_HOST: &str = "x-vtex-sticky-host";
/// Trace id echoed by the backend (and sent on stream requests).
pub const TRACE_ID: &str = "x-trace-id";
/// Routes a request to a specific upstream cluster.
pub const UPSTREAM_TARGET: &str = "x-vtex-upstream-target";
/// Forces trace sampling for the request.
pub const TRACE_DEBUG: &str = "jaeger-debug-id";
