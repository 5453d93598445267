//! In-memory doubles for the transport, channel and probe seams.

mod channels;
mod connector;
mod probe;

pub use channels::ScriptedChannels;
pub use connector::{ScriptedConnector, SocketScript};
pub use probe::FixedProbe;
