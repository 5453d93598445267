//! Configuration for the Colossus client.
//!
//! [`ClientSettings`] bundles the backend endpoints with the stream and
//! sticky-host tunables from `colossus-core`. Settings come from, in order:
//! `$COLOSSUS_CONFIG_PATH`, `$COLOSSUS_CONFIG_JSON`, the first default file
//! found, or built-in defaults.
#![allow(missing_docs)]

pub mod loader;
pub mod settings;
pub mod validation;

pub use loader::{CONFIG_JSON_ENV, CONFIG_PATH_ENV, DEFAULT_FILES};
pub use settings::{
    ClientSettings, ClientSettingsSource, DEFAULT_BUILDER_ENDPOINT, DEFAULT_COLOSSUS_ENDPOINT,
};
pub use validation::{MAX_HEARTBEAT_INTERVAL_MS, SettingsError};
