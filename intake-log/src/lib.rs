//! Logging and error reporting for the intake crash collector.
//!
//! One [`init`] call wires up both concerns: log lines through [`tracing`]
//! to stderr, and error events to Sentry when a DSN is configured. The
//! other workspace crates log through the macros re-exported here rather
//! than depending on `tracing` directly, so the whole backend can be
//! swapped in this one crate.
//!
//! Unlike services configured from files, the collector binds its log
//! settings from environment variables at startup; [`LogConfig`] is a plain
//! struct the config crate fills in, with no serialization attached.

mod setup;
mod utils;

pub use setup::*;
pub use utils::*;

// Raw re-exports of the tracing macros. Use these for all logging.
pub use tracing::{debug, error, info, trace, warn};

/// Flushes pending error reports before process exit.
///
/// [`init`] leaks the Sentry guard on purpose so the client lives for the
/// whole process; this is the matching explicit flush for `main` to call on
/// the way out.
pub fn flush() {
    if let Some(client) = sentry::Hub::current().client() {
        client.close(Some(std::time::Duration::from_secs(2)));
    }
}
