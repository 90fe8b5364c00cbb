use std::error::Error;
use std::fmt;

use tracing::Level;

/// Renders an error and its source chain on a single line, joined with `: `.
///
/// Multi-line cause chains interleave badly with JSON log output and with
/// interleaved worker logs, so the chain stays on one line:
/// `saving crash failed: connection reset by peer`.
pub struct ErrorChain<'a>(pub &'a (dyn Error + 'static));

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }

        Ok(())
    }
}

/// Logs an error through the configured logger, or to stderr when logging
/// is not initialized yet.
///
/// Prefer [`intake_log::error`](crate::error) wherever the logger is known
/// to be up. This exists for the startup window: configuration binding and
/// logger initialization can themselves fail, and those failures must still
/// reach the operator.
pub fn ensure_error(error: &(dyn Error + 'static)) {
    if tracing::event_enabled!(Level::ERROR) {
        crate::error!(error = error);
    } else {
        eprintln!("error: {}", ErrorChain(error));
    }
}
