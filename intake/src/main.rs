//! The intake crash collector.
//!
//! Intake is the ingestion edge of the crash-reporting pipeline. It accepts
//! Breakpad-format crash submissions via HTTP POST, returns a crash id to
//! the client as fast as possible, and asynchronously saves the crash to an
//! object store and publishes its id to a queue for processing.
//!
//! # Workspace Crates
//!
//! The collector is split into the following workspace crates:
//!
//!  - `intake`: Main entry point and command line interface.
//!  - [`intake-config`]: Configuration bound from the environment.
//!  - [`intake-log`]: Error reporting and logging.
//!  - [`intake-server`]: Endpoints and services.
//!  - [`intake-statsd`]: Statsd metrics client.
//!  - [`intake-system`]: Signal handling and shutdown coordination.
//!
//! [`intake-config`]: ../intake_config/index.html
//! [`intake-log`]: ../intake_log/index.html
//! [`intake-server`]: ../intake_server/index.html
//! [`intake-statsd`]: ../intake_statsd/index.html
//! [`intake-system`]: ../intake_system/index.html

mod cli;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(error) => {
            intake_log::ensure_error(&error);
            error.exit_code()
        }
    };

    intake_log::flush();
    process::exit(exit_code);
}
