//! The intake crash collector server.
//!
//! This crate contains the [`run`] function which starts the collector. The
//! collector accepts Breakpad-format crash submissions on `POST /submit`,
//! returns a crash id to the client as fast as possible, and asynchronously
//! persists the full crash to an object store and publishes the id to a
//! downstream queue for processing.
//!
//! # Path of a crash through the collector
//!
//! ```text
//! client -> submit endpoint -> payload parser -> throttler -> id generator
//!        -> hand-off queue -> crash mover worker -> crash storage
//!                                               -> crash publish
//! ```
//!
//! The HTTP response is written as soon as the hand-off queue accepts the
//! crash report; everything to the right of the queue runs on the crash mover
//! worker pool, decoupled from request handling. The queue is bounded and the
//! submit endpoint blocks on it, which is the collector's only backpressure
//! mechanism.
//!
//! Before the HTTP listener binds, every configured adapter is verified once.
//! A collector that cannot reach its object store or queue refuses to start
//! instead of silently dropping crashes.

mod constants;
mod crash_id;
mod endpoints;
mod middlewares;
mod payload;
mod report;
mod service;
mod services;
mod statsd;
mod throttler;
mod utils;

pub use crash_id::CrashId;
pub use report::{CrashReport, Dump, PayloadKind};
pub use service::{ServiceError, ServiceState};
pub use throttler::Verdict;

use std::sync::Arc;
use std::time::Duration;

use intake_config::Config;
use intake_system::Controller;

use crate::services::server::HttpServer;
use crate::statsd::CollectorCounters;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the HTTP listener failed.
    #[error("bind to interface failed")]
    BindFailed(#[from] std::io::Error),

    /// Startup verification of a downstream adapter failed.
    #[error("startup verification failed for {name}: {message}")]
    VerificationFailed {
        /// The adapter that failed.
        name: &'static str,
        /// Failure detail.
        message: String,
    },

    /// Building the service state failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The shutdown drain deadline expired with crashes still queued.
    #[error("shutdown drain deadline expired with {remaining} crashes queued")]
    DrainIncomplete {
        /// Number of accepted crashes that were not moved.
        remaining: usize,
    },
}

/// Given a collector config, runs the server until a shutdown signal arrives.
///
/// This verifies all configured adapters, binds the HTTP listener, serves
/// until a termination signal is received and then drains the hand-off queue
/// within the configured deadline.
pub fn run(config: Config) -> Result<(), ServerError> {
    let config = Arc::new(config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let controller = Controller::start(config.crashmover().shutdown_timeout);

        let state = ServiceState::start(config.clone())?;

        // Refuse to serve if any downstream dependency is unreachable. This
        // runs before the listener binds, so a misconfigured replica never
        // receives traffic.
        state.verify_adapters().await?;

        let server = HttpServer::new(config.clone(), state.clone())?;
        let handle = server.start();

        intake_statsd::metric!(counter(CollectorCounters::ServerStarting) += 1);

        let shutdown = controller.subscribe().notified().await;
        intake_log::info!("shutting down HTTP server");

        match shutdown.timeout {
            Some(timeout) => handle.graceful_shutdown(Some(timeout)),
            None => handle.shutdown(),
        }

        let deadline = shutdown.timeout.unwrap_or(Duration::ZERO);
        match state.crash_mover().drain(deadline).await {
            Ok(()) => {
                intake_log::info!("hand-off queue drained, exiting");
                Ok(())
            }
            Err(remaining) => {
                intake_log::error!("drain deadline expired, {remaining} crashes queued");
                Err(ServerError::DrainIncomplete { remaining })
            }
        }
    })
}
