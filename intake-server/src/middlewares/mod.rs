//! Middlewares for the HTTP server.
//!
//! This module exposes tower [layers](tower::Layer) and related utilities to
//! configure the axum/hyper HTTP server. See the server startup in
//! [`HttpServer`](crate::services::server::HttpServer) for where these
//! middlewares are registered.

mod handle_panic;
mod metrics;

pub use self::handle_panic::*;
pub use self::metrics::*;
