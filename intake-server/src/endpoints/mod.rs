//! Web server endpoints.

use axum::routing::{get, post};
use axum::Router;

use crate::service::ServiceState;

mod health;
mod submit;

/// Builds the route table.
pub fn routes() -> Router<ServiceState> {
    Router::new()
        .route("/submit", post(submit::handle))
        .route("/__lbheartbeat__", get(health::lbheartbeat))
        .route("/__heartbeat__", get(health::heartbeat))
        .route("/__version__", get(health::version))
        .route("/__broken__", get(health::broken))
}
