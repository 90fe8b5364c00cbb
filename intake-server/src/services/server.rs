//! The HTTP server hosting the collector endpoints.

use std::net::TcpListener;
use std::sync::Arc;

use axum::http::{header, HeaderValue};
use axum::Router;
use axum_server::Handle;
use intake_config::Config;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::middlewares;
use crate::service::ServiceState;
use crate::{constants, endpoints, ServerError};

/// Builds the axum application with all routes and middleware.
///
/// Service builder order defines that layers added first are called first:
/// requests travel top to bottom, responses bottom to top.
pub fn make_app(state: ServiceState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(axum::middleware::from_fn(middlewares::metrics))
        .layer(CatchPanicLayer::custom(middlewares::handle_panic))
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(constants::SERVER),
        ));

    endpoints::routes().layer(middleware).with_state(state)
}

/// The collector's HTTP server.
///
/// Binding the listener is separated from serving so that startup
/// verification runs strictly before the first connection can arrive.
pub struct HttpServer {
    config: Arc<Config>,
    state: ServiceState,
    listener: TcpListener,
}

impl HttpServer {
    /// Binds the configured listen address.
    pub fn new(config: Arc<Config>, state: ServiceState) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.listen_addr())?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            config,
            state,
            listener,
        })
    }

    /// Spawns the server and returns a handle for graceful shutdown.
    pub fn start(self) -> Handle {
        let Self {
            config,
            state,
            listener,
        } = self;

        intake_log::info!("spawning http server");
        intake_log::info!("  listening on http://{}/", config.listen_addr());

        let handle = Handle::new();
        let app = make_app(state);

        let server = axum_server::from_tcp(listener).handle(handle.clone());
        tokio::spawn(server.serve(app.into_make_service()));

        handle
    }
}
