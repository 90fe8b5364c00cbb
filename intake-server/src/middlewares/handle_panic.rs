use std::any::Any;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Converts a panicked request handler into a plain 500 response.
///
/// Use this with
/// [`CatchPanicLayer::custom`](tower_http::catch_panic::CatchPanicLayer::custom).
/// The panic is reported to the error sink, which is exactly what the
/// `/__broken__` endpoint exists to exercise.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    };

    sentry::capture_message(
        &format!("panic in request handler: {message}"),
        sentry::Level::Error,
    );
    intake_log::error!("panic in request handler: {message}");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "internal server error\n",
    )
        .into_response()
}
