//! Dockerflow health endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use intake_statsd::metric;

use crate::service::ServiceState;
use crate::statsd::CollectorCounters;

/// `GET /__lbheartbeat__` tells the load balancer this process is alive.
///
/// No dependency checks; a replica that is drowning should still receive
/// its share of traffic rather than stampede the others.
pub async fn lbheartbeat() -> impl IntoResponse {
    metric!(counter(CollectorCounters::Health) += 1, endpoint = "lbheartbeat");
    StatusCode::OK
}

/// `GET /__heartbeat__` verifies every downstream dependency.
///
/// Returns 200 with per-check detail when storage and publish are both
/// reachable, 500 otherwise.
pub async fn heartbeat(State(state): State<ServiceState>) -> Response {
    metric!(counter(CollectorCounters::Health) += 1, endpoint = "heartbeat");

    let (storage, publish) = tokio::join!(state.storage().verify(), state.publish().verify());

    let healthy = storage.is_ok() && publish.is_ok();
    let checks = json!({
        "checks": {
            "crashstorage": check_detail(&storage),
            "crashpublish": check_detail(&publish),
        }
    });

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status, Json(checks)).into_response()
}

fn check_detail<E: std::fmt::Display>(result: &Result<(), E>) -> String {
    match result {
        Ok(()) => "ok".to_owned(),
        Err(error) => format!("error: {error}"),
    }
}

/// `GET /__version__` serves the version info read at startup.
pub async fn version(State(state): State<ServiceState>) -> Response {
    metric!(counter(CollectorCounters::Health) += 1, endpoint = "version");
    Json(state.version().clone()).into_response()
}

/// `GET /__broken__` raises on purpose.
///
/// The resulting 500 proves the panic handler and error-reporting wiring
/// work end to end. The edge proxy is expected to guard this with basic
/// auth.
pub async fn broken() -> Response {
    metric!(counter(CollectorCounters::Health) += 1, endpoint = "broken");
    panic!("intentional exception");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::endpoints::testutils::{test_state, test_state_with_adapters};
    use crate::services::publish::NoopCrashPublish;
    use crate::services::storage::CrashStorage;
    use crate::services::server::make_app;
    use crate::services::AdapterError;

    use super::*;

    async fn get(state: &ServiceState, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = make_app(state.clone()).oneshot(request).await.unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

        (status, value)
    }

    #[tokio::test]
    async fn test_lbheartbeat_never_checks_dependencies() {
        let (state, _, _) = test_state(&[]);
        let (status, _) = get(&state, "/__lbheartbeat__").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_heartbeat_reports_checks() {
        let (state, _, _) = test_state(&[]);
        let (status, body) = get(&state, "/__heartbeat__").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["crashstorage"], "ok");
        assert_eq!(body["checks"]["crashpublish"], "ok");
    }

    #[derive(Debug)]
    struct DownStorage;

    #[async_trait]
    impl CrashStorage for DownStorage {
        async fn save_crash(
            &self,
            _report: &crate::report::CrashReport,
        ) -> Result<(), AdapterError> {
            Err(AdapterError::Transient("unreachable".to_owned()))
        }

        async fn verify(&self) -> Result<(), AdapterError> {
            Err(AdapterError::Transient("unreachable".to_owned()))
        }
    }

    #[tokio::test]
    async fn test_heartbeat_fails_when_storage_is_down() {
        let state = test_state_with_adapters(
            &[],
            Arc::new(DownStorage),
            Arc::new(NoopCrashPublish::new()),
        );
        let (status, body) = get(&state, "/__heartbeat__").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["checks"]["crashstorage"]
            .as_str()
            .unwrap()
            .starts_with("error:"));
        assert_eq!(body["checks"]["crashpublish"], "ok");
    }

    #[tokio::test]
    async fn test_version_serves_loaded_info() {
        let (state, _, _) = test_state(&[("BASEDIR", "/nonexistent")]);
        let (status, body) = get(&state, "/__version__").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_broken_yields_500() {
        let (state, _, _) = test_state(&[]);
        let (status, _) = get(&state, "/__broken__").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
