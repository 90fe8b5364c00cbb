//! The breakpad crash submission endpoint.
//!
//! `POST /submit` parses the multipart payload, throttles it, assigns a
//! crash id and hands the report off to the crash mover. The response is
//! written as soon as the hand-off queue accepts the report; storage and
//! publish happen asynchronously.
//!
//! If the client disconnects before the report is enqueued, the handler
//! future is dropped and the crash is discarded. After enqueueing, a
//! disconnect changes nothing: the id has already been returned.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use intake_statsd::metric;

use crate::constants::{DISCARDED_BODY, REASON_HEADER};
use crate::crash_id::CrashId;
use crate::payload::{extract_payload, PayloadError};
use crate::report::CrashReport;
use crate::service::ServiceState;
use crate::statsd::CollectorCounters;
use crate::throttler::Verdict;

const TEXT_PLAIN: (header::HeaderName, &str) =
    (header::CONTENT_TYPE, "text/plain; charset=utf-8");

/// Handles an incoming breakpad crash report.
pub async fn handle(State(state): State<ServiceState>, request: Request) -> Response {
    let received_at = Utc::now();
    let config = state.config().breakpad();

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, config.max_crash_size.saturating_add(1)).await {
        Ok(body) => body,
        Err(_) => return bad_request(&PayloadError::TooLarge),
    };

    let payload = match extract_payload(&parts.headers, body, config).await {
        Ok(payload) => payload,
        Err(error) => return bad_request(&error),
    };

    metric!(counter(CollectorCounters::IncomingCrash) += 1);

    let throttle = state.throttler().throttle(&payload.annotations);
    metric!(
        counter(CollectorCounters::Throttle) += 1,
        verdict = throttle.verdict.as_str(),
        rule = throttle.rule,
    );
    if throttle.rule == "has_throttleable_0" {
        metric!(counter(CollectorCounters::Throttleable0) += 1);
    }

    if throttle.verdict == Verdict::Reject {
        intake_log::info!(
            "rejected by {rule} at {percentage}%",
            rule = throttle.rule,
            percentage = throttle.percentage,
        );
        return discarded(StatusCode::OK);
    }

    // Adopt a well-formed client-supplied id, minting a fresh one otherwise.
    // The date and verdict digits are the collector's either way.
    let id = payload
        .annotations
        .get("uuid")
        .and_then(|uuid| CrashId::adopt(uuid, received_at, throttle.verdict))
        .unwrap_or_else(|| CrashId::generate(received_at, throttle.verdict));

    intake_log::info!(
        "{id}: matched by {rule}; returned {verdict}",
        rule = throttle.rule,
        verdict = throttle.verdict.as_str().to_uppercase(),
    );

    let mut report = CrashReport {
        id: id.clone(),
        annotations: payload.annotations,
        dumps: payload.dumps,
        received_at,
        payload_kind: payload.kind,
        payload_compressed: payload.compressed,
        notes: payload.notes,
        verdict: throttle.verdict,
    };
    report.augment_annotations(config.dump_id_prefix.trim_matches('-'));

    // This is the collector's only backpressure point. With an enqueue
    // deadline configured, a saturated queue turns into a 503 and the
    // client retries later; without one, the handler waits for a slot.
    if state.crash_mover().enqueue(report).await.is_err() {
        metric!(counter(CollectorCounters::QueueIsFull) += 1);
        intake_log::warn!("{id}: hand-off queue is full, not accepted");
        return discarded(StatusCode::SERVICE_UNAVAILABLE);
    }

    (
        StatusCode::OK,
        [TEXT_PLAIN],
        format!("CrashID={prefix}{id}\n", prefix = config.dump_id_prefix),
    )
        .into_response()
}

fn bad_request(error: &PayloadError) -> Response {
    let reason = error.reason();
    metric!(counter(CollectorCounters::MalformedCrash) += 1, reason = reason);
    intake_log::debug!("malformed crash submission: {error}");

    (
        StatusCode::BAD_REQUEST,
        [TEXT_PLAIN, (header::HeaderName::from_static(REASON_HEADER), reason)],
        format!("{reason}\n"),
    )
        .into_response()
}

fn discarded(status: StatusCode) -> Response {
    (status, [TEXT_PLAIN], DISCARDED_BODY).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use once_cell::sync::Lazy;
    use regex::Regex;
    use tower::ServiceExt;

    use crate::endpoints::testutils::*;
    use crate::services::publish::NoopCrashPublish;
    use crate::services::storage::CrashStorage;
    use crate::services::AdapterError;
    use crate::throttler::{Condition, Outcome, Rule, Throttler};

    use super::*;

    /// The client-facing id shape: random hex, date digits, verdict digit.
    static RESPONSE_ID_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"^CrashID=bp-[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{5}[0-9]{2}(0[1-9]|1[0-2])(0[1-9]|[12][0-9]|3[01])[01]\n$",
        )
        .unwrap()
    });

    async fn submit(state: &ServiceState, request: HttpRequest<Body>) -> (StatusCode, String, Option<String>) {
        let app = crate::services::server::make_app(state.clone());
        let response = app.oneshot(request).await.unwrap();

        let status = response.status();
        let reason = response
            .headers()
            .get(REASON_HEADER)
            .map(|value| value.to_str().unwrap().to_owned());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        (status, String::from_utf8(body.to_vec()).unwrap(), reason)
    }

    async fn wait_for_idle(state: &ServiceState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.crash_mover().pending() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("crash mover drained in time");
    }

    #[tokio::test]
    async fn test_minimal_accept() {
        let (state, storage, publish) = test_state(&[("BREAKPAD_THROTTLER_RULES", "accept_all")]);

        let (status, body, _) = submit(&state, minimal_submission()).await;

        assert_eq!(status, StatusCode::OK);
        assert!(RESPONSE_ID_RE.is_match(&body), "unexpected body: {body:?}");
        assert!(body.trim_end().ends_with('0'), "accept must encode 0");

        wait_for_idle(&state).await;

        let saved = storage.saved();
        assert_eq!(saved.len(), 1);
        let report = &saved[0];

        let id = body
            .trim_end()
            .strip_prefix("CrashID=bp-")
            .unwrap()
            .to_owned();
        assert_eq!(report.id.as_str(), id);
        assert_eq!(report.annotations["uuid"], id);
        assert_eq!(report.dumps["upload_file_minidump"].data.as_ref(), b"ABC");
        assert_eq!(
            report.dump_names(),
            serde_json::json!({ "upload_file_minidump": "x.dmp" })
        );

        assert_eq!(publish.published(), vec![id]);
    }

    #[tokio::test]
    async fn test_gzipped_submission() {
        let (state, storage, publish) = test_state(&[("BREAKPAD_THROTTLER_RULES", "accept_all")]);

        let (status, body, _) = submit(&state, gzipped_submission()).await;

        assert_eq!(status, StatusCode::OK);
        assert!(RESPONSE_ID_RE.is_match(&body), "unexpected body: {body:?}");

        wait_for_idle(&state).await;

        let saved = storage.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].annotations["payload_compressed"], "1");
        assert_eq!(publish.published().len(), 1);
    }

    #[tokio::test]
    async fn test_reject_discards() {
        // The default mozilla product list does not contain "Other".
        let (state, storage, publish) = test_state(&[]);

        let request = multipart_request(&[("ProductName", "Other")], &[]);
        let (status, body, _) = submit(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Discarded=1\n");

        wait_for_idle(&state).await;
        assert!(storage.saved().is_empty());
        assert!(publish.published().is_empty());
    }

    #[tokio::test]
    async fn test_defer_saves_but_does_not_publish() {
        let throttler = Throttler::with_rules(vec![Rule {
            name: "defer_nightly",
            condition: Condition::Equals {
                key: "Version",
                value: "Nightly",
            },
            outcome: Outcome::Fixed(Verdict::Defer),
        }]);
        let (state, storage, publish) = test_state_with_throttler(&[], throttler);

        let request = multipart_request(
            &[("ProductName", "Firefox"), ("Version", "Nightly")],
            &[("upload_file_minidump", "x.dmp", b"ABC")],
        );
        let (status, body, _) = submit(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.trim_end().ends_with('1'), "defer must encode 1");

        wait_for_idle(&state).await;
        assert_eq!(storage.saved().len(), 1);
        assert!(publish.published().is_empty());
    }

    #[tokio::test]
    async fn test_fakeaccept_returns_id_but_drops() {
        let (state, storage, publish) = test_state(&[]);

        let request = multipart_request(&[("ProductName", "b2g")], &[]);
        let (status, body, _) = submit(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(RESPONSE_ID_RE.is_match(&body), "unexpected body: {body:?}");

        wait_for_idle(&state).await;
        assert!(storage.saved().is_empty());
        assert!(publish.published().is_empty());
    }

    #[tokio::test]
    async fn test_throttleable_0_bypasses_product_filter() {
        let (state, _storage, _publish) = test_state(&[]);

        let request = multipart_request(
            &[("ProductName", "NotAThing"), ("Throttleable", "0")],
            &[],
        );
        let (status, body, _) = submit(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(RESPONSE_ID_RE.is_match(&body), "unexpected body: {body:?}");
        wait_for_idle(&state).await;
    }

    #[tokio::test]
    async fn test_client_uuid_adopted() {
        let (state, storage, _publish) = test_state(&[("BREAKPAD_THROTTLER_RULES", "accept_all")]);

        let supplied = "de1bb258-cbbf-4589-a673-34f802201011";
        let request = multipart_request(
            &[("ProductName", "Firefox"), ("uuid", supplied)],
            &[],
        );
        let (status, body, _) = submit(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        let id = body.trim_end().strip_prefix("CrashID=bp-").unwrap();
        // Random prefix kept, date and verdict rewritten.
        assert_eq!(&id[..29], &supplied[..29]);
        assert!(id.ends_with('0'));

        wait_for_idle(&state).await;
        assert_eq!(storage.saved()[0].annotations["uuid"], id);
    }

    #[tokio::test]
    async fn test_bad_content_type_reason() {
        let (state, _storage, _publish) = test_state(&[]);

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/submit")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, 2)
            .body(Body::from("{}"))
            .unwrap();
        let (status, body, reason) = submit(&state, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reason.as_deref(), Some("bad_content_type"));
        assert_eq!(body, "bad_content_type\n");
    }

    #[tokio::test]
    async fn test_bad_gzip_reason() {
        let (state, _storage, _publish) = test_state(&[]);

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/submit")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(header::CONTENT_LENGTH, 9)
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Body::from("not gzip!"))
            .unwrap();
        let (status, _body, reason) = submit(&state, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reason.as_deref(), Some("bad_gzip"));
    }

    /// Storage that blocks every save until released, to saturate the queue.
    #[derive(Debug, Default)]
    struct BlockedStorage {
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl CrashStorage for BlockedStorage {
        async fn save_crash(&self, _report: &crate::report::CrashReport) -> Result<(), AdapterError> {
            self.release.notified().await;
            Ok(())
        }

        async fn verify(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_queue_full_yields_503() {
        let storage = Arc::new(BlockedStorage::default());
        let publish = Arc::new(NoopCrashPublish::new());
        let state = test_state_with_adapters(
            &[
                ("BREAKPAD_THROTTLER_RULES", "accept_all"),
                ("CRASHMOVER_CONCURRENT_CRASHMOVERS", "1"),
                ("CRASHMOVER_MAX_QUEUE_SIZE", "2"),
                ("CRASHMOVER_ENQUEUE_TIMEOUT_MS", "100"),
            ],
            storage.clone(),
            publish.clone(),
        );

        // The worker takes the first crash and blocks; two more fill the
        // queue; the next submission cannot be acknowledged.
        let mut statuses = Vec::new();
        for _ in 0..4 {
            let (status, _, _) = submit(&state, minimal_submission()).await;
            statuses.push(status);
            tokio::task::yield_now().await;
        }

        assert_eq!(
            statuses,
            vec![
                StatusCode::OK,
                StatusCode::OK,
                StatusCode::OK,
                StatusCode::SERVICE_UNAVAILABLE
            ]
        );

        // Everything acknowledged with a 200 completes after release.
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.crash_mover().pending() > 0 {
                storage.release.notify_waiters();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("crash mover drained in time");
        assert_eq!(publish.published().len(), 3);
    }
}
