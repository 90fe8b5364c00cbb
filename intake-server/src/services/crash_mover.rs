//! The crash mover: a bounded worker pool that saves and publishes accepted
//! crashes.
//!
//! The submit endpoint enqueues crash reports onto a bounded hand-off queue
//! and returns to the client; a fixed pool of workers drains the queue and
//! drives each crash through storage and publish with bounded retries. The
//! queue is the collector's only backpressure mechanism: when it is full,
//! enqueueing blocks (or times out, yielding a 503).
//!
//! A crash inside the mover moves through `QUEUED -> SAVING -> PUBLISHING ->
//! DONE`, where failed save or publish attempts loop on their state with
//! exponential backoff. Crashes whose save attempts are exhausted are
//! dropped; crashes whose publish attempts are exhausted stay saved but
//! unannounced, and a separate reaper reconciles those later.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use intake_config::CrashMoverConfig;
use intake_statsd::metric;
use tokio::sync::{mpsc, Mutex};

use crate::report::CrashReport;
use crate::services::publish::CrashPublish;
use crate::services::storage::CrashStorage;
use crate::services::AdapterError;
use crate::statsd::{CollectorCounters, CollectorGauges, CollectorTimers};
use crate::throttler::Verdict;
use crate::utils::RetryPolicy;

/// How often the queue gauge is reported and drain progress is checked.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// The hand-off queue rejected a crash within the enqueue deadline.
#[derive(Debug, thiserror::Error)]
#[error("hand-off queue is full")]
pub struct QueueFullError;

/// Handle to the crash mover worker pool.
///
/// Cloning is cheap; all clones feed the same queue.
#[derive(Clone, Debug)]
pub struct CrashMover {
    tx: mpsc::Sender<CrashReport>,
    enqueue_timeout: Duration,
    /// Crashes enqueued or being moved, for drain accounting.
    pending: Arc<AtomicUsize>,
}

impl CrashMover {
    /// Starts the worker pool and returns the queue handle.
    pub fn start(
        config: &CrashMoverConfig,
        storage: Arc<dyn CrashStorage>,
        publish: Arc<dyn CrashPublish>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity());
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::new(config.max_attempts, config.retry_base);

        for index in 0..config.concurrent_crashmovers {
            tokio::spawn(worker(
                index,
                Arc::clone(&rx),
                Arc::clone(&storage),
                Arc::clone(&publish),
                policy,
                Arc::clone(&pending),
            ));
        }

        // Periodically report queue depth; a number that keeps going up
        // means this process cannot keep up with its intake.
        let gauge_pending = Arc::clone(&pending);
        let gauge_tx = tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                if gauge_tx.is_closed() {
                    break;
                }
                metric!(
                    gauge(CollectorGauges::WorkQueueSize) =
                        gauge_pending.load(Ordering::Relaxed) as u64
                );
            }
        });

        Self {
            tx,
            enqueue_timeout: config.enqueue_timeout,
            pending,
        }
    }

    /// Hands a crash report off to the worker pool.
    ///
    /// Blocks while the queue is full. With a non-zero enqueue timeout
    /// configured, gives up after that long and returns [`QueueFullError`];
    /// the caller then tells the client to retry.
    pub async fn enqueue(&self, report: CrashReport) -> Result<(), QueueFullError> {
        self.pending.fetch_add(1, Ordering::SeqCst);

        let result = if self.enqueue_timeout.is_zero() {
            self.tx.send(report).await.map_err(|_| QueueFullError)
        } else {
            self.tx
                .send_timeout(report, self.enqueue_timeout)
                .await
                .map_err(|_| QueueFullError)
        };

        if result.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }

        result
    }

    /// Crashes currently queued or being moved.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits for the queue and all in-flight work to drain.
    ///
    /// Returns the number of crashes still pending when the deadline
    /// expires. Every one of those was acknowledged to a client with a 200,
    /// so the caller must report the loss rather than exit silently.
    pub async fn drain(&self, deadline: Duration) -> Result<(), usize> {
        let started = Instant::now();

        loop {
            let pending = self.pending();
            if pending == 0 {
                return Ok(());
            }

            if started.elapsed() >= deadline {
                return Err(pending);
            }

            tokio::time::sleep(TICK_INTERVAL).await;
        }
    }
}

async fn worker(
    index: usize,
    rx: Arc<Mutex<mpsc::Receiver<CrashReport>>>,
    storage: Arc<dyn CrashStorage>,
    publish: Arc<dyn CrashPublish>,
    policy: RetryPolicy,
    pending: Arc<AtomicUsize>,
) {
    intake_log::debug!("crashmover worker {index} started");

    loop {
        // Hold the lock only while dequeueing so workers take turns.
        let report = { rx.lock().await.recv().await };
        let Some(report) = report else {
            break;
        };

        let crash_id = report.id.clone();

        // A panic while handling one crash must not take the worker down
        // with it; the crash is dropped and the loop continues.
        let outcome = std::panic::AssertUnwindSafe(process(report, &*storage, &*publish, policy))
            .catch_unwind()
            .await;

        if let Err(panic) = outcome {
            let message = panic_message(&panic);
            metric!(counter(CollectorCounters::MoverPanic) += 1);
            sentry::capture_message(
                &format!("crashmover panic while handling {crash_id}: {message}"),
                sentry::Level::Error,
            );
            intake_log::error!("{crash_id}: worker panicked: {message}");
        }

        pending.fetch_sub(1, Ordering::SeqCst);
    }

    intake_log::debug!("crashmover worker {index} stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Drives one crash report to a terminal state.
async fn process(
    mut report: CrashReport,
    storage: &dyn CrashStorage,
    publish: &dyn CrashPublish,
    policy: RetryPolicy,
) {
    // The client already got its crash id; fake accepts end here.
    if report.verdict == Verdict::FakeAccept {
        intake_log::info!("{}: fake accept, discarded", report.id);
        return;
    }

    let save_start = Instant::now();
    let saved = retry_adapter(policy, "save", || storage.save_crash(&report)).await;
    metric!(timer(CollectorTimers::CrashSave) = save_start.elapsed());

    match saved {
        Ok(retries) => {
            if retries > 0 {
                report.notes.push(format!("save_retries:{retries}"));
            }
            intake_log::info!("{} saved", report.id);
        }
        Err(error) => {
            metric!(counter(CollectorCounters::SaveCrashDropped) += 1);
            intake_log::error!("{}: too many errors trying to save; dropped: {error}", report.id);
            return;
        }
    }

    if report.verdict == Verdict::Accept {
        let publish_start = Instant::now();
        let published = retry_adapter(policy, "publish", || publish.publish_crash(&report.id)).await;
        metric!(timer(CollectorTimers::CrashPublish) = publish_start.elapsed());

        match published {
            Ok(retries) => {
                if retries > 0 {
                    report.notes.push(format!("publish_retries:{retries}"));
                }
                intake_log::info!("{} published", report.id);
            }
            Err(error) => {
                // The crash is saved but unannounced; a reaper reconciles
                // unpublished saves out of band.
                metric!(counter(CollectorCounters::PublishCrashDropped) += 1);
                intake_log::error!(
                    "{}: too many errors trying to publish; unannounced: {error}",
                    report.id
                );
            }
        }
    }

    metric!(counter(CollectorCounters::SaveCrash) += 1);

    let handling = (chrono::Utc::now() - report.received_at)
        .to_std()
        .unwrap_or_default();
    metric!(timer(CollectorTimers::CrashHandling) = handling);
}

/// Runs an adapter call with bounded retries and backoff.
///
/// Returns the number of retries it took on success. Permanent errors and
/// exhausted retries return the last error.
async fn retry_adapter<F, Fut>(
    policy: RetryPolicy,
    state: &'static str,
    mut call: F,
) -> Result<u32, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), AdapterError>>,
{
    let mut attempt = 0;

    loop {
        match call().await {
            Ok(()) => return Ok(attempt),
            Err(error) if error.is_transient() && attempt < policy.max_retries() => {
                metric!(counter(CollectorCounters::MoverRetry) += 1, state = state);
                intake_log::warn!("{state} attempt {attempt} failed, retrying: {error}");
                tokio::time::sleep(policy.delay(attempt)).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use chrono::Utc;
    use intake_config::{CrashPublishConfig, CrashStorageConfig, PublishKind, StorageKind};
    use parking_lot::Mutex as SyncMutex;
    use tokio::sync::Notify;

    use crate::crash_id::CrashId;
    use crate::report::PayloadKind;
    use crate::services::publish::NoopCrashPublish;
    use crate::services::storage::NoopCrashStorage;

    use super::*;

    fn mover_config(workers: usize, queue: usize, enqueue_timeout_ms: u64) -> CrashMoverConfig {
        CrashMoverConfig {
            concurrent_crashmovers: workers,
            max_queue_size: Some(queue),
            enqueue_timeout: Duration::from_millis(enqueue_timeout_ms),
            max_attempts: 5,
            retry_base: Duration::from_millis(1),
            shutdown_timeout: Duration::from_secs(30),
            crashstorage: CrashStorageConfig {
                class: StorageKind::Noop,
                bucket_name: None,
                endpoint_url: None,
                region: "us-west-2".to_owned(),
                access_key: None,
                secret_access_key: None,
                auth_token: None,
                timeout: Duration::from_secs(10),
                root: std::path::PathBuf::new(),
            },
            crashpublish: CrashPublishConfig {
                class: PublishKind::Noop,
                queue_name: None,
                project_id: None,
                topic_name: None,
                endpoint_url: None,
                region: "us-west-2".to_owned(),
                access_key: None,
                secret_access_key: None,
                auth_token: None,
                timeout: Duration::from_secs(5),
            },
        }
    }

    fn report(verdict: Verdict) -> CrashReport {
        let received_at = Utc::now();
        let mut report = CrashReport {
            id: CrashId::generate(received_at, verdict),
            annotations: BTreeMap::from([("ProductName".to_owned(), "Firefox".to_owned())]),
            dumps: BTreeMap::new(),
            received_at,
            payload_kind: PayloadKind::Multipart,
            payload_compressed: false,
            notes: Vec::new(),
            verdict,
        };
        report.augment_annotations("bp");
        report
    }

    /// Storage that fails the first N saves with a transient error.
    #[derive(Debug, Default)]
    struct FlakyStorage {
        failures_left: AtomicU32,
        attempts: AtomicU32,
        saved: SyncMutex<Vec<String>>,
    }

    impl FlakyStorage {
        fn failing(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl CrashStorage for FlakyStorage {
        async fn save_crash(&self, report: &CrashReport) -> Result<(), AdapterError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);

            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(AdapterError::Transient("simulated 500".to_owned()));
            }

            self.saved.lock().push(report.id.as_str().to_owned());
            Ok(())
        }

        async fn verify(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    /// Storage that always fails permanently.
    #[derive(Debug, Default)]
    struct BrokenStorage {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl CrashStorage for BrokenStorage {
        async fn save_crash(&self, _report: &CrashReport) -> Result<(), AdapterError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(AdapterError::Permanent("simulated 403".to_owned()))
        }

        async fn verify(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    /// Storage that blocks every save until released.
    #[derive(Debug, Default)]
    struct BlockedStorage {
        release: Notify,
    }

    #[async_trait]
    impl CrashStorage for BlockedStorage {
        async fn save_crash(&self, _report: &CrashReport) -> Result<(), AdapterError> {
            self.release.notified().await;
            Ok(())
        }

        async fn verify(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    /// Keeps releasing a [`BlockedStorage`] until the mover goes idle.
    async fn release_until_idle(mover: &CrashMover, storage: &BlockedStorage) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while mover.pending() > 0 {
                storage.release.notify_waiters();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("mover drained in time");
    }

    async fn wait_for_idle(mover: &CrashMover) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while mover.pending() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("mover drained in time");
    }

    #[tokio::test]
    async fn test_accept_saves_and_publishes() {
        let storage = Arc::new(NoopCrashStorage::new());
        let publish = Arc::new(NoopCrashPublish::new());
        let mover = CrashMover::start(&mover_config(2, 8, 0), storage.clone(), publish.clone());

        let report = report(Verdict::Accept);
        let id = report.id.clone();
        mover.enqueue(report).await.unwrap();
        wait_for_idle(&mover).await;

        assert_eq!(storage.saved().len(), 1);
        assert_eq!(publish.published(), vec![id.as_str().to_owned()]);
    }

    #[tokio::test]
    async fn test_defer_saves_without_publishing() {
        let storage = Arc::new(NoopCrashStorage::new());
        let publish = Arc::new(NoopCrashPublish::new());
        let mover = CrashMover::start(&mover_config(2, 8, 0), storage.clone(), publish.clone());

        mover.enqueue(report(Verdict::Defer)).await.unwrap();
        wait_for_idle(&mover).await;

        assert_eq!(storage.saved().len(), 1);
        assert!(publish.published().is_empty());
    }

    #[tokio::test]
    async fn test_fakeaccept_discards() {
        let storage = Arc::new(NoopCrashStorage::new());
        let publish = Arc::new(NoopCrashPublish::new());
        let mover = CrashMover::start(&mover_config(2, 8, 0), storage.clone(), publish.clone());

        mover.enqueue(report(Verdict::FakeAccept)).await.unwrap();
        wait_for_idle(&mover).await;

        assert!(storage.saved().is_empty());
        assert!(publish.published().is_empty());
    }

    #[tokio::test]
    async fn test_transient_save_failures_are_retried() {
        let storage = Arc::new(FlakyStorage::failing(2));
        let publish = Arc::new(NoopCrashPublish::new());
        let mover = CrashMover::start(&mover_config(1, 8, 0), storage.clone(), publish.clone());

        mover.enqueue(report(Verdict::Accept)).await.unwrap();
        wait_for_idle(&mover).await;

        assert_eq!(storage.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(storage.saved.lock().len(), 1);
        assert_eq!(publish.published().len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_save_failure_drops_without_retry() {
        let storage = Arc::new(BrokenStorage::default());
        let publish = Arc::new(NoopCrashPublish::new());
        let mover = CrashMover::start(&mover_config(1, 8, 0), storage.clone(), publish.clone());

        mover.enqueue(report(Verdict::Accept)).await.unwrap();
        wait_for_idle(&mover).await;

        assert_eq!(storage.attempts.load(Ordering::SeqCst), 1);
        assert!(publish.published().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop_the_crash() {
        let storage = Arc::new(FlakyStorage::failing(u32::MAX));
        let publish = Arc::new(NoopCrashPublish::new());
        let mover = CrashMover::start(&mover_config(1, 8, 0), storage.clone(), publish.clone());

        mover.enqueue(report(Verdict::Accept)).await.unwrap();
        wait_for_idle(&mover).await;

        // One initial attempt plus the configured retries.
        assert_eq!(storage.attempts.load(Ordering::SeqCst), 6);
        assert!(storage.saved.lock().is_empty());
        assert!(publish.published().is_empty());
    }

    #[tokio::test]
    async fn test_queue_backpressure() {
        let storage = Arc::new(BlockedStorage::default());
        let publish = Arc::new(NoopCrashPublish::new());
        let mover = CrashMover::start(&mover_config(1, 2, 50), storage.clone(), publish.clone());

        // The worker takes the first crash and blocks on storage.
        mover.enqueue(report(Verdict::Accept)).await.unwrap();
        tokio::task::yield_now().await;

        // These two fill the queue.
        mover.enqueue(report(Verdict::Accept)).await.unwrap();
        mover.enqueue(report(Verdict::Accept)).await.unwrap();

        // The next one cannot get a slot within the enqueue deadline.
        let result = mover.enqueue(report(Verdict::Accept)).await;
        assert!(result.is_err());

        // Release the worker; everything accepted must complete.
        release_until_idle(&mover, &storage).await;
        assert_eq!(publish.published().len(), 3);
    }

    #[tokio::test]
    async fn test_drain_deadline_reports_remaining() {
        let storage = Arc::new(BlockedStorage::default());
        let publish = Arc::new(NoopCrashPublish::new());
        let mover = CrashMover::start(&mover_config(1, 4, 0), storage.clone(), publish.clone());

        mover.enqueue(report(Verdict::Accept)).await.unwrap();
        mover.enqueue(report(Verdict::Accept)).await.unwrap();
        tokio::task::yield_now().await;

        let result = mover.drain(Duration::from_millis(50)).await;
        assert_eq!(result, Err(2));

        release_until_idle(&mover, &storage).await;
        assert!(mover.drain(Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_panic_in_worker_is_isolated() {
        #[derive(Debug)]
        struct PanickingStorage;

        #[async_trait]
        impl CrashStorage for PanickingStorage {
            async fn save_crash(&self, _report: &CrashReport) -> Result<(), AdapterError> {
                panic!("simulated bug");
            }

            async fn verify(&self) -> Result<(), AdapterError> {
                Ok(())
            }
        }

        let publish = Arc::new(NoopCrashPublish::new());
        let mover = CrashMover::start(&mover_config(1, 8, 0), Arc::new(PanickingStorage), publish.clone());

        mover.enqueue(report(Verdict::Accept)).await.unwrap();
        wait_for_idle(&mover).await;

        // The worker survived the panic and still processes new crashes.
        mover.enqueue(report(Verdict::FakeAccept)).await.unwrap();
        wait_for_idle(&mover).await;
        assert_eq!(mover.pending(), 0);
    }
}
