use async_trait::async_trait;
use parking_lot::Mutex;

use crate::report::CrashReport;
use crate::services::AdapterError;

use super::CrashStorage;

/// How many crashes the no-op backend remembers.
const KEEP_CRASHES: usize = 10;

/// A no-op crash storage that logs crashes it would have stored.
///
/// It keeps the last few crash reports in memory with the most recently
/// stored crash at the end, which is what the test suite asserts against.
#[derive(Debug, Default)]
pub struct NoopCrashStorage {
    saved: Mutex<Vec<CrashReport>>,
}

impl NoopCrashStorage {
    /// Creates an empty no-op storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// The crash reports "stored" so far, oldest first.
    pub fn saved(&self) -> Vec<CrashReport> {
        self.saved.lock().clone()
    }
}

#[async_trait]
impl CrashStorage for NoopCrashStorage {
    async fn save_crash(&self, report: &CrashReport) -> Result<(), AdapterError> {
        intake_log::info!("crash storage no-op: {}", report.id);

        let mut saved = self.saved.lock();
        saved.push(report.clone());

        // Nix all but the last few crashes.
        let excess = saved.len().saturating_sub(KEEP_CRASHES);
        saved.drain(..excess);

        Ok(())
    }

    async fn verify(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}
