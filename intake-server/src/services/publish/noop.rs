use async_trait::async_trait;
use parking_lot::Mutex;

use crate::crash_id::CrashId;
use crate::services::AdapterError;

use super::CrashPublish;

/// How many crash ids the no-op backend remembers.
const KEEP_CRASH_IDS: usize = 10;

/// A no-op crash publisher that logs crash ids it would have published.
///
/// It keeps the last few crash ids in memory with the most recently
/// published id at the end, which is what the test suite asserts against.
#[derive(Debug, Default)]
pub struct NoopCrashPublish {
    published: Mutex<Vec<String>>,
}

impl NoopCrashPublish {
    /// Creates an empty no-op publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// The crash ids "published" so far, oldest first.
    pub fn published(&self) -> Vec<String> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl CrashPublish for NoopCrashPublish {
    async fn publish_crash(&self, id: &CrashId) -> Result<(), AdapterError> {
        intake_log::info!("crash publish no-op: {id}");

        let mut published = self.published.lock();
        published.push(id.as_str().to_owned());

        let excess = published.len().saturating_sub(KEEP_CRASH_IDS);
        published.drain(..excess);

        Ok(())
    }

    async fn verify(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}
