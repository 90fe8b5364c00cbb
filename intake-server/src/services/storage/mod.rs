//! Crash storage backends.
//!
//! All backends write the same three object groups per crash — the raw
//! annotations, the dump-names index and one object per dump — at the
//! canonical keys produced by [`layout`]. Writes are idempotent
//! key-overwrites, so a retried save converges on the same final objects.

mod fs;
mod gcs;
mod layout;
mod noop;
mod s3;

pub use self::fs::FsCrashStorage;
pub use self::gcs::GcsCrashStorage;
pub use self::layout::{crash_objects, dump_key, dump_names_key, raw_crash_key};
pub use self::noop::NoopCrashStorage;
pub use self::s3::S3CrashStorage;

use std::sync::Arc;

use async_trait::async_trait;
use intake_config::{CrashStorageConfig, StorageKind};

use crate::report::CrashReport;
use crate::service::ServiceError;
use crate::services::AdapterError;

/// Capability set of a crash storage backend.
#[async_trait]
pub trait CrashStorage: std::fmt::Debug + Send + Sync {
    /// Writes all objects for one crash report.
    ///
    /// Either every object is written and `Ok` is returned, or an error is
    /// returned and already-written objects are left in place for an
    /// idempotent retry.
    async fn save_crash(&self, report: &CrashReport) -> Result<(), AdapterError>;

    /// Proves this collector can write to the store.
    ///
    /// Invoked once at startup before the HTTP listener binds, and by the
    /// heartbeat endpoint. Must not leave garbage behind.
    async fn verify(&self) -> Result<(), AdapterError>;
}

/// Constructs the configured storage backend.
pub fn build_storage(
    config: &CrashStorageConfig,
    dump_field: &str,
) -> Result<Arc<dyn CrashStorage>, ServiceError> {
    Ok(match config.class {
        StorageKind::Noop => Arc::new(NoopCrashStorage::new()),
        StorageKind::Fs => Arc::new(FsCrashStorage::new(config, dump_field)),
        StorageKind::S3 => Arc::new(S3CrashStorage::new(config, dump_field)?),
        StorageKind::Gcs => Arc::new(GcsCrashStorage::new(config, dump_field)?),
    })
}
