//! Crash storage on the local filesystem, for development setups.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use intake_config::CrashStorageConfig;
use uuid::Uuid;

use crate::report::CrashReport;
use crate::services::AdapterError;

use super::{crash_objects, CrashStorage};

/// Saves crashes under a root directory, mirroring the object layout.
#[derive(Debug)]
pub struct FsCrashStorage {
    root: PathBuf,
    dump_field: String,
}

impl FsCrashStorage {
    /// Creates a filesystem storage rooted at the configured directory.
    pub fn new(config: &CrashStorageConfig, dump_field: &str) -> Self {
        Self {
            root: config.root.clone(),
            dump_field: dump_field.to_owned(),
        }
    }

    async fn write_file(&self, key: &str, body: &[u8]) -> Result<(), AdapterError> {
        let path = self.root.join(key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| AdapterError::Transient(error.to_string()))?;
        }

        tokio::fs::write(&path, body)
            .await
            .map_err(|error| AdapterError::Transient(error.to_string()))
    }

    /// Path of a stored object, for tests and tooling.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CrashStorage for FsCrashStorage {
    async fn save_crash(&self, report: &CrashReport) -> Result<(), AdapterError> {
        for (key, body) in crash_objects(report, &self.dump_field) {
            self.write_file(&key, &body).await?;
        }
        Ok(())
    }

    async fn verify(&self) -> Result<(), AdapterError> {
        let key = format!("test/testfile-{}.txt", Uuid::new_v4());
        self.write_file(&key, b"test").await?;

        tokio::fs::remove_file(self.root.join(&key))
            .await
            .map_err(|error| AdapterError::Transient(error.to_string()))?;

        Ok(())
    }
}
