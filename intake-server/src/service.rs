use std::sync::Arc;

use intake_config::{Config, ConfigError};
use serde_json::Value;

use crate::services::crash_mover::CrashMover;
use crate::services::publish::{build_publish, CrashPublish};
use crate::services::storage::{build_storage, CrashStorage};
use crate::throttler::{Throttler, UnknownRuleSet};
use crate::utils::version_info;
use crate::ServerError;

/// Building the collector services failed.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// A required configuration value is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configured throttle rule set does not exist.
    #[error(transparent)]
    UnknownRuleSet(#[from] UnknownRuleSet),

    /// Constructing a storage or publish adapter failed.
    #[error("adapter construction failed: {0}")]
    Adapter(String),
}

#[derive(Debug)]
struct StateInner {
    config: Arc<Config>,
    throttler: Throttler,
    crash_mover: CrashMover,
    storage: Arc<dyn CrashStorage>,
    publish: Arc<dyn CrashPublish>,
    version: Value,
}

/// Shared server state: configuration, the throttler and the running
/// services.
///
/// Cloning is cheap; all request handlers share one instance.
#[derive(Clone, Debug)]
pub struct ServiceState {
    inner: Arc<StateInner>,
}

impl ServiceState {
    /// Builds all adapters from configuration and starts the crash mover.
    pub fn start(config: Arc<Config>) -> Result<Self, ServiceError> {
        let mover = config.crashmover();
        let storage = build_storage(&mover.crashstorage, &config.breakpad().dump_field)?;
        let publish = build_publish(&mover.crashpublish)?;
        Self::with_adapters(config, storage, publish)
    }

    /// Starts the crash mover with explicitly provided adapters.
    ///
    /// This is the seam tests and embedders use to swap in their own
    /// storage or publish implementations.
    pub fn with_adapters(
        config: Arc<Config>,
        storage: Arc<dyn CrashStorage>,
        publish: Arc<dyn CrashPublish>,
    ) -> Result<Self, ServiceError> {
        let throttler = Throttler::from_config(config.breakpad())?;
        Ok(Self::assemble(config, storage, publish, throttler))
    }

    /// Starts the crash mover with an explicit throttler, for tests.
    #[cfg(test)]
    pub(crate) fn with_throttler(
        config: Arc<Config>,
        storage: Arc<dyn CrashStorage>,
        publish: Arc<dyn CrashPublish>,
        throttler: Throttler,
    ) -> Self {
        Self::assemble(config, storage, publish, throttler)
    }

    fn assemble(
        config: Arc<Config>,
        storage: Arc<dyn CrashStorage>,
        publish: Arc<dyn CrashPublish>,
        throttler: Throttler,
    ) -> Self {
        let crash_mover =
            CrashMover::start(config.crashmover(), Arc::clone(&storage), Arc::clone(&publish));
        let version = version_info(config.basedir());

        Self {
            inner: Arc::new(StateInner {
                config,
                throttler,
                crash_mover,
                storage,
                publish,
                version,
            }),
        }
    }

    /// The collector configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The configured throttler.
    pub fn throttler(&self) -> &Throttler {
        &self.inner.throttler
    }

    /// Handle to the crash mover hand-off queue.
    pub fn crash_mover(&self) -> &CrashMover {
        &self.inner.crash_mover
    }

    /// The crash storage backend.
    pub fn storage(&self) -> &Arc<dyn CrashStorage> {
        &self.inner.storage
    }

    /// The crash publish backend.
    pub fn publish(&self) -> &Arc<dyn CrashPublish> {
        &self.inner.publish
    }

    /// Version info served on `/__version__`.
    pub fn version(&self) -> &Value {
        &self.inner.version
    }

    /// Runs each adapter's verification exactly once.
    ///
    /// Called at startup before the listener binds. A collector whose
    /// downstream dependencies are unreachable must refuse to accept
    /// crashes it cannot durably store.
    pub async fn verify_adapters(&self) -> Result<(), ServerError> {
        intake_log::info!("verifying crash storage");
        if let Err(error) = self.inner.storage.verify().await {
            return Err(ServerError::VerificationFailed {
                name: "crashstorage",
                message: error.to_string(),
            });
        }

        intake_log::info!("verifying crash publish");
        if let Err(error) = self.inner.publish.verify().await {
            return Err(ServerError::VerificationFailed {
                name: "crashpublish",
                message: error.to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::endpoints::testutils::{test_state, test_state_with_adapters};
    use crate::report::CrashReport;
    use crate::services::publish::NoopCrashPublish;
    use crate::services::storage::CrashStorage;
    use crate::services::AdapterError;

    use super::*;

    /// Storage whose credentials have been revoked.
    #[derive(Debug)]
    struct UnauthorizedStorage;

    #[async_trait]
    impl CrashStorage for UnauthorizedStorage {
        async fn save_crash(&self, _report: &CrashReport) -> Result<(), AdapterError> {
            Err(AdapterError::Permanent("put: HTTP 403".to_owned()))
        }

        async fn verify(&self) -> Result<(), AdapterError> {
            Err(AdapterError::Permanent("put: HTTP 403".to_owned()))
        }
    }

    #[tokio::test]
    async fn test_verification_passes_with_healthy_adapters() {
        let (state, _, _) = test_state(&[]);
        assert!(state.verify_adapters().await.is_ok());
    }

    #[tokio::test]
    async fn test_verification_fails_with_revoked_credentials() {
        let state = test_state_with_adapters(
            &[],
            Arc::new(UnauthorizedStorage),
            Arc::new(NoopCrashPublish::new()),
        );

        let error = state.verify_adapters().await.unwrap_err();
        match error {
            ServerError::VerificationFailed { name, message } => {
                assert_eq!(name, "crashstorage");
                assert!(message.contains("403"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
