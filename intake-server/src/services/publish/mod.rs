//! Crash publish backends.
//!
//! Publishing announces a saved crash to the processing pipeline. The
//! message body is the bare crash id as ASCII; adapters add no envelope.

mod noop;
mod pubsub;
mod sqs;

pub use self::noop::NoopCrashPublish;
pub use self::pubsub::PubSubCrashPublish;
pub use self::sqs::SqsCrashPublish;

use std::sync::Arc;

use async_trait::async_trait;
use intake_config::{CrashPublishConfig, PublishKind};

use crate::crash_id::CrashId;
use crate::service::ServiceError;
use crate::services::AdapterError;

/// Capability set of a crash publish backend.
#[async_trait]
pub trait CrashPublish: std::fmt::Debug + Send + Sync {
    /// Publishes one crash id downstream.
    async fn publish_crash(&self, id: &CrashId) -> Result<(), AdapterError>;

    /// Proves this collector can publish.
    ///
    /// Invoked once at startup before the HTTP listener binds, and by the
    /// heartbeat endpoint. Publishes the literal id `test`, which downstream
    /// consumers ignore.
    async fn verify(&self) -> Result<(), AdapterError>;
}

/// Constructs the configured publish backend.
pub fn build_publish(config: &CrashPublishConfig) -> Result<Arc<dyn CrashPublish>, ServiceError> {
    Ok(match config.class {
        PublishKind::Noop => Arc::new(NoopCrashPublish::new()),
        PublishKind::Sqs => Arc::new(SqsCrashPublish::new(config)?),
        PublishKind::Pubsub => Arc::new(PubSubCrashPublish::new(config)?),
    })
}
