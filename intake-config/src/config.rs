use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use intake_log::{LogConfig, SentryConfig};

/// Default size of the crash mover worker pool.
const DEFAULT_CONCURRENT_CRASHMOVERS: usize = 8;

/// Default cap on an incoming crash payload, matching the front proxy.
const DEFAULT_MAX_CRASH_SIZE: usize = 25 * 1024 * 1024;

/// Default cap on a single annotation value.
const DEFAULT_MAX_ANNOTATION_SIZE: usize = 1024 * 1024;

/// Indicates config related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse.
    #[error("invalid value {value:?} for {field}: {message}")]
    InvalidValue {
        /// The environment variable at fault.
        field: &'static str,
        /// The offending value.
        value: String,
        /// Parser diagnostic.
        message: String,
    },

    /// A variable required by the selected adapter is not set.
    #[error("missing required configuration {field}")]
    MissingValue {
        /// The environment variable at fault.
        field: &'static str,
    },
}

/// Source of raw configuration values, normally the process environment.
///
/// Tests bind configuration from a plain map instead of mutating the
/// process-wide environment.
pub trait ConfigSource {
    /// Returns the raw value for `name`, if set and non-empty.
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads configuration from the process environment.
pub struct OsEnv;

impl ConfigSource for OsEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|value| !value.is_empty())
    }
}

impl ConfigSource for HashMap<&str, &str> {
    fn get(&self, name: &str) -> Option<String> {
        self.get(name).map(|value| (*value).to_owned())
    }
}

fn parse_value<T>(source: &impl ConfigSource, field: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match source.get(field) {
        Some(value) => match value.parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(error) => Err(ConfigError::InvalidValue {
                field,
                value,
                message: error.to_string(),
            }),
        },
        None => Ok(None),
    }
}

fn parse_or<T>(source: &impl ConfigSource, field: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    Ok(parse_value(source, field)?.unwrap_or(default))
}

fn parse_bool(
    source: &impl ConfigSource,
    field: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match source.get(field) {
        None => Ok(default),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                field,
                value,
                message: "expected a boolean".to_owned(),
            }),
        },
    }
}

/// The crash storage backend to construct.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Log-only storage that keeps the last few crashes in memory.
    #[default]
    Noop,
    /// An S3-compatible object store over its REST API.
    S3,
    /// A GCS-compatible object store over its JSON API.
    Gcs,
    /// The local filesystem, mirroring the object layout.
    Fs,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Noop => "noop",
            Self::S3 => "s3",
            Self::Gcs => "gcs",
            Self::Fs => "fs",
        })
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "noop" => Ok(Self::Noop),
            "s3" => Ok(Self::S3),
            "gcs" => Ok(Self::Gcs),
            "fs" => Ok(Self::Fs),
            other => Err(format!(
                "unknown storage class {other:?}, expected one of: noop, s3, gcs, fs"
            )),
        }
    }
}

/// The crash publish backend to construct.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishKind {
    /// Log-only publisher that keeps the last few crash ids in memory.
    #[default]
    Noop,
    /// An SQS-compatible queue over its HTTP API.
    Sqs,
    /// A Pub/Sub-compatible topic over its REST API.
    Pubsub,
}

impl fmt::Display for PublishKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Noop => "noop",
            Self::Sqs => "sqs",
            Self::Pubsub => "pubsub",
        })
    }
}

impl FromStr for PublishKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "noop" => Ok(Self::Noop),
            "sqs" => Ok(Self::Sqs),
            "pubsub" => Ok(Self::Pubsub),
            other => Err(format!(
                "unknown publish class {other:?}, expected one of: noop, sqs, pubsub"
            )),
        }
    }
}

/// Which products the throttler lets through.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ProductsConfig {
    /// The built-in list of supported products.
    #[default]
    Mozilla,
    /// Disable the product filter entirely.
    All,
    /// An explicit list of product names.
    List(Vec<String>),
}

impl FromStr for ProductsConfig {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "mozilla" => Ok(Self::Mozilla),
            "all" => Ok(Self::All),
            _ => Ok(Self::List(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_owned)
                    .collect(),
            )),
        }
    }
}

/// Collector policy for the breakpad submission endpoint.
#[derive(Clone, Debug)]
pub struct BreakpadConfig {
    /// The name of the field in the POST data carrying the primary minidump.
    pub dump_field: String,
    /// The crash type prefix returned to clients (`CrashID=<prefix><id>`).
    pub dump_id_prefix: String,
    /// Name of the compiled-in throttle rule set.
    pub throttler_rules: String,
    /// Products the throttler lets through.
    pub throttler_products: ProductsConfig,
    /// Upper bound on the (decompressed) crash payload in bytes.
    pub max_crash_size: usize,
    /// Upper bound on a single annotation value in bytes.
    pub max_annotation_size: usize,
}

impl BreakpadConfig {
    fn from_source(source: &impl ConfigSource) -> Result<Self, ConfigError> {
        Ok(Self {
            dump_field: source
                .get("BREAKPAD_DUMP_FIELD")
                .unwrap_or_else(|| "upload_file_minidump".to_owned()),
            dump_id_prefix: source
                .get("BREAKPAD_DUMP_ID_PREFIX")
                .unwrap_or_else(|| "bp-".to_owned()),
            throttler_rules: source
                .get("BREAKPAD_THROTTLER_RULES")
                .unwrap_or_else(|| "mozilla".to_owned()),
            throttler_products: parse_or(
                source,
                "BREAKPAD_THROTTLER_PRODUCTS",
                ProductsConfig::Mozilla,
            )?,
            max_crash_size: parse_or(source, "BREAKPAD_MAX_CRASH_SIZE", DEFAULT_MAX_CRASH_SIZE)?,
            max_annotation_size: parse_or(
                source,
                "BREAKPAD_MAX_ANNOTATION_SIZE",
                DEFAULT_MAX_ANNOTATION_SIZE,
            )?,
        })
    }
}

/// Connection settings for the crash storage backend.
#[derive(Clone, Debug)]
pub struct CrashStorageConfig {
    /// Which backend to construct.
    pub class: StorageKind,
    /// Bucket to save to. Required for `s3` and `gcs`.
    pub bucket_name: Option<String>,
    /// Endpoint override; unset means the service's public endpoint.
    pub endpoint_url: Option<String>,
    /// Region for request signing.
    pub region: String,
    /// Static access key; unset disables request signing.
    pub access_key: Option<String>,
    /// Static secret key.
    pub secret_access_key: Option<String>,
    /// Static bearer token for GCS-style authorization.
    pub auth_token: Option<String>,
    /// Per-call deadline for storage requests.
    pub timeout: Duration,
    /// Root directory for the `fs` backend.
    pub root: PathBuf,
}

impl CrashStorageConfig {
    fn from_source(source: &impl ConfigSource) -> Result<Self, ConfigError> {
        Ok(Self {
            class: parse_or(
                source,
                "CRASHMOVER_CRASHSTORAGE_CLASS",
                StorageKind::default(),
            )?,
            bucket_name: source.get("CRASHMOVER_CRASHSTORAGE_BUCKET_NAME"),
            endpoint_url: source.get("CRASHMOVER_CRASHSTORAGE_ENDPOINT_URL"),
            region: source
                .get("CRASHMOVER_CRASHSTORAGE_REGION")
                .unwrap_or_else(|| "us-west-2".to_owned()),
            access_key: source.get("CRASHMOVER_CRASHSTORAGE_ACCESS_KEY"),
            secret_access_key: source.get("CRASHMOVER_CRASHSTORAGE_SECRET_ACCESS_KEY"),
            auth_token: source.get("CRASHMOVER_CRASHSTORAGE_AUTH_TOKEN"),
            timeout: Duration::from_secs(parse_or(source, "CRASHMOVER_CRASHSTORAGE_TIMEOUT", 10)?),
            root: source
                .get("CRASHMOVER_CRASHSTORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp/crashes")),
        })
    }

    /// Returns the configured bucket or an error naming the missing variable.
    pub fn require_bucket(&self) -> Result<&str, ConfigError> {
        self.bucket_name.as_deref().ok_or(ConfigError::MissingValue {
            field: "CRASHMOVER_CRASHSTORAGE_BUCKET_NAME",
        })
    }
}

/// Connection settings for the crash publish backend.
#[derive(Clone, Debug)]
pub struct CrashPublishConfig {
    /// Which backend to construct.
    pub class: PublishKind,
    /// SQS queue name. Required for `sqs`.
    pub queue_name: Option<String>,
    /// Google Cloud project id. Required for `pubsub`.
    pub project_id: Option<String>,
    /// Pub/Sub topic name. Required for `pubsub`.
    pub topic_name: Option<String>,
    /// Endpoint override; unset means the service's public endpoint.
    pub endpoint_url: Option<String>,
    /// Region for request signing.
    pub region: String,
    /// Static access key; unset disables request signing.
    pub access_key: Option<String>,
    /// Static secret key.
    pub secret_access_key: Option<String>,
    /// Static bearer token for Pub/Sub-style authorization.
    pub auth_token: Option<String>,
    /// Per-call deadline for publish requests.
    pub timeout: Duration,
}

impl CrashPublishConfig {
    fn from_source(source: &impl ConfigSource) -> Result<Self, ConfigError> {
        Ok(Self {
            class: parse_or(
                source,
                "CRASHMOVER_CRASHPUBLISH_CLASS",
                PublishKind::default(),
            )?,
            queue_name: source.get("CRASHMOVER_CRASHPUBLISH_QUEUE_NAME"),
            project_id: source.get("CRASHMOVER_CRASHPUBLISH_PROJECT_ID"),
            topic_name: source.get("CRASHMOVER_CRASHPUBLISH_TOPIC_NAME"),
            endpoint_url: source.get("CRASHMOVER_CRASHPUBLISH_ENDPOINT_URL"),
            region: source
                .get("CRASHMOVER_CRASHPUBLISH_REGION")
                .unwrap_or_else(|| "us-west-2".to_owned()),
            access_key: source.get("CRASHMOVER_CRASHPUBLISH_ACCESS_KEY"),
            secret_access_key: source.get("CRASHMOVER_CRASHPUBLISH_SECRET_ACCESS_KEY"),
            auth_token: source.get("CRASHMOVER_CRASHPUBLISH_AUTH_TOKEN"),
            timeout: Duration::from_secs(parse_or(source, "CRASHMOVER_CRASHPUBLISH_TIMEOUT", 5)?),
        })
    }

    /// Returns a required variable for the selected backend.
    pub fn require(
        value: &Option<String>,
        field: &'static str,
    ) -> Result<String, ConfigError> {
        value.clone().ok_or(ConfigError::MissingValue { field })
    }
}

/// Settings for the crash mover worker pool and hand-off queue.
#[derive(Clone, Debug)]
pub struct CrashMoverConfig {
    /// Number of concurrent crash mover workers.
    pub concurrent_crashmovers: usize,
    /// Capacity of the hand-off queue; defaults to four slots per worker.
    pub max_queue_size: Option<usize>,
    /// How long the submit handler waits for a queue slot. Zero waits forever.
    pub enqueue_timeout: Duration,
    /// Retries after the first failed save or publish attempt.
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff.
    pub retry_base: Duration,
    /// How long a graceful shutdown waits for the queue to drain.
    pub shutdown_timeout: Duration,
    /// Storage backend settings.
    pub crashstorage: CrashStorageConfig,
    /// Publish backend settings.
    pub crashpublish: CrashPublishConfig,
}

impl CrashMoverConfig {
    fn from_source(source: &impl ConfigSource) -> Result<Self, ConfigError> {
        let concurrent_crashmovers = parse_or(
            source,
            "CRASHMOVER_CONCURRENT_CRASHMOVERS",
            DEFAULT_CONCURRENT_CRASHMOVERS,
        )?;

        if concurrent_crashmovers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "CRASHMOVER_CONCURRENT_CRASHMOVERS",
                value: "0".to_owned(),
                message: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            concurrent_crashmovers,
            max_queue_size: parse_value(source, "CRASHMOVER_MAX_QUEUE_SIZE")?,
            enqueue_timeout: Duration::from_millis(parse_or(
                source,
                "CRASHMOVER_ENQUEUE_TIMEOUT_MS",
                0,
            )?),
            max_attempts: parse_or(source, "CRASHMOVER_MAX_ATTEMPTS", 5)?,
            retry_base: Duration::from_millis(parse_or(source, "CRASHMOVER_RETRY_BASE_MS", 100)?),
            shutdown_timeout: Duration::from_secs(parse_or(
                source,
                "CRASHMOVER_SHUTDOWN_TIMEOUT",
                30,
            )?),
            crashstorage: CrashStorageConfig::from_source(source)?,
            crashpublish: CrashPublishConfig::from_source(source)?,
        })
    }

    /// Effective hand-off queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.max_queue_size
            .unwrap_or(self.concurrent_crashmovers * 4)
            .max(1)
    }
}

/// Statsd reporting settings.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Hostname of the statsd server.
    pub statsd_host: String,
    /// Port of the statsd server.
    pub statsd_port: u16,
    /// Prefix prepended to all metric names.
    pub statsd_namespace: String,
}

impl MetricsConfig {
    fn from_source(source: &impl ConfigSource) -> Result<Self, ConfigError> {
        Ok(Self {
            statsd_host: source
                .get("STATSD_HOST")
                .unwrap_or_else(|| "localhost".to_owned()),
            statsd_port: parse_or(source, "STATSD_PORT", 8125)?,
            statsd_namespace: source.get("STATSD_NAMESPACE").unwrap_or_default(),
        })
    }
}

/// The complete, immutable collector configuration.
#[derive(Clone, Debug)]
pub struct Config {
    host: IpAddr,
    port: u16,
    logging: LogConfig,
    sentry: SentryConfig,
    metrics: MetricsConfig,
    breakpad: BreakpadConfig,
    crashmover: CrashMoverConfig,
    host_id: String,
    local_dev_env: bool,
    basedir: Option<PathBuf>,
}

impl Config {
    /// Binds configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&OsEnv)
    }

    /// Binds configuration from an arbitrary source.
    pub fn from_source(source: &impl ConfigSource) -> Result<Self, ConfigError> {
        let host_id = match source.get("HOST_ID") {
            Some(host_id) => host_id,
            None => hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
                .unwrap_or_default(),
        };

        let logging = LogConfig {
            level: parse_or(source, "LOGGING_LEVEL", intake_log::LogConfig::default().level)?,
            format: parse_or(source, "LOGGING_FORMAT", intake_log::LogFormat::Auto)?,
            enable_backtraces: parse_bool(source, "LOGGING_ENABLE_BACKTRACES", false)?,
        };

        let sentry = SentryConfig {
            dsn: parse_value(source, "SECRET_SENTRY_DSN")?,
            environment: None,
            server_name: Some(host_id.clone()),
        };

        Ok(Self {
            host: parse_or(source, "HOST", IpAddr::from([0, 0, 0, 0]))?,
            port: parse_or(source, "PORT", 8000)?,
            logging,
            sentry,
            metrics: MetricsConfig::from_source(source)?,
            breakpad: BreakpadConfig::from_source(source)?,
            crashmover: CrashMoverConfig::from_source(source)?,
            host_id,
            local_dev_env: parse_bool(source, "LOCAL_DEV_ENV", false)?,
            basedir: source.get("BASEDIR").map(PathBuf::from),
        })
    }

    /// The socket address the HTTP server binds.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Logging settings.
    pub fn logging(&self) -> &LogConfig {
        &self.logging
    }

    /// Error reporting settings.
    pub fn sentry(&self) -> &SentryConfig {
        &self.sentry
    }

    /// Statsd settings.
    pub fn metrics(&self) -> &MetricsConfig {
        &self.metrics
    }

    /// Breakpad endpoint policy.
    pub fn breakpad(&self) -> &BreakpadConfig {
        &self.breakpad
    }

    /// Crash mover settings.
    pub fn crashmover(&self) -> &CrashMoverConfig {
        &self.crashmover
    }

    /// Identifier for the host running this collector.
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Whether this is a local development environment.
    pub fn local_dev_env(&self) -> bool {
        self.local_dev_env
    }

    /// Directory holding the Dockerflow `version.json`.
    ///
    /// Falls back to the directory of the running binary.
    pub fn basedir(&self) -> Option<&PathBuf> {
        self.basedir.as_ref()
    }
}
