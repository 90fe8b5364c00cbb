use std::borrow::Cow;
use std::env;
use std::io::IsTerminal;

use sentry::types::Dsn;
use tracing::{level_filters::LevelFilter, Level};
use tracing_subscriber::{prelude::*, EnvFilter, Layer};

/// The release name reported to the error sink.
const RELEASE: &str = concat!("intake@", env!("CARGO_PKG_VERSION"));

/// How log lines are rendered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogFormat {
    /// Pick [`LogFormat::Pretty`] when stderr is a terminal, otherwise
    /// [`LogFormat::Simplified`].
    Auto,
    /// Human-oriented output for a terminal, without timestamps (the
    /// terminal session provides the time context).
    Pretty,
    /// Plain text without colors, one event per line.
    Simplified,
    /// JSON lines for log aggregation.
    Json,
}

impl LogFormat {
    /// Resolves [`LogFormat::Auto`] against the actual stderr.
    fn resolve(self) -> Self {
        match self {
            Self::Auto if std::io::stderr().is_terminal() => Self::Pretty,
            Self::Auto => Self::Simplified,
            other => other,
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "pretty" => Ok(Self::Pretty),
            "simplified" => Ok(Self::Simplified),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other:?}")),
        }
    }
}

/// Log settings, bound from the environment by the config crate.
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Verbosity of the collector's own crates.
    pub level: Level,
    /// Output rendering.
    pub format: LogFormat,
    /// Force `RUST_BACKTRACE=full` for this process.
    pub enable_backtraces: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Auto,
            enable_backtraces: false,
        }
    }
}

/// Error-reporting settings.
#[derive(Clone, Debug, Default)]
pub struct SentryConfig {
    /// DSN of the project to report to; unset disables reporting.
    pub dsn: Option<Dsn>,
    /// Deployment environment attached to every event.
    pub environment: Option<Cow<'static, str>>,
    /// Host identifier attached to every event, the collector's `HOST_ID`.
    pub server_name: Option<String>,
}

/// The default event filter.
///
/// The configured level applies to the collector's own crates only; the
/// HTTP and client libraries underneath stay at `warn` so a debug-level
/// collector does not drown in hyper traffic. `RUST_LOG` overrides all of
/// this when set.
fn default_filter(level: Level) -> EnvFilter {
    let level = level.to_string().to_ascii_lowercase();
    EnvFilter::new(format!(
        "warn,intake={level},intake_config={level},intake_log={level},\
         intake_server={level},intake_statsd={level},intake_system={level}"
    ))
}

/// Initializes logging and error reporting.
///
/// # Example
///
/// ```
/// let log_config = intake_log::LogConfig::default();
/// let sentry_config = intake_log::SentryConfig::default();
///
/// intake_log::init(&log_config, &sentry_config);
/// ```
pub fn init(config: &LogConfig, sentry: &SentryConfig) {
    if config.enable_backtraces {
        env::set_var("RUST_BACKTRACE", "full");
    }

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let format = match config.format.resolve() {
        LogFormat::Auto | LogFormat::Pretty => stderr.without_time().boxed(),
        LogFormat::Simplified => stderr.with_ansi(false).boxed(),
        LogFormat::Json => stderr
            .json()
            .flatten_event(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config.level));

    tracing_subscriber::registry()
        .with(format.with_filter(LevelFilter::from_level(config.level)))
        .with(sentry::integrations::tracing::layer())
        .with(filter)
        .init();

    init_error_reporting(config, sentry);
}

fn init_error_reporting(config: &LogConfig, sentry_config: &SentryConfig) {
    let Some(dsn) = sentry_config.dsn.clone() else {
        return;
    };

    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn),
        release: Some(RELEASE.into()),
        environment: sentry_config.environment.clone(),
        server_name: sentry_config.server_name.clone().map(Cow::Owned),
        attach_stacktrace: config.enable_backtraces,
        in_app_include: vec!["intake"],
        ..Default::default()
    });

    // The client must outlive every worker; `main` flushes explicitly via
    // `intake_log::flush` instead of relying on this guard's drop.
    std::mem::forget(guard);
}
