use clap::{Parser, Subcommand};
use intake_config::{Config, ConfigError};
use intake_server::{ServerError, ServiceError};

use crate::setup;

/// Exit code for a fatal configuration error.
const EXIT_CONFIG: i32 = 4;

/// Exit code for a failed startup verification.
const EXIT_VERIFICATION: i32 = 3;

/// Exit code for every other abnormal termination.
const EXIT_ABNORMAL: i32 = 1;

/// The Breakpad crash report collector.
#[derive(Debug, Parser)]
#[command(name = "intake", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the collector server (the default).
    Run,
    /// Print the resolved configuration and exit.
    ShowConfig,
}

/// Top-level CLI failure, mapped onto process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

impl CliError {
    /// The exit code the process terminates with.
    ///
    /// Configuration problems surface in two places: binding the environment
    /// (`Config::from_env`) and constructing the adapters from it — a
    /// missing bucket, queue or topic name, or an unknown rule set, is only
    /// detected when the selected backend is built. Both are fatal
    /// configuration errors and must exit with the same code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => EXIT_CONFIG,
            Self::Server(ServerError::Service(_)) => EXIT_CONFIG,
            Self::Server(ServerError::VerificationFailed { .. }) => EXIT_VERIFICATION,
            Self::Server(_) => EXIT_ABNORMAL,
        }
    }
}

/// Runs the command line application.
pub fn execute() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = Config::from_env()?;
    intake_log::init(config.logging(), config.sentry());

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            setup::dump_spawn_infos(&config);
            setup::init_metrics(&config);
            intake_server::run(config)?;
            Ok(())
        }
        Command::ShowConfig => {
            setup::dump_config(&config);
            Ok(())
        }
    }
}
