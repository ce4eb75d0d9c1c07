use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use shoreline_core::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "shoreline",
    about = "Terminal front-end reconciliation core with type-ahead",
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("BUILD_TIMESTAMP"))
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a JSON-lines transcript through a loopback session and print
    /// the final screen.
    Replay(ReplayArgs),
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    #[arg(value_name = "TRANSCRIPT")]
    pub transcript: PathBuf,

    #[arg(long, help = "Also print the input events the backend received")]
    pub show_input: bool,

    #[arg(long, help = "Disable type-ahead for this replay")]
    pub no_type_ahead: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "SHORELINE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "SHORELINE_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
