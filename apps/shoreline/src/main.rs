mod cli;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Command, ReplayArgs};
use shoreline_core::config::Config;
use shoreline_core::protocol::InputEvent;
use shoreline_core::telemetry::{self, Metric, logging};
use shoreline_core::transcript;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).context("failed to initialise logging")?;
    let config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Command::Replay(args) => replay(args, config).await,
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn replay(args: ReplayArgs, mut config: Config) -> Result<()> {
    let raw = tokio::fs::read_to_string(&args.transcript)
        .await
        .with_context(|| format!("failed to read {}", args.transcript.display()))?;
    let steps = transcript::parse(&raw)?;
    if args.no_type_ahead {
        config.type_ahead.enabled = false;
    }

    let outcome = transcript::replay(steps, config).await?;
    let screen = outcome.snapshot.active();
    println!("{}", screen.text);
    println!(
        "-- cursor {}:{}{}",
        screen.cursor_line,
        screen.cursor_column,
        match outcome.snapshot.exit_code {
            Some(code) => format!(" (exited {code})"),
            None if outcome.snapshot.terminated => " (terminated)".to_string(),
            None => String::new(),
        }
    );
    if args.show_input {
        for event in &outcome.input {
            match event {
                InputEvent::WriteBytes { data } => {
                    println!("-> {:?}", String::from_utf8_lossy(data))
                }
                other => println!("-> {}", serde_json::to_string(other)?),
            }
        }
    }
    if telemetry::enabled() {
        for metric in Metric::ALL {
            if let Some(stat) = telemetry::stat(metric) {
                eprintln!(
                    "[perf] {}: count={} mean={} max={}",
                    metric.label(),
                    stat.count,
                    stat.mean(),
                    stat.max
                );
            }
        }
    }
    Ok(())
}
