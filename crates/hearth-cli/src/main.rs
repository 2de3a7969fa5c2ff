//! hearth - 解決済みコマンドをエンジンに流す非対話ドライバ
//!
//! 結果は stdout に JSON で、ログは stderr に出します。

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use hearth_core::app::{CommandDispatcher, EngineBuilder};
use hearth_core::config::HomeConfig;
use hearth_core::domain::{
    Arguments, DeviceId, DeviceKind, ErrorReport, FeedbackSignal, RecordId, ResolvedCommand,
    Target,
};

#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Preference-aware device command engine", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `data_dir` from the config
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch resolved commands, one JSON object per line (`-` for stdin)
    Dispatch { input: String },
    /// Attach feedback to a dispatched record
    Feedback {
        record_id: String,
        /// positive | negative | none
        signal: String,
        /// Corrected parameter value, e.g. `level=30`
        #[arg(long = "correct", value_name = "KEY=VALUE")]
        corrections: Vec<String>,
    },
    /// Show device state: a device id, a category, or everything
    State { target: Option<String> },
    /// Re-learn the preference table from the interaction log
    Rebuild,
    /// Top learned preferences per operation and parameter
    Summary {
        #[arg(long, default_value = "5")]
        top: usize,
    },
    /// Record counts and preference totals
    Stats,
    /// Most recent interactions, newest first
    Recent {
        #[arg(short, default_value = "10")]
        n: usize,
    },
    /// Restore every device to its initial state
    Reset {
        /// Also clear the interaction log and learned preferences
        #[arg(long)]
        history: bool,
    },
}

/// One input line of `dispatch`. The timestamp defaults to now.
#[derive(Debug, Deserialize)]
struct CommandLine {
    operation: String,
    #[serde(default)]
    arguments: Arguments,
    #[serde(default)]
    raw_text: String,
    timestamp: Option<DateTime<Utc>>,
}

impl From<CommandLine> for ResolvedCommand {
    fn from(line: CommandLine) -> Self {
        ResolvedCommand::new(
            line.operation,
            line.arguments,
            line.raw_text,
            line.timestamp.unwrap_or_else(Utc::now),
        )
    }
}

#[derive(Serialize)]
struct Failure {
    line: usize,
    error: ErrorReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HomeConfig::load(path)?,
        None => HomeConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }

    let engine = EngineBuilder::new(config).build().await?;
    for err in engine.recovered() {
        warn!(error = %err, "recovered at startup");
    }

    let outcome = run(&engine, cli.command).await;
    engine.shutdown().await;
    outcome
}

async fn run(engine: &CommandDispatcher, command: Commands) -> Result<()> {
    match command {
        Commands::Dispatch { input } => dispatch(engine, &input).await,
        Commands::Feedback {
            record_id,
            signal,
            corrections,
        } => {
            let record_id = RecordId::from_str(&record_id)?;
            let signal = FeedbackSignal::from_str(&signal).map_err(anyhow::Error::msg)?;
            let correction = if corrections.is_empty() {
                None
            } else {
                Some(parse_corrections(&corrections)?)
            };
            let receipt = engine
                .attach_feedback(&record_id, signal, correction)
                .await?;
            print_json(&receipt)
        }
        Commands::State { target } => {
            let target = target.as_deref().map(parse_target);
            let devices = engine.get_state(target.as_ref()).await?;
            print_json(&devices)
        }
        Commands::Rebuild => {
            let entries = engine.rebuild_preferences().await?;
            info!(entries, "preferences rebuilt");
            print_json(&engine.stats().await)
        }
        Commands::Summary { top } => print_json(&engine.summary(top).await),
        Commands::Stats => print_json(&engine.stats().await),
        Commands::Recent { n } => print_json(&engine.recent(n).await),
        Commands::Reset { history } => {
            let changed = engine.reset(history).await?;
            info!(changed, history, "reset");
            print_json(&engine.stats().await)
        }
    }
}

/// Dispatch each line; a failing line is reported and the rest still run.
async fn dispatch(engine: &CommandDispatcher, input: &str) -> Result<()> {
    let reader: Box<dyn Read> = if input == "-" {
        Box::new(std::io::stdin())
    } else {
        Box::new(
            std::fs::File::open(input).with_context(|| format!("failed to open {input}"))?,
        )
    };

    let mut failures = 0usize;
    for (idx, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let command: CommandLine = serde_json::from_str(&line)
            .with_context(|| format!("line {}: not a resolved command", idx + 1))?;
        match engine.dispatch(command.into()).await {
            Ok(result) => print_json(&result)?,
            Err(err) => {
                failures += 1;
                print_json(&Failure {
                    line: idx + 1,
                    error: ErrorReport::from(&err),
                })?;
            }
        }
    }
    if failures > 0 {
        bail!("{failures} command(s) could not be persisted");
    }
    Ok(())
}

/// `key=value` pairs; values are JSON when they parse, strings otherwise.
fn parse_corrections(pairs: &[String]) -> Result<Arguments> {
    let mut args = Arguments::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("correction `{pair}` is not KEY=VALUE");
        };
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        args.insert(key.trim().to_string(), value);
    }
    Ok(args)
}

/// A category name ("lights") or a device id.
fn parse_target(s: &str) -> Target {
    match DeviceKind::from_str(s) {
        Ok(kind) => Target::Category(kind),
        Err(_) => Target::Device(DeviceId::new(s)),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
