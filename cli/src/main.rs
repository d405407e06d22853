//! Shipwright CLI.
//!
//! ```text
//! shipwright replay  <transcript.json> [--root <dir>] [--dry-run]
//! shipwright context <transcript.json> [--root <dir>]
//! ```
//!
//! `replay` feeds every assistant part of a saved transcript through the
//! parser and the workbench, against the project directory, and prints the
//! resulting action table. `context` prints what the context builder would
//! send to the model for the next turn.

mod context;
mod replay;
mod transcript;

use std::env;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context as _, Result, bail};
use shipwright_config::ShipwrightConfig;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const USAGE: &str = "\
usage: shipwright <command> <transcript.json> [options]

commands:
  replay    run a transcript's actions against a project directory
  context   print the context the next model request would carry

options:
  --root <dir>   project directory (default: current directory)
  --dry-run      replay against an in-memory sandbox; nothing touches disk
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Replay,
    Context,
}

#[derive(Debug, PartialEq, Eq)]
struct Args {
    command: Command,
    transcript: PathBuf,
    root: PathBuf,
    dry_run: bool,
}

impl Args {
    fn parse(mut argv: impl Iterator<Item = String>) -> Result<Self> {
        let command = match argv.next().as_deref() {
            Some("replay") => Command::Replay,
            Some("context") => Command::Context,
            Some(other) => bail!("unknown command: {other}"),
            None => bail!("missing command"),
        };

        let mut transcript = None;
        let mut root = None;
        let mut dry_run = false;
        while let Some(arg) = argv.next() {
            match arg.as_str() {
                "--root" => {
                    let dir = argv.next().context("--root needs a directory")?;
                    root = Some(PathBuf::from(dir));
                }
                "--dry-run" => dry_run = true,
                flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
                path if transcript.is_none() => transcript = Some(PathBuf::from(path)),
                extra => bail!("unexpected argument: {extra}"),
            }
        }

        Ok(Self {
            command,
            transcript: transcript.context("missing transcript path")?,
            root: root.unwrap_or_else(|| PathBuf::from(".")),
            dry_run,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Tables go to stdout; keep logs out of it.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // ~/.shipwright/logs/shipwright.log, next to the config file.
    if let Some(config_path) = ShipwrightConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("shipwright.log"));
    }

    candidates.push(PathBuf::from(".shipwright").join("logs").join("shipwright.log"));

    candidates
}

async fn run(args: Args) -> Result<()> {
    let config = match ShipwrightConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("warning: {e}; using defaults");
            ShipwrightConfig::default()
        }
    };
    let messages = transcript::load(&args.transcript)?;

    match args.command {
        Command::Replay => {
            let report = replay::run(&config, &args.root, messages, args.dry_run).await?;
            print!("{report}");
        }
        Command::Context => {
            let report = context::run(&config, &args.root, &messages)?;
            print!("{report}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::parse(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    init_tracing();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
