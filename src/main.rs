//! kumo command line
//!
//! ```bash
//! # Fetch one or more catalogs with config.json from the working directory
//! kumo show.nzb other.nzb
//!
//! # Explicit config, debug logs into a file so the status line stays readable
//! kumo --config ~/.kumo.json --debug --debug-file kumo.log show.nzb
//! ```

use clap::Parser;
use kumo::{Config, Error, Kumo, run_with_shutdown};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kumo")]
#[command(version)]
#[command(about = "Fetch, decode and join Usenet binaries from NZB files", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Emit debug-level logs
    #[arg(long)]
    debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    debug_file: Option<PathBuf>,

    /// Hide the status line and final message
    #[arg(short, long)]
    quiet: bool,

    /// NZB files to fetch, in order
    #[arg(required = true, value_name = "NZB")]
    nzbs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kumo: {}", e);
            return ExitCode::FAILURE;
        }
    };
    config.debug |= args.debug;
    config.quiet |= args.quiet;
    if args.debug_file.is_some() {
        config.debug_file = args.debug_file.clone();
    }

    if let Err(e) = init_logging(config.debug, config.debug_file.as_deref()) {
        eprintln!("kumo: cannot open log file: {}", e);
        return ExitCode::FAILURE;
    }

    let quiet = config.quiet;
    let kumo = match Kumo::new(config).await {
        Ok(kumo) => kumo,
        Err(e) => {
            tracing::error!(error = %e, "Setup failed");
            eprintln!("kumo: {}", e);
            return ExitCode::FAILURE;
        }
    };
    tokio::spawn(run_with_shutdown(kumo.clone()));

    let mut status = None;
    for path in &args.nzbs {
        if !path.is_file() {
            tracing::warn!(path = %path.display(), "NZB not found, skipping");
            continue;
        }
        match kumo.get(path).await {
            Ok(summary) => {
                tracing::info!(
                    job = %summary.job,
                    passes = ?summary.passes,
                    broken = summary.broken,
                    total = summary.total,
                    "Job finished"
                );
            }
            Err(Error::Cancelled) => {
                status = Some(ExitCode::from(130));
                break;
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Job failed");
                eprintln!("kumo: {}: {}", path.display(), e);
                status = Some(ExitCode::FAILURE);
            }
        }
    }

    kumo.close().await;
    match status {
        Some(code) => code,
        None => {
            if !quiet {
                println!("⚑ All Done!");
            }
            ExitCode::SUCCESS
        }
    }
}

/// `warn` by default; `--debug` or a debug file raises it to `debug`
fn log_level(debug: bool, log_file: Option<&Path>) -> &'static str {
    if debug || log_file.is_some() {
        "debug"
    } else {
        "warn"
    }
}

/// Install the subscriber; `RUST_LOG` overrides the level from [`log_level`]
fn init_logging(debug: bool, log_file: Option<&Path>) -> std::io::Result<()> {
    let level = log_level(debug, log_file);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
    Ok(())
}
