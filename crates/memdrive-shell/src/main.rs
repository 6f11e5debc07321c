//! memdrive-shell binary
//!
//! Drives an in-memory drive from a script of commands.
//!
//! ## Usage
//!
//! ```bash
//! # Read commands from stdin
//! memdrive-shell
//!
//! # Run a script against a case-insensitive, cached drive
//! memdrive-shell --case-insensitive --cache setup.txt
//!
//! # Load drive settings from RON
//! memdrive-shell --config drive.ron setup.txt
//! ```

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use memdrive_kernel::{CacheConfig, DriveConfig, MemoryDrive};
use memdrive_shell::Shell;
use tracing_subscriber::{EnvFilter, fmt};

/// Scripted shell over an in-memory drive.
#[derive(Parser, Debug)]
#[command(name = "memdrive-shell")]
#[command(about = "Run filesystem commands against an in-memory drive")]
struct Args {
    /// Drive configuration file (RON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Compare sibling names case-insensitively
    #[arg(long)]
    case_insensitive: bool,

    /// Route file I/O through the block cache
    #[arg(long)]
    cache: bool,

    /// Script to run; stdin when omitted
    script: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DriveConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DriveConfig::default(),
    };
    if args.case_insensitive {
        config.case_sensitive = false;
    }
    if args.cache && config.cache.is_none() {
        config.cache = Some(CacheConfig::default());
    }
    tracing::info!(
        case_sensitive = config.case_sensitive,
        cached = config.cache.is_some(),
        "starting drive"
    );

    let shell = Shell::new(MemoryDrive::from_config(config));
    let mut out = io::stdout().lock();
    let mut err = io::stderr().lock();
    let failures = match &args.script {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            shell.run(BufReader::new(file), &mut out, &mut err)?
        }
        None => shell.run(io::stdin().lock(), &mut out, &mut err)?,
    };

    if failures > 0 {
        tracing::warn!(failures, "script finished with errors");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
