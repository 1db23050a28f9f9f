use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use trellis_shared::{ItemId, Status};

pub const DATA_ENV_VAR: &str = "TRELLIS_DATA";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "trellis",
    version,
    about = "Trellis: drive a paginated status board against a local item store",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Board config file (TOML).
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the item store.
    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Replace the store with demo items.
    Seed {
        #[arg(long, default_value_t = 60)]
        count: u64,
    },
    /// Load the board and print it.
    Board {
        /// Pages to load per column.
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Drag an item from one column to another.
    Move {
        id: ItemId,
        from: Status,
        to: Status,
    },
    /// Change an item's status.
    Status { id: ItemId, status: Status },
    /// Change an item's progress (0-100).
    Progress {
        id: ItemId,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        value: u8,
    },
    /// Print one page of the flat item list.
    Grid {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        size: Option<u32>,
    },
    /// Run a JSON scenario against the store.
    Replay { scenario: PathBuf },
}

/// Level used when `RUST_LOG` is unset. Each `-v` raises it one step from
/// `warn`, each `-q` lowers it.
fn verbosity(verbose: u8, quiet: u8) -> LevelFilter {
    match i16::from(verbose) - i16::from(quiet) {
        i16::MIN..=-2 => LevelFilter::OFF,
        -1 => LevelFilter::ERROR,
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Logs go to stderr so board output on stdout stays clean.
pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let level = verbosity(verbose, quiet);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()
        .context("invalid RUST_LOG")?;

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(level >= LevelFilter::DEBUG)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
    if let Err(err) = installed {
        debug!(error = %err, "keeping the existing subscriber");
    }
    Ok(())
}

/// `--data`, then `TRELLIS_DATA`, then the user data directory.
pub fn resolve_data_dir(cli_data: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = cli_data {
        return Ok(path.to_path_buf());
    }

    if let Ok(env_dir) = std::env::var(DATA_ENV_VAR)
        && !env_dir.trim().is_empty()
    {
        return Ok(PathBuf::from(env_dir.trim()));
    }

    dirs::data_dir()
        .map(|dir| dir.join("trellis"))
        .ok_or_else(|| anyhow!("no data directory; pass --data or set {DATA_ENV_VAR}"))
}
