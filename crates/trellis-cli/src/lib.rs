pub mod cli;
pub mod commands;
pub mod datastore;
pub mod render;
pub mod scenario;

use std::ffi::OsString;
use std::io::IsTerminal;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use trellis_core::BoardConfig;

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let cli = cli::GlobalCli::parse_from(raw_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        "starting trellis CLI"
    );

    let config = BoardConfig::load(cli.config.as_deref())?;
    debug!(?config, "board config");

    let data_dir = cli::resolve_data_dir(cli.data.as_deref())
        .context("failed to resolve data directory")?;

    let store = datastore::JsonlStore::open(&data_dir).with_context(|| {
        format!("failed to open item store at {}", data_dir.display())
    })?;

    let renderer = render::Renderer::new(!cli.no_color && std::io::stdout().is_terminal());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(commands::dispatch(store, config, &renderer, cli.command))
}
