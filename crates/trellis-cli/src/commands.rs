use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{info, warn};
use trellis_core::{BoardConfig, BoardEvent, MutationOutcome, SyncEngine, SyncError};

use crate::cli::Command;
use crate::datastore::JsonlStore;
use crate::render::Renderer;
use crate::scenario::Scenario;

#[tracing::instrument(skip(store, config, renderer))]
pub async fn dispatch(
    store: JsonlStore,
    config: BoardConfig,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let engine = SyncEngine::new(store, config);
    let mut events = engine.events();
    let mut out = io::stdout().lock();

    match command {
        Command::Seed { count } => {
            let store = engine.store();
            let items = store.seed(count)?;
            writeln!(out, "seeded {} items into {}", items.len(), store.data_dir.display())?;
        }
        Command::Board { pages } => {
            engine.mount().await;
            for column in engine.config().columns.clone() {
                for _ in 1..pages {
                    if let Err(err) = engine.load_more(column).await {
                        warn!(%column, error = %err, "stopped loading column");
                        break;
                    }
                }
            }
            print_notices(&mut out, renderer, &mut events)?;
            renderer.print_board(&mut out, &engine.snapshot())?;
        }
        Command::Move { id, from, to } => {
            engine.mount().await;
            let result = engine.move_item(id, from, to).await;
            finish_mutation(&mut out, renderer, &engine, &mut events, result)?;
        }
        Command::Status { id, status } => {
            engine.mount().await;
            let result = engine.set_status(id, status).await;
            finish_mutation(&mut out, renderer, &engine, &mut events, result)?;
        }
        Command::Progress { id, value } => {
            engine.mount().await;
            let result = engine.set_progress(id, value).await;
            finish_mutation(&mut out, renderer, &engine, &mut events, result)?;
        }
        Command::Grid { page, size } => {
            let size = size.unwrap_or(engine.config().flat_page_size);
            let result = engine.change_flat_page(page, size).await;
            print_notices(&mut out, renderer, &mut events)?;
            result.context("failed to load grid page")?;
            renderer.print_grid(&mut out, &engine.snapshot().flat)?;
        }
        Command::Replay { scenario } => {
            replay(&mut out, renderer, &engine, &mut events, &scenario).await?;
        }
    }

    info!("done");
    Ok(())
}

async fn replay<W: Write>(
    mut out: W,
    renderer: &Renderer,
    engine: &SyncEngine<JsonlStore>,
    events: &mut broadcast::Receiver<BoardEvent>,
    path: &Path,
) -> anyhow::Result<()> {
    let scenario = Scenario::load(path)?;
    let reports = scenario.run(engine).await?;

    writeln!(out, "== steps ==")?;
    for report in &reports {
        writeln!(out, "{report}")?;
    }

    writeln!(out, "\n== events ==")?;
    while let Some(event) = next_event(events) {
        renderer.print_event(&mut out, &event)?;
    }

    writeln!(out, "\n== board ==")?;
    let snapshot = engine.snapshot();
    renderer.print_board(&mut out, &snapshot)?;
    writeln!(out, "\n== grid ==")?;
    renderer.print_grid(&mut out, &snapshot.flat)?;
    Ok(())
}

fn finish_mutation<W: Write>(
    mut out: W,
    renderer: &Renderer,
    engine: &SyncEngine<JsonlStore>,
    events: &mut broadcast::Receiver<BoardEvent>,
    result: Result<MutationOutcome, SyncError>,
) -> anyhow::Result<()> {
    print_notices(&mut out, renderer, events)?;
    if matches!(result, Ok(MutationOutcome::Unchanged)) {
        writeln!(out, "nothing to change")?;
    }
    renderer.print_board(&mut out, &engine.snapshot())?;
    result.context("change was not saved")?;
    Ok(())
}

fn print_notices<W: Write>(
    mut out: W,
    renderer: &Renderer,
    events: &mut broadcast::Receiver<BoardEvent>,
) -> anyhow::Result<()> {
    while let Some(event) = next_event(events) {
        if let Some(notice) = event.notice() {
            writeln!(out, "{}", renderer.notice(&notice))?;
        }
    }
    Ok(())
}

fn next_event(events: &mut broadcast::Receiver<BoardEvent>) -> Option<BoardEvent> {
    loop {
        match events.try_recv() {
            Ok(event) => return Some(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "event log overflowed");
            }
            Err(_) => return None,
        }
    }
}
