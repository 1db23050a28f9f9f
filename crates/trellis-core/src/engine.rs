//! The board synchronization engine.
//!
//! All board state lives behind one lock that is only ever held for short,
//! synchronous stretches and never across an `.await`. Concurrency therefore
//! only exists between outstanding store requests: intents on different
//! columns or items run side by side, while the per-column loading guard and
//! the per-item pending table keep each column and each item strictly
//! sequential.

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use trellis_shared::{BoardFilter, Item, ItemCreate, ItemId, Status};

use crate::board::{BoardSnapshot, BoardState, FlatTicket};
use crate::config::BoardConfig;
use crate::error::SyncError;
use crate::events::{BoardEvent, LoadOutcome, LoadScope, MutationOutcome, RefreshSummary};
use crate::mutation::{Change, MutationKind, PendingMutation, PendingMutations};
use crate::store::RemoteProjectStore;
use crate::window::LoadTicket;

const EVENT_CAPACITY: usize = 256;

struct EngineState {
    board: BoardState,
    pending: PendingMutations,
    filter: BoardFilter,
    version: u64,
}

pub struct SyncEngine<S> {
    store: S,
    config: BoardConfig,
    state: Mutex<EngineState>,
    snapshots: watch::Sender<BoardSnapshot>,
    events: broadcast::Sender<BoardEvent>,
}

impl<S: RemoteProjectStore> SyncEngine<S> {
    pub fn new(store: S, config: BoardConfig) -> Self {
        let board = BoardState::initialize(&config.columns, config.flat_page_size);
        let (snapshots, _) = watch::channel(board.snapshot(0, Vec::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            store,
            config,
            state: Mutex::new(EngineState {
                board,
                pending: PendingMutations::default(),
                filter: BoardFilter::default(),
                version: 0,
            }),
            snapshots,
            events,
        }
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Receive a fresh snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<BoardSnapshot> {
        self.snapshots.subscribe()
    }

    /// Receive notification events. Slow receivers lose the oldest events.
    pub fn events(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn filter(&self) -> BoardFilter {
        self.state.lock().filter.clone()
    }

    pub fn pending_mutation(&self, id: ItemId) -> Option<PendingMutation> {
        self.state.lock().pending.get(id).cloned()
    }

    /// First population of the board after construction.
    pub async fn mount(&self) -> RefreshSummary {
        info!(columns = self.config.columns.len(), "mounting board");
        self.refresh_all().await
    }

    /// Fetch the next page of `status`. Does nothing while a page request
    /// for that column is outstanding or after its last page.
    #[tracing::instrument(skip(self), fields(column = %status))]
    pub async fn load_more(&self, status: Status) -> Result<LoadOutcome, SyncError> {
        let (ticket, filter) = {
            let mut state = self.state.lock();
            let window = state
                .board
                .window_mut(status)
                .ok_or(SyncError::UnknownColumn(status))?;
            let ticket = match window.mark_loading() {
                Ok(ticket) => ticket,
                Err(reason) => {
                    debug!(?reason, "load skipped");
                    return Ok(LoadOutcome::Skipped { reason });
                }
            };
            let filter = state.filter.clone();
            self.publish(&mut state);
            (ticket, filter)
        };

        self.fetch_column(ticket, &filter).await
    }

    /// Inline status edit.
    #[tracing::instrument(skip(self), fields(item = %id, next = %status))]
    pub async fn set_status(
        &self,
        id: ItemId,
        status: Status,
    ) -> Result<MutationOutcome, SyncError> {
        self.mutate(id, Change::Relocate { from: None, to: status })
            .await
    }

    /// Drag and drop between columns. Both ends must be board columns and
    /// the item must currently be shown in `from`.
    #[tracing::instrument(skip(self), fields(item = %id, from = %from, to = %to))]
    pub async fn move_item(
        &self,
        id: ItemId,
        from: Status,
        to: Status,
    ) -> Result<MutationOutcome, SyncError> {
        for column in [from, to] {
            if !self.config.columns.contains(&column) {
                return Err(SyncError::UnknownColumn(column));
            }
        }
        self.mutate(id, Change::Relocate { from: Some(from), to })
            .await
    }

    /// Inline progress edit, 0 to 100.
    #[tracing::instrument(skip(self), fields(item = %id))]
    pub async fn set_progress(
        &self,
        id: ItemId,
        progress: u8,
    ) -> Result<MutationOutcome, SyncError> {
        if progress > 100 {
            return Err(SyncError::InvalidProgress(progress));
        }
        self.mutate(id, Change::Progress(progress)).await
    }

    /// Throw away every window and reload page 1 of each column and of the
    /// grid. Outstanding page requests are not cancelled; their responses
    /// are discarded when they arrive. Outstanding mutations are not
    /// reverted into the fresh windows.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_all(&self) -> RefreshSummary {
        let (generation, tickets, flat_ticket, filter) = {
            let mut state = self.state.lock();
            let tickets = state.board.invalidate();
            let page_size = state.board.flat_page().page_size();
            let flat_ticket = state.board.flat_page_mut().begin(1, page_size);
            let generation = state.board.generation();
            info!(
                generation,
                columns = tickets.len(),
                in_flight_mutations = state.pending.len(),
                "refreshing board"
            );
            let filter = state.filter.clone();
            self.publish(&mut state);
            (generation, tickets, flat_ticket, filter)
        };

        let column_loads = tickets.into_iter().map(|ticket| {
            let filter = &filter;
            async move { (ticket.status, self.fetch_column(ticket, filter).await) }
        });
        let (columns, flat) = futures::join!(
            join_all(column_loads),
            self.fetch_flat(flat_ticket, &filter)
        );

        let summary = RefreshSummary {
            generation,
            columns,
            flat,
        };
        let failures = summary.failures().len();
        if failures > 0 {
            warn!(generation, failures, "refresh finished with failures");
        }
        self.emit(BoardEvent::BoardRefreshed {
            generation,
            failures,
        });
        summary
    }

    /// Load one page of the grid view. Never optimistic.
    #[tracing::instrument(skip(self))]
    pub async fn change_flat_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<LoadOutcome, SyncError> {
        if page == 0 || !self.config.is_page_size_allowed(page_size) {
            return Err(SyncError::InvalidPage { page, page_size });
        }

        let (ticket, filter) = {
            let mut state = self.state.lock();
            let ticket = state.board.flat_page_mut().begin(page, page_size);
            let filter = state.filter.clone();
            self.publish(&mut state);
            (ticket, filter)
        };

        self.fetch_flat(ticket, &filter).await
    }

    /// Replace the global filter and reload everything under it.
    #[tracing::instrument(skip(self))]
    pub async fn set_filter(&self, filter: BoardFilter) -> RefreshSummary {
        self.state.lock().filter = filter;
        self.refresh_all().await
    }

    /// Create an item, then reload the board: where it lands and how the
    /// counts change cannot be worked out locally.
    #[tracing::instrument(skip(self, create), fields(name = %create.name))]
    pub async fn create_item(&self, create: ItemCreate) -> Result<Item, SyncError> {
        let item = self
            .store
            .create_item(create)
            .await
            .map_err(|err| SyncError::request_failed("creating item", err))?;

        info!(item = %item.id, status = %item.status, "item created");
        self.emit(BoardEvent::ItemCreated { item: item.id });
        self.refresh_all().await;
        Ok(item)
    }

    #[tracing::instrument(skip(self), fields(item = %id))]
    pub async fn delete_item(&self, id: ItemId) -> Result<(), SyncError> {
        let in_flight = self.state.lock().pending.contains(id);
        if in_flight {
            return Err(SyncError::MutationInFlight(id));
        }

        self.store
            .delete_item(id)
            .await
            .map_err(|err| SyncError::request_failed(format!("deleting item {id}"), err))?;

        info!("item deleted");
        self.emit(BoardEvent::ItemDeleted { item: id });
        self.refresh_all().await;
        Ok(())
    }

    /// The one optimistic path every mutating intent shares.
    async fn mutate(&self, id: ItemId, change: Change) -> Result<MutationOutcome, SyncError> {
        let (pending, undo) = {
            let mut state = self.state.lock();
            if state.pending.contains(id) {
                warn!(item = %id, "change refused: another change is in flight");
                self.emit(BoardEvent::MutationRefused { item: id });
                return Err(SyncError::MutationInFlight(id));
            }

            let Some((pending, undo)) =
                PendingMutation::apply(&mut state.board, id, change, Utc::now())?
            else {
                debug!(item = %id, "change would not alter the item");
                return Ok(MutationOutcome::Unchanged);
            };

            state.pending.insert(pending.clone());
            self.publish(&mut state);
            self.emit(BoardEvent::MutationApplied {
                item: id,
                change: pending.kind,
            });
            (pending, undo)
        };

        let kind = pending.kind;
        let result = match kind {
            MutationKind::StatusChange { next, .. } | MutationKind::Move { next, .. } => {
                self.store.update_status(id, next).await
            }
            MutationKind::Progress { next, .. } => self.store.update_progress(id, next).await,
        };

        let mut state = self.state.lock();
        state.pending.remove(id);
        let superseded = pending.is_superseded(&state.board);

        match result {
            Ok(item) => {
                if superseded {
                    debug!(item = %id, "board refreshed while in flight; nothing to reconcile");
                } else {
                    state.board.settle(item.clone());
                }
                self.publish(&mut state);
                self.emit(BoardEvent::MutationConfirmed {
                    item: id,
                    change: kind,
                    superseded,
                });
                info!(item = %id, %kind, superseded, "change confirmed");
                Ok(if superseded {
                    MutationOutcome::Superseded(item)
                } else {
                    MutationOutcome::Confirmed(item)
                })
            }
            Err(err) => {
                if superseded {
                    debug!(item = %id, "board refreshed while in flight; nothing to revert");
                    drop(undo);
                } else {
                    undo.revert(&mut state.board);
                }
                self.publish(&mut state);
                let retryable = err.is_network();
                let reason = err.message().to_string();
                if superseded {
                    warn!(item = %id, %kind, error = %err, "change failed after refresh");
                } else {
                    warn!(item = %id, %kind, error = %err, "change failed; reverted");
                }
                self.emit(BoardEvent::MutationReverted {
                    item: id,
                    change: kind,
                    reason,
                    retryable,
                    superseded,
                });
                Err(SyncError::mutation_failed(id, kind, err))
            }
        }
    }

    async fn fetch_column(
        &self,
        ticket: LoadTicket,
        filter: &BoardFilter,
    ) -> Result<LoadOutcome, SyncError> {
        let page_size = self.config.column_page_size;
        debug!(column = %ticket.status, page = ticket.page, page_size, "requesting page");
        let result = self
            .store
            .list_by_status(ticket.status, ticket.page, page_size, filter)
            .await;

        let mut state = self.state.lock();
        let window = state
            .board
            .window_mut(ticket.status)
            .ok_or(SyncError::UnknownColumn(ticket.status))?;

        match result {
            Ok(page) => {
                let total_count = page.total_count;
                let Ok(appended) = window.apply_page(ticket, page.items, total_count, page_size)
                else {
                    debug!(column = %ticket.status, page = ticket.page, "discarding stale page response");
                    return Ok(LoadOutcome::Stale);
                };
                let has_more = window.has_more();
                debug!(column = %ticket.status, page = ticket.page, appended, total_count, has_more, "page applied");
                self.publish(&mut state);
                self.emit(BoardEvent::PageLoaded {
                    column: ticket.status,
                    page: ticket.page,
                    appended,
                });
                Ok(LoadOutcome::Applied {
                    page: ticket.page,
                    appended,
                    has_more,
                })
            }
            Err(err) => {
                if window.mark_load_failed(ticket, err.to_string()).is_err() {
                    debug!(column = %ticket.status, page = ticket.page, "discarding stale page failure");
                    return Ok(LoadOutcome::Stale);
                }
                warn!(column = %ticket.status, page = ticket.page, error = %err, "page load failed");
                self.publish(&mut state);
                self.emit(BoardEvent::LoadFailed {
                    scope: LoadScope::Column(ticket.status),
                    message: err.to_string(),
                });
                Err(SyncError::load_failed(
                    format!("loading page {} of {}", ticket.page, ticket.status),
                    &err,
                ))
            }
        }
    }

    async fn fetch_flat(
        &self,
        ticket: FlatTicket,
        filter: &BoardFilter,
    ) -> Result<LoadOutcome, SyncError> {
        let result = self
            .store
            .list_page(ticket.page, ticket.page_size, filter)
            .await;

        let mut state = self.state.lock();
        let flat = state.board.flat_page_mut();

        match result {
            Ok(page) => {
                let appended = page.items.len();
                let total_count = page.total_count;
                if flat.apply(ticket, page).is_err() {
                    debug!(page = ticket.page, "discarding stale grid response");
                    return Ok(LoadOutcome::Stale);
                }
                let has_more = ticket.page < flat.total_pages();
                self.publish(&mut state);
                self.emit(BoardEvent::FlatPageLoaded {
                    page: ticket.page,
                    page_size: ticket.page_size,
                    total_count,
                });
                Ok(LoadOutcome::Applied {
                    page: ticket.page,
                    appended,
                    has_more,
                })
            }
            Err(err) => {
                if flat.fail(ticket, err.to_string()).is_err() {
                    debug!(page = ticket.page, "discarding stale grid failure");
                    return Ok(LoadOutcome::Stale);
                }
                warn!(page = ticket.page, error = %err, "grid page load failed");
                self.publish(&mut state);
                self.emit(BoardEvent::LoadFailed {
                    scope: LoadScope::Grid,
                    message: err.to_string(),
                });
                Err(SyncError::load_failed(
                    format!("loading grid page {}", ticket.page),
                    &err,
                ))
            }
        }
    }

    fn publish(&self, state: &mut EngineState) {
        state.version += 1;
        let snapshot = state.board.snapshot(state.version, state.pending.ids());
        self.snapshots.send_replace(snapshot);
    }

    fn emit(&self, event: BoardEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
