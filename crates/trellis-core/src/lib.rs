//! Client-side synchronization for a paginated, multi-column status board.
//!
//! [`SyncEngine`] owns the board and exposes intents (`load_more`,
//! `move_item`, `set_status`, `refresh_all`, ...) that talk to a
//! [`RemoteProjectStore`]. Renderers read [`BoardSnapshot`]s from
//! [`SyncEngine::subscribe`] and never touch the board directly.

pub mod board;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod mutation;
pub mod store;
pub mod window;

pub use board::{BoardSnapshot, BoardState, FlatPage, FlatPageSnapshot};
pub use config::BoardConfig;
pub use engine::SyncEngine;
pub use error::SyncError;
pub use events::{
    BoardEvent, LoadOutcome, LoadScope, MutationOutcome, Notice, RefreshSummary, Severity,
};
pub use mutation::{MutationKind, PendingMutation, PendingMutations};
pub use store::{RemoteProjectStore, StoreError};
pub use trellis_shared::{BoardFilter, Item, ItemCreate, ItemId, ItemPage, Priority, Status};
pub use window::{ColumnSnapshot, ColumnWindow, SkipReason};
