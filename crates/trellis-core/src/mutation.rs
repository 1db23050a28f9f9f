//! Optimistic changes: apply locally, remember how to undo, resolve once.
//!
//! Every mutating intent goes through [`PendingMutation::apply`], which
//! changes the board right away and hands back an [`Undo`] that can put it
//! back exactly. The engine keeps the [`PendingMutation`] record in
//! [`PendingMutations`] until the server answers, which is also what enforces
//! the one-change-per-item rule.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;
use trellis_shared::{Item, ItemId, Status};

use crate::board::BoardState;
use crate::error::SyncError;
use crate::window::{LoadMark, Removed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationKind {
    /// Inline status edit.
    StatusChange { previous: Status, next: Status },
    /// Drag from one column to another.
    Move { previous: Status, next: Status },
    /// Inline progress edit.
    Progress { previous: u8, next: u8 },
}

impl MutationKind {
    pub fn previous_status(&self) -> Option<Status> {
        match self {
            MutationKind::StatusChange { previous, .. } | MutationKind::Move { previous, .. } => {
                Some(*previous)
            }
            MutationKind::Progress { .. } => None,
        }
    }

    pub fn next_status(&self) -> Option<Status> {
        match self {
            MutationKind::StatusChange { next, .. } | MutationKind::Move { next, .. } => {
                Some(*next)
            }
            MutationKind::Progress { .. } => None,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::StatusChange { previous, next } => {
                write!(f, "status change {previous} -> {next}")
            }
            MutationKind::Move { previous, next } => write!(f, "move {previous} -> {next}"),
            MutationKind::Progress { previous, next } => {
                write!(f, "progress {previous}% -> {next}%")
            }
        }
    }
}

/// What an intent asks to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    Relocate { from: Option<Status>, to: Status },
    Progress(u8),
}

/// An optimistic change waiting for the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingMutation {
    pub item_id: ItemId,
    pub kind: MutationKind,
    pub submitted_at: DateTime<Utc>,
    /// Board generation the change was applied against. A refresh in the
    /// meantime means the windows no longer contain the optimistic state.
    pub generation: u64,
}

/// The exact inverse of one optimistic change.
#[derive(Debug, Clone)]
#[must_use]
pub(crate) enum Undo {
    Relocation {
        item_id: ItemId,
        source: Option<(Status, Removed, LoadMark)>,
        destination: Option<(Status, LoadMark)>,
    },
    InPlace {
        previous: Item,
        column: Option<Status>,
    },
}

impl PendingMutation {
    /// Apply `change` to `board` and describe it. `Ok(None)` means the change
    /// would not alter anything and no request should be made.
    pub(crate) fn apply(
        board: &mut BoardState,
        item_id: ItemId,
        change: Change,
        now: DateTime<Utc>,
    ) -> Result<Option<(PendingMutation, Undo)>, SyncError> {
        let location = board.locate(item_id).map(|(status, _)| status);
        let current = board
            .find_item(item_id)
            .cloned()
            .ok_or(SyncError::UnknownItem(item_id))?;

        let (kind, undo) = match change {
            Change::Relocate { from, to } => {
                if let Some(from) = from
                    && location != Some(from)
                {
                    return Err(SyncError::NotInColumn {
                        item: item_id,
                        column: from,
                    });
                }

                let previous = location.unwrap_or(current.status);
                if previous == to {
                    return Ok(None);
                }

                let source = location.and_then(|status| {
                    let window = board.window_mut(status)?;
                    let mark = window.load_mark();
                    window.remove(item_id).map(|removed| (status, removed, mark))
                });

                let mut moved = current;
                moved.status = to;
                let destination = board.window_mut(to).map(|window| {
                    let mark = window.load_mark();
                    window.insert_local(0, moved);
                    (to, mark)
                });

                let kind = if from.is_some() {
                    MutationKind::Move { previous, next: to }
                } else {
                    MutationKind::StatusChange { previous, next: to }
                };
                let undo = Undo::Relocation {
                    item_id,
                    source,
                    destination,
                };
                (kind, undo)
            }
            Change::Progress(next) => {
                if next > 100 {
                    return Err(SyncError::InvalidProgress(next));
                }
                if current.progress == next {
                    return Ok(None);
                }

                let kind = MutationKind::Progress {
                    previous: current.progress,
                    next,
                };
                // Grid rows are not patched optimistically, only windows.
                if let Some(status) = location
                    && let Some(window) = board.window_mut(status)
                {
                    let mut updated = current.clone();
                    updated.progress = next;
                    window.replace(updated);
                }
                let undo = Undo::InPlace {
                    previous: current,
                    column: location,
                };
                (kind, undo)
            }
        };

        trace!(item = %item_id, %kind, "optimistic change applied");
        let pending = PendingMutation {
            item_id,
            kind,
            submitted_at: now,
            generation: board.generation(),
        };
        Ok(Some((pending, undo)))
    }

    pub fn is_superseded(&self, board: &BoardState) -> bool {
        self.generation != board.generation()
    }
}

impl Undo {
    pub(crate) fn revert(self, board: &mut BoardState) {
        match self {
            Undo::Relocation {
                item_id,
                source,
                destination,
            } => {
                if let Some((status, mark)) = destination
                    && let Some(window) = board.window_mut(status)
                {
                    window.retract(item_id, mark);
                }
                if let Some((status, removed, mark)) = source
                    && let Some(window) = board.window_mut(status)
                {
                    window.restore(removed, mark);
                }
            }
            Undo::InPlace { previous, column } => {
                if let Some(status) = column
                    && let Some(window) = board.window_mut(status)
                {
                    window.replace(previous);
                }
            }
        }
    }
}

/// Outstanding optimistic changes, at most one per item.
#[derive(Debug, Default)]
pub struct PendingMutations {
    by_item: HashMap<ItemId, PendingMutation>,
}

impl PendingMutations {
    pub fn contains(&self, id: ItemId) -> bool {
        self.by_item.contains_key(&id)
    }

    pub fn get(&self, id: ItemId) -> Option<&PendingMutation> {
        self.by_item.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_item.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_item.is_empty()
    }

    pub fn ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.by_item.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Callers check [`PendingMutations::contains`] first; a second record
    /// for the same item would break the one-change-per-item rule.
    pub(crate) fn insert(&mut self, pending: PendingMutation) {
        debug_assert!(!self.by_item.contains_key(&pending.item_id));
        self.by_item.insert(pending.item_id, pending);
    }

    pub(crate) fn remove(&mut self, id: ItemId) -> Option<PendingMutation> {
        self.by_item.remove(&id)
    }
}
