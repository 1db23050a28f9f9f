//! What intents return, and what the engine broadcasts for notifications.

use serde::Serialize;
use trellis_shared::{Item, ItemId, Status};

use crate::error::SyncError;
use crate::mutation::MutationKind;
use crate::window::SkipReason;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    Applied {
        page: u32,
        appended: usize,
        has_more: bool,
    },
    /// No request was made.
    Skipped { reason: SkipReason },
    /// The response answered a request the board had already given up on.
    Stale,
}

impl LoadOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, LoadOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The server accepted the change; carries its copy of the item.
    Confirmed(Item),
    /// Accepted, but a refresh replaced the board while the request was in
    /// flight, so nothing was reconciled into the windows.
    Superseded(Item),
    /// The item already had the requested value; nothing was sent.
    Unchanged,
}

/// Result of reloading every column and the grid page.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSummary {
    pub generation: u64,
    pub columns: Vec<(Status, Result<LoadOutcome, SyncError>)>,
    pub flat: Result<LoadOutcome, SyncError>,
}

impl RefreshSummary {
    pub fn failures(&self) -> Vec<&SyncError> {
        self.columns
            .iter()
            .filter_map(|(_, result)| result.as_ref().err())
            .chain(self.flat.as_ref().err())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failures().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadScope {
    Column(Status),
    Grid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BoardEvent {
    PageLoaded {
        column: Status,
        page: u32,
        appended: usize,
    },
    FlatPageLoaded {
        page: u32,
        page_size: u32,
        total_count: u64,
    },
    LoadFailed {
        scope: LoadScope,
        message: String,
    },
    MutationApplied {
        item: ItemId,
        change: MutationKind,
    },
    MutationConfirmed {
        item: ItemId,
        change: MutationKind,
        superseded: bool,
    },
    MutationReverted {
        item: ItemId,
        change: MutationKind,
        reason: String,
        retryable: bool,
        /// The board was refreshed meanwhile; there was nothing to revert.
        superseded: bool,
    },
    MutationRefused {
        item: ItemId,
    },
    BoardRefreshed {
        generation: u64,
        failures: usize,
    },
    ItemCreated {
        item: ItemId,
    },
    ItemDeleted {
        item: ItemId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// A toast-style message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

impl Notice {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

impl BoardEvent {
    /// The notification to show for this event, if it deserves one.
    /// Optimistic application and page loads are silent.
    pub fn notice(&self) -> Option<Notice> {
        match self {
            BoardEvent::PageLoaded { .. }
            | BoardEvent::FlatPageLoaded { .. }
            | BoardEvent::MutationApplied { .. } => None,
            BoardEvent::LoadFailed { scope, message } => {
                let target = match scope {
                    LoadScope::Column(status) => format!("the {status} column"),
                    LoadScope::Grid => "the project list".to_string(),
                };
                Some(Notice::new(
                    Severity::Warning,
                    format!("Could not load {target}: {message}. Scroll or retry to try again."),
                ))
            }
            BoardEvent::MutationConfirmed { item, change, .. } => Some(Notice::new(
                Severity::Success,
                match change.next_status() {
                    Some(next) => format!("Item {item} moved to {next}"),
                    None => format!("Item {item} updated ({change})"),
                },
            )),
            BoardEvent::MutationReverted {
                item,
                change,
                reason,
                ..
            } => Some(Notice::new(
                Severity::Error,
                format!("Item {item}: {change} failed: {reason}"),
            )),
            BoardEvent::MutationRefused { item } => Some(Notice::new(
                Severity::Info,
                format!("Item {item} is still being saved"),
            )),
            BoardEvent::BoardRefreshed { failures, .. } => (*failures > 0).then(|| {
                Notice::new(
                    Severity::Warning,
                    format!("Board refreshed with {failures} failed load(s)"),
                )
            }),
            BoardEvent::ItemCreated { item } => Some(Notice::new(
                Severity::Success,
                format!("Item {item} created"),
            )),
            BoardEvent::ItemDeleted { item } => Some(Notice::new(
                Severity::Success,
                format!("Item {item} deleted"),
            )),
        }
    }
}
