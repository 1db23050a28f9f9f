use trellis_shared::{ItemId, Status};

use crate::mutation::MutationKind;
use crate::store::StoreError;

/// Every failure an intent can report back to the presentation layer.
///
/// None of these is fatal to the engine: by the time one is returned the
/// board is back in a stable state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Nothing was committed; the same intent can simply be issued again.
    #[error("{context} failed (retry possible): {message}")]
    RetryableNetworkFailure { context: String, message: String },

    /// The server refused an optimistic change, which has been reverted.
    #[error("item {item}: {change} was rejected: {reason}")]
    RejectedMutation {
        item: ItemId,
        change: MutationKind,
        reason: String,
    },

    #[error("item {0} already has a change in flight")]
    MutationInFlight(ItemId),

    #[error("item {0} is not loaded on the board")]
    UnknownItem(ItemId),

    #[error("item {item} is not in the {column} column")]
    NotInColumn { item: ItemId, column: Status },

    #[error("{0} is not a board column")]
    UnknownColumn(Status),

    #[error("progress must be between 0 and 100, got {0}")]
    InvalidProgress(u8),

    #[error("invalid page request: page {page} with page size {page_size}")]
    InvalidPage { page: u32, page_size: u32 },

    /// A create or delete that the server answered with a refusal.
    #[error("server refused the request: {0}")]
    Rejected(String),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RetryableNetworkFailure { .. })
    }

    /// Page loads are always retryable from the user's point of view: the
    /// column keeps its contents and the next scroll asks again.
    pub(crate) fn load_failed(context: impl Into<String>, err: &StoreError) -> Self {
        SyncError::RetryableNetworkFailure {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn mutation_failed(item: ItemId, change: MutationKind, err: StoreError) -> Self {
        match err {
            StoreError::Network(message) => SyncError::RetryableNetworkFailure {
                context: format!("item {item}: {change}"),
                message,
            },
            other => SyncError::RejectedMutation {
                item,
                change,
                reason: other.message().to_string(),
            },
        }
    }

    pub(crate) fn request_failed(context: impl Into<String>, err: StoreError) -> Self {
        match err {
            StoreError::Network(message) => SyncError::RetryableNetworkFailure {
                context: context.into(),
                message,
            },
            other => SyncError::Rejected(other.to_string()),
        }
    }
}
