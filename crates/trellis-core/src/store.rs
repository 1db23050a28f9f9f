use async_trait::async_trait;
use trellis_shared::{BoardFilter, Item, ItemCreate, ItemId, ItemPage, Status};

/// The remote record store the board is synchronized against.
///
/// Latency and failures are outside the engine's control; every method may
/// suspend for an arbitrary time and fail with a [`StoreError`].
#[async_trait]
pub trait RemoteProjectStore: Send + Sync {
    /// List one page of items whose status is `status`. Pages are 1-based.
    async fn list_by_status(
        &self,
        status: Status,
        page: u32,
        page_size: u32,
        filter: &BoardFilter,
    ) -> Result<ItemPage, StoreError>;

    /// List one page of all items regardless of status, for the grid view.
    async fn list_page(
        &self,
        page: u32,
        page_size: u32,
        filter: &BoardFilter,
    ) -> Result<ItemPage, StoreError>;

    async fn update_status(&self, id: ItemId, status: Status) -> Result<Item, StoreError>;

    async fn update_progress(&self, id: ItemId, progress: u8) -> Result<Item, StoreError>;

    async fn create_item(&self, create: ItemCreate) -> Result<Item, StoreError>;

    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The request never got an answer. Nothing was committed remotely.
    #[error("network error: {0}")]
    Network(String),

    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },

    /// The server answered and refused the change (`success: false`).
    #[error("rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_network(&self) -> bool {
        matches!(self, StoreError::Network(_))
    }

    pub fn message(&self) -> &str {
        match self {
            StoreError::Network(message)
            | StoreError::Server { message, .. }
            | StoreError::Rejected(message) => message,
        }
    }
}
