use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use trellis_core::{RemoteProjectStore, StoreError};
use trellis_shared::{BoardFilter, Item, ItemCreate, ItemId, ItemPage, Priority, Status};

const ITEMS_FILE: &str = "items.data";

/// Faults the file store injects into every call, for exercising the
/// engine's failure paths from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FaultPlan {
    /// Added to every call.
    pub latency_ms: u64,
    /// Extra delay for listings of one column.
    pub column_latency: Vec<ColumnDelay>,
    /// Every call fails with a network error.
    pub offline: bool,
    /// Mutations on these items are refused by the "server".
    pub reject_items: BTreeSet<ItemId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDelay {
    pub column: Status,
    pub latency_ms: u64,
}

impl FaultPlan {
    fn latency_for(&self, column: Option<Status>) -> Duration {
        let extra = column
            .and_then(|status| {
                self.column_latency
                    .iter()
                    .find(|delay| delay.column == status)
            })
            .map_or(0, |delay| delay.latency_ms);
        Duration::from_millis(self.latency_ms + extra)
    }
}

/// A project store kept as one JSON object per line in `items.data`.
#[derive(Debug)]
pub struct JsonlStore {
    pub data_dir: PathBuf,
    pub items_path: PathBuf,
    faults: Mutex<FaultPlan>,
}

impl JsonlStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let items_path = data_dir.join(ITEMS_FILE);
        if !items_path.exists() {
            fs::write(&items_path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            items = %items_path.display(),
            "opened item store"
        );

        Ok(Self {
            data_dir,
            items_path,
            faults: Mutex::new(FaultPlan::default()),
        })
    }

    pub fn faults(&self) -> FaultPlan {
        self.faults.lock().clone()
    }

    pub fn set_faults(&self, plan: FaultPlan) {
        debug!(?plan, "fault plan updated");
        *self.faults.lock() = plan;
    }

    /// Every stored item, in file order. A line that does not parse, or a
    /// repeated id, fails the whole read.
    #[tracing::instrument(skip(self))]
    pub fn load_items(&self) -> anyhow::Result<Vec<Item>> {
        let text = fs::read_to_string(&self.items_path)
            .with_context(|| format!("failed to read {}", self.items_path.display()))?;

        let mut seen = BTreeSet::new();
        let mut items = Vec::new();
        for (idx, line) in text.lines().enumerate().filter(|(_, line)| !line.trim().is_empty()) {
            let item: Item = serde_json::from_str(line)
                .with_context(|| format!("{ITEMS_FILE} line {}: not an item", idx + 1))?;
            if !seen.insert(item.id) {
                bail!("{ITEMS_FILE} line {}: item {} stored twice", idx + 1, item.id);
            }
            items.push(item);
        }

        debug!(count = items.len(), "read item store");
        Ok(items)
    }

    /// Rewrite the store in one step: readers see the old file or the new
    /// one, never a partial write.
    #[tracing::instrument(skip(self, items), fields(count = items.len()))]
    pub fn save_items(&self, items: &[Item]) -> anyhow::Result<()> {
        let mut staged = NamedTempFile::new_in(&self.data_dir)
            .with_context(|| format!("failed to stage {ITEMS_FILE}"))?;
        {
            let mut out = BufWriter::new(staged.as_file_mut());
            for item in items {
                serde_json::to_writer(&mut out, item)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        staged
            .persist(&self.items_path)
            .with_context(|| format!("failed to replace {}", self.items_path.display()))?;
        debug!("item store written");
        Ok(())
    }

    /// Replace the store contents with `count` demo items spread over every
    /// status.
    #[tracing::instrument(skip(self))]
    pub fn seed(&self, count: u64) -> anyhow::Result<Vec<Item>> {
        const NAMES: [&str; 8] = [
            "Site survey",
            "Permit filing",
            "Supplier audit",
            "Network rollout",
            "Budget review",
            "Safety training",
            "Client workshop",
            "Data migration",
        ];
        const CATEGORIES: [&str; 3] = ["infrastructure", "compliance", "operations"];

        let items: Vec<Item> = (1..=count)
            .map(|id| {
                let idx = id as usize;
                let status = Status::ALL[idx % Status::ALL.len()];
                let mut item = Item::new(
                    ItemId(id),
                    format!("{} #{id}", NAMES[idx % NAMES.len()]),
                    status,
                );
                item.priority = Priority::ALL[(idx / 2) % Priority::ALL.len()];
                item.category = Some(CATEGORIES[idx % CATEGORIES.len()].to_string());
                item.progress = match status {
                    Status::Planning | Status::Pending => 0,
                    Status::Done => 100,
                    _ => ((id * 17) % 100) as u8,
                };
                item
            })
            .collect();

        self.save_items(&items)?;
        info!(count = items.len(), "seeded item store");
        Ok(items)
    }

    /// Wait out the configured latency, then fail if the store is offline.
    async fn round_trip(&self, column: Option<Status>) -> Result<(), StoreError> {
        let latency = self.faults.lock().latency_for(column);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.faults.lock().offline {
            warn!("store offline; failing request");
            return Err(StoreError::Network("store is offline".to_string()));
        }
        Ok(())
    }

    fn check_writable(&self, id: ItemId) -> Result<(), StoreError> {
        if self.faults.lock().reject_items.contains(&id) {
            return Err(StoreError::Rejected(format!("item {id} is locked")));
        }
        Ok(())
    }

    fn read(&self) -> Result<Vec<Item>, StoreError> {
        self.load_items().map_err(internal)
    }

    fn modify<T>(
        &self,
        change: impl FnOnce(&mut Vec<Item>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut items = self.read()?;
        let out = change(&mut items)?;
        self.save_items(&items).map_err(internal)?;
        Ok(out)
    }

    fn update(
        &self,
        id: ItemId,
        change: impl FnOnce(&mut Item),
    ) -> Result<Item, StoreError> {
        self.check_writable(id)?;
        self.modify(|items| {
            let item = items
                .iter_mut()
                .find(|item| item.id == id)
                .ok_or_else(|| not_found(id))?;
            change(item);
            Ok(item.clone())
        })
    }
}

#[async_trait]
impl RemoteProjectStore for JsonlStore {
    #[tracing::instrument(skip(self, filter))]
    async fn list_by_status(
        &self,
        status: Status,
        page: u32,
        page_size: u32,
        filter: &BoardFilter,
    ) -> Result<ItemPage, StoreError> {
        self.round_trip(Some(status)).await?;
        let items = self
            .read()?
            .into_iter()
            .filter(|item| item.status == status && filter.matches(item))
            .collect();
        Ok(paginate(items, page, page_size))
    }

    #[tracing::instrument(skip(self, filter))]
    async fn list_page(
        &self,
        page: u32,
        page_size: u32,
        filter: &BoardFilter,
    ) -> Result<ItemPage, StoreError> {
        self.round_trip(None).await?;
        let items = self
            .read()?
            .into_iter()
            .filter(|item| filter.matches(item))
            .collect();
        Ok(paginate(items, page, page_size))
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(&self, id: ItemId, status: Status) -> Result<Item, StoreError> {
        self.round_trip(None).await?;
        self.update(id, |item| item.status = status)
    }

    #[tracing::instrument(skip(self))]
    async fn update_progress(&self, id: ItemId, progress: u8) -> Result<Item, StoreError> {
        self.round_trip(None).await?;
        if progress > 100 {
            return Err(StoreError::Server {
                code: 400,
                message: format!("progress {progress} is out of range"),
            });
        }
        self.update(id, |item| item.progress = progress)
    }

    #[tracing::instrument(skip(self, create), fields(name = %create.name))]
    async fn create_item(&self, create: ItemCreate) -> Result<Item, StoreError> {
        self.round_trip(None).await?;
        if create.name.trim().is_empty() {
            return Err(StoreError::Server {
                code: 400,
                message: "name is required".to_string(),
            });
        }

        self.modify(|items| {
            let next = items.iter().map(|item| item.id.0).max().unwrap_or(0) + 1;
            let mut item = Item::new(ItemId(next), create.name, Status::Planning);
            item.priority = create.priority;
            item.category = create.category;
            item.deadline = create.deadline;
            if !create.description.is_empty() {
                item.extra.insert(
                    "description".to_string(),
                    serde_json::Value::String(create.description),
                );
            }
            items.push(item.clone());
            Ok(item)
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError> {
        self.round_trip(None).await?;
        self.check_writable(id)?;
        self.modify(|items| {
            let before = items.len();
            items.retain(|item| item.id != id);
            if items.len() == before {
                return Err(not_found(id));
            }
            Ok(())
        })
    }
}

/// Newest first, like the project backend.
fn paginate(mut items: Vec<Item>, page: u32, page_size: u32) -> ItemPage {
    items.sort_by(|a, b| b.id.cmp(&a.id));
    let total_count = items.len() as u64;
    let start = page.saturating_sub(1) as usize * page_size as usize;
    ItemPage {
        items: items
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect(),
        total_count,
    }
}

fn not_found(id: ItemId) -> StoreError {
    StoreError::Server {
        code: 404,
        message: format!("item {id} not found"),
    }
}

fn internal(err: anyhow::Error) -> StoreError {
    StoreError::Server {
        code: 500,
        message: format!("{err:#}"),
    }
}
