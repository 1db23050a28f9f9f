//! One status column's materialized slice of the server-side result set.

use std::collections::HashSet;

use serde::Serialize;
use tracing::trace;
use trellis_shared::{Item, ItemId, Status};

/// Why a load request was not issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A page request for this column is still outstanding.
    InFlight,
    /// Every page the server reported has been applied.
    Exhausted,
}

/// Proof that a page request was issued against a particular incarnation of
/// a column. Responses carrying an outdated ticket are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub status: Status,
    pub page: u32,
    epoch: u64,
}

/// A response arrived for a request the window no longer waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleResponse;

/// How far a window had loaded at some point. Once a page lands after
/// the mark, `total_count` is the server's and local adjustments to it are
/// void.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LoadMark {
    epoch: u64,
    loaded_pages: u32,
}

/// Where an item sat before it was taken out of a column.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Removed {
    pub index: usize,
    pub item: Item,
    pub was_local: bool,
}

#[derive(Debug, Clone)]
pub struct ColumnWindow {
    status: Status,
    items: Vec<Item>,
    loaded_pages: u32,
    total_pages: u32,
    total_count: u64,
    has_more: bool,
    is_loading: bool,
    last_error: Option<String>,
    epoch: u64,
    // Ids put here by an optimistic insert rather than by a server page.
    local_inserts: HashSet<ItemId>,
}

/// Immutable view of a [`ColumnWindow`] handed to renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSnapshot {
    pub status: Status,
    pub items: Vec<Item>,
    pub current_page: u32,
    pub total_pages: u32,
    pub total_count: u64,
    pub has_more: bool,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

impl ColumnSnapshot {
    pub fn contains(&self, id: ItemId) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|item| item.id).collect()
    }
}

impl ColumnWindow {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            items: Vec::new(),
            loaded_pages: 0,
            total_pages: 0,
            total_count: 0,
            has_more: true,
            is_loading: false,
            last_error: None,
            epoch: 0,
            local_inserts: HashSet::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// The last page applied, or 1 while nothing has been loaded yet.
    pub fn current_page(&self) -> u32 {
        self.loaded_pages.max(1)
    }

    /// The page a load would request next.
    pub fn next_page(&self) -> u32 {
        self.loaded_pages + 1
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn position(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.position(id).is_some()
    }

    pub fn snapshot(&self) -> ColumnSnapshot {
        ColumnSnapshot {
            status: self.status,
            items: self.items.clone(),
            current_page: self.current_page(),
            total_pages: self.total_pages,
            total_count: self.total_count,
            has_more: self.has_more,
            is_loading: self.is_loading,
            last_error: self.last_error.clone(),
        }
    }

    pub(crate) fn load_mark(&self) -> LoadMark {
        LoadMark {
            epoch: self.epoch,
            loaded_pages: self.loaded_pages,
        }
    }

    fn count_is_local_since(&self, mark: LoadMark) -> bool {
        self.load_mark() == mark
    }

    /// Start a request for the next page. Refuses while another request is
    /// outstanding or when the column is exhausted, which is what keeps page
    /// N+1 from ever being requested before page N resolved.
    pub(crate) fn mark_loading(&mut self) -> Result<LoadTicket, SkipReason> {
        if self.is_loading {
            return Err(SkipReason::InFlight);
        }
        if !self.has_more {
            return Err(SkipReason::Exhausted);
        }

        self.is_loading = true;
        Ok(LoadTicket {
            status: self.status,
            page: self.next_page(),
            epoch: self.epoch,
        })
    }

    fn accepts(&self, ticket: &LoadTicket) -> bool {
        self.is_loading && ticket.epoch == self.epoch && ticket.page == self.loaded_pages + 1
    }

    /// Append the page `ticket` asked for. Returns how many items were
    /// appended; items the engine already inserted locally are not appended
    /// a second time.
    pub(crate) fn apply_page(
        &mut self,
        ticket: LoadTicket,
        items: Vec<Item>,
        total_count: u64,
        page_size: u32,
    ) -> Result<usize, StaleResponse> {
        if !self.accepts(&ticket) {
            return Err(StaleResponse);
        }

        let before = self.items.len();
        for item in items {
            if self.local_inserts.remove(&item.id) {
                trace!(column = %self.status, item = %item.id, "page already holds local copy");
                continue;
            }
            self.items.push(item);
        }

        self.loaded_pages = ticket.page;
        self.total_count = total_count;
        self.total_pages = page_count(total_count, page_size);
        self.has_more = self.loaded_pages < self.total_pages;
        self.is_loading = false;
        self.last_error = None;

        Ok(self.items.len() - before)
    }

    /// Record a failed request. Contents stay exactly as they were.
    pub(crate) fn mark_load_failed(
        &mut self,
        ticket: LoadTicket,
        error: String,
    ) -> Result<(), StaleResponse> {
        if !self.accepts(&ticket) {
            return Err(StaleResponse);
        }
        self.is_loading = false;
        self.last_error = Some(error);
        Ok(())
    }

    /// Put an item that moved in from elsewhere at `index`.
    pub(crate) fn insert_local(&mut self, index: usize, item: Item) {
        self.local_inserts.insert(item.id);
        self.insert_at(index, item, true);
    }

    /// Undo a [`ColumnWindow::remove`] made at `mark`. The count is only
    /// bumped back if no page has replaced it since.
    pub(crate) fn restore(&mut self, removed: Removed, mark: LoadMark) {
        if removed.was_local {
            self.local_inserts.insert(removed.item.id);
        }
        let recount = self.count_is_local_since(mark);
        self.insert_at(removed.index, removed.item, recount);
    }

    /// Undo an [`ColumnWindow::insert_local`] made at `mark`.
    pub(crate) fn retract(&mut self, id: ItemId, mark: LoadMark) -> Option<Removed> {
        let recount = self.count_is_local_since(mark);
        self.take(id, recount)
    }

    fn insert_at(&mut self, index: usize, item: Item, count: bool) {
        let index = index.min(self.items.len());
        self.items.insert(index, item);
        if count {
            self.total_count += 1;
        }
    }

    pub(crate) fn remove(&mut self, id: ItemId) -> Option<Removed> {
        self.take(id, true)
    }

    fn take(&mut self, id: ItemId, count: bool) -> Option<Removed> {
        let index = self.position(id)?;
        let item = self.items.remove(index);
        if count {
            self.total_count = self.total_count.saturating_sub(1);
        }
        let was_local = self.local_inserts.remove(&id);
        Some(Removed {
            index,
            item,
            was_local,
        })
    }

    /// Swap in a newer value for an item already in the window.
    pub(crate) fn replace(&mut self, item: Item) -> bool {
        match self.items.iter_mut().find(|existing| existing.id == item.id) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => false,
        }
    }

    /// Drop everything and start over from page 1. Requests issued before
    /// the reset become stale.
    pub(crate) fn reset(&mut self) {
        self.items.clear();
        self.loaded_pages = 0;
        self.total_pages = 0;
        self.total_count = 0;
        self.has_more = true;
        self.is_loading = false;
        self.last_error = None;
        self.epoch += 1;
        self.local_inserts.clear();
    }
}

pub(crate) fn page_count(total_count: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    u32::try_from(total_count.div_ceil(u64::from(page_size))).unwrap_or(u32::MAX)
}
