use serde::Serialize;
use tracing::debug;
use trellis_shared::{Item, ItemId, ItemPage, Status};

use crate::window::{ColumnSnapshot, ColumnWindow, LoadTicket, StaleResponse, page_count};

/// The flat, globally paginated listing used by the grid view. It is
/// refreshed on its own triggers and never patched optimistically.
#[derive(Debug, Clone)]
pub struct FlatPage {
    items: Vec<Item>,
    page: u32,
    page_size: u32,
    total_count: u64,
    is_loading: bool,
    last_error: Option<String>,
    request_seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatTicket {
    pub page: u32,
    pub page_size: u32,
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatPageSnapshot {
    pub items: Vec<Item>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u32,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

impl FlatPage {
    pub fn new(page_size: u32) -> Self {
        Self {
            items: Vec::new(),
            page: 1,
            page_size,
            total_count: 0,
            is_loading: false,
            last_error: None,
            request_seq: 0,
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn total_pages(&self) -> u32 {
        page_count(self.total_count, self.page_size)
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn snapshot(&self) -> FlatPageSnapshot {
        FlatPageSnapshot {
            items: self.items.clone(),
            page: self.page,
            page_size: self.page_size,
            total_count: self.total_count,
            total_pages: self.total_pages(),
            is_loading: self.is_loading,
            last_error: self.last_error.clone(),
        }
    }

    /// Start a request. Unlike a column, a newer request always wins: any
    /// earlier request still outstanding becomes stale.
    pub(crate) fn begin(&mut self, page: u32, page_size: u32) -> FlatTicket {
        self.request_seq += 1;
        self.is_loading = true;
        FlatTicket {
            page,
            page_size,
            seq: self.request_seq,
        }
    }

    pub(crate) fn apply(&mut self, ticket: FlatTicket, page: ItemPage) -> Result<(), StaleResponse> {
        if ticket.seq != self.request_seq {
            return Err(StaleResponse);
        }
        self.items = page.items;
        self.page = ticket.page;
        self.page_size = ticket.page_size;
        self.total_count = page.total_count;
        self.is_loading = false;
        self.last_error = None;
        Ok(())
    }

    pub(crate) fn fail(&mut self, ticket: FlatTicket, error: String) -> Result<(), StaleResponse> {
        if ticket.seq != self.request_seq {
            return Err(StaleResponse);
        }
        self.is_loading = false;
        self.last_error = Some(error);
        Ok(())
    }

    pub(crate) fn replace_item(&mut self, item: &Item) -> bool {
        match self.items.iter_mut().find(|existing| existing.id == item.id) {
            Some(slot) => {
                *slot = item.clone();
                true
            }
            None => false,
        }
    }
}

/// Everything the board view shows. Owned by the sync engine; the outside
/// world only ever sees [`BoardSnapshot`]s.
#[derive(Debug, Clone)]
pub struct BoardState {
    columns: Vec<ColumnWindow>,
    flat: FlatPage,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardSnapshot {
    pub version: u64,
    pub generation: u64,
    pub columns: Vec<ColumnSnapshot>,
    pub flat: FlatPageSnapshot,
    /// Items with an unresolved optimistic change.
    pub pending: Vec<ItemId>,
}

impl BoardSnapshot {
    pub fn column(&self, status: Status) -> Option<&ColumnSnapshot> {
        self.columns.iter().find(|column| column.status == status)
    }

    /// The column currently showing `id`, if any.
    pub fn column_of(&self, id: ItemId) -> Option<Status> {
        self.columns
            .iter()
            .find(|column| column.contains(id))
            .map(|column| column.status)
    }

    pub fn is_pending(&self, id: ItemId) -> bool {
        self.pending.contains(&id)
    }
}

impl BoardState {
    /// One empty window per column key, in the given order. Repeated keys
    /// are ignored.
    pub fn initialize(columns: &[Status], flat_page_size: u32) -> Self {
        let mut windows: Vec<ColumnWindow> = Vec::with_capacity(columns.len());
        for status in columns {
            if windows.iter().any(|window| window.status() == *status) {
                debug!(column = %status, "duplicate column key ignored");
                continue;
            }
            windows.push(ColumnWindow::new(*status));
        }

        Self {
            columns: windows,
            flat: FlatPage::new(flat_page_size),
            generation: 0,
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnWindow> {
        self.columns.iter()
    }

    pub fn column_keys(&self) -> Vec<Status> {
        self.columns.iter().map(ColumnWindow::status).collect()
    }

    pub fn is_column(&self, status: Status) -> bool {
        self.window(status).is_some()
    }

    pub fn window(&self, status: Status) -> Option<&ColumnWindow> {
        self.columns.iter().find(|window| window.status() == status)
    }

    pub(crate) fn window_mut(&mut self, status: Status) -> Option<&mut ColumnWindow> {
        self.columns
            .iter_mut()
            .find(|window| window.status() == status)
    }

    pub fn flat_page(&self) -> &FlatPage {
        &self.flat
    }

    pub(crate) fn flat_page_mut(&mut self) -> &mut FlatPage {
        &mut self.flat
    }

    /// Bumped every time all windows are thrown away.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Column and index of the window holding `id`.
    pub fn locate(&self, id: ItemId) -> Option<(Status, usize)> {
        self.columns.iter().find_map(|window| {
            window
                .position(id)
                .map(|index| (window.status(), index))
        })
    }

    /// Windows first, then the grid page.
    pub fn find_item(&self, id: ItemId) -> Option<&Item> {
        self.columns
            .iter()
            .find_map(|window| window.get(id))
            .or_else(|| self.flat.get(id))
    }

    pub fn snapshot(&self, version: u64, pending: Vec<ItemId>) -> BoardSnapshot {
        BoardSnapshot {
            version,
            generation: self.generation,
            columns: self.columns.iter().map(ColumnWindow::snapshot).collect(),
            flat: self.flat.snapshot(),
            pending,
        }
    }

    /// Reset every window to page 1 and start its first-page request.
    pub(crate) fn invalidate(&mut self) -> Vec<LoadTicket> {
        self.generation += 1;
        let mut tickets = Vec::with_capacity(self.columns.len());
        for window in &mut self.columns {
            window.reset();
            match window.mark_loading() {
                Ok(ticket) => tickets.push(ticket),
                Err(reason) => debug!(column = %window.status(), ?reason, "reset window refused load"),
            }
        }
        tickets
    }

    /// Adopt the server's value for an item after a confirmed change. If the
    /// server filed it under a different status than the window showing it,
    /// or under a column while no window shows it, it is moved there.
    pub(crate) fn settle(&mut self, item: Item) {
        self.flat.replace_item(&item);

        match self.locate(item.id) {
            Some((status, _)) if status == item.status => {
                if let Some(window) = self.window_mut(status) {
                    window.replace(item);
                }
            }
            Some((status, _)) => {
                debug!(item = %item.id, shown = %status, server = %item.status, "server placed item elsewhere");
                if let Some(window) = self.window_mut(status) {
                    window.remove(item.id);
                }
                if let Some(window) = self.window_mut(item.status) {
                    window.insert_local(0, item);
                }
            }
            None => {
                if let Some(window) = self.window_mut(item.status) {
                    debug!(item = %item.id, server = %item.status, "confirmed item returns to the board");
                    window.insert_local(0, item);
                }
            }
        }
    }
}
