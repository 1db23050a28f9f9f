use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use trellis_core::{
    BoardConfig, BoardEvent, BoardFilter, Item, ItemCreate, ItemId, ItemPage, LoadOutcome,
    MutationKind, MutationOutcome, RemoteProjectStore, SkipReason, Status, StoreError, SyncEngine,
    SyncError,
};

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// A store call parked until the test answers it.
#[derive(Debug)]
enum Request {
    ListByStatus {
        status: Status,
        page: u32,
        page_size: u32,
        filter: BoardFilter,
        reply: Reply<ItemPage>,
    },
    ListPage {
        page: u32,
        page_size: u32,
        filter: BoardFilter,
        reply: Reply<ItemPage>,
    },
    UpdateStatus {
        id: ItemId,
        status: Status,
        reply: Reply<Item>,
    },
    UpdateProgress {
        id: ItemId,
        progress: u8,
        reply: Reply<Item>,
    },
    Create {
        create: ItemCreate,
        reply: Reply<Item>,
    },
    Delete {
        id: ItemId,
        reply: Reply<()>,
    },
}

struct GatedStore {
    requests: mpsc::UnboundedSender<Request>,
}

impl GatedStore {
    async fn call<T, F>(&self, make: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnOnce(Reply<T>) -> Request + Send,
    {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send(make(reply))
            .map_err(|_| StoreError::Network("test store closed".to_string()))?;
        answer
            .await
            .unwrap_or_else(|_| Err(StoreError::Network("request dropped".to_string())))
    }
}

#[async_trait]
impl RemoteProjectStore for GatedStore {
    async fn list_by_status(
        &self,
        status: Status,
        page: u32,
        page_size: u32,
        filter: &BoardFilter,
    ) -> Result<ItemPage, StoreError> {
        let filter = filter.clone();
        self.call(|reply| Request::ListByStatus {
            status,
            page,
            page_size,
            filter,
            reply,
        })
        .await
    }

    async fn list_page(
        &self,
        page: u32,
        page_size: u32,
        filter: &BoardFilter,
    ) -> Result<ItemPage, StoreError> {
        let filter = filter.clone();
        self.call(|reply| Request::ListPage {
            page,
            page_size,
            filter,
            reply,
        })
        .await
    }

    async fn update_status(&self, id: ItemId, status: Status) -> Result<Item, StoreError> {
        self.call(|reply| Request::UpdateStatus { id, status, reply })
            .await
    }

    async fn update_progress(&self, id: ItemId, progress: u8) -> Result<Item, StoreError> {
        self.call(|reply| Request::UpdateProgress {
            id,
            progress,
            reply,
        })
        .await
    }

    async fn create_item(&self, create: ItemCreate) -> Result<Item, StoreError> {
        self.call(|reply| Request::Create { create, reply }).await
    }

    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError> {
        self.call(|reply| Request::Delete { id, reply }).await
    }
}

/// What the remote side holds. Answers parked requests against it.
#[derive(Default)]
struct Server {
    items: Vec<Item>,
}

impl Server {
    fn with(mut self, status: Status, ids: Range<u64>) -> Self {
        self.items.extend(ids.map(|id| Item::new(ItemId(id), format!("item {id}"), status)));
        self
    }

    fn rename(mut self, id: u64, name: &str) -> Self {
        if let Some(item) = self.items.iter_mut().find(|item| item.id == ItemId(id)) {
            item.name = name.to_string();
        }
        self
    }

    fn page_of(
        &self,
        status: Option<Status>,
        page: u32,
        page_size: u32,
        filter: &BoardFilter,
    ) -> ItemPage {
        let matching: Vec<&Item> = self
            .items
            .iter()
            .filter(|item| status.is_none_or(|status| item.status == status))
            .filter(|item| filter.matches(item))
            .collect();
        let start = (page.saturating_sub(1) * page_size) as usize;
        ItemPage {
            items: matching
                .iter()
                .skip(start)
                .take(page_size as usize)
                .map(|item| (*item).clone())
                .collect(),
            total_count: matching.len() as u64,
        }
    }

    fn update(&mut self, id: ItemId, change: impl FnOnce(&mut Item)) -> Result<Item, StoreError> {
        match self.items.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                change(item);
                Ok(item.clone())
            }
            None => Err(StoreError::Server {
                code: 404,
                message: format!("item {id} not found"),
            }),
        }
    }

    fn answer(&mut self, request: Request) {
        match request {
            Request::ListByStatus {
                status,
                page,
                page_size,
                filter,
                reply,
            } => {
                let _ = reply.send(Ok(self.page_of(Some(status), page, page_size, &filter)));
            }
            Request::ListPage {
                page,
                page_size,
                filter,
                reply,
            } => {
                let _ = reply.send(Ok(self.page_of(None, page, page_size, &filter)));
            }
            Request::UpdateStatus { id, status, reply } => {
                let _ = reply.send(self.update(id, |item| item.status = status));
            }
            Request::UpdateProgress {
                id,
                progress,
                reply,
            } => {
                let _ = reply.send(self.update(id, |item| item.progress = progress));
            }
            Request::Create { create, reply } => {
                let next = self.items.iter().map(|item| item.id.0).max().unwrap_or(0) + 1;
                let mut item = Item::new(ItemId(next), create.name, Status::Planning);
                item.priority = create.priority;
                item.category = create.category;
                self.items.push(item.clone());
                let _ = reply.send(Ok(item));
            }
            Request::Delete { id, reply } => {
                self.items.retain(|item| item.id != id);
                let _ = reply.send(Ok(()));
            }
        }
    }
}

fn reply_err(request: Request, err: StoreError) {
    match request {
        Request::UpdateStatus { reply, .. } | Request::UpdateProgress { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        Request::ListByStatus { reply, .. } | Request::ListPage { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        Request::Create { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        Request::Delete { reply, .. } => {
            let _ = reply.send(Err(err));
        }
    }
}

type Engine = Arc<SyncEngine<GatedStore>>;

struct Harness {
    engine: Engine,
    requests: mpsc::UnboundedReceiver<Request>,
    server: Server,
}

impl Harness {
    fn new(server: Server) -> Self {
        let (tx, requests) = mpsc::unbounded_channel();
        let engine = SyncEngine::new(GatedStore { requests: tx }, BoardConfig::default());
        Self {
            engine: Arc::new(engine),
            requests,
            server,
        }
    }

    fn spawn<F, Fut, T>(&self, intent: F) -> JoinHandle<T>
    where
        F: FnOnce(Engine) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(intent(self.engine.clone()))
    }

    async fn next(&mut self) -> Request {
        tokio::time::timeout(Duration::from_secs(2), self.requests.recv())
            .await
            .expect("store request in time")
            .expect("store channel open")
    }

    async fn serve(&mut self, count: usize) {
        for _ in 0..count {
            let request = self.next().await;
            self.server.answer(request);
        }
    }

    fn idle(&mut self) -> bool {
        matches!(self.requests.try_recv(), Err(TryRecvError::Empty))
    }

    async fn load(&mut self, status: Status) -> LoadOutcome {
        let task = self.spawn(move |engine| async move { engine.load_more(status).await });
        self.serve(1).await;
        task.await.expect("join").expect("load")
    }

    /// Four columns plus the grid page.
    async fn refresh(&mut self) {
        let task = self.spawn(|engine| async move { engine.refresh_all().await });
        self.serve(5).await;
        let summary = task.await.expect("join");
        assert!(summary.is_complete(), "refresh failed: {:?}", summary.failures());
    }
}

#[tokio::test]
async fn three_loads_exhaust_a_column() {
    let mut h = Harness::new(Server::default().with(Status::Pending, 1..26));

    for page in 1..=3 {
        let outcome = h.load(Status::Pending).await;
        assert_eq!(
            outcome,
            LoadOutcome::Applied {
                page,
                appended: if page == 3 { 5 } else { 10 },
                has_more: page < 3,
            }
        );
    }

    let snapshot = h.engine.snapshot();
    let pending = snapshot.column(Status::Pending).expect("pending column");
    assert_eq!(pending.current_page, 3);
    assert_eq!(pending.items.len(), 25);
    assert_eq!(pending.total_count, 25);
    assert!(!pending.has_more);

    let outcome = h.engine.load_more(Status::Pending).await.expect("load");
    assert_eq!(
        outcome,
        LoadOutcome::Skipped {
            reason: SkipReason::Exhausted
        }
    );
    assert!(h.idle(), "no request after the last page");
}

#[tokio::test]
async fn only_one_page_request_per_column() {
    let mut h = Harness::new(Server::default().with(Status::Active, 1..40));

    let first = h.spawn(|engine| async move { engine.load_more(Status::Active).await });
    let request = h.next().await;
    assert!(matches!(request, Request::ListByStatus { page: 1, .. }));

    let second = h.engine.load_more(Status::Active).await.expect("load");
    assert_eq!(
        second,
        LoadOutcome::Skipped {
            reason: SkipReason::InFlight
        }
    );
    assert!(h.engine.snapshot().column(Status::Active).is_some_and(|c| c.is_loading));

    h.server.answer(request);
    assert!(first.await.expect("join").expect("load").is_applied());
    assert!(h.idle());
}

#[tokio::test]
async fn rejected_move_is_reverted() {
    let mut h = Harness::new(
        Server::default()
            .with(Status::Pending, 40..45)
            .with(Status::Active, 1..3),
    );
    h.load(Status::Pending).await;
    h.load(Status::Active).await;
    let before = h.engine.snapshot();
    let mut events = h.engine.events();

    let task = h.spawn(|engine| async move {
        engine
            .move_item(ItemId(42), Status::Pending, Status::Active)
            .await
    });
    let request = h.next().await;
    assert!(matches!(
        request,
        Request::UpdateStatus {
            id: ItemId(42),
            status: Status::Active,
            ..
        }
    ));

    let optimistic = h.engine.snapshot();
    assert_eq!(optimistic.column_of(ItemId(42)), Some(Status::Active));
    assert_eq!(optimistic.column(Status::Active).expect("active").ids()[0], ItemId(42));
    assert_eq!(optimistic.column(Status::Pending).map(|c| c.total_count), Some(4));
    assert_eq!(optimistic.column(Status::Active).map(|c| c.total_count), Some(3));
    assert!(optimistic.is_pending(ItemId(42)));

    reply_err(request, StoreError::Rejected("transition not allowed".to_string()));
    let err = task.await.expect("join").expect_err("rejected");
    let change = MutationKind::Move {
        previous: Status::Pending,
        next: Status::Active,
    };
    assert_eq!(
        err,
        SyncError::RejectedMutation {
            item: ItemId(42),
            change,
            reason: "transition not allowed".to_string(),
        }
    );
    assert!(!err.is_retryable());

    let after = h.engine.snapshot();
    assert_eq!(after.columns, before.columns);
    assert!(after.pending.is_empty());
    assert!(h.engine.pending_mutation(ItemId(42)).is_none());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(BoardEvent::MutationApplied { .. })));
    assert!(seen.iter().any(|event| matches!(
        event,
        BoardEvent::MutationReverted {
            item: ItemId(42),
            retryable: false,
            superseded: false,
            ..
        }
    )));
}

#[tokio::test]
async fn rejected_move_keeps_counts_from_pages_loaded_meanwhile() {
    let mut h = Harness::new(
        Server::default()
            .with(Status::Pending, 1..26)
            .with(Status::Active, 30..45),
    );
    h.load(Status::Pending).await;
    h.load(Status::Active).await;

    let task = h.spawn(|engine| async move {
        engine
            .move_item(ItemId(5), Status::Pending, Status::Active)
            .await
    });
    let request = h.next().await;
    let optimistic = h.engine.snapshot();
    assert_eq!(optimistic.column(Status::Pending).map(|c| c.total_count), Some(24));
    assert_eq!(optimistic.column(Status::Active).map(|c| c.total_count), Some(16));

    // Both columns take their next page while the move is unresolved.
    h.load(Status::Pending).await;
    h.load(Status::Active).await;
    let loaded = h.engine.snapshot();
    assert_eq!(loaded.column(Status::Pending).map(|c| c.total_count), Some(25));
    assert_eq!(loaded.column(Status::Active).map(|c| c.total_count), Some(15));

    reply_err(request, StoreError::Rejected("locked".to_string()));
    task.await.expect("join").expect_err("rejected");

    let after = h.engine.snapshot();
    let pending = after.column(Status::Pending).expect("pending");
    assert_eq!(pending.total_count, 25);
    assert_eq!(pending.ids(), (1..21).map(ItemId).collect::<Vec<_>>());
    let active = after.column(Status::Active).expect("active");
    assert_eq!(active.total_count, 15);
    assert_eq!(active.ids(), (30..45).map(ItemId).collect::<Vec<_>>());
    assert!(!active.has_more);
}

#[tokio::test]
async fn second_change_while_first_in_flight_is_refused() {
    let mut h = Harness::new(Server::default().with(Status::Pending, 5..10));
    h.load(Status::Pending).await;

    let first = h.spawn(|engine| async move { engine.set_status(ItemId(7), Status::Done).await });
    let request = h.next().await;

    let second = h.engine.set_status(ItemId(7), Status::Done).await;
    assert_eq!(second, Err(SyncError::MutationInFlight(ItemId(7))));

    h.server.answer(request);
    let outcome = first.await.expect("join").expect("confirmed");
    assert!(matches!(outcome, MutationOutcome::Confirmed(ref item) if item.status == Status::Done));

    let snapshot = h.engine.snapshot();
    let done = snapshot.column(Status::Done).expect("done column");
    assert_eq!(done.ids(), vec![ItemId(7)]);
    assert_eq!(snapshot.column_of(ItemId(7)), Some(Status::Done));
    assert!(snapshot.pending.is_empty());
    assert!(h.idle(), "the refused change never reached the store");
}

#[tokio::test]
async fn refresh_discards_outstanding_page() {
    let mut h = Harness::new(Server::default().with(Status::Active, 100..130));
    h.load(Status::Active).await;

    let page_two = h.spawn(|engine| async move { engine.load_more(Status::Active).await });
    let stale = h.next().await;
    assert!(matches!(
        stale,
        Request::ListByStatus {
            status: Status::Active,
            page: 2,
            ..
        }
    ));

    h.refresh().await;
    let active = h.engine.snapshot();
    let column = active.column(Status::Active).expect("active");
    assert_eq!(column.current_page, 1);
    assert_eq!(column.items.len(), 10);
    assert_eq!(active.generation, 1);

    h.server.answer(stale);
    assert_eq!(page_two.await.expect("join"), Ok(LoadOutcome::Stale));

    let after = h.engine.snapshot();
    assert_eq!(after.column(Status::Active), Some(column));
}

#[tokio::test]
async fn refresh_supersedes_pending_mutation() {
    let mut h = Harness::new(Server::default().with(Status::Pending, 1..5));
    h.load(Status::Pending).await;
    let mut events = h.engine.events();

    let rejected = h.spawn(|engine| async move {
        engine
            .move_item(ItemId(1), Status::Pending, Status::Active)
            .await
    });
    let move_request = h.next().await;

    let progress = h.spawn(|engine| async move { engine.set_progress(ItemId(2), 30).await });
    let progress_request = h.next().await;

    h.refresh().await;
    let refreshed = h.engine.snapshot();
    assert_eq!(refreshed.column_of(ItemId(1)), Some(Status::Pending));
    assert_eq!(refreshed.pending, vec![ItemId(1), ItemId(2)]);

    reply_err(move_request, StoreError::Rejected("locked".to_string()));
    assert!(matches!(
        rejected.await.expect("join"),
        Err(SyncError::RejectedMutation { item: ItemId(1), .. })
    ));

    h.server.answer(progress_request);
    let outcome = progress.await.expect("join").expect("accepted");
    assert!(matches!(outcome, MutationOutcome::Superseded(ref item) if item.progress == 30));

    // Neither reply touched the refreshed windows.
    let after = h.engine.snapshot();
    assert_eq!(after.columns, refreshed.columns);
    assert_eq!(after.column(Status::Pending).map(|c| c.items.len()), Some(4));
    assert!(after.column(Status::Active).is_some_and(|c| c.items.is_empty()));
    assert!(after.pending.is_empty());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.iter().any(|event| matches!(
        event,
        BoardEvent::MutationReverted {
            item: ItemId(1),
            superseded: true,
            ..
        }
    )));
    assert!(seen.iter().any(|event| matches!(
        event,
        BoardEvent::MutationConfirmed {
            item: ItemId(2),
            superseded: true,
            ..
        }
    )));
}

#[tokio::test]
async fn status_off_the_board_comes_back_where_the_server_files_it() {
    let mut h = Harness::new(Server::default().with(Status::Pending, 1..4));
    h.load(Status::Pending).await;

    let task = h.spawn(|engine| async move { engine.set_status(ItemId(2), Status::Cancelled).await });
    let request = h.next().await;
    assert_eq!(h.engine.snapshot().column_of(ItemId(2)), None);

    match request {
        Request::UpdateStatus { reply, .. } => {
            let _ = reply.send(Ok(Item::new(ItemId(2), "item 2", Status::Active)));
        }
        other => panic!("expected a status update, got {other:?}"),
    }
    let outcome = task.await.expect("join").expect("confirmed");
    assert!(matches!(outcome, MutationOutcome::Confirmed(ref item) if item.status == Status::Active));

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.column_of(ItemId(2)), Some(Status::Active));
    assert_eq!(snapshot.column(Status::Active).map(|c| c.total_count), Some(1));
    assert_eq!(snapshot.column(Status::Pending).map(|c| c.total_count), Some(2));
}

#[tokio::test]
async fn failed_progress_change_is_reverted() {
    let mut h = Harness::new(Server::default().with(Status::Active, 1..4));
    h.load(Status::Active).await;

    let task = h.spawn(|engine| async move { engine.set_progress(ItemId(2), 60).await });
    let request = h.next().await;
    let item_progress = |h: &Harness| {
        h.engine
            .snapshot()
            .column(Status::Active)
            .and_then(|c| c.items.iter().find(|i| i.id == ItemId(2)).map(|i| i.progress))
    };
    assert_eq!(item_progress(&h), Some(60));

    reply_err(request, StoreError::Network("timeout".to_string()));
    let err = task.await.expect("join").expect_err("network failure");
    assert!(err.is_retryable());
    assert_eq!(item_progress(&h), Some(0));

    assert_eq!(
        h.engine.set_progress(ItemId(2), 101).await,
        Err(SyncError::InvalidProgress(101))
    );
    assert!(h.idle());
}

#[tokio::test]
async fn failed_load_keeps_column_and_retries_same_page() {
    let mut h = Harness::new(Server::default().with(Status::Done, 1..16));
    h.load(Status::Done).await;

    let task = h.spawn(|engine| async move { engine.load_more(Status::Done).await });
    let request = h.next().await;
    reply_err(request, StoreError::Network("connection reset".to_string()));
    let err = task.await.expect("join").expect_err("load failure");
    assert!(err.is_retryable());

    let snapshot = h.engine.snapshot();
    let done = snapshot.column(Status::Done).expect("done");
    assert_eq!(done.items.len(), 10);
    assert!(!done.is_loading);
    assert!(done.last_error.is_some());

    assert_eq!(
        h.load(Status::Done).await,
        LoadOutcome::Applied {
            page: 2,
            appended: 5,
            has_more: false
        }
    );
    assert!(h.engine.snapshot().column(Status::Done).is_some_and(|c| c.last_error.is_none()));
}

#[tokio::test]
async fn filter_reaches_every_request() {
    let mut h = Harness::new(
        Server::default()
            .with(Status::Pending, 1..6)
            .with(Status::Active, 6..9)
            .rename(2, "Alpha launch")
            .rename(7, "alpha review"),
    );

    let filter = BoardFilter {
        search: Some("alpha".to_string()),
        ..BoardFilter::default()
    };
    let task = {
        let filter = filter.clone();
        h.spawn(move |engine| async move { engine.set_filter(filter).await })
    };

    for _ in 0..5 {
        let request = h.next().await;
        match &request {
            Request::ListByStatus { filter: sent, .. } | Request::ListPage { filter: sent, .. } => {
                assert_eq!(sent, &filter);
            }
            other => panic!("unexpected request {other:?}"),
        }
        h.server.answer(request);
    }
    assert!(task.await.expect("join").is_complete());

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.column(Status::Pending).map(|c| c.ids()), Some(vec![ItemId(2)]));
    assert_eq!(snapshot.column(Status::Active).map(|c| c.ids()), Some(vec![ItemId(7)]));
    assert_eq!(snapshot.flat.total_count, 2);
    assert_eq!(h.engine.filter(), filter);
}

#[tokio::test]
async fn newest_grid_page_request_wins() {
    let mut h = Harness::new(Server::default().with(Status::Planning, 1..81));

    let older = h.spawn(|engine| async move { engine.change_flat_page(2, 25).await });
    let older_request = h.next().await;
    let newer = h.spawn(|engine| async move { engine.change_flat_page(4, 25).await });
    let newer_request = h.next().await;

    h.server.answer(newer_request);
    assert_eq!(
        newer.await.expect("join"),
        Ok(LoadOutcome::Applied {
            page: 4,
            appended: 5,
            has_more: false
        })
    );

    h.server.answer(older_request);
    assert_eq!(older.await.expect("join"), Ok(LoadOutcome::Stale));

    let flat = h.engine.snapshot().flat;
    assert_eq!(flat.page, 4);
    assert_eq!(flat.total_pages, 4);
    assert_eq!(flat.items.first().map(|i| i.id), Some(ItemId(76)));

    assert_eq!(
        h.engine.change_flat_page(1, 30).await,
        Err(SyncError::InvalidPage {
            page: 1,
            page_size: 30
        })
    );
    assert_eq!(
        h.engine.change_flat_page(0, 25).await,
        Err(SyncError::InvalidPage {
            page: 0,
            page_size: 25
        })
    );
    assert!(h.idle());
}

#[tokio::test]
async fn moves_are_limited_to_board_columns() {
    let mut h = Harness::new(Server::default().with(Status::Pending, 1..3));
    h.load(Status::Pending).await;

    assert_eq!(
        h.engine
            .move_item(ItemId(1), Status::Pending, Status::Cancelled)
            .await,
        Err(SyncError::UnknownColumn(Status::Cancelled))
    );
    assert_eq!(
        h.engine
            .move_item(ItemId(1), Status::Active, Status::Done)
            .await,
        Err(SyncError::NotInColumn {
            item: ItemId(1),
            column: Status::Active
        })
    );
    assert_eq!(
        h.engine.set_status(ItemId(1), Status::Pending).await,
        Ok(MutationOutcome::Unchanged)
    );
    assert!(h.idle());
}

#[tokio::test]
async fn create_and_delete_reload_the_board() {
    let mut h = Harness::new(Server::default().with(Status::Pending, 1..3));
    h.refresh().await;

    let create = ItemCreate {
        name: "New site survey".to_string(),
        description: String::new(),
        priority: Default::default(),
        category: None,
        deadline: None,
    };
    let task = h.spawn(move |engine| async move { engine.create_item(create).await });
    h.serve(6).await;
    let created = task.await.expect("join").expect("created");
    assert_eq!(created.id, ItemId(3));
    assert_eq!(h.engine.snapshot().flat.total_count, 3);

    let task = h.spawn(|engine| async move { engine.delete_item(ItemId(1)).await });
    h.serve(6).await;
    task.await.expect("join").expect("deleted");

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.column(Status::Pending).map(|c| c.ids()), Some(vec![ItemId(2)]));
    assert_eq!(snapshot.generation, 3);
}
