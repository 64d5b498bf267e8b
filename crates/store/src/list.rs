//! Gated list and detail caches.
//!
//! A store only fetches while its gate is open. Every load aborts the one
//! before it and only the latest load may write, so a slow response for an old
//! filter or page can never overwrite a newer one.

use crate::{Notice, Notices};
use async_trait::async_trait;
use client::Pagination;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

/// An item with a stable identifier.
pub trait Record {
    fn id(&self) -> &str;
}

impl Record for client::Contract {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub count: u64,
}

#[async_trait]
pub trait ListSource: Send + Sync + 'static {
    type Item: Record + Clone + Send + Sync + 'static;
    type Filter: Clone + Send + Sync + 'static;

    async fn fetch(&self, filter: &Self::Filter, pagination: Pagination) -> eyre::Result<Page<Self::Item>>;
}

#[async_trait]
pub trait DetailSource: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;
    type Key: Clone + Send + Sync + 'static;

    async fn fetch(&self, key: &Self::Key) -> eyre::Result<Option<Self::Item>>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Last-request-wins bookkeeping shared by both stores.
#[derive(Default)]
struct Latest {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Latest {
    /// Invalidate the running load and return the generation of the next one.
    fn supersede(&mut self) -> u64 {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
        self.generation
    }

    const fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

/// Wait until no load is running.
async fn settle<S>(state: &Mutex<S>, latest: impl Fn(&mut S) -> &mut Latest) {
    loop {
        let task = {
            let mut guard = lock(state);
            latest(&mut *guard).task.take()
        };
        let Some(task) = task else {
            return;
        };
        // Aborted loads resolve with a cancellation error.
        let _ = task.await;
    }
}

fn spawn(task: impl std::future::Future<Output = ()> + Send + 'static) -> Option<JoinHandle<()>> {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => Some(runtime.spawn(task)),
        Err(_) => {
            warn!("No async runtime, skipping load");
            None
        }
    }
}

struct ListState<T, F> {
    open: bool,
    filter: Option<F>,
    pagination: Pagination,
    items: Vec<T>,
    count: u64,
    loading: bool,
    pending: HashSet<String>,
    latest: Latest,
}

impl<T, F> Default for ListState<T, F> {
    fn default() -> Self {
        Self {
            open: false,
            filter: None,
            pagination: Pagination::default(),
            items: Vec::new(),
            count: 0,
            loading: false,
            pending: HashSet::new(),
            latest: Latest::default(),
        }
    }
}

/// Paginated list cache over a [`ListSource`].
pub struct ListStore<S: ListSource> {
    source: Arc<S>,
    state: Arc<Mutex<ListState<S::Item, S::Filter>>>,
    notices: Notices,
}

impl<S: ListSource> Clone for ListStore<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            state: Arc::clone(&self.state),
            notices: self.notices.clone(),
        }
    }
}

impl<S: ListSource> ListStore<S> {
    pub fn new(source: Arc<S>, notices: Notices) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(ListState::default())),
            notices,
        }
    }

    /// Open the gate and load the first page for `filter`.
    pub fn open(&self, filter: S::Filter) {
        let mut state = lock(&self.state);
        state.open = true;
        state.filter = Some(filter);
        state.pagination.offset = 0;
        self.load(&mut state);
    }

    /// Close the gate, dropping content and any load in flight.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.latest.supersede();
        let latest = std::mem::take(&mut state.latest);
        *state = ListState {
            latest,
            ..ListState::default()
        };
    }

    pub fn set_filter(&self, filter: S::Filter) {
        let mut state = lock(&self.state);
        state.filter = Some(filter);
        state.pagination.offset = 0;
        self.load(&mut state);
    }

    pub fn set_page(&self, pagination: Pagination) {
        let mut state = lock(&self.state);
        state.pagination = pagination;
        self.load(&mut state);
    }

    pub fn refresh(&self) {
        let mut state = lock(&self.state);
        self.load(&mut state);
    }

    /// Reload on every message from `updates`, and every `interval` when
    /// given. Stops once `updates` closes and there is nothing to poll.
    pub fn refresh_on<T: Send + 'static>(
        &self,
        updates: mpsc::Receiver<T>,
        interval: Option<Duration>,
    ) -> JoinHandle<()> {
        let store = self.clone();

        tokio::spawn(async move {
            let mut updates = Some(updates);
            let mut ticker = interval.map(|period| {
                let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker
            });

            loop {
                // Some(received) for the feed, None for a poll tick.
                let woke = {
                    let update = async {
                        match updates.as_mut() {
                            Some(updates) => Some(updates.recv().await.is_some()),
                            None => std::future::pending().await,
                        }
                    };
                    let tick = async {
                        match ticker.as_mut() {
                            Some(ticker) => {
                                ticker.tick().await;
                                None
                            }
                            None => std::future::pending().await,
                        }
                    };
                    tokio::select! {
                        woke = update => woke,
                        woke = tick => woke,
                    }
                };

                match woke {
                    Some(true) => debug!("Metrics updated, reloading list"),
                    Some(false) => {
                        debug!("List update feed closed");
                        updates = None;
                        if ticker.is_none() {
                            break;
                        }
                        continue;
                    }
                    None => debug!("Polling list"),
                }
                store.refresh();
            }
        })
    }

    /// Drop content and pending flags, then reload if open.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.items.clear();
        state.count = 0;
        state.pending.clear();
        self.load(&mut state);
    }

    fn load(&self, state: &mut ListState<S::Item, S::Filter>) {
        let generation = state.latest.supersede();
        let (true, Some(filter)) = (state.open, state.filter.clone()) else {
            state.loading = false;
            return;
        };
        let pagination = state.pagination;
        state.loading = true;

        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.state);
        let notices = self.notices.clone();

        state.latest.task = spawn(async move {
            let result = source.fetch(&filter, pagination).await;

            let mut state = lock(&shared);
            if !state.latest.is_current(generation) {
                debug!(generation, "Discarding stale list response");
                return;
            }
            state.loading = false;
            state.latest.task = None;

            match result {
                Ok(page) => {
                    state.items = page.items;
                    state.count = page.count;
                }
                Err(e) => {
                    warn!(error = %e, "List load failed");
                    notices.push(Notice::error(format!("{e:#}")));
                }
            }
        });
        if state.latest.task.is_none() {
            state.loading = false;
        }
    }

    /// Wait for the load in flight, if any.
    pub async fn settled(&self) {
        settle(&self.state, |state| &mut state.latest).await;
    }

    pub fn items(&self) -> Vec<S::Item> {
        lock(&self.state).items.clone()
    }

    pub fn count(&self) -> u64 {
        lock(&self.state).count
    }

    pub fn pagination(&self) -> Pagination {
        lock(&self.state).pagination
    }

    pub fn filter(&self) -> Option<S::Filter> {
        lock(&self.state).filter.clone()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.state).loading
    }

    pub fn get(&self, id: &str) -> Option<S::Item> {
        lock(&self.state)
            .items
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    /// Optimistically drop an item confirmed gone upstream.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = lock(&self.state);
        let before = state.items.len();
        state.items.retain(|item| item.id() != id);
        let removed = state.items.len() < before;
        if removed {
            state.count = state.count.saturating_sub(1);
        }
        state.pending.remove(id);
        removed
    }

    /// Optimistically patch an item in place.
    pub fn update(&self, id: &str, patch: impl FnOnce(&mut S::Item)) -> bool {
        let mut state = lock(&self.state);
        match state.items.iter_mut().find(|item| item.id() == id) {
            Some(item) => {
                patch(item);
                true
            }
            None => false,
        }
    }

    /// Flag an item as having an operation in flight. Items are not touched.
    pub fn mark_pending(&self, id: &str, pending: bool) {
        let mut state = lock(&self.state);
        if pending {
            state.pending.insert(id.to_string());
        } else {
            state.pending.remove(id);
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        lock(&self.state).pending.contains(id)
    }
}

struct DetailState<T, K> {
    key: Option<K>,
    item: Option<T>,
    loading: bool,
    latest: Latest,
}

impl<T, K> Default for DetailState<T, K> {
    fn default() -> Self {
        Self {
            key: None,
            item: None,
            loading: false,
            latest: Latest::default(),
        }
    }
}

/// Single-item cache over a [`DetailSource`].
pub struct DetailStore<S: DetailSource> {
    source: Arc<S>,
    state: Arc<Mutex<DetailState<S::Item, S::Key>>>,
    notices: Notices,
}

impl<S: DetailSource> Clone for DetailStore<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            state: Arc::clone(&self.state),
            notices: self.notices.clone(),
        }
    }
}

impl<S: DetailSource> DetailStore<S> {
    pub fn new(source: Arc<S>, notices: Notices) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(DetailState::default())),
            notices,
        }
    }

    pub fn open(&self, key: S::Key) {
        let mut state = lock(&self.state);
        state.key = Some(key);
        state.item = None;
        self.load(&mut state);
    }

    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.latest.supersede();
        state.key = None;
        state.item = None;
        state.loading = false;
    }

    pub fn refresh(&self) {
        let mut state = lock(&self.state);
        self.load(&mut state);
    }

    fn load(&self, state: &mut DetailState<S::Item, S::Key>) {
        let generation = state.latest.supersede();
        let Some(key) = state.key.clone() else {
            state.loading = false;
            return;
        };
        state.loading = true;

        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.state);
        let notices = self.notices.clone();

        state.latest.task = spawn(async move {
            let result = source.fetch(&key).await;

            let mut state = lock(&shared);
            if !state.latest.is_current(generation) {
                debug!(generation, "Discarding stale detail response");
                return;
            }
            state.loading = false;
            state.latest.task = None;

            match result {
                Ok(item) => state.item = item,
                Err(e) => {
                    warn!(error = %e, "Detail load failed");
                    notices.push(Notice::error(format!("{e:#}")));
                }
            }
        });
        if state.latest.task.is_none() {
            state.loading = false;
        }
    }

    pub async fn settled(&self) {
        settle(&self.state, |state| &mut state.latest).await;
    }

    pub fn item(&self) -> Option<S::Item> {
        lock(&self.state).item.clone()
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.state).loading
    }

    pub fn update(&self, patch: impl FnOnce(&mut S::Item)) -> bool {
        lock(&self.state).item.as_mut().map(patch).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, time::Duration};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Item {
        id: String,
        staked: u64,
    }

    impl Record for Item {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn item(id: &str, staked: u64) -> Item {
        Item {
            id: id.to_string(),
            staked,
        }
    }

    /// Serves `offset` as page content, with a per-offset delay.
    struct Pages {
        delays: HashMap<u64, u64>,
        fail: bool,
    }

    #[async_trait]
    impl ListSource for Pages {
        type Item = Item;
        type Filter = String;

        async fn fetch(&self, filter: &String, pagination: Pagination) -> eyre::Result<Page<Item>> {
            let delay = self.delays.get(&pagination.offset).copied().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if self.fail {
                eyre::bail!("backend unavailable");
            }
            Ok(Page {
                items: vec![item(&format!("{filter}-{}", pagination.offset), pagination.offset)],
                count: 100,
            })
        }
    }

    fn store(delays: &[(u64, u64)], fail: bool) -> (ListStore<Pages>, Notices) {
        let notices = Notices::new(16);
        let source = Pages {
            delays: delays.iter().copied().collect(),
            fail,
        };
        (ListStore::new(Arc::new(source), notices.clone()), notices)
    }

    fn page(offset: u64) -> Pagination {
        Pagination { offset, limit: 10 }
    }

    #[tokio::test]
    async fn test_closed_gate_does_not_fetch() {
        let (store, _) = store(&[], false);
        store.set_page(page(10));
        store.settled().await;

        assert!(store.items().is_empty());
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn test_open_loads_first_page() {
        let (store, _) = store(&[], false);
        store.open("pool".to_string());
        store.settled().await;

        assert_eq!(store.items(), vec![item("pool-0", 0)]);
        assert_eq!(store.count(), 100);
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn test_only_latest_page_is_written() {
        let (store, _) = store(&[(10, 200), (20, 0)], false);
        store.open("pool".to_string());
        store.settled().await;

        store.set_page(page(10));
        store.set_page(page(20));
        store.settled().await;
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(store.items(), vec![item("pool-20", 20)]);
        assert_eq!(store.pagination(), page(20));
    }

    #[tokio::test]
    async fn test_filter_change_resets_offset() {
        let (store, _) = store(&[], false);
        store.open("a".to_string());
        store.set_page(page(30));
        store.set_filter("b".to_string());
        store.settled().await;

        assert_eq!(store.items(), vec![item("b-0", 0)]);
    }

    #[tokio::test]
    async fn test_error_keeps_content_and_notifies() {
        let (store, notices) = store(&[], true);
        let mut receiver = notices.subscribe();
        store.open("pool".to_string());
        store.settled().await;

        assert!(store.items().is_empty());
        let notice = receiver.try_recv().unwrap();
        assert_eq!(notice.level, crate::NoticeLevel::Error);
        assert!(notice.message.contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_close_discards_in_flight() {
        let (store, _) = store(&[(0, 100)], false);
        store.open("pool".to_string());
        store.close();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(store.items().is_empty());
        assert!(!store.is_open());
    }

    #[tokio::test]
    async fn test_patches_and_pending_flags() {
        let (store, _) = store(&[], false);
        store.open("pool".to_string());
        store.settled().await;

        store.mark_pending("pool-0", true);
        assert!(store.is_pending("pool-0"));
        assert_eq!(store.items().len(), 1);

        assert!(store.update("pool-0", |item| item.staked = 42));
        assert_eq!(store.get("pool-0").unwrap().staked, 42);

        assert!(store.remove("pool-0"));
        assert!(!store.is_pending("pool-0"));
        assert!(store.items().is_empty());
        assert_eq!(store.count(), 99);
        assert!(!store.remove("pool-0"));
    }

    #[tokio::test]
    async fn test_reset_clears_pending_and_reloads() {
        let (store, _) = store(&[], false);
        store.open("pool".to_string());
        store.settled().await;
        store.mark_pending("pool-0", true);

        store.reset();
        assert!(!store.is_pending("pool-0"));
        store.settled().await;
        assert_eq!(store.items().len(), 1);
    }

    /// Reports how many times it was fetched as the staked value.
    #[derive(Default)]
    struct Counter {
        fetches: std::sync::atomic::AtomicU64,
    }

    #[async_trait]
    impl ListSource for Counter {
        type Item = Item;
        type Filter = String;

        async fn fetch(&self, filter: &String, _pagination: Pagination) -> eyre::Result<Page<Item>> {
            let fetches = self.fetches.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            Ok(Page {
                items: vec![item(filter, fetches)],
                count: 1,
            })
        }
    }

    async fn wait_for_staked(store: &ListStore<Counter>, staked: u64) {
        for _ in 0..100 {
            store.settled().await;
            if store.get("pool").is_some_and(|item| item.staked >= staked) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("list never reloaded to {staked}");
    }

    #[tokio::test]
    async fn test_update_feed_reloads() {
        let store = ListStore::new(Arc::new(Counter::default()), Notices::new(4));
        store.open("pool".to_string());
        wait_for_staked(&store, 1).await;

        let (updates, feed) = mpsc::channel(4);
        let follower = store.refresh_on(feed, None);

        updates.send("metric-1").await.unwrap();
        wait_for_staked(&store, 2).await;

        drop(updates);
        follower.await.unwrap();
        assert_eq!(store.get("pool").unwrap().staked, 2);
    }

    #[tokio::test]
    async fn test_update_feed_polls_on_interval() {
        let store = ListStore::new(Arc::new(Counter::default()), Notices::new(4));
        store.open("pool".to_string());
        wait_for_staked(&store, 1).await;

        let (_updates, feed) = mpsc::channel::<()>(1);
        let follower = store.refresh_on(feed, Some(Duration::from_millis(20)));
        wait_for_staked(&store, 3).await;

        follower.abort();
    }

    struct Lookup;

    #[async_trait]
    impl DetailSource for Lookup {
        type Item = Item;
        type Key = String;

        async fn fetch(&self, key: &String) -> eyre::Result<Option<Item>> {
            if key == "slow" {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Ok((key != "missing").then(|| item(key, 1)))
        }
    }

    #[tokio::test]
    async fn test_detail_latest_wins() {
        let store = DetailStore::new(Arc::new(Lookup), Notices::new(4));
        store.open("slow".to_string());
        store.open("fast".to_string());
        store.settled().await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.item(), Some(item("fast", 1)));

        store.open("missing".to_string());
        store.settled().await;
        assert!(store.item().is_none());
    }
}
