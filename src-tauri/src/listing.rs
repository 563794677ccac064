//! List-page controller: filter state, debounced search, and realtime
//! re-synchronisation for one collection.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::Record;
use crate::remote::{decode_rows, CollectionStore, FeedItem, SelectQuery};

pub const ALL_CATEGORIES: &str = "All";

/// Everything a list page renders, published on a watch channel whenever it
/// changes.
#[derive(Debug, Clone, Serialize)]
pub struct ListSnapshot<R> {
    pub items: Vec<R>,
    pub categories: Vec<String>,
    pub selected_category: String,
    pub search_term: String,
    pub loading: bool,
    pub error: Option<String>,
    /// Set when the change feed drops. Stays up until the page is reloaded;
    /// there is no automatic reconnect to clear it.
    pub realtime_error: Option<String>,
}

impl<R> Default for ListSnapshot<R> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            categories: vec![ALL_CATEGORIES.to_string()],
            selected_category: ALL_CATEGORIES.to_string(),
            search_term: String::new(),
            loading: true,
            error: None,
            realtime_error: None,
        }
    }
}

struct Inner {
    selected_category: String,
    search_term: String,
    /// Token of the most recently issued fetch. A response is applied only
    /// if its token still equals this, so a slow early query can never
    /// overwrite the result of a later one.
    issued_seq: u64,
    pending_search: Option<JoinHandle<()>>,
    feed: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct ListController<R: Record> {
    store: Arc<dyn CollectionStore>,
    debounce: Duration,
    inner: Arc<Mutex<Inner>>,
    snapshot_tx: Arc<watch::Sender<ListSnapshot<R>>>,
}

impl<R: Record> ListController<R> {
    pub fn new(store: Arc<dyn CollectionStore>, debounce: Duration) -> Self {
        let (snapshot_tx, _) = watch::channel(ListSnapshot::default());
        Self {
            store,
            debounce,
            inner: Arc::new(Mutex::new(Inner {
                selected_category: ALL_CATEGORIES.to_string(),
                search_term: String::new(),
                issued_seq: 0,
                pending_search: None,
                feed: None,
            })),
            snapshot_tx: Arc::new(snapshot_tx),
        }
    }

    pub fn snapshot(&self) -> ListSnapshot<R> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn snapshots(&self) -> watch::Receiver<ListSnapshot<R>> {
        self.snapshot_tx.subscribe()
    }

    /// Derives the category list, loads the first page and opens the change
    /// feed. Called when the list page mounts.
    pub async fn activate(&self) {
        // re-activation replaces any previous feed
        if let Some(feed) = self.inner.lock().await.feed.take() {
            feed.abort();
        }

        self.refresh_categories().await;
        self.run_fetch().await;

        let mut subscription = match self.store.subscribe(R::COLLECTION).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("change feed subscription failed: {e}");
                self.set_realtime_error(e.to_string());
                return;
            }
        };

        let this = self.clone();
        let feed = tokio::spawn(async move {
            while let Some(item) = subscription.next().await {
                match item {
                    FeedItem::Change(event) => {
                        debug!(?event, "change received, refetching");
                        this.run_fetch().await;
                        this.refresh_categories().await;
                    }
                    FeedItem::Lost(reason) => {
                        this.set_realtime_error(reason);
                        return;
                    }
                }
            }
        });
        self.inner.lock().await.feed = Some(feed);
    }

    /// Tears down the change feed and any pending debounced fetch. Aborting
    /// the feed task drops its `Subscription`, which stops the reader.
    pub async fn deactivate(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(feed) = inner.feed.take() {
            feed.abort();
        }
        if let Some(pending) = inner.pending_search.take() {
            pending.abort();
        }
    }

    /// Category filter changes refetch immediately.
    pub async fn set_category(&self, category: String) {
        {
            let mut inner = self.inner.lock().await;
            inner.selected_category = category.clone();
        }
        self.snapshot_tx
            .send_modify(|snapshot| snapshot.selected_category = category);
        self.run_fetch().await;
    }

    /// Search input is debounced: each keystroke cancels the previously
    /// scheduled fetch and schedules a new one, so only the last keystroke
    /// inside the window issues a query.
    pub async fn set_search_term(&self, term: String) {
        let mut inner = self.inner.lock().await;
        inner.search_term = term.clone();
        if let Some(pending) = inner.pending_search.take() {
            pending.abort();
        }
        let this = self.clone();
        inner.pending_search = Some(tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            this.run_fetch().await;
        }));
        drop(inner);
        self.snapshot_tx
            .send_modify(|snapshot| snapshot.search_term = term);
    }

    /// Unconditional refetch with the current filters.
    pub async fn refresh(&self) {
        self.run_fetch().await;
    }

    async fn run_fetch(&self) {
        let (seq, query) = {
            let mut inner = self.inner.lock().await;
            inner.issued_seq += 1;
            let mut query = SelectQuery::listing(R::COLLECTION);
            if inner.selected_category != ALL_CATEGORIES {
                query = query.with_category(&inner.selected_category);
            }
            if !inner.search_term.is_empty() {
                query = query.with_search(&inner.search_term);
            }
            (inner.issued_seq, query)
        };
        self.snapshot_tx
            .send_modify(|snapshot| snapshot.loading = true);

        let result = self.store.select(query).await;

        // Holding the lock through the application keeps the token check and
        // the snapshot write atomic.
        let inner = self.inner.lock().await;
        if seq != inner.issued_seq {
            debug!("discarding stale fetch response (seq {seq} < {})", inner.issued_seq);
            return;
        }
        match result.and_then(decode_rows::<R>) {
            Ok(items) => {
                self.snapshot_tx.send_modify(|snapshot| {
                    snapshot.items = items;
                    snapshot.loading = false;
                    snapshot.error = None;
                });
            }
            Err(e) => {
                warn!("list fetch failed: {e}");
                // stale rows are cleared rather than shown beside the error
                self.snapshot_tx.send_modify(|snapshot| {
                    snapshot.items = Vec::new();
                    snapshot.loading = false;
                    snapshot.error = Some(e.to_string());
                });
            }
        }
    }

    /// Category list comes from a distinct-values query, not from the rows
    /// currently loaded; a filtered page would otherwise hide categories.
    /// On failure the existing list is kept.
    async fn refresh_categories(&self) {
        match self.store.distinct_values(R::COLLECTION, "category").await {
            Ok(values) => {
                let mut categories = vec![ALL_CATEGORIES.to_string()];
                for value in values {
                    if !categories.contains(&value) {
                        categories.push(value);
                    }
                }
                self.snapshot_tx
                    .send_modify(|snapshot| snapshot.categories = categories);
            }
            Err(e) => warn!("category refresh failed: {e}"),
        }
    }

    fn set_realtime_error(&self, reason: String) {
        let message = AppError::Realtime(reason).to_string();
        self.snapshot_tx
            .send_modify(|snapshot| snapshot.realtime_error = Some(message));
    }
}
