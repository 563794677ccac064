//! Client for the hosted collection store: REST queries plus the realtime
//! change feed. Controllers depend on the [`CollectionStore`] trait so tests
//! can run against an in-memory fake.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::config::RemoteConfig;
use crate::models::{ChangeEvent, Collection, Record};

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote returned {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("remote returned no rows")]
    EmptyReply,
    #[error("malformed row: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: &'static str,
    pub ascending: bool,
}

/// One select against a collection: optional exact-category and id/slug
/// filters, optional case-insensitive substring search over the collection's
/// search columns, and an ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub collection: Collection,
    pub id: Option<Uuid>,
    pub slug: Option<String>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub order: OrderBy,
}

impl SelectQuery {
    /// Public listing order: news newest first, events chronological.
    pub fn listing(collection: Collection) -> Self {
        let order = match collection {
            Collection::News => OrderBy {
                column: "published_date",
                ascending: false,
            },
            Collection::Events => OrderBy {
                column: "start_date",
                ascending: true,
            },
        };
        Self {
            collection,
            id: None,
            slug: None,
            category: None,
            search: None,
            order,
        }
    }

    /// Admin tables list everything, newest record first.
    pub fn admin_listing(collection: Collection) -> Self {
        Self {
            order: OrderBy {
                column: "created_at",
                ascending: false,
            },
            ..Self::listing(collection)
        }
    }

    pub fn by_id(collection: Collection, id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Self::listing(collection)
        }
    }

    pub fn by_slug(collection: Collection, slug: &str) -> Self {
        Self {
            slug: Some(slug.to_string()),
            ..Self::listing(collection)
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_search(mut self, term: &str) -> Self {
        self.search = Some(term.to_string());
        self
    }
}

/// The surface this app consumes from the hosted backend.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>, RemoteError>;
    async fn insert(&self, collection: Collection, record: Value) -> Result<Value, RemoteError>;
    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        patch: Value,
    ) -> Result<Value, RemoteError>;
    async fn delete(&self, collection: Collection, id: Uuid) -> Result<(), RemoteError>;
    /// Server-side distinct values of one column, e.g. the category list.
    async fn distinct_values(
        &self,
        collection: Collection,
        column: &str,
    ) -> Result<Vec<String>, RemoteError>;
    /// Opens this collection's change feed. Dropping the returned
    /// [`Subscription`] tears the feed down.
    async fn subscribe(&self, collection: Collection) -> Result<Subscription, RemoteError>;
}

pub fn decode_rows<R: Record>(rows: Vec<Value>) -> Result<Vec<R>, RemoteError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(RemoteError::from))
        .collect()
}

/// One item delivered on a change feed.
#[derive(Debug, Clone)]
pub enum FeedItem {
    Change(ChangeEvent),
    /// Terminal: the transport dropped. The owner surfaces a refresh prompt;
    /// the client does not reconnect on its own.
    Lost(String),
}

/// A live change feed scoped to a single collection. Owns the background
/// reader; dropping the subscription aborts it, so release is guaranteed
/// however the owning view goes away.
pub struct Subscription {
    rx: mpsc::Receiver<FeedItem>,
    reader: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<FeedItem>, reader: JoinHandle<()>) -> Self {
        Self {
            rx,
            reader: Some(reader),
        }
    }

    /// `None` once the feed is closed and drained.
    pub async fn next(&mut self) -> Option<FeedItem> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// PostgREST-style query parameters for a select.
pub fn select_params(query: &SelectQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    if let Some(id) = query.id {
        params.push(("id".to_string(), format!("eq.{id}")));
    }
    if let Some(slug) = &query.slug {
        params.push(("slug".to_string(), format!("eq.{slug}")));
    }
    if let Some(category) = &query.category {
        params.push(("category".to_string(), format!("eq.{category}")));
    }
    if let Some(term) = &query.search {
        let clauses: Vec<String> = query
            .collection
            .search_columns()
            .iter()
            .map(|column| format!("{column}.ilike.*{term}*"))
            .collect();
        params.push(("or".to_string(), format!("({})", clauses.join(","))));
    }
    let direction = if query.order.ascending { "asc" } else { "desc" };
    params.push((
        "order".to_string(),
        format!("{}.{}", query.order.column, direction),
    ));
    params
}

/// Production client speaking the backend's REST and streaming endpoints.
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl RestStore {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
        }
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn with_keys(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }
}

async fn checked(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(RemoteError::Rejected {
        status: status.as_u16(),
        message,
    })
}

fn first_row(mut rows: Vec<Value>) -> Result<Value, RemoteError> {
    if rows.is_empty() {
        return Err(RemoteError::EmptyReply);
    }
    Ok(rows.swap_remove(0))
}

#[async_trait]
impl CollectionStore for RestStore {
    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>, RemoteError> {
        let request = self
            .http
            .get(self.rest_url(query.collection.table()))
            .query(&select_params(&query));
        let response = checked(self.with_keys(request).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn insert(&self, collection: Collection, record: Value) -> Result<Value, RemoteError> {
        let request = self
            .http
            .post(self.rest_url(collection.table()))
            .header("Prefer", "return=representation")
            .json(&[record]);
        let response = checked(self.with_keys(request).send().await?).await?;
        first_row(response.json().await?)
    }

    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        patch: Value,
    ) -> Result<Value, RemoteError> {
        let request = self
            .http
            .patch(self.rest_url(collection.table()))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = checked(self.with_keys(request).send().await?).await?;
        first_row(response.json().await?)
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> Result<(), RemoteError> {
        let request = self
            .http
            .delete(self.rest_url(collection.table()))
            .query(&[("id", format!("eq.{id}"))]);
        checked(self.with_keys(request).send().await?).await?;
        Ok(())
    }

    async fn distinct_values(
        &self,
        collection: Collection,
        column: &str,
    ) -> Result<Vec<String>, RemoteError> {
        let request = self
            .http
            .post(format!("{}/rest/v1/rpc/distinct_categories", self.base_url))
            .json(&serde_json::json!({ "table_name": collection.table() }));
        let response = checked(self.with_keys(request).send().await?).await?;
        let rows: Vec<Value> = response.json().await?;
        let mut values = Vec::new();
        for row in rows {
            if let Some(value) = row.get(column).and_then(Value::as_str) {
                if !value.is_empty() && !values.iter().any(|v| v == value) {
                    values.push(value.to_string());
                }
            }
        }
        Ok(values)
    }

    async fn subscribe(&self, collection: Collection) -> Result<Subscription, RemoteError> {
        let request = self
            .http
            .get(format!("{}/realtime/v1/changes", self.base_url))
            .query(&[("table", collection.table())])
            .header("Accept", "text/event-stream");
        let response = checked(self.with_keys(request).send().await?).await?;

        let (tx, rx) = mpsc::channel(16);
        let reader = tokio::spawn(read_feed(response, collection, tx));
        Ok(Subscription::new(rx, reader))
    }
}

/// Reads SSE-framed change events off the streaming response, forwarding
/// only this subscription's collection. Feed loss is delivered in-band as a
/// terminal [`FeedItem::Lost`].
async fn read_feed(
    mut response: reqwest::Response,
    collection: Collection,
    tx: mpsc::Sender<FeedItem>,
) {
    let mut buffer = String::new();
    loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(end) = buffer.find('\n') {
                    let line = buffer[..end].trim().to_string();
                    buffer.drain(..=end);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    match serde_json::from_str::<ChangeEvent>(payload.trim()) {
                        Ok(event) if event.collection == collection => {
                            if tx.send(FeedItem::Change(event)).await.is_err() {
                                return;
                            }
                        }
                        // another table's event; this channel is scoped
                        Ok(_) => {}
                        Err(e) => warn!("skipping malformed change frame: {e}"),
                    }
                }
            }
            Ok(None) => {
                let _ = tx.send(FeedItem::Lost("stream closed".to_string())).await;
                return;
            }
            Err(e) => {
                let _ = tx.send(FeedItem::Lost(e.to_string())).await;
                return;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory [`CollectionStore`] for controller and resolver tests.

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::sync::{broadcast, mpsc};
    use uuid::Uuid;

    use super::*;
    use crate::models::ChangeAction;
    use crate::slug::slugify;

    pub struct FakeStore {
        pub rows: Mutex<Vec<(Collection, Value)>>,
        pub queries: Mutex<Vec<SelectQuery>>,
        pub fail_next_select: AtomicBool,
        pub delay_next_select: Mutex<Option<Duration>>,
        changes: broadcast::Sender<(Collection, FeedItem)>,
    }

    impl Default for FakeStore {
        fn default() -> Self {
            let (changes, _) = broadcast::channel(16);
            Self {
                rows: Mutex::new(Vec::new()),
                queries: Mutex::new(Vec::new()),
                fail_next_select: AtomicBool::new(false),
                delay_next_select: Mutex::new(None),
                changes,
            }
        }
    }

    impl FakeStore {
        pub fn push(&self, collection: Collection, row: Value) {
            self.rows.lock().unwrap().push((collection, row));
        }

        pub fn select_count(&self) -> usize {
            self.queries.lock().unwrap().len()
        }

        pub fn last_query(&self) -> Option<SelectQuery> {
            self.queries.lock().unwrap().last().cloned()
        }

        pub fn emit(&self, collection: Collection, action: ChangeAction) {
            let _ = self
                .changes
                .send((collection, FeedItem::Change(ChangeEvent { collection, action })));
        }

        pub fn lose_feed(&self, collection: Collection, reason: &str) {
            let _ = self
                .changes
                .send((collection, FeedItem::Lost(reason.to_string())));
        }
    }

    fn matches(row: &Value, query: &SelectQuery) -> bool {
        if let Some(id) = query.id {
            if row.get("id").and_then(Value::as_str) != Some(id.to_string().as_str()) {
                return false;
            }
        }
        if let Some(slug) = &query.slug {
            if row.get("slug").and_then(Value::as_str) != Some(slug.as_str()) {
                return false;
            }
        }
        if let Some(category) = &query.category {
            if row.get("category").and_then(Value::as_str) != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(term) = &query.search {
            let needle = term.to_lowercase();
            let hit = query.collection.search_columns().iter().any(|column| {
                row.get(*column)
                    .and_then(Value::as_str)
                    .is_some_and(|text| text.to_lowercase().contains(&needle))
            });
            if !hit {
                return false;
            }
        }
        true
    }

    #[async_trait]
    impl CollectionStore for FakeStore {
        async fn select(&self, query: SelectQuery) -> Result<Vec<Value>, RemoteError> {
            self.queries.lock().unwrap().push(query.clone());
            let delay = self.delay_next_select.lock().unwrap().take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_next_select.swap(false, Ordering::SeqCst) {
                return Err(RemoteError::Rejected {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|(collection, row)| *collection == query.collection && matches(row, &query))
                .map(|(_, row)| row.clone())
                .collect())
        }

        async fn insert(
            &self,
            collection: Collection,
            record: Value,
        ) -> Result<Value, RemoteError> {
            let mut row = record;
            row["id"] = json!(Uuid::new_v4());
            self.push(collection, row.clone());
            Ok(row)
        }

        async fn update(
            &self,
            collection: Collection,
            id: Uuid,
            patch: Value,
        ) -> Result<Value, RemoteError> {
            let mut rows = self.rows.lock().unwrap();
            let target = rows
                .iter_mut()
                .find(|(c, row)| {
                    *c == collection
                        && row.get("id").and_then(Value::as_str)
                            == Some(id.to_string().as_str())
                })
                .ok_or(RemoteError::EmptyReply)?;
            if let (Some(row), Some(fields)) = (target.1.as_object_mut(), patch.as_object()) {
                for (key, value) in fields {
                    row.insert(key.clone(), value.clone());
                }
            }
            Ok(target.1.clone())
        }

        async fn delete(&self, collection: Collection, id: Uuid) -> Result<(), RemoteError> {
            self.rows.lock().unwrap().retain(|(c, row)| {
                *c != collection
                    || row.get("id").and_then(Value::as_str) != Some(id.to_string().as_str())
            });
            Ok(())
        }

        async fn distinct_values(
            &self,
            collection: Collection,
            column: &str,
        ) -> Result<Vec<String>, RemoteError> {
            let mut values = Vec::new();
            for (c, row) in self.rows.lock().unwrap().iter() {
                if *c != collection {
                    continue;
                }
                if let Some(value) = row.get(column).and_then(Value::as_str) {
                    if !value.is_empty() && !values.iter().any(|v| v == value) {
                        values.push(value.to_string());
                    }
                }
            }
            Ok(values)
        }

        async fn subscribe(&self, collection: Collection) -> Result<Subscription, RemoteError> {
            let mut feed = self.changes.subscribe();
            let (tx, rx) = mpsc::channel(16);
            let reader = tokio::spawn(async move {
                while let Ok((scope, item)) = feed.recv().await {
                    if scope != collection {
                        continue;
                    }
                    let lost = matches!(item, FeedItem::Lost(_));
                    if tx.send(item).await.is_err() || lost {
                        return;
                    }
                }
            });
            Ok(Subscription::new(rx, reader))
        }
    }

    pub fn news_row(title: &str, category: Option<&str>) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "slug": slugify(title),
            "title": title,
            "content": format!("{title} content"),
            "excerpt": null,
            "category": category,
            "published_date": null,
            "image_url": null,
            "video_url": null,
            "created_at": null,
        })
    }

    pub fn event_row(title: &str, category: Option<&str>) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "slug": slugify(title),
            "title": title,
            "description": format!("{title} description"),
            "category": category,
            "start_date": null,
            "end_date": null,
            "location": null,
            "image_url": null,
            "video_url": null,
            "created_at": null,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_params_combine_filters() {
        let query = SelectQuery::listing(Collection::News)
            .with_category("Sports")
            .with_search("day");
        let params = select_params(&query);
        assert!(params.contains(&("category".to_string(), "eq.Sports".to_string())));
        assert!(params.contains(&(
            "or".to_string(),
            "(title.ilike.*day*,content.ilike.*day*,excerpt.ilike.*day*)".to_string()
        )));
        assert!(params.contains(&("order".to_string(), "published_date.desc".to_string())));
    }

    #[test]
    fn event_search_uses_event_columns() {
        let query = SelectQuery::listing(Collection::Events).with_search("fair");
        let params = select_params(&query);
        assert!(params.contains(&(
            "or".to_string(),
            "(title.ilike.*fair*,description.ilike.*fair*)".to_string()
        )));
        assert!(params.contains(&("order".to_string(), "start_date.asc".to_string())));
    }

    #[test]
    fn id_lookup_filters_by_id_only() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let params = select_params(&SelectQuery::by_id(Collection::News, id));
        assert!(params.contains(&(
            "id".to_string(),
            "eq.550e8400-e29b-41d4-a716-446655440000".to_string()
        )));
        assert!(!params.iter().any(|(key, _)| key == "slug"));
    }

    #[tokio::test]
    async fn fake_store_roundtrip() {
        use crate::models::NewsArticle;

        let store = fake::FakeStore::default();
        store.push(Collection::News, fake::news_row("Sports Day", Some("Sports")));
        store.push(Collection::News, fake::news_row("Art Show", Some("Arts")));

        let rows = store
            .select(SelectQuery::listing(Collection::News).with_category("Sports"))
            .await
            .unwrap();
        let items: Vec<NewsArticle> = decode_rows(rows).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Sports Day");
    }
}
