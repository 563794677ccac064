//! Resolves a detail-route parameter to a single record.

use uuid::Uuid;

use crate::models::Record;
use crate::remote::{CollectionStore, RemoteError, SelectQuery};

/// A detail-route parameter is either a canonical record id or a slug;
/// anything that parses as a UUID is treated as an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteParam {
    Id(Uuid),
    Slug(String),
}

impl RouteParam {
    pub fn parse(raw: &str) -> Self {
        match Uuid::parse_str(raw) {
            Ok(id) => RouteParam::Id(id),
            Err(_) => RouteParam::Slug(raw.to_string()),
        }
    }
}

/// Issues exactly one query per resolution. `Ok(None)` means the query
/// succeeded with zero rows (a distinct outcome from a failed query).
pub async fn resolve<R: Record>(
    store: &dyn CollectionStore,
    param: RouteParam,
) -> Result<Option<R>, RemoteError> {
    let query = match param {
        RouteParam::Id(id) => SelectQuery::by_id(R::COLLECTION, id),
        RouteParam::Slug(slug) => SelectQuery::by_slug(R::COLLECTION, &slug),
    };
    let rows = store.select(query).await?;
    match rows.into_iter().next() {
        Some(row) => Ok(Some(serde_json::from_value(row)?)),
        None => Ok(None),
    }
}
