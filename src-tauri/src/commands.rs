use serde_json::Value;
use tauri::{command, AppHandle, State};
use tauri_plugin_store::StoreExt;
use uuid::Uuid;

use crate::auth::{AuthStatus, RouteDecision, SignInOutcome};
use crate::detail::{resolve, RouteParam};
use crate::error::AppError;
use crate::listing::ListSnapshot;
use crate::models::{Collection, Event, EventDraft, NewsArticle, NewsDraft, Record};
use crate::remote::{decode_rows, CollectionStore, RemoteError, SelectQuery};
use crate::slug::{slugify, SlugTracker};
use crate::state::AppState;

async fn insert_record<R: Record>(
    store: &dyn CollectionStore,
    payload: Value,
) -> Result<R, AppError> {
    let row = store.insert(R::COLLECTION, payload).await?;
    Ok(serde_json::from_value(row).map_err(RemoteError::from)?)
}

async fn update_record<R: Record>(
    store: &dyn CollectionStore,
    id: Uuid,
    payload: Value,
) -> Result<R, AppError> {
    let row = store.update(R::COLLECTION, id, payload).await?;
    Ok(serde_json::from_value(row).map_err(RemoteError::from)?)
}

async fn admin_listing<R: Record>(store: &dyn CollectionStore) -> Result<Vec<R>, AppError> {
    let rows = store.select(SelectQuery::admin_listing(R::COLLECTION)).await?;
    Ok(decode_rows(rows)?)
}

// ---- public list pages ----

#[command]
pub async fn news_activate(app_state: State<'_, AppState>) -> Result<(), String> {
    app_state.news.activate().await;
    Ok(())
}

#[command]
pub async fn news_deactivate(app_state: State<'_, AppState>) -> Result<(), String> {
    app_state.news.deactivate().await;
    Ok(())
}

#[command]
pub async fn news_snapshot(
    app_state: State<'_, AppState>,
) -> Result<ListSnapshot<NewsArticle>, String> {
    Ok(app_state.news.snapshot())
}

#[command]
pub async fn news_set_category(
    app_state: State<'_, AppState>,
    category: String,
) -> Result<(), String> {
    app_state.news.set_category(category).await;
    Ok(())
}

#[command]
pub async fn news_set_search(app_state: State<'_, AppState>, term: String) -> Result<(), String> {
    app_state.news.set_search_term(term).await;
    Ok(())
}

#[command]
pub async fn events_activate(app_state: State<'_, AppState>) -> Result<(), String> {
    app_state.events.activate().await;
    Ok(())
}

#[command]
pub async fn events_deactivate(app_state: State<'_, AppState>) -> Result<(), String> {
    app_state.events.deactivate().await;
    Ok(())
}

#[command]
pub async fn events_snapshot(
    app_state: State<'_, AppState>,
) -> Result<ListSnapshot<Event>, String> {
    Ok(app_state.events.snapshot())
}

#[command]
pub async fn events_set_category(
    app_state: State<'_, AppState>,
    category: String,
) -> Result<(), String> {
    app_state.events.set_category(category).await;
    Ok(())
}

#[command]
pub async fn events_set_search(app_state: State<'_, AppState>, term: String) -> Result<(), String> {
    app_state.events.set_search_term(term).await;
    Ok(())
}

// ---- detail pages ----
// Ok(None) is "not found"; Err is a failed query. The webview renders the
// two distinctly.

#[command]
pub async fn get_news(
    app_state: State<'_, AppState>,
    id_or_slug: String,
) -> Result<Option<NewsArticle>, String> {
    resolve(app_state.store.as_ref(), RouteParam::parse(&id_or_slug))
        .await
        .map_err(|e| AppError::Remote(e).to_string())
}

#[command]
pub async fn get_event(
    app_state: State<'_, AppState>,
    id_or_slug: String,
) -> Result<Option<Event>, String> {
    resolve(app_state.store.as_ref(), RouteParam::parse(&id_or_slug))
        .await
        .map_err(|e| AppError::Remote(e).to_string())
}

// ---- admin CRUD ----

#[command]
pub async fn admin_list_news(app_state: State<'_, AppState>) -> Result<Vec<NewsArticle>, String> {
    app_state.auth.require().map_err(|e| e.to_string())?;
    admin_listing(app_state.store.as_ref())
        .await
        .map_err(|e| e.to_string())
}

#[command]
pub async fn admin_list_events(app_state: State<'_, AppState>) -> Result<Vec<Event>, String> {
    app_state.auth.require().map_err(|e| e.to_string())?;
    admin_listing(app_state.store.as_ref())
        .await
        .map_err(|e| e.to_string())
}

#[command]
pub async fn create_news(
    app_state: State<'_, AppState>,
    draft: NewsDraft,
) -> Result<NewsArticle, String> {
    app_state.auth.require().map_err(|e| e.to_string())?;
    draft.validate().map_err(|e| e.to_string())?;
    insert_record(app_state.store.as_ref(), draft.into_payload())
        .await
        .map_err(|e| e.to_string())
}

#[command]
pub async fn update_news(
    app_state: State<'_, AppState>,
    id: Uuid,
    draft: NewsDraft,
) -> Result<NewsArticle, String> {
    app_state.auth.require().map_err(|e| e.to_string())?;
    draft.validate().map_err(|e| e.to_string())?;
    update_record(app_state.store.as_ref(), id, draft.into_payload())
        .await
        .map_err(|e| e.to_string())
}

#[command]
pub async fn delete_news(app_state: State<'_, AppState>, id: Uuid) -> Result<(), String> {
    app_state.auth.require().map_err(|e| e.to_string())?;
    app_state
        .store
        .delete(Collection::News, id)
        .await
        .map_err(|e| e.to_string())
}

#[command]
pub async fn create_event(
    app_state: State<'_, AppState>,
    draft: EventDraft,
) -> Result<Event, String> {
    app_state.auth.require().map_err(|e| e.to_string())?;
    draft.validate().map_err(|e| e.to_string())?;
    insert_record(app_state.store.as_ref(), draft.into_payload())
        .await
        .map_err(|e| e.to_string())
}

#[command]
pub async fn update_event(
    app_state: State<'_, AppState>,
    id: Uuid,
    draft: EventDraft,
) -> Result<Event, String> {
    app_state.auth.require().map_err(|e| e.to_string())?;
    draft.validate().map_err(|e| e.to_string())?;
    update_record(app_state.store.as_ref(), id, draft.into_payload())
        .await
        .map_err(|e| e.to_string())
}

#[command]
pub async fn delete_event(app_state: State<'_, AppState>, id: Uuid) -> Result<(), String> {
    app_state.auth.require().map_err(|e| e.to_string())?;
    app_state
        .store
        .delete(Collection::Events, id)
        .await
        .map_err(|e| e.to_string())
}

// ---- auth ----

#[command]
pub async fn sign_in(
    app_state: State<'_, AppState>,
    email: String,
    password: String,
) -> Result<SignInOutcome, String> {
    app_state
        .auth
        .sign_in(&email, &password)
        .await
        .map_err(|e| AppError::from(e).to_string())
}

#[command]
pub async fn sign_out(app_state: State<'_, AppState>) -> Result<(), String> {
    app_state
        .auth
        .sign_out()
        .await
        .map_err(|e| AppError::from(e).to_string())
}

#[command]
pub async fn auth_status(app_state: State<'_, AppState>) -> Result<AuthStatus, String> {
    Ok(app_state.auth.status())
}

#[command]
pub async fn route_decision(
    app_state: State<'_, AppState>,
    path: String,
) -> Result<RouteDecision, String> {
    Ok(app_state.auth.decide(&path))
}

// ---- slug helpers for the admin forms ----

#[command]
pub fn derive_slug(title: String) -> String {
    slugify(&title)
}

/// Slug field value after a title change; `initial_slug` is the persisted
/// slug on edit pages, absent on create pages.
#[command]
pub fn track_slug(
    previous_title: String,
    new_title: String,
    current_slug: String,
    initial_slug: Option<String>,
) -> String {
    let tracker = match initial_slug {
        Some(initial) => SlugTracker::for_edit(&initial),
        None => SlugTracker::for_create(),
    };
    tracker.on_title_change(&previous_title, &new_title, &current_slug)
}

// ---- theme preference ----

const SETTINGS_STORE: &str = "settings.json";

#[command]
pub fn theme_get(app: AppHandle) -> Result<String, String> {
    let store = app.store(SETTINGS_STORE).map_err(|e| e.to_string())?;
    Ok(store
        .get("theme")
        .and_then(|value| value.as_str().map(String::from))
        .unwrap_or_else(|| "light".to_string()))
}

#[command]
pub fn theme_set(app: AppHandle, theme: String) -> Result<(), String> {
    let store = app.store(SETTINGS_STORE).map_err(|e| e.to_string())?;
    store.set("theme", serde_json::json!(theme));
    store.save().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::remote::fake::FakeStore;

    #[tokio::test]
    async fn created_record_comes_back_with_an_id() {
        let store = Arc::new(FakeStore::default());
        let draft = NewsDraft {
            title: "Annual Sports Day!".to_string(),
            content: "All students welcome.".to_string(),
            ..Default::default()
        };
        draft.validate().unwrap();

        let article: NewsArticle = insert_record(store.as_ref(), draft.into_payload())
            .await
            .unwrap();
        assert_eq!(article.title, "Annual Sports Day!");
        assert_eq!(article.slug.as_deref(), Some("annual-sports-day"));
    }

    #[tokio::test]
    async fn update_patches_and_returns_the_record() {
        let store = Arc::new(FakeStore::default());
        let draft = EventDraft {
            title: "Open House".to_string(),
            description: "Visit the school.".to_string(),
            ..Default::default()
        };
        let created: Event = insert_record(store.as_ref(), draft.clone().into_payload())
            .await
            .unwrap();

        let mut changed = draft;
        changed.location = "Main Hall".to_string();
        let updated: Event = update_record(store.as_ref(), created.id, changed.into_payload())
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.location.as_deref(), Some("Main Hall"));
    }

    #[tokio::test]
    async fn admin_listing_orders_by_created_at() {
        let store = Arc::new(FakeStore::default());
        let _: Vec<NewsArticle> = admin_listing(store.as_ref()).await.unwrap();
        let query = store.last_query().unwrap();
        assert_eq!(query.order.column, "created_at");
        assert!(!query.order.ascending);
    }
}
