use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthBackend, AuthGate};
use crate::listing::ListController;
use crate::models::{Event, NewsArticle};
use crate::remote::CollectionStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CollectionStore>,
    pub auth: Arc<AuthGate>,
    pub news: ListController<NewsArticle>,
    pub events: ListController<Event>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn CollectionStore>,
        auth_backend: Arc<dyn AuthBackend>,
        debounce: Duration,
    ) -> Self {
        AppState {
            auth: Arc::new(AuthGate::new(auth_backend)),
            news: ListController::new(store.clone(), debounce),
            events: ListController::new(store.clone(), debounce),
            store,
        }
    }
}
