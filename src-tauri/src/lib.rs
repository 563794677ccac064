// Learn more about Tauri commands at https://tauri.app/develop/calling-rust/
pub mod auth;
pub mod commands;
pub mod config;
pub mod detail;
pub mod error;
pub mod listing;
pub mod models;
pub mod remote;
pub mod slug;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use tauri::{Emitter, Manager};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use auth::{AuthBackend, RestAuth};
use config::RemoteConfig;
use listing::ListSnapshot;
use models::Record;
use remote::{CollectionStore, RestStore};
use state::AppState;

/// Re-emits list snapshot changes as webview events; pages re-pull the
/// snapshot through the matching command.
fn forward_list_updates<R: Record>(
    handle: tauri::AppHandle,
    mut snapshots: watch::Receiver<ListSnapshot<R>>,
    event: &'static str,
) {
    tauri::async_runtime::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let _ = handle.emit(event, ());
        }
    });
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    // Missing endpoint configuration aborts the launch; a placeholder value
    // could only produce confusing failures later.
    let config = match RemoteConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Refusing to start: {e}");
            std::process::exit(1);
        }
    };

    info!("Initializing remote clients...");
    let store: Arc<dyn CollectionStore> = Arc::new(RestStore::new(&config));
    let auth_backend: Arc<dyn AuthBackend> = Arc::new(RestAuth::new(&config));
    let app_state = AppState::new(
        store,
        auth_backend,
        Duration::from_millis(config.debounce_ms),
    );

    tauri::Builder::default()
        .plugin(tauri_plugin_store::Builder::default().build())
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_opener::init())
        .manage(app_state.clone())
        .setup(move |app| {
            let auth = app_state.auth.clone();
            tauri::async_runtime::spawn(async move {
                auth.clone().spawn_listener();
                auth.probe().await;
            });

            forward_list_updates(
                app.handle().clone(),
                app_state.news.snapshots(),
                "news://updated",
            );
            forward_list_updates(
                app.handle().clone(),
                app_state.events.snapshots(),
                "events://updated",
            );

            let handle = app.handle().clone();
            let mut status = app_state.auth.watch();
            tauri::async_runtime::spawn(async move {
                while status.changed().await.is_ok() {
                    let _ = handle.emit("auth://changed", ());
                }
            });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::news_activate,
            commands::news_deactivate,
            commands::news_snapshot,
            commands::news_set_category,
            commands::news_set_search,
            commands::events_activate,
            commands::events_deactivate,
            commands::events_snapshot,
            commands::events_set_category,
            commands::events_set_search,
            commands::get_news,
            commands::get_event,
            commands::admin_list_news,
            commands::admin_list_events,
            commands::create_news,
            commands::update_news,
            commands::delete_news,
            commands::create_event,
            commands::update_event,
            commands::delete_event,
            commands::sign_in,
            commands::sign_out,
            commands::auth_status,
            commands::route_decision,
            commands::derive_slug,
            commands::track_slug,
            commands::theme_get,
            commands::theme_set
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
