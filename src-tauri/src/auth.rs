//! Session handling: the remote auth service surface and the gate that
//! protects admin routes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RemoteConfig;
use crate::error::AppError;

pub const LOGIN_ROUTE: &str = "/admin/login";
pub const ADMIN_HOME: &str = "/admin/dashboard";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user: AuthUser,
}

/// The remote auth collaborator. Session-change notifications (login,
/// logout, token refresh/expiry) arrive on the watch channel.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;
    fn on_auth_state_change(&self) -> watch::Receiver<Option<Session>>;
}

/// REST implementation. The cached session is transport state; durable
/// caching across launches belongs to the store plugin on the webview side.
pub struct RestAuth {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: AsyncMutex<Option<Session>>,
    changes_tx: watch::Sender<Option<Session>>,
}

impl RestAuth {
    pub fn new(config: &RemoteConfig) -> Self {
        let (changes_tx, _) = watch::channel(None);
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            session: AsyncMutex::new(None),
            changes_tx,
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn with_keys(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("apikey", &self.anon_key)
    }
}

/// Pulls a human-readable message out of an auth error body.
fn rejection_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error_description", "msg", "message"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }
    if body.is_empty() {
        "Sign-in failed".to_string()
    } else {
        body.to_string()
    }
}

#[async_trait]
impl AuthBackend for RestAuth {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let mut session = self.session.lock().await;
        let Some(current) = session.clone() else {
            return Ok(None);
        };
        // Validate the cached token; a rejected token ends the session.
        let response = self
            .with_keys(self.http.get(self.auth_url("user")))
            .bearer_auth(&current.access_token)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(Some(current))
        } else {
            *session = None;
            self.changes_tx.send_replace(None);
            Ok(None)
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let response = self
            .with_keys(
                self.http
                    .post(self.auth_url("token"))
                    .query(&[("grant_type", "password")]),
            )
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected(rejection_message(&body)));
        }
        let new_session: Session = response.json().await?;
        *self.session.lock().await = Some(new_session.clone());
        self.changes_tx.send_replace(Some(new_session.clone()));
        Ok(new_session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = self.session.lock().await.take();
        self.changes_tx.send_replace(None);
        if let Some(session) = previous {
            let response = self
                .with_keys(self.http.post(self.auth_url("logout")))
                .bearer_auth(&session.access_token)
                .send()
                .await?;
            if !response.status().is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AuthError::Rejected(rejection_message(&body)));
            }
        }
        Ok(())
    }

    fn on_auth_state_change(&self) -> watch::Receiver<Option<Session>> {
        self.changes_tx.subscribe()
    }
}

/// What the gate knows about the session right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthStatus {
    /// Startup probe still in flight; protected routes render a loading
    /// placeholder and make no redirect decision yet.
    Unknown,
    Authenticated { email: Option<String> },
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RouteDecision {
    Render,
    Loading,
    Redirect { to: String, from: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SignInOutcome {
    pub redirect_to: String,
}

/// Tracks session presence and protects `/admin/*` routes.
pub struct AuthGate {
    backend: Arc<dyn AuthBackend>,
    status_tx: watch::Sender<AuthStatus>,
    return_to: Mutex<Option<String>>,
}

impl AuthGate {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        let (status_tx, _) = watch::channel(AuthStatus::Unknown);
        Self {
            backend,
            status_tx,
            return_to: Mutex::new(None),
        }
    }

    pub fn status(&self) -> AuthStatus {
        self.status_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<AuthStatus> {
        self.status_tx.subscribe()
    }

    fn set_status(&self, status: AuthStatus) {
        self.status_tx.send_replace(status);
    }

    fn status_for(session: Option<Session>) -> AuthStatus {
        match session {
            Some(session) => AuthStatus::Authenticated {
                email: session.user.email,
            },
            None => AuthStatus::Unauthenticated,
        }
    }

    /// Startup session probe. Runs once at launch; a failed probe counts as
    /// signed out rather than blocking the app on `Unknown`.
    pub async fn probe(&self) {
        match self.backend.get_session().await {
            Ok(session) => self.set_status(Self::status_for(session)),
            Err(e) => {
                warn!("session probe failed: {e}");
                self.set_status(AuthStatus::Unauthenticated);
            }
        }
    }

    /// Forwards remote session-change notifications (e.g. token expiry)
    /// into the gate state.
    pub fn spawn_listener(self: Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.backend.on_auth_state_change();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let session = changes.borrow_and_update().clone();
                self.set_status(Self::status_for(session));
            }
        })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignInOutcome, AuthError> {
        let session = self.backend.sign_in_with_password(email, password).await?;
        info!("signed in as {:?}", session.user.email);
        self.set_status(AuthStatus::Authenticated {
            email: session.user.email,
        });
        // Bounce back to the page that bounced the user to the login form.
        let redirect_to = self
            .return_to
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| ADMIN_HOME.to_string());
        Ok(SignInOutcome { redirect_to })
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let result = self.backend.sign_out().await;
        // Local state clears even when the remote call fails.
        self.set_status(AuthStatus::Unauthenticated);
        result
    }

    /// Route decision for a navigation. While the probe is in flight,
    /// protected routes get `Loading` instead of a premature redirect.
    pub fn decide(&self, path: &str) -> RouteDecision {
        if !is_protected(path) {
            return RouteDecision::Render;
        }
        match self.status() {
            AuthStatus::Unknown => RouteDecision::Loading,
            AuthStatus::Authenticated { .. } => RouteDecision::Render,
            AuthStatus::Unauthenticated => {
                *self.return_to.lock().unwrap() = Some(path.to_string());
                RouteDecision::Redirect {
                    to: LOGIN_ROUTE.to_string(),
                    from: path.to_string(),
                }
            }
        }
    }

    /// Admin mutations require a confirmed session.
    pub fn require(&self) -> Result<(), AppError> {
        match self.status() {
            AuthStatus::Authenticated { .. } => Ok(()),
            _ => Err(AppError::Unauthenticated),
        }
    }
}

fn is_protected(path: &str) -> bool {
    (path == "/admin" || path.starts_with("/admin/")) && path != LOGIN_ROUTE
}
