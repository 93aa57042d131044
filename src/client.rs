//! Client-side auth state sync
//!
//! Mirrors a live client SDK into an [`AuthUser`] and keeps the server
//! session cookies in step: every ID-token change is pushed to a
//! [`TokenChangedHandler`], by default [`EndpointSync`], which POSTs the
//! login endpoint with the new token or the logout endpoint when signed out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::http::header::AUTHORIZATION;
use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::RwLock;
use url::Url;

use crate::authority::AuthorityError;
use crate::error::AuthError;
use crate::hooks::ErrorHooks;
use crate::models::user::{AuthUser, ClientUser};
use crate::settings::FirebridgeSettings;

/// Receives each auth-state change before it becomes the current user
#[async_trait]
pub trait TokenChangedHandler: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the server session could not be updated
    async fn token_changed(&self, user: &AuthUser) -> Result<(), AuthorityError>;
}

// =============================================================================
// Default handler: login/logout endpoints
// =============================================================================

/// POSTs the configured login and logout endpoints
pub struct EndpointSync {
    http: reqwest::Client,
    login_url: Url,
    logout_url: Url,
}

impl EndpointSync {
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if an endpoint URL cannot be built
    /// or the HTTP client cannot be created
    pub fn new(base_url: &str, login_path: &str, logout_path: &str) -> Result<Self, AuthError> {
        let base = Url::parse(base_url)
            .map_err(|e| AuthError::configuration(format!("Invalid base URL '{base_url}': {e}")))?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| AuthError::configuration(format!("Invalid endpoint '{path}': {e}")))
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            login_url: join(login_path)?,
            logout_url: join(logout_path)?,
        })
    }

    /// Endpoints from settings, relative to `base_url`
    ///
    /// # Errors
    ///
    /// See [`EndpointSync::new`]
    pub fn from_settings(base_url: &str, settings: &FirebridgeSettings) -> Result<Self, AuthError> {
        Self::new(base_url, &settings.endpoints.login, &settings.endpoints.logout)
    }

    #[must_use]
    pub const fn login_url(&self) -> &Url {
        &self.login_url
    }

    #[must_use]
    pub const fn logout_url(&self) -> &Url {
        &self.logout_url
    }

    async fn post(&self, url: &Url, token: Option<&str>) -> Result<(), AuthorityError> {
        let mut request = self.http.post(url.clone());
        if let Some(token) = token {
            request = request.header(AUTHORIZATION.as_str(), token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(AuthorityError::internal(format!(
            "Received {status} response from {url}: {body}"
        )))
    }
}

#[async_trait]
impl TokenChangedHandler for EndpointSync {
    async fn token_changed(&self, user: &AuthUser) -> Result<(), AuthorityError> {
        if user.is_authenticated() {
            let token = user
                .id_token()
                .await
                .map_err(|e| AuthorityError::internal(format!("Client SDK returned no ID token: {e}")))?
                .ok_or_else(|| AuthorityError::internal("Client SDK returned no ID token"))?;
            debug!("Syncing login to {}", self.login_url);
            self.post(&self.login_url, Some(&token)).await
        } else {
            debug!("Syncing logout to {}", self.logout_url);
            self.post(&self.logout_url, None).await
        }
    }
}

// =============================================================================
// Auth state
// =============================================================================

pub struct AuthStateSync {
    handler: Arc<dyn TokenChangedHandler>,
    hooks: ErrorHooks,
    mounted: AtomicBool,
    initialized: AtomicBool,
    user: RwLock<AuthUser>,
}

impl AuthStateSync {
    #[must_use]
    pub fn new(handler: Arc<dyn TokenChangedHandler>) -> Self {
        Self {
            handler,
            hooks: ErrorHooks::default(),
            mounted: AtomicBool::new(true),
            initialized: AtomicBool::new(false),
            user: RwLock::new(AuthUser::empty()),
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: ErrorHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Process an ID-token change reported by the client SDK
    ///
    /// `None` means signed out. The handler runs first; the user only
    /// becomes current if the sync is still subscribed once it returns.
    /// Returns the new current user, or `None` after unsubscribe.
    pub async fn on_id_token_changed(&self, user: Option<Arc<dyn ClientUser>>) -> Option<AuthUser> {
        if !self.is_mounted() {
            return None;
        }

        let auth_user = user.map_or_else(AuthUser::empty, |user| {
            AuthUser::from_live_client(user, true)
        });

        if let Err(err) = self.handler.token_changed(&auth_user).await {
            if auth_user.is_authenticated() {
                (self.hooks.on_login_request_error)(&err);
            } else {
                (self.hooks.on_logout_request_error)(&err);
            }
        }

        if !self.is_mounted() {
            debug!("Auth state sync unsubscribed, dropping update");
            return None;
        }

        match auth_user.id() {
            Some(uid) => info!("🔄 Client auth state: signed in as {uid}"),
            None => info!("🔄 Client auth state: signed out"),
        }
        *self.user.write().await = auth_user.clone();
        self.initialized.store(true, Ordering::SeqCst);
        Some(auth_user)
    }

    /// Stop applying results, including those of changes still in flight
    pub fn unsubscribe(&self) {
        self.mounted.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Whether at least one auth-state change has been applied
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub async fn current_user(&self) -> AuthUser {
        self.user.read().await.clone()
    }
}
