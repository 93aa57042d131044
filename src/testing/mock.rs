//! Mock objects and fake implementations for testing
//!
//! [`MockAuthority`] answers from a script and counts calls; the other mocks
//! stand in for the client SDK and for the hooks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Notify;

use crate::authority::{AuthorityError, IdentityAuthority, TokenPair};
use crate::client::TokenChangedHandler;
use crate::hooks::ErrorHooks;
use crate::models::claims::VerifiedClaims;
use crate::models::user::{AuthUser, ClientUser};

use super::constants::TEST_EMAIL;
use super::fixtures::TestFixtures;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Authority
// =============================================================================

/// Scripted identity authority
///
/// Tokens that were never scripted fail verification with
/// `auth/argument-error`, unknown refresh tokens with
/// `auth/invalid-refresh-token`. Custom-token exchange succeeds with
/// `exchanged-id-token` / `exchanged-refresh-token` unless scripted to fail.
#[derive(Default)]
pub struct MockAuthority {
    verify: Mutex<HashMap<String, Result<VerifiedClaims, AuthorityError>>>,
    refresh: Mutex<HashMap<String, Result<String, AuthorityError>>>,
    custom_claims: Mutex<Option<Result<Map<String, Value>, AuthorityError>>>,
    exchange: Mutex<Option<Result<TokenPair, AuthorityError>>>,
    minted_claims: Mutex<Option<Map<String, Value>>>,
    verify_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
}

impl MockAuthority {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `token` verifies as `uid`
    #[must_use]
    pub fn with_valid_token(self, token: &str, uid: &str) -> Self {
        self.with_claims(token, TestFixtures::verified_claims(uid, Value::Null))
    }

    #[must_use]
    pub fn with_claims(self, token: &str, claims: VerifiedClaims) -> Self {
        lock(&self.verify).insert(token.to_string(), Ok(claims));
        self
    }

    #[must_use]
    pub fn with_verify_error(self, token: &str, code: &str) -> Self {
        lock(&self.verify).insert(
            token.to_string(),
            Err(AuthorityError::new(code, "scripted verification failure")),
        );
        self
    }

    /// `refresh_token` refreshes to `new_id_token`
    #[must_use]
    pub fn with_refresh(self, refresh_token: &str, new_id_token: &str) -> Self {
        lock(&self.refresh).insert(refresh_token.to_string(), Ok(new_id_token.to_string()));
        self
    }

    #[must_use]
    pub fn with_refresh_error(self, refresh_token: &str, code: &str) -> Self {
        lock(&self.refresh).insert(
            refresh_token.to_string(),
            Err(AuthorityError::new(code, "scripted refresh failure")),
        );
        self
    }

    /// Custom claims stored for every user; non-object values mean none
    #[must_use]
    pub fn with_custom_claims(self, claims: Value) -> Self {
        let claims = match claims {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        *lock(&self.custom_claims) = Some(Ok(claims));
        self
    }

    #[must_use]
    pub fn with_claims_error(self, code: &str) -> Self {
        *lock(&self.custom_claims) = Some(Err(AuthorityError::new(code, "scripted lookup failure")));
        self
    }

    #[must_use]
    pub fn with_exchange(self, id_token: &str, refresh_token: &str) -> Self {
        *lock(&self.exchange) = Some(Ok(TokenPair {
            id_token: id_token.to_string(),
            refresh_token: refresh_token.to_string(),
        }));
        self
    }

    #[must_use]
    pub fn with_exchange_error(self, code: &str) -> Self {
        *lock(&self.exchange) = Some(Err(AuthorityError::new(code, "scripted exchange failure")));
        self
    }

    #[must_use]
    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    /// Claims passed to the most recent custom-token mint
    #[must_use]
    pub fn last_custom_token_claims(&self) -> Option<Map<String, Value>> {
        lock(&self.minted_claims).clone()
    }
}

#[async_trait]
impl IdentityAuthority for MockAuthority {
    async fn verify_id_token(&self, token: &str) -> Result<VerifiedClaims, AuthorityError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.verify)
            .get(token)
            .cloned()
            .unwrap_or_else(|| Err(AuthorityError::argument("Unknown test token")))
    }

    async fn refresh_id_token(&self, refresh_token: &str) -> Result<String, AuthorityError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.refresh)
            .get(refresh_token)
            .cloned()
            .unwrap_or_else(|| {
                Err(AuthorityError::new(
                    crate::authority::codes::INVALID_REFRESH_TOKEN,
                    "Unknown test refresh token",
                ))
            })
    }

    async fn get_custom_claims(&self, _uid: &str) -> Result<Map<String, Value>, AuthorityError> {
        lock(&self.custom_claims)
            .clone()
            .unwrap_or_else(|| Ok(Map::new()))
    }

    async fn create_custom_token(
        &self,
        uid: &str,
        claims: &Map<String, Value>,
    ) -> Result<String, AuthorityError> {
        *lock(&self.minted_claims) = Some(claims.clone());
        Ok(format!("custom-token-for-{uid}"))
    }

    async fn exchange_custom_token(&self, _custom_token: &str) -> Result<TokenPair, AuthorityError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.exchange).clone().unwrap_or_else(|| {
            Ok(TokenPair {
                id_token: "exchanged-id-token".to_string(),
                refresh_token: "exchanged-refresh-token".to_string(),
            })
        })
    }
}

// =============================================================================
// Client SDK user
// =============================================================================

/// Live client user with a fixed profile
pub struct MockClientUser {
    uid: String,
    email: Option<String>,
    token: Option<String>,
    claims: Map<String, Value>,
    token_requests: AtomicUsize,
    signed_out: AtomicBool,
}

impl MockClientUser {
    #[must_use]
    pub fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            email: Some(TEST_EMAIL.to_string()),
            token: None,
            claims: Map::new(),
            token_requests: AtomicUsize::new(0),
            signed_out: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    #[must_use]
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    #[must_use]
    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn signed_out(&self) -> bool {
        self.signed_out.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientUser for MockClientUser {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn email_verified(&self) -> bool {
        true
    }

    fn phone_number(&self) -> Option<&str> {
        None
    }

    fn display_name(&self) -> Option<&str> {
        Some("Test User")
    }

    fn photo_url(&self) -> Option<&str> {
        None
    }

    fn tenant_id(&self) -> Option<&str> {
        None
    }

    fn claims(&self) -> Map<String, Value> {
        self.claims.clone()
    }

    async fn get_id_token(&self) -> anyhow::Result<String> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        self.token
            .clone()
            .ok_or_else(|| anyhow!("mock client user has no token"))
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        self.signed_out.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Token-changed handler
// =============================================================================

/// Records which users were synced; can fail or block until released
#[derive(Default)]
pub struct MockTokenHandler {
    calls: Mutex<Vec<Option<String>>>,
    failure: Option<String>,
    paused: bool,
    entered: Notify,
    release: Notify,
}

impl MockTokenHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with `code`
    #[must_use]
    pub fn failing(code: &str) -> Self {
        Self {
            failure: Some(code.to_string()),
            ..Self::default()
        }
    }

    /// Calls block until [`MockTokenHandler::release`]
    #[must_use]
    pub fn paused(mut self) -> Self {
        self.paused = true;
        self
    }

    /// Wait until a call has started
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    /// User id of each synced user, `None` for signed out
    #[must_use]
    pub fn calls(&self) -> Vec<Option<String>> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl TokenChangedHandler for MockTokenHandler {
    async fn token_changed(&self, user: &AuthUser) -> Result<(), AuthorityError> {
        lock(&self.calls).push(user.id().map(ToString::to_string));
        self.entered.notify_one();
        if self.paused {
            self.release.notified().await;
        }
        match &self.failure {
            Some(code) => Err(AuthorityError::new(code.as_str(), "scripted sync failure")),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Hooks
// =============================================================================

/// Counts hook invocations
#[derive(Clone, Default)]
pub struct HookRecorder {
    verify: Arc<AtomicUsize>,
    refresh: Arc<AtomicUsize>,
    login: Arc<AtomicUsize>,
    logout: Arc<AtomicUsize>,
}

impl HookRecorder {
    /// Hooks that count into this recorder
    #[must_use]
    pub fn hooks(&self) -> ErrorHooks {
        let (verify, refresh, login, logout) = (
            Arc::clone(&self.verify),
            Arc::clone(&self.refresh),
            Arc::clone(&self.login),
            Arc::clone(&self.logout),
        );
        ErrorHooks::default()
            .with_verify_token_error(move |_| {
                verify.fetch_add(1, Ordering::SeqCst);
            })
            .with_token_refresh_error(move |_| {
                refresh.fetch_add(1, Ordering::SeqCst);
            })
            .with_login_request_error(move |_| {
                login.fetch_add(1, Ordering::SeqCst);
            })
            .with_logout_request_error(move |_| {
                logout.fetch_add(1, Ordering::SeqCst);
            })
    }

    #[must_use]
    pub fn verify_errors(&self) -> usize {
        self.verify.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn refresh_errors(&self) -> usize {
        self.refresh.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn login_errors(&self) -> usize {
        self.login.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn logout_errors(&self) -> usize {
        self.logout.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.verify_errors() + self.refresh_errors() + self.login_errors() + self.logout_errors()
    }
}
