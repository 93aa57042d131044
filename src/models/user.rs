//! `AuthUser`: who a request or client session belongs to
//!
//! An `AuthUser` is built from exactly one source:
//!
//! - a live client SDK user ([`ClientUser`]), the only source that can be
//!   marked `client_initialized`
//! - a verified server-side claim set ([`VerifiedClaims`]), optionally with
//!   the raw ID token that produced it
//! - a string previously produced by [`AuthUser::serialize`]
//!
//! or from nothing, which yields the unauthenticated user. Every variant
//! exposes the same fields; token and sign-out behaviour differ per source
//! and live behind the [`TokenProvider`] and [`SessionTerminator`] traits.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::encoding::DecodeError;
use crate::error::AuthError;
use crate::models::claims::VerifiedClaims;

// =============================================================================
// Capabilities
// =============================================================================

/// A user as observed live by a client-side identity SDK
#[async_trait]
pub trait ClientUser: Send + Sync {
    fn uid(&self) -> &str;
    fn email(&self) -> Option<&str>;
    fn email_verified(&self) -> bool;
    fn phone_number(&self) -> Option<&str>;
    fn display_name(&self) -> Option<&str>;
    fn photo_url(&self) -> Option<&str>;
    fn tenant_id(&self) -> Option<&str>;

    fn claims(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Current ID token, refreshed by the SDK when needed
    async fn get_id_token(&self) -> Result<String>;

    /// Terminate the client session
    async fn sign_out(&self) -> Result<()>;
}

/// Resolves the bearer token currently associated with a user
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn id_token(&self) -> Result<Option<String>>;

    /// Token available without any I/O, the only kind that may be serialized
    fn embedded_token(&self) -> Option<&str> {
        None
    }
}

/// Ends the session a user came from
#[async_trait]
pub trait SessionTerminator: Send + Sync {
    async fn sign_out(&self) -> Result<()>;
}

/// Token held in memory: a verified raw token, a deserialized `_token`, or nothing
#[derive(Debug, Clone, Default)]
pub struct EmbeddedToken(pub Option<String>);

#[async_trait]
impl TokenProvider for EmbeddedToken {
    async fn id_token(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }

    fn embedded_token(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTerminator;

#[async_trait]
impl SessionTerminator for NoopTerminator {
    async fn sign_out(&self) -> Result<()> {
        Ok(())
    }
}

/// Delegates both capabilities to the live client SDK
#[derive(Clone)]
pub struct LiveClient(pub Arc<dyn ClientUser>);

#[async_trait]
impl TokenProvider for LiveClient {
    async fn id_token(&self) -> Result<Option<String>> {
        self.0.get_id_token().await.map(Some)
    }
}

#[async_trait]
impl SessionTerminator for LiveClient {
    async fn sign_out(&self) -> Result<()> {
        self.0.sign_out().await
    }
}

// =============================================================================
// Construction inputs
// =============================================================================

/// Where an `AuthUser` comes from
#[derive(Clone, Default)]
pub enum UserSource {
    #[default]
    Empty,
    LiveClient(Arc<dyn ClientUser>),
    VerifiedToken(VerifiedClaims),
    Serialized(String),
}

/// Cross-field options that a plain `UserSource` cannot express
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Only allowed with `UserSource::LiveClient`
    pub client_initialized: bool,
    /// Only allowed with `UserSource::VerifiedToken`
    pub raw_token: Option<String>,
}

/// Loose "one of three inputs" constructor
///
/// Mirrors callers that hold optional inputs; supplying more than one
/// source is rejected at `build` time.
#[derive(Default)]
pub struct AuthUserBuilder {
    live_client: Option<Arc<dyn ClientUser>>,
    verified_token: Option<VerifiedClaims>,
    serialized: Option<String>,
    options: CreateOptions,
}

impl AuthUserBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn live_client(mut self, user: Arc<dyn ClientUser>) -> Self {
        self.live_client = Some(user);
        self
    }

    #[must_use]
    pub fn verified_token(mut self, claims: VerifiedClaims) -> Self {
        self.verified_token = Some(claims);
        self
    }

    #[must_use]
    pub fn serialized(mut self, serialized: impl Into<String>) -> Self {
        self.serialized = Some(serialized.into());
        self
    }

    #[must_use]
    pub fn client_initialized(mut self, client_initialized: bool) -> Self {
        self.options.client_initialized = client_initialized;
        self
    }

    #[must_use]
    pub fn raw_token(mut self, token: impl Into<String>) -> Self {
        self.options.raw_token = Some(token.into());
        self
    }

    /// Validate the inputs and build the user
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Construction` if more than one source was given or
    /// the options do not fit the source, and `AuthError::Decode` if a
    /// serialized user cannot be parsed
    pub fn build(self) -> Result<AuthUser, AuthError> {
        let provided = usize::from(self.live_client.is_some())
            + usize::from(self.verified_token.is_some())
            + usize::from(self.serialized.is_some());
        if provided > 1 {
            return Err(AuthError::construction(
                "Only one of a live client user, a verified token, or a serialized user may be provided",
            ));
        }

        let source = if let Some(user) = self.live_client {
            UserSource::LiveClient(user)
        } else if let Some(claims) = self.verified_token {
            UserSource::VerifiedToken(claims)
        } else if let Some(serialized) = self.serialized {
            UserSource::Serialized(serialized)
        } else {
            UserSource::Empty
        };

        AuthUser::from_source(source, self.options)
    }
}

// =============================================================================
// AuthUser
// =============================================================================

/// Wire shape of a serialized `AuthUser`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerializedAuthUser {
    id: Option<String>,
    #[serde(default)]
    claims: Map<String, Value>,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    phone_number: Option<String>,
    display_name: Option<String>,
    #[serde(rename = "photoURL")]
    photo_url: Option<String>,
    #[serde(default)]
    client_initialized: bool,
    tenant_id: Option<String>,
    #[serde(rename = "_token", default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

#[derive(Clone)]
pub struct AuthUser {
    id: Option<String>,
    email: Option<String>,
    email_verified: bool,
    phone_number: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    claims: Map<String, Value>,
    tenant_id: Option<String>,
    client_initialized: bool,
    token_provider: Arc<dyn TokenProvider>,
    terminator: Arc<dyn SessionTerminator>,
}

impl AuthUser {
    /// The unauthenticated user
    #[must_use]
    pub fn empty() -> Self {
        Self {
            id: None,
            email: None,
            email_verified: false,
            phone_number: None,
            display_name: None,
            photo_url: None,
            claims: Map::new(),
            tenant_id: None,
            client_initialized: false,
            token_provider: Arc::new(EmbeddedToken(None)),
            terminator: Arc::new(NoopTerminator),
        }
    }

    /// Build a user from one source
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Construction` when `client_initialized` is set
    /// without a live client, or `raw_token` without a verified token, and
    /// `AuthError::Decode` when a serialized user is not valid JSON
    pub fn from_source(source: UserSource, options: CreateOptions) -> Result<Self, AuthError> {
        if options.client_initialized && !matches!(source, UserSource::LiveClient(_)) {
            return Err(AuthError::construction(
                "client_initialized can only be true when built from a live client user",
            ));
        }
        if options.raw_token.is_some() && !matches!(source, UserSource::VerifiedToken(_)) {
            return Err(AuthError::construction(
                "A raw token can only be attached when built from a verified token",
            ));
        }

        match source {
            UserSource::Empty => Ok(Self::empty()),
            UserSource::LiveClient(user) => Ok(Self::from_live_client(
                user,
                options.client_initialized,
            )),
            UserSource::VerifiedToken(claims) => {
                Ok(Self::from_verified_token(&claims, options.raw_token))
            }
            UserSource::Serialized(serialized) => Self::deserialize(&serialized),
        }
    }

    /// User observed by the client SDK
    #[must_use]
    pub fn from_live_client(user: Arc<dyn ClientUser>, client_initialized: bool) -> Self {
        let live = LiveClient(Arc::clone(&user));
        Self {
            id: Some(user.uid().to_string()),
            email: user.email().map(ToString::to_string),
            email_verified: user.email_verified(),
            phone_number: user.phone_number().map(ToString::to_string),
            display_name: user.display_name().map(ToString::to_string),
            photo_url: user.photo_url().map(ToString::to_string),
            claims: user.claims(),
            tenant_id: user.tenant_id().map(ToString::to_string),
            client_initialized,
            token_provider: Arc::new(live.clone()),
            terminator: Arc::new(live),
        }
    }

    /// User from an ID token the authority has verified
    #[must_use]
    pub fn from_verified_token(claims: &VerifiedClaims, raw_token: Option<String>) -> Self {
        Self {
            id: Some(claims.sub.clone()),
            email: claims.email.clone(),
            email_verified: claims.email_verified,
            phone_number: claims.phone_number.clone(),
            display_name: claims.name.clone(),
            photo_url: claims.picture.clone(),
            claims: claims.custom_claims(),
            tenant_id: claims.tenant().map(ToString::to_string),
            client_initialized: false,
            token_provider: Arc::new(EmbeddedToken(raw_token)),
            terminator: Arc::new(NoopTerminator),
        }
    }

    fn deserialize(serialized: &str) -> Result<Self, AuthError> {
        let parsed: SerializedAuthUser =
            serde_json::from_str(serialized).map_err(DecodeError::from)?;
        Ok(Self {
            id: parsed.id,
            email: parsed.email,
            email_verified: parsed.email_verified,
            phone_number: parsed.phone_number,
            display_name: parsed.display_name,
            photo_url: parsed.photo_url,
            claims: parsed.claims,
            tenant_id: parsed.tenant_id,
            client_initialized: parsed.client_initialized,
            token_provider: Arc::new(EmbeddedToken(parsed.token)),
            terminator: Arc::new(NoopTerminator),
        })
    }

    fn to_wire(&self, include_token: bool) -> SerializedAuthUser {
        SerializedAuthUser {
            id: self.id.clone(),
            claims: self.claims.clone(),
            email: self.email.clone(),
            email_verified: self.email_verified,
            phone_number: self.phone_number.clone(),
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
            client_initialized: self.client_initialized,
            tenant_id: self.tenant_id.clone(),
            token: if include_token {
                self.embedded_token().map(ToString::to_string)
            } else {
                None
            },
        }
    }

    /// JSON snapshot of this user
    ///
    /// `_token` is only written when `include_token` is set and a token is
    /// held in memory; tokens owned by a live client SDK are never written.
    #[must_use]
    pub fn serialize(&self, include_token: bool) -> String {
        // string-keyed data, cannot fail
        serde_json::to_string(&self.to_wire(include_token)).unwrap_or_default()
    }

    /// Resolve the current bearer token
    ///
    /// # Errors
    ///
    /// Returns an error if a live client SDK fails to produce a token
    pub async fn id_token(&self) -> Result<Option<String>> {
        self.token_provider.id_token().await
    }

    /// End the originating session; a no-op unless built from a live client
    ///
    /// # Errors
    ///
    /// Returns an error if the live client SDK fails to sign out
    pub async fn sign_out(&self) -> Result<()> {
        self.terminator.sign_out().await
    }

    #[must_use]
    pub fn embedded_token(&self) -> Option<&str> {
        self.token_provider.embedded_token()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub const fn email_verified(&self) -> bool {
        self.email_verified
    }

    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    #[must_use]
    pub fn photo_url(&self) -> Option<&str> {
        self.photo_url.as_deref()
    }

    #[must_use]
    pub const fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    #[must_use]
    pub const fn client_initialized(&self) -> bool {
        self.client_initialized
    }
}

impl Default for AuthUser {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for AuthUser {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.email == other.email
            && self.email_verified == other.email_verified
            && self.phone_number == other.phone_number
            && self.display_name == other.display_name
            && self.photo_url == other.photo_url
            && self.claims == other.claims
            && self.tenant_id == other.tenant_id
            && self.client_initialized == other.client_initialized
            && self.embedded_token() == other.embedded_token()
    }
}

impl fmt::Debug for AuthUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthUser")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("email_verified", &self.email_verified)
            .field("tenant_id", &self.tenant_id)
            .field("client_initialized", &self.client_initialized)
            .field("has_embedded_token", &self.embedded_token().is_some())
            .finish_non_exhaustive()
    }
}

/// JSON view for responses; never includes the token
impl Serialize for AuthUser {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire(false).serialize(serializer)
    }
}
