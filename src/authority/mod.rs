//! The external identity authority
//!
//! [`IdentityAuthority`] is the seam between session handling and the
//! service that issues and verifies ID tokens. [`firebase::FirebaseAuthority`]
//! talks to the real service (or its emulator); tests substitute a mock.

pub mod firebase;
pub mod jwks;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use once_cell::sync::{Lazy, OnceCell};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::AuthError;
use crate::models::claims::VerifiedClaims;
use crate::settings::FirebridgeSettings;

pub use firebase::FirebaseAuthority;

// ============================================================================
// Errors and classification
// ============================================================================

/// Failure reported by (or while talking to) the authority
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct AuthorityError {
    /// Provider error code, e.g. `auth/id-token-expired`
    pub code: String,
    pub message: String,
}

impl AuthorityError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Malformed or unverifiable token
    #[must_use]
    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(codes::ARGUMENT_ERROR, message)
    }

    /// Transport failure or unexpected response
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        ErrorClass::of(&self.code)
    }
}

impl From<reqwest::Error> for AuthorityError {
    fn from(err: reqwest::Error) -> Self {
        Self::internal(format!("Request to identity authority failed: {err}"))
    }
}

pub mod codes {
    pub const INVALID_USER_TOKEN: &str = "auth/invalid-user-token";
    pub const USER_TOKEN_EXPIRED: &str = "auth/user-token-expired";
    pub const USER_DISABLED: &str = "auth/user-disabled";
    pub const ID_TOKEN_EXPIRED: &str = "auth/id-token-expired";
    pub const ARGUMENT_ERROR: &str = "auth/argument-error";
    pub const INTERNAL_ERROR: &str = "auth/internal-error";
    pub const INVALID_REFRESH_TOKEN: &str = "auth/invalid-refresh-token";
    pub const USER_NOT_FOUND: &str = "auth/user-not-found";
}

/// How the verification engine reacts to a failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Invalid, expired credential or disabled user: plain logout
    DefinitivelyInvalid,
    /// The token may just be old; a refresh is worth one try
    PossiblyStale,
    Unclassified,
}

static ERROR_CLASSES: Lazy<HashMap<&'static str, ErrorClass>> = Lazy::new(|| {
    HashMap::from([
        (codes::INVALID_USER_TOKEN, ErrorClass::DefinitivelyInvalid),
        (codes::USER_TOKEN_EXPIRED, ErrorClass::DefinitivelyInvalid),
        (codes::USER_DISABLED, ErrorClass::DefinitivelyInvalid),
        (codes::ID_TOKEN_EXPIRED, ErrorClass::PossiblyStale),
        (codes::ARGUMENT_ERROR, ErrorClass::PossiblyStale),
    ])
});

impl ErrorClass {
    #[must_use]
    pub fn of(code: &str) -> Self {
        ERROR_CLASSES
            .get(code)
            .copied()
            .unwrap_or(Self::Unclassified)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DefinitivelyInvalid => "definitively-invalid",
            Self::PossiblyStale => "possibly-stale",
            Self::Unclassified => "unclassified",
        }
    }
}

// ============================================================================
// Authority trait
// ============================================================================

/// Fresh token pair returned by a custom-token exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub id_token: String,
    pub refresh_token: String,
}

#[async_trait]
pub trait IdentityAuthority: Send + Sync {
    /// Verify an ID token and return its claims
    async fn verify_id_token(&self, token: &str) -> Result<VerifiedClaims, AuthorityError>;

    /// Exchange a refresh token for a new ID token
    async fn refresh_id_token(&self, refresh_token: &str) -> Result<String, AuthorityError>;

    /// Current custom claims stored for a user
    async fn get_custom_claims(&self, uid: &str) -> Result<Map<String, Value>, AuthorityError>;

    /// Mint a custom token for `uid` carrying `claims`
    async fn create_custom_token(
        &self,
        uid: &str,
        claims: &Map<String, Value>,
    ) -> Result<String, AuthorityError>;

    /// Sign in with a custom token to obtain an ID/refresh token pair
    async fn exchange_custom_token(&self, custom_token: &str) -> Result<TokenPair, AuthorityError>;
}

// ============================================================================
// Process-wide instance
// ============================================================================

static AUTHORITY: OnceCell<Arc<dyn IdentityAuthority>> = OnceCell::new();

/// Initialize the shared authority client once; later calls return the first instance
///
/// # Errors
///
/// Returns `AuthError::Configuration` if the first initialization fails
pub fn init_authority(
    settings: &FirebridgeSettings,
) -> Result<Arc<dyn IdentityAuthority>, AuthError> {
    AUTHORITY
        .get_or_try_init(|| {
            let authority = FirebaseAuthority::from_settings(settings)?;
            info!("✓ Identity authority client ready");
            Ok::<Arc<dyn IdentityAuthority>, AuthError>(Arc::new(authority))
        })
        .map(Arc::clone)
}

/// The shared authority client, if initialized
#[must_use]
pub fn authority() -> Option<Arc<dyn IdentityAuthority>> {
    AUTHORITY.get().map(Arc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification_table() {
        assert_eq!(
            ErrorClass::of("auth/user-token-expired"),
            ErrorClass::DefinitivelyInvalid
        );
        assert_eq!(
            ErrorClass::of("auth/invalid-user-token"),
            ErrorClass::DefinitivelyInvalid
        );
        assert_eq!(ErrorClass::of("auth/user-disabled"), ErrorClass::DefinitivelyInvalid);
        assert_eq!(ErrorClass::of("auth/id-token-expired"), ErrorClass::PossiblyStale);
        assert_eq!(ErrorClass::of("auth/argument-error"), ErrorClass::PossiblyStale);
        assert_eq!(ErrorClass::of("auth/internal-error"), ErrorClass::Unclassified);
        assert_eq!(ErrorClass::of("something/else"), ErrorClass::Unclassified);
    }

    #[test]
    fn test_error_display_includes_code() {
        let err = AuthorityError::new(codes::ID_TOKEN_EXPIRED, "token expired");
        assert_eq!(err.to_string(), "auth/id-token-expired: token expired");
        assert_eq!(err.class(), ErrorClass::PossiblyStale);
    }
}
