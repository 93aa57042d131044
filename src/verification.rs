//! ID-token verification with a single refresh-and-retry
//!
//! The flow is an explicit state machine:
//!
//! ```text
//! VerifyAttempt ──ok──────────────────────────────▶ Authenticated
//!     │ possibly stale + refresh token
//!     ▼
//! RefreshAttempt ──ok──▶ VerifyRetry ──ok─────────▶ Authenticated
//!     │ err                  │ err
//!     ▼                      ▼
//! Unauthenticated ◀──────────┘
//! ```
//!
//! Every failure ends in an unauthenticated user; nothing propagates.

use std::sync::Arc;

use serde_json::Map;

use crate::authority::{AuthorityError, ErrorClass, IdentityAuthority};
use crate::error::AuthError;
use crate::hooks::ErrorHooks;
use crate::models::claims::{filter_standard_claims, VerifiedClaims};
use crate::models::tokens::RefreshedSession;
use crate::models::user::AuthUser;
use crate::utils::logging::LoggingHelper;

enum VerificationState {
    VerifyAttempt { token: String },
    RefreshAttempt { refresh_token: String },
    VerifyRetry { token: String },
    Authenticated { claims: VerifiedClaims, token: String },
    Unauthenticated,
}

#[derive(Clone)]
pub struct TokenVerifier {
    authority: Arc<dyn IdentityAuthority>,
    hooks: ErrorHooks,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(authority: Arc<dyn IdentityAuthority>) -> Self {
        Self {
            authority,
            hooks: ErrorHooks::default(),
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: ErrorHooks) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub const fn hooks(&self) -> &ErrorHooks {
        &self.hooks
    }

    /// Verify `token`, refreshing it at most once with `refresh_token`
    ///
    /// Returns the verified user carrying whichever token succeeded, or the
    /// empty user.
    pub async fn verify_id_token(&self, token: &str, refresh_token: Option<&str>) -> AuthUser {
        let refresh_token = refresh_token.filter(|t| !t.is_empty());
        let mut state = VerificationState::VerifyAttempt {
            token: token.to_string(),
        };

        loop {
            state = match state {
                VerificationState::VerifyAttempt { token } => {
                    match self.authority.verify_id_token(&token).await {
                        Ok(claims) => VerificationState::Authenticated { claims, token },
                        Err(err) => self.after_failed_verify(&err, refresh_token),
                    }
                }
                VerificationState::RefreshAttempt { refresh_token } => {
                    LoggingHelper::log_refresh_start();
                    match self.authority.refresh_id_token(&refresh_token).await {
                        Ok(token) => {
                            LoggingHelper::log_refresh_outcome(true);
                            VerificationState::VerifyRetry { token }
                        }
                        Err(err) => {
                            LoggingHelper::log_refresh_outcome(false);
                            (self.hooks.on_token_refresh_error)(&err);
                            VerificationState::Unauthenticated
                        }
                    }
                }
                VerificationState::VerifyRetry { token } => {
                    match self.authority.verify_id_token(&token).await {
                        Ok(claims) => VerificationState::Authenticated { claims, token },
                        Err(err) => {
                            LoggingHelper::log_verification_failure(&err, "refreshed token");
                            (self.hooks.on_token_refresh_error)(&err);
                            VerificationState::Unauthenticated
                        }
                    }
                }
                VerificationState::Authenticated { claims, token } => {
                    return AuthUser::from_verified_token(&claims, Some(token));
                }
                VerificationState::Unauthenticated => return AuthUser::empty(),
            };
        }
    }

    fn after_failed_verify(
        &self,
        err: &AuthorityError,
        refresh_token: Option<&str>,
    ) -> VerificationState {
        let class = err.class();
        LoggingHelper::log_verification_failure(err, class.as_str());

        match (class, refresh_token) {
            (ErrorClass::PossiblyStale, Some(refresh_token)) => VerificationState::RefreshAttempt {
                refresh_token: refresh_token.to_string(),
            },
            (ErrorClass::DefinitivelyInvalid, _) => VerificationState::Unauthenticated,
            // Stale with nothing to refresh with, or unknown: report it
            (ErrorClass::PossiblyStale | ErrorClass::Unclassified, _) => {
                (self.hooks.on_verify_token_error)(err);
                VerificationState::Unauthenticated
            }
        }
    }

    /// Verify `token`, then mint and exchange a custom token for a fresh
    /// ID/refresh token pair
    ///
    /// The user's current custom claims are looked up and carried into the
    /// new token; a failed lookup falls back to no claims.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::IdentityVerification` if `token` does not verify or
    /// the custom-token mint or exchange fails
    pub async fn get_session_and_refreshed_tokens(
        &self,
        token: &str,
    ) -> Result<RefreshedSession, AuthError> {
        let user = self.verify_id_token(token, None).await;
        let Some(uid) = user.id().map(ToString::to_string) else {
            return Err(AuthError::IdentityVerification(
                "The provided ID token could not be verified".to_string(),
            ));
        };

        let claims = match self.authority.get_custom_claims(&uid).await {
            Ok(claims) => filter_standard_claims(&claims),
            Err(err) => {
                LoggingHelper::log_claims_lookup_failed(&uid, &err);
                Map::new()
            }
        };

        let custom_token = self
            .authority
            .create_custom_token(&uid, &claims)
            .await
            .map_err(|e| AuthError::IdentityVerification(e.to_string()))?;
        let pair = self
            .authority
            .exchange_custom_token(&custom_token)
            .await
            .map_err(|e| AuthError::IdentityVerification(e.to_string()))?;

        Ok(RefreshedSession {
            id_token: Some(pair.id_token),
            refresh_token: Some(pair.refresh_token),
            user,
        })
    }
}
