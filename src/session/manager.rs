//! Session Manager - cookie-backed session handling
//!
//! The `SessionManager` is the single entry point for reading a session out
//! of a request's cookies and for writing or clearing those cookies after an
//! auth event. Verification is delegated to `TokenVerifier`, cookie handling
//! to `CookieCodec`.
//!
//! ## Organization
//!
//! 1. **Types** - request options
//! 2. **Construction** - `SessionManager` creation and configuration
//! 3. **Session Extraction** - materializing an `AuthUser` from cookies
//! 4. **Commit / Revoke** - writing and clearing the cookie pair
//! 5. **Tests**

use std::sync::Arc;

use actix_web::http::header::AUTHORIZATION;
use actix_web::HttpRequest;

use crate::authority::IdentityAuthority;
use crate::encoding::DecodeError;
use crate::error::AuthError;
use crate::hooks::ErrorHooks;
use crate::models::tokens::{RefreshedSession, SessionTokens};
use crate::models::user::{AuthUser, CreateOptions, UserSource};
use crate::session::cookie::{CookieCodec, CookieSource, RawCookies, ResponseCookies};
use crate::settings::CookieSettings;
use crate::utils::logging::LoggingHelper;
use crate::verification::TokenVerifier;

// =============================================================================
// 1. Types
// =============================================================================

/// How to read the session for one request
#[derive(Debug, Clone, Copy)]
pub struct GetSessionOptions<'a> {
    pub request: Option<&'a HttpRequest>,
    /// Verify the tokens cookie and embed the ID token in the user.
    /// When false, the signed session-data cookie is trusted as is.
    pub include_token: bool,
    /// Cookie value supplied directly instead of via `request`
    pub raw_cookie_value: Option<&'a str>,
    /// Signature of `raw_cookie_value`
    pub raw_cookie_sig_value: Option<&'a str>,
}

impl Default for GetSessionOptions<'_> {
    fn default() -> Self {
        Self {
            request: None,
            include_token: true,
            raw_cookie_value: None,
            raw_cookie_sig_value: None,
        }
    }
}

impl<'a> GetSessionOptions<'a> {
    #[must_use]
    pub fn for_request(request: &'a HttpRequest) -> Self {
        Self {
            request: Some(request),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_raw_cookie(value: &'a str, signature: Option<&'a str>) -> Self {
        Self {
            raw_cookie_value: Some(value),
            raw_cookie_sig_value: signature,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn include_token(mut self, include_token: bool) -> Self {
        self.include_token = include_token;
        self
    }
}

enum SessionSource<'a> {
    Request(&'a HttpRequest),
    Raw(RawCookies),
}

impl CookieSource for SessionSource<'_> {
    fn cookie_value(&self, name: &str) -> Option<String> {
        match self {
            Self::Request(req) => req.cookie_value(name),
            Self::Raw(raw) => raw.cookie_value(name),
        }
    }
}

// =============================================================================
// 2. Construction
// =============================================================================

#[derive(Clone)]
pub struct SessionManager {
    codec: CookieCodec,
    verifier: TokenVerifier,
}

impl SessionManager {
    #[must_use]
    pub fn new(cookie_settings: CookieSettings, authority: Arc<dyn IdentityAuthority>) -> Self {
        Self {
            codec: CookieCodec::new(cookie_settings),
            verifier: TokenVerifier::new(authority),
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: ErrorHooks) -> Self {
        self.verifier = self.verifier.with_hooks(hooks);
        self
    }

    #[must_use]
    pub const fn codec(&self) -> &CookieCodec {
        &self.codec
    }

    #[must_use]
    pub const fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    // =========================================================================
    // 3. Session Extraction
    // =========================================================================

    /// Materialize the user for a request from its session cookies
    ///
    /// With `include_token` the tokens cookie is read and its ID token is
    /// verified (refreshing once when stale). Without it the signed
    /// session-data cookie is deserialized with no authority call.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` when neither a request nor a raw
    /// cookie is given, when signing is configured without keys, or when the
    /// lightweight path is requested with unsigned cookies. Returns
    /// `AuthError::Decode` for a session-data cookie that is not valid JSON.
    pub async fn get_session_from_cookies(
        &self,
        options: &GetSessionOptions<'_>,
    ) -> Result<AuthUser, AuthError> {
        let signed = self.codec.settings().signed;
        if !options.include_token && !signed {
            return Err(AuthError::configuration(
                "Cookies must be signed to read the session without verifying its token",
            ));
        }

        let cookie_name = if options.include_token {
            self.codec.session_tokens_name()
        } else {
            self.codec.session_data_name()
        };
        let source = Self::session_source(&cookie_name, options)?;
        let Some(cookie_value) = self.codec.get_cookie(&cookie_name, &source, signed)? else {
            return Ok(AuthUser::empty());
        };

        if options.include_token {
            // Undecodable tokens payload reads as no session
            let tokens: SessionTokens = match serde_json::from_str(&cookie_value) {
                Ok(tokens) => tokens,
                Err(e) => {
                    log::debug!("Ignoring malformed session tokens cookie: {e}");
                    return Ok(AuthUser::empty());
                }
            };
            match tokens.id_token.as_deref() {
                Some(id_token) if !id_token.is_empty() => Ok(self
                    .verifier
                    .verify_id_token(id_token, tokens.refresh_token.as_deref())
                    .await),
                _ => Ok(AuthUser::empty()),
            }
        } else {
            AuthUser::from_source(
                UserSource::Serialized(cookie_value),
                CreateOptions::default(),
            )
        }
    }

    fn session_source<'a>(
        cookie_name: &str,
        options: &GetSessionOptions<'a>,
    ) -> Result<SessionSource<'a>, AuthError> {
        if let Some(value) = options.raw_cookie_value {
            return Ok(SessionSource::Raw(RawCookies::new(
                cookie_name,
                value,
                options.raw_cookie_sig_value,
            )));
        }
        options.request.map(SessionSource::Request).ok_or_else(|| {
            AuthError::configuration("Either a request or a raw cookie value must be provided")
        })
    }

    // =========================================================================
    // 4. Commit / Revoke
    // =========================================================================

    /// Exchange the caller's ID token for a fresh token pair and write both
    /// session cookies
    ///
    /// The token comes from `token` or, failing that, the request's
    /// `Authorization` header. A token that cannot be verified or exchanged
    /// still writes the cookies, holding an unauthenticated user and null
    /// tokens.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MissingToken` before any cookie is written when no
    /// token is available, and `AuthError::Configuration` when cookies cannot
    /// be signed
    pub async fn commit_session(
        &self,
        req: &HttpRequest,
        cookies: &mut ResponseCookies,
        token: Option<&str>,
    ) -> Result<RefreshedSession, AuthError> {
        let token = token
            .map(ToString::to_string)
            .or_else(|| bearer_token(req))
            .ok_or(AuthError::MissingToken)?;

        let session = match self.verifier.get_session_and_refreshed_tokens(&token).await {
            Ok(session) => session,
            Err(e) => {
                log::warn!("⚠️ Could not establish session, writing unauthenticated cookies: {e}");
                RefreshedSession::unauthenticated()
            }
        };

        let tokens_json = serde_json::to_string(&session.tokens())
            .map_err(DecodeError::from)?;
        self.codec
            .set_cookie(&self.codec.session_tokens_name(), Some(&tokens_json), cookies)?;
        self.codec.set_cookie(
            &self.codec.session_data_name(),
            Some(&session.user.serialize(false)),
            cookies,
        )?;

        LoggingHelper::log_session_committed(session.user.id(), session.id_token.is_some());
        Ok(session)
    }

    /// Expire both session cookies
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` when signing is configured without keys
    pub fn revoke_session(&self, cookies: &mut ResponseCookies) -> Result<(), AuthError> {
        self.codec
            .delete_cookie(&self.codec.session_tokens_name(), cookies)?;
        self.codec
            .delete_cookie(&self.codec.session_data_name(), cookies)?;
        LoggingHelper::log_session_revoked();
        Ok(())
    }
}

/// Token from the `Authorization` header, with an optional `Bearer ` prefix removed
fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then(|| token.to_string())
}

// =============================================================================
// 5. Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::codes;
    use crate::testing::fixtures::TestFixtures;
    use crate::testing::mock::MockAuthority;
    use crate::testing::requests::RequestBuilder;

    fn manager(authority: MockAuthority) -> (SessionManager, Arc<MockAuthority>) {
        let authority = Arc::new(authority);
        let manager = SessionManager::new(
            TestFixtures::cookie_settings(),
            Arc::clone(&authority) as Arc<dyn IdentityAuthority>,
        );
        (manager, authority)
    }

    #[test]
    fn test_bearer_token_extraction() {
        let req = RequestBuilder::new().with_authorization("Bearer abc").build();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc"));

        let req = RequestBuilder::new().with_authorization("abc").build();
        assert_eq!(bearer_token(&req).as_deref(), Some("abc"));

        let req = RequestBuilder::new().with_authorization("  ").build();
        assert_eq!(bearer_token(&req), None);

        assert_eq!(bearer_token(&RequestBuilder::new().build()), None);
    }

    #[actix_web::test]
    async fn test_no_request_and_no_raw_cookie_is_configuration_error() {
        let (manager, _) = manager(MockAuthority::new());
        let result = manager
            .get_session_from_cookies(&GetSessionOptions::default())
            .await;
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }

    #[actix_web::test]
    async fn test_commit_without_token_writes_nothing() {
        let (manager, authority) = manager(MockAuthority::new());
        let req = RequestBuilder::new().build();
        let mut cookies = ResponseCookies::new();

        let result = manager.commit_session(&req, &mut cookies, None).await;

        assert!(matches!(result, Err(AuthError::MissingToken)));
        assert!(cookies.is_empty());
        assert_eq!(authority.verify_calls(), 0);
    }

    #[actix_web::test]
    async fn test_commit_prefers_explicit_token_over_header() {
        let (manager, _) = manager(MockAuthority::new().with_valid_token("explicit", "user-1"));
        let req = RequestBuilder::new()
            .with_authorization("header-token")
            .build();
        let mut cookies = ResponseCookies::new();

        let session = manager
            .commit_session(&req, &mut cookies, Some("explicit"))
            .await
            .unwrap();
        assert_eq!(session.user.id(), Some("user-1"));
    }

    #[actix_web::test]
    async fn test_commit_with_unverifiable_token_writes_empty_session() {
        let (manager, _) =
            manager(MockAuthority::new().with_verify_error("bad", codes::INVALID_USER_TOKEN));
        let req = RequestBuilder::new().with_authorization("bad").build();
        let mut cookies = ResponseCookies::new();

        let session = manager.commit_session(&req, &mut cookies, None).await.unwrap();

        assert!(!session.user.is_authenticated());
        assert!(session.id_token.is_none());

        let data = cookies.get("testapp.SessionData").unwrap();
        let stored: String = crate::encoding::decode(data.value.as_deref().unwrap()).unwrap();
        assert_eq!(stored, AuthUser::empty().serialize(false));

        let tokens = cookies.get("testapp.SessionTokens").unwrap();
        let stored: String = crate::encoding::decode(tokens.value.as_deref().unwrap()).unwrap();
        assert_eq!(stored, r#"{"idToken":null,"refreshToken":null}"#);
    }

    #[actix_web::test]
    async fn test_lightweight_read_requires_signed_cookies() {
        let authority = Arc::new(MockAuthority::new());
        let manager = SessionManager::new(
            CookieSettings {
                signed: false,
                keys: Vec::new(),
                ..TestFixtures::cookie_settings()
            },
            authority,
        );
        let req = RequestBuilder::new().build();

        let result = manager
            .get_session_from_cookies(&GetSessionOptions::for_request(&req).include_token(false))
            .await;
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }

    #[actix_web::test]
    async fn test_raw_cookie_value_reads_session_data() {
        let (manager, authority) = manager(MockAuthority::new().with_valid_token("tok", "user-9"));
        let req = RequestBuilder::new().with_authorization("tok").build();
        let mut cookies = ResponseCookies::new();
        manager.commit_session(&req, &mut cookies, None).await.unwrap();

        let value = cookies.get("testapp.SessionData").and_then(|w| w.value.clone()).unwrap();
        let signature = cookies
            .get("testapp.SessionData.sig")
            .and_then(|w| w.value.clone())
            .unwrap();
        let verify_calls = authority.verify_calls();

        let user = manager
            .get_session_from_cookies(
                &GetSessionOptions::for_raw_cookie(&value, Some(&signature)).include_token(false),
            )
            .await
            .unwrap();

        assert_eq!(user.id(), Some("user-9"));
        assert_eq!(user.embedded_token(), None);
        assert_eq!(authority.verify_calls(), verify_calls);

        let forged = manager
            .get_session_from_cookies(
                &GetSessionOptions::for_raw_cookie(&value, Some("bogus")).include_token(false),
            )
            .await
            .unwrap();
        assert!(!forged.is_authenticated());
    }

    #[actix_web::test]
    async fn test_tokens_cookie_without_id_token_is_unauthenticated() {
        let (manager, authority) = manager(MockAuthority::new());
        let mut cookies = ResponseCookies::new();
        manager
            .codec()
            .set_cookie(
                "testapp.SessionTokens",
                Some(r#"{"idToken":null,"refreshToken":"r"}"#),
                &mut cookies,
            )
            .unwrap();
        let req = RequestBuilder::new().with_response_cookies(&cookies).build();

        let user = manager
            .get_session_from_cookies(&GetSessionOptions::for_request(&req))
            .await
            .unwrap();
        assert!(!user.is_authenticated());
        assert_eq!(authority.verify_calls(), 0);
    }

    #[actix_web::test]
    async fn test_revoke_expires_both_cookies() {
        let (manager, _) = manager(MockAuthority::new());
        let mut cookies = ResponseCookies::new();
        manager.revoke_session(&mut cookies).unwrap();

        for name in [
            "testapp.SessionData",
            "testapp.SessionData.sig",
            "testapp.SessionTokens",
            "testapp.SessionTokens.sig",
        ] {
            assert!(cookies.get(name).unwrap().is_deletion(), "{name}");
        }
    }
}
