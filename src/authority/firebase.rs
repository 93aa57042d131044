//! reqwest-backed client for the Firebase Auth REST APIs
//!
//! Covers ID-token verification against the published signing keys,
//! custom-token minting from a service account, refresh-token exchange,
//! custom-token sign-in and custom-claims lookup. When an emulator host is
//! configured every call goes to `http://{host}/...`, emulator tokens are
//! accepted unsigned and minted custom tokens are unsigned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use super::jwks::{JsonWebKey, JsonWebKeySet, JwksCache};
use super::{codes, AuthorityError, IdentityAuthority, TokenPair};
use crate::error::AuthError;
use crate::models::claims::{filter_standard_claims, VerifiedClaims};
use crate::settings::FirebridgeSettings;
use crate::utils::crypto::{
    create_jwt, create_jwt_header, create_jwt_payload, decode_jwt_segment, parse_private_key,
    split_jwt, verify_rs256, JwtAlgorithm,
};
use crate::utils::logging::LoggingHelper;

const SECURE_TOKEN_HOST: &str = "https://securetoken.googleapis.com";
const IDENTITY_TOOLKIT_HOST: &str = "https://identitytoolkit.googleapis.com";
const JWKS_URI: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const OAUTH_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ISSUER_PREFIX: &str = "https://securetoken.google.com/";
const CUSTOM_TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";
const ADMIN_SCOPES: &str = "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/firebase https://www.googleapis.com/auth/identitytoolkit https://www.googleapis.com/auth/userinfo.email";
const EMULATOR_SERVICE_ACCOUNT: &str = "firebase-auth-emulator@example.com";
const EMULATOR_ACCESS_TOKEN: &str = "owner";
const CLOCK_SKEW_SECONDS: i64 = 300;
const MAX_UID_LENGTH: usize = 128;

// ============================================================================
// Endpoints
// ============================================================================

/// Base URLs of the services the authority client talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityEndpoints {
    pub secure_token: String,
    pub identity_toolkit: String,
    pub jwks_uri: String,
    pub oauth_token: String,
}

impl AuthorityEndpoints {
    #[must_use]
    pub fn production() -> Self {
        Self {
            secure_token: SECURE_TOKEN_HOST.to_string(),
            identity_toolkit: IDENTITY_TOOLKIT_HOST.to_string(),
            jwks_uri: JWKS_URI.to_string(),
            oauth_token: OAUTH_TOKEN_URI.to_string(),
        }
    }

    /// Route everything through an auth emulator at `host` (`host:port`)
    #[must_use]
    pub fn emulator(host: &str) -> Self {
        let host = host.trim_end_matches('/');
        Self {
            secure_token: format!("http://{host}/securetoken.googleapis.com"),
            identity_toolkit: format!("http://{host}/identitytoolkit.googleapis.com"),
            jwks_uri: JWKS_URI.to_string(),
            oauth_token: OAUTH_TOKEN_URI.to_string(),
        }
    }

    #[must_use]
    pub fn for_emulator_host(host: Option<&str>) -> Self {
        host.map_or_else(Self::production, Self::emulator)
    }

    #[must_use]
    pub fn refresh_url(&self) -> String {
        format!("{}/v1/token", self.secure_token)
    }

    #[must_use]
    pub fn sign_in_with_custom_token_url(&self) -> String {
        format!("{}/v1/accounts:signInWithCustomToken", self.identity_toolkit)
    }

    #[must_use]
    pub fn lookup_url(&self, project_id: &str, tenant_id: Option<&str>) -> String {
        match tenant_id {
            Some(tenant) => format!(
                "{}/v1/projects/{project_id}/tenants/{tenant}/accounts:lookup",
                self.identity_toolkit
            ),
            None => format!(
                "{}/v1/projects/{project_id}/accounts:lookup",
                self.identity_toolkit
            ),
        }
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Service account used to mint custom tokens and OAuth2 assertions
#[derive(Clone)]
pub struct ServiceAccount {
    pub client_email: String,
    private_key: Arc<RsaPrivateKey>,
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

impl ServiceAccount {
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the private key cannot be parsed
    pub fn new(client_email: &str, private_key_pem: &str) -> Result<Self, AuthError> {
        let private_key = parse_private_key(private_key_pem)
            .map_err(|e| AuthError::configuration(format!("Invalid service account key: {e}")))?;
        Ok(Self {
            client_email: client_email.to_string(),
            private_key: Arc::new(private_key),
        })
    }

    /// Load the JSON key file named by `GOOGLE_APPLICATION_CREDENTIALS`
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the variable is unset or the
    /// file cannot be read or parsed
    pub fn from_application_default() -> Result<(Self, Option<String>), AuthError> {
        #[derive(Deserialize)]
        struct KeyFile {
            client_email: String,
            private_key: String,
            project_id: Option<String>,
        }

        let path = std::env::var("GOOGLE_APPLICATION_CREDENTIALS").map_err(|_| {
            AuthError::configuration(
                "use_default_credential is set but GOOGLE_APPLICATION_CREDENTIALS is not",
            )
        })?;
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            AuthError::configuration(format!("Cannot read credentials file {path}: {e}"))
        })?;
        let key_file: KeyFile = serde_json::from_str(&contents).map_err(|e| {
            AuthError::configuration(format!("Invalid credentials file {path}: {e}"))
        })?;

        let account = Self::new(&key_file.client_email, &key_file.private_key)?;
        Ok((account, key_file.project_id))
    }

    #[must_use]
    pub fn public_key(&self) -> RsaPublicKey {
        RsaPublicKey::from(self.private_key.as_ref())
    }
}

struct CachedAccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct JwtHeader {
    alg: String,
    kid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    custom_attributes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Map a REST error response onto an authority error code
fn api_error(status: reqwest::StatusCode, body: &str) -> AuthorityError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| format!("HTTP {status}"));

    // Messages look like "TOKEN_EXPIRED" or "INVALID_ID_TOKEN : detail"
    let reason = message.split([' ', ':']).next().unwrap_or_default();
    let code = match reason {
        "TOKEN_EXPIRED" | "INVALID_REFRESH_TOKEN" | "INVALID_GRANT_TYPE" => {
            codes::INVALID_REFRESH_TOKEN
        }
        "USER_DISABLED" => codes::USER_DISABLED,
        "USER_NOT_FOUND" => codes::USER_NOT_FOUND,
        "INVALID_CUSTOM_TOKEN" | "CREDENTIAL_MISMATCH" | "INVALID_ID_TOKEN" => {
            codes::ARGUMENT_ERROR
        }
        _ => codes::INTERNAL_ERROR,
    };
    AuthorityError::new(code, message)
}

fn unknown_signing_key(kid: &str) -> AuthorityError {
    AuthorityError::argument(format!(
        "ID token has \"kid\" claim which does not correspond to a known public key: {kid}"
    ))
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AuthorityError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(api_error(status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|e| AuthorityError::internal(format!("Unexpected authority response: {e}")))
}

// ============================================================================
// FirebaseAuthority
// ============================================================================

pub struct FirebaseAuthority {
    http: reqwest::Client,
    project_id: String,
    api_key: String,
    tenant_id: Option<String>,
    emulator_host: Option<String>,
    endpoints: AuthorityEndpoints,
    service_account: Option<ServiceAccount>,
    keys: Arc<RwLock<JwksCache>>,
    access_token: Arc<RwLock<Option<CachedAccessToken>>>,
}

impl FirebaseAuthority {
    /// Build the client from settings
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` when the project id, API key or
    /// (outside the emulator) service account credentials are missing
    pub fn from_settings(settings: &FirebridgeSettings) -> Result<Self, AuthError> {
        let emulator_host = settings.auth_emulator_host.clone();
        let admin = &settings.firebase_admin;

        let (service_account, credential_project) = if admin.use_default_credential {
            let (account, project) = ServiceAccount::from_application_default()?;
            (Some(account), project)
        } else {
            match (&admin.client_email, &admin.private_key) {
                (Some(email), Some(key)) => (Some(ServiceAccount::new(email, key)?), None),
                _ if emulator_host.is_some() => (None, None),
                _ => {
                    return Err(AuthError::configuration(
                        "firebase_admin.client_email and firebase_admin.private_key are required unless use_default_credential is set",
                    ))
                }
            }
        };

        let project_id = admin
            .project_id
            .clone()
            .or(credential_project)
            .or_else(|| settings.firebase_client.project_id.clone())
            .ok_or_else(|| AuthError::configuration("No Firebase project id configured"))?;

        let api_key = settings
            .firebase_client
            .api_key
            .clone()
            .ok_or_else(|| AuthError::configuration("firebase_client.api_key is required"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.authority.request_timeout_seconds))
            .build()
            .map_err(|e| AuthError::configuration(format!("Failed to build HTTP client: {e}")))?;

        LoggingHelper::log_authority_init(&project_id, emulator_host.as_deref());

        Ok(Self {
            http,
            project_id,
            api_key,
            tenant_id: settings.tenant_id.clone(),
            endpoints: AuthorityEndpoints::for_emulator_host(emulator_host.as_deref()),
            emulator_host,
            service_account,
            keys: Arc::new(RwLock::new(JwksCache::new())),
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    #[must_use]
    pub const fn endpoints(&self) -> &AuthorityEndpoints {
        &self.endpoints
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    #[must_use]
    pub const fn is_emulated(&self) -> bool {
        self.emulator_host.is_some()
    }

    // ------------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------------

    /// Claim checks that do not depend on the signature
    fn validate_claims(&self, claims: &VerifiedClaims, now: i64) -> Result<(), AuthorityError> {
        let expected_issuer = format!("{ISSUER_PREFIX}{}", self.project_id);

        if claims.aud.as_deref() != Some(self.project_id.as_str()) {
            return Err(AuthorityError::argument(format!(
                "ID token has incorrect \"aud\" claim, expected \"{}\"",
                self.project_id
            )));
        }
        if claims.iss.as_deref() != Some(expected_issuer.as_str()) {
            return Err(AuthorityError::argument(format!(
                "ID token has incorrect \"iss\" claim, expected \"{expected_issuer}\""
            )));
        }
        if claims.sub.is_empty() || claims.sub.len() > MAX_UID_LENGTH {
            return Err(AuthorityError::argument(
                "ID token has an invalid \"sub\" claim",
            ));
        }
        if claims.exp.is_none() {
            return Err(AuthorityError::argument(
                "ID token has no \"exp\" claim",
            ));
        }
        if claims.iat.is_some_and(|iat| iat > now + CLOCK_SKEW_SECONDS) {
            return Err(AuthorityError::argument("ID token was issued in the future"));
        }
        if claims.auth_time.is_some_and(|t| t > now + CLOCK_SKEW_SECONDS) {
            return Err(AuthorityError::argument(
                "ID token has an \"auth_time\" in the future",
            ));
        }
        if let Some(expected_tenant) = &self.tenant_id {
            if claims.tenant() != Some(expected_tenant.as_str()) {
                return Err(AuthorityError::new(
                    "auth/mismatching-tenant-id",
                    "ID token belongs to a different tenant",
                ));
            }
        }
        Ok(())
    }

    async fn fetch_signing_keys(&self) -> Result<(), AuthorityError> {
        if !self.keys.read().await.should_retry_fetch() {
            return Err(AuthorityError::internal(
                "Skipping signing key fetch after a recent failure",
            ));
        }

        let fetched = self.request_signing_keys().await;
        let mut cache = self.keys.write().await;
        match fetched {
            Ok(set) => {
                cache.store_keys(set.keys);
                Ok(())
            }
            Err(err) => {
                cache.record_fetch_failure();
                Err(err)
            }
        }
    }

    async fn request_signing_keys(&self) -> Result<JsonWebKeySet, AuthorityError> {
        LoggingHelper::log_authority_call("signing keys", &self.endpoints.jwks_uri);
        let response = self.http.get(&self.endpoints.jwks_uri).send().await?;
        read_json(response).await
    }

    async fn signing_key(&self, kid: &str) -> Result<JsonWebKey, AuthorityError> {
        {
            let cache = self.keys.read().await;
            // A fresh set is authoritative; unknown kids are not refetched
            if cache.is_cache_valid() {
                return cache.get_key(kid).cloned().ok_or_else(|| unknown_signing_key(kid));
            }
        }

        if let Err(err) = self.fetch_signing_keys().await {
            let cache = self.keys.read().await;
            let Some(key) = cache.get_key(kid) else {
                return Err(err);
            };
            warn!("⚠️ Signing key refresh failed, using previously fetched keys: {err}");
            return Ok(key.clone());
        }

        self.keys
            .read()
            .await
            .get_key(kid)
            .cloned()
            .ok_or_else(|| unknown_signing_key(kid))
    }

    // ------------------------------------------------------------------------
    // Service account access token
    // ------------------------------------------------------------------------

    async fn admin_access_token(&self) -> Result<String, AuthorityError> {
        if self.is_emulated() {
            return Ok(EMULATOR_ACCESS_TOKEN.to_string());
        }

        if let Some(cached) = self.access_token.read().await.as_ref() {
            if cached.expires_at > Utc::now() + chrono::Duration::seconds(60) {
                return Ok(cached.token.clone());
            }
        }

        let account = self.service_account.as_ref().ok_or_else(|| {
            AuthorityError::internal("No service account credential configured")
        })?;

        let payload = create_jwt_payload(
            &account.client_email,
            &account.client_email,
            &self.endpoints.oauth_token,
            60,
            Some(&json!({ "scope": ADMIN_SCOPES })),
        );
        let assertion = create_jwt(
            &create_jwt_header(JwtAlgorithm::RS256, None),
            &payload,
            JwtAlgorithm::RS256,
            Some(account.private_key.as_ref()),
        )
        .map_err(|e| AuthorityError::internal(format!("Failed to sign assertion: {e}")))?;

        LoggingHelper::log_authority_call("access token", &self.endpoints.oauth_token);
        let response = self
            .http
            .post(&self.endpoints.oauth_token)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        let token: AccessTokenResponse = read_json(response).await?;

        *self.access_token.write().await = Some(CachedAccessToken {
            token: token.access_token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
        });
        Ok(token.access_token)
    }
}

#[async_trait]
impl IdentityAuthority for FirebaseAuthority {
    async fn verify_id_token(&self, token: &str) -> Result<VerifiedClaims, AuthorityError> {
        let (header_b64, payload_b64, signature_b64) = split_jwt(token)
            .map_err(|_| AuthorityError::argument("Decoding ID token failed: not a JWT"))?;

        let header: JwtHeader = decode_jwt_segment(header_b64)
            .map_err(|e| AuthorityError::argument(format!("Invalid ID token header: {e}")))?;
        let claims: VerifiedClaims = decode_jwt_segment(payload_b64)
            .map_err(|e| AuthorityError::argument(format!("Invalid ID token payload: {e}")))?;

        let now = Utc::now().timestamp();
        self.validate_claims(&claims, now)?;

        if self.is_emulated() {
            debug!("🧪 Emulator mode, skipping ID token signature check");
        } else {
            if header.alg != "RS256" {
                return Err(AuthorityError::argument(format!(
                    "ID token has incorrect algorithm, expected \"RS256\" but got \"{}\"",
                    header.alg
                )));
            }
            let kid = header
                .kid
                .as_deref()
                .ok_or_else(|| AuthorityError::argument("ID token has no \"kid\" claim"))?;
            let public_key = self.signing_key(kid).await?.to_rsa_public_key()?;
            verify_rs256(&format!("{header_b64}.{payload_b64}"), signature_b64, &public_key)
                .map_err(|e| AuthorityError::argument(e.to_string()))?;
        }

        if claims.exp.is_some_and(|exp| exp <= now) {
            return Err(AuthorityError::new(
                codes::ID_TOKEN_EXPIRED,
                "Firebase ID token has expired",
            ));
        }

        Ok(claims)
    }

    async fn refresh_id_token(&self, refresh_token: &str) -> Result<String, AuthorityError> {
        let url = self.endpoints.refresh_url();
        LoggingHelper::log_authority_call("token refresh", &url);

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;
        let refreshed: RefreshResponse = read_json(response).await?;
        Ok(refreshed.id_token)
    }

    async fn get_custom_claims(&self, uid: &str) -> Result<Map<String, Value>, AuthorityError> {
        let access_token = self.admin_access_token().await?;
        let url = self
            .endpoints
            .lookup_url(&self.project_id, self.tenant_id.as_deref());
        LoggingHelper::log_authority_call("claims lookup", &url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&json!({ "localId": [uid] }))
            .send()
            .await?;
        let lookup: LookupResponse = read_json(response).await?;

        let user = lookup.users.into_iter().next().ok_or_else(|| {
            AuthorityError::new(codes::USER_NOT_FOUND, format!("No user record for {uid}"))
        })?;

        match user.custom_attributes.as_deref() {
            None | Some("") => Ok(Map::new()),
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(claims)) => Ok(claims),
                Ok(_) => Ok(Map::new()),
                Err(e) => {
                    warn!("⚠️ Ignoring malformed custom attributes for '{uid}': {e}");
                    Ok(Map::new())
                }
            },
        }
    }

    async fn create_custom_token(
        &self,
        uid: &str,
        claims: &Map<String, Value>,
    ) -> Result<String, AuthorityError> {
        if uid.is_empty() || uid.len() > MAX_UID_LENGTH {
            return Err(AuthorityError::argument(
                "uid must be a non-empty string of at most 128 characters",
            ));
        }

        let (issuer, algorithm, key) = match (&self.service_account, self.is_emulated()) {
            (_, true) => (
                self.service_account
                    .as_ref()
                    .map_or(EMULATOR_SERVICE_ACCOUNT, |a| a.client_email.as_str()),
                JwtAlgorithm::None,
                None,
            ),
            (Some(account), false) => (
                account.client_email.as_str(),
                JwtAlgorithm::RS256,
                Some(account.private_key.as_ref()),
            ),
            (None, false) => {
                return Err(AuthorityError::internal(
                    "Minting custom tokens requires a service account",
                ))
            }
        };

        let mut extra = json!({ "uid": uid });
        let developer_claims = filter_standard_claims(claims);
        if !developer_claims.is_empty() {
            extra["claims"] = Value::Object(developer_claims);
        }
        if let Some(tenant) = &self.tenant_id {
            extra["tenant_id"] = Value::String(tenant.clone());
        }

        let payload = create_jwt_payload(issuer, issuer, CUSTOM_TOKEN_AUDIENCE, 60, Some(&extra));
        create_jwt(&create_jwt_header(algorithm, None), &payload, algorithm, key)
            .map_err(|e| AuthorityError::internal(format!("Failed to sign custom token: {e}")))
    }

    async fn exchange_custom_token(&self, custom_token: &str) -> Result<TokenPair, AuthorityError> {
        let url = self.endpoints.sign_in_with_custom_token_url();
        LoggingHelper::log_authority_call("custom token sign-in", &url);

        let mut body = json!({ "token": custom_token, "returnSecureToken": true });
        if let Some(tenant) = &self.tenant_id {
            body["tenantId"] = Value::String(tenant.clone());
        }

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;
        let signed_in: SignInResponse = read_json(response).await?;

        Ok(TokenPair {
            id_token: signed_in.id_token,
            refresh_token: signed_in.refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::constants::{TEST_CLIENT_EMAIL, TEST_PROJECT_ID};
    use crate::testing::fixtures::TestFixtures;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use actix_web::dev::ServerHandle;
    use actix_web::{web, App, HttpResponse, HttpServer};
    use rsa::pkcs1v15::VerifyingKey;
    use rsa::signature::Verifier;
    use serde_json::json;

    fn production_authority() -> FirebaseAuthority {
        FirebaseAuthority::from_settings(&TestFixtures::settings()).unwrap()
    }

    fn emulator_authority() -> FirebaseAuthority {
        let mut settings = TestFixtures::settings();
        settings.auth_emulator_host = Some("localhost:9099".to_string());
        settings.firebase_admin.client_email = None;
        settings.firebase_admin.private_key = None;
        FirebaseAuthority::from_settings(&settings).unwrap()
    }

    async fn seed_keys(authority: &FirebaseAuthority) {
        authority
            .keys
            .write()
            .await
            .store_keys(vec![TestFixtures::signing_jwk()]);
    }

    /// Publish the fixture key set on a local port, counting fetches
    fn serve_signing_keys(fetches: Arc<AtomicUsize>) -> (String, ServerHandle) {
        let server = HttpServer::new(move || {
            let fetches = Arc::clone(&fetches);
            App::new().route(
                "/jwks",
                web::get().to(move || {
                    let fetches = Arc::clone(&fetches);
                    async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        HttpResponse::Ok().json(JsonWebKeySet {
                            keys: vec![TestFixtures::signing_jwk()],
                        })
                    }
                }),
            )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let url = format!("http://{}/jwks", server.addrs()[0]);
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);
        (url, handle)
    }

    fn token_with_kid(kid: &str) -> String {
        create_jwt(
            &create_jwt_header(JwtAlgorithm::RS256, Some(kid)),
            &TestFixtures::id_token_claims("user-1", json!({})),
            JwtAlgorithm::RS256,
            Some(TestFixtures::signing_key()),
        )
        .unwrap()
    }

    #[test]
    fn test_production_endpoints() {
        let endpoints = AuthorityEndpoints::for_emulator_host(None);
        assert_eq!(
            endpoints.refresh_url(),
            "https://securetoken.googleapis.com/v1/token"
        );
        assert_eq!(
            endpoints.sign_in_with_custom_token_url(),
            "https://identitytoolkit.googleapis.com/v1/accounts:signInWithCustomToken"
        );
    }

    #[test]
    fn test_emulator_endpoints() {
        let endpoints = AuthorityEndpoints::for_emulator_host(Some("localhost:9099"));
        assert_eq!(
            endpoints.refresh_url(),
            "http://localhost:9099/securetoken.googleapis.com/v1/token"
        );
        assert_eq!(
            endpoints.sign_in_with_custom_token_url(),
            "http://localhost:9099/identitytoolkit.googleapis.com/v1/accounts:signInWithCustomToken"
        );
        assert_eq!(
            endpoints.lookup_url("demo", Some("t1")),
            "http://localhost:9099/identitytoolkit.googleapis.com/v1/projects/demo/tenants/t1/accounts:lookup"
        );
    }

    #[test]
    fn test_from_settings_requires_credentials_outside_emulator() {
        let mut settings = TestFixtures::settings();
        settings.firebase_admin.private_key = None;
        assert!(matches!(
            FirebaseAuthority::from_settings(&settings),
            Err(AuthError::Configuration(_))
        ));

        settings.auth_emulator_host = Some("localhost:9099".to_string());
        let authority = FirebaseAuthority::from_settings(&settings).unwrap();
        assert!(authority.is_emulated());
        assert_eq!(authority.project_id(), TEST_PROJECT_ID);
    }

    #[test]
    fn test_api_error_mapping() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        let err = api_error(status, r#"{"error":{"code":400,"message":"TOKEN_EXPIRED"}}"#);
        assert_eq!(err.code, codes::INVALID_REFRESH_TOKEN);

        let err = api_error(status, r#"{"error":{"message":"USER_DISABLED"}}"#);
        assert_eq!(err.code, codes::USER_DISABLED);

        let err = api_error(status, r#"{"error":{"message":"INVALID_CUSTOM_TOKEN : bad aud"}}"#);
        assert_eq!(err.code, codes::ARGUMENT_ERROR);

        let err = api_error(reqwest::StatusCode::BAD_GATEWAY, "<html>");
        assert_eq!(err.code, codes::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_verify_signed_token() {
        let authority = production_authority();
        seed_keys(&authority).await;

        let token = TestFixtures::signed_id_token("user-1", json!({ "role": "admin" }));
        let claims = authority.verify_id_token(&token).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.custom_claims()["role"], json!("admin"));
    }

    #[tokio::test]
    async fn test_verify_rejects_tampered_token() {
        let authority = production_authority();
        seed_keys(&authority).await;

        let token = TestFixtures::signed_id_token("user-1", json!({}));
        let (h, _, s) = split_jwt(&token).unwrap();
        let forged_payload = TestFixtures::encode_segment(&TestFixtures::id_token_claims(
            "someone-else",
            json!({}),
        ));
        let forged = format!("{h}.{forged_payload}.{s}");

        let err = authority.verify_id_token(&forged).await.unwrap_err();
        assert_eq!(err.code, codes::ARGUMENT_ERROR);
    }

    #[tokio::test]
    async fn test_verify_reports_expired_token() {
        let authority = production_authority();
        seed_keys(&authority).await;

        let mut claims = TestFixtures::id_token_claims("user-1", json!({}));
        claims["iat"] = json!(Utc::now().timestamp() - 7200);
        claims["exp"] = json!(Utc::now().timestamp() - 3600);
        let token = TestFixtures::sign_claims(&claims);

        let err = authority.verify_id_token(&token).await.unwrap_err();
        assert_eq!(err.code, codes::ID_TOKEN_EXPIRED);
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_audience() {
        let authority = production_authority();
        seed_keys(&authority).await;

        let mut claims = TestFixtures::id_token_claims("user-1", json!({}));
        claims["aud"] = json!("another-project");
        let err = authority
            .verify_id_token(&TestFixtures::sign_claims(&claims))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::ARGUMENT_ERROR);
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage() {
        let authority = production_authority();
        let err = authority.verify_id_token("not-a-jwt").await.unwrap_err();
        assert_eq!(err.code, codes::ARGUMENT_ERROR);
    }

    #[tokio::test]
    async fn test_verify_requires_expiry() {
        let authority = production_authority();
        seed_keys(&authority).await;

        let mut claims = TestFixtures::id_token_claims("user-1", json!({}));
        claims.as_object_mut().unwrap().remove("exp");

        let err = authority
            .verify_id_token(&TestFixtures::sign_claims(&claims))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::ARGUMENT_ERROR);
    }

    #[actix_web::test]
    async fn test_unknown_kid_does_not_refetch_fresh_keys() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let (url, handle) = serve_signing_keys(Arc::clone(&fetches));
        let mut authority = production_authority();
        authority.endpoints.jwks_uri = url;

        let token = TestFixtures::signed_id_token("user-1", json!({}));
        assert!(authority.verify_id_token(&token).await.is_ok());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        let unknown = token_with_kid("unknown-kid");
        for _ in 0..5 {
            let err = authority.verify_id_token(&unknown).await.unwrap_err();
            assert_eq!(err.code, codes::ARGUMENT_ERROR);
        }
        assert!(authority.verify_id_token(&token).await.is_ok());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_expired_keys_are_refetched() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let (url, handle) = serve_signing_keys(Arc::clone(&fetches));
        let mut authority = production_authority();
        authority.endpoints.jwks_uri = url;
        authority.keys = Arc::new(RwLock::new(
            JwksCache::new().with_cache_duration(Duration::ZERO),
        ));

        let token = TestFixtures::signed_id_token("user-1", json!({}));
        assert!(authority.verify_id_token(&token).await.is_ok());
        assert!(authority.verify_id_token(&token).await.is_ok());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        handle.stop(true).await;
    }

    #[tokio::test]
    async fn test_failed_refetch_falls_back_to_previous_keys() {
        // Reserve a port, then free it so connections are refused
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut authority = production_authority();
        authority.endpoints.jwks_uri = format!("http://127.0.0.1:{port}/jwks");
        authority.keys = Arc::new(RwLock::new(
            JwksCache::new().with_cache_duration(Duration::ZERO),
        ));
        seed_keys(&authority).await;

        let token = TestFixtures::signed_id_token("user-1", json!({}));
        assert_eq!(authority.verify_id_token(&token).await.unwrap().sub, "user-1");
        // Inside the retry backoff now; still served from the old set
        assert_eq!(authority.verify_id_token(&token).await.unwrap().sub, "user-1");

        let err = authority
            .verify_id_token(&token_with_kid("unknown-kid"))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_emulator_accepts_unsigned_tokens() {
        let authority = emulator_authority();
        let claims = TestFixtures::id_token_claims("user-2", json!({}));
        let unsigned = create_jwt(
            &create_jwt_header(JwtAlgorithm::None, None),
            &claims,
            JwtAlgorithm::None,
            None,
        )
        .unwrap();

        let verified = authority.verify_id_token(&unsigned).await.unwrap();
        assert_eq!(verified.sub, "user-2");
    }

    #[tokio::test]
    async fn test_custom_token_is_signed_by_service_account() {
        let authority = production_authority();
        let mut claims = Map::new();
        claims.insert("role".to_string(), json!("admin"));
        claims.insert("iss".to_string(), json!("dropped"));

        let token = authority.create_custom_token("user-1", &claims).await.unwrap();
        let (h, p, s) = split_jwt(&token).unwrap();

        let payload: Value = decode_jwt_segment(p).unwrap();
        assert_eq!(payload["uid"], json!("user-1"));
        assert_eq!(payload["iss"], json!(TEST_CLIENT_EMAIL));
        assert_eq!(payload["aud"], json!(CUSTOM_TOKEN_AUDIENCE));
        assert_eq!(payload["claims"], json!({ "role": "admin" }));

        let public_key = authority.service_account.as_ref().unwrap().public_key();
        let signature = base64::Engine::decode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            s,
        )
        .unwrap();
        VerifyingKey::<sha2::Sha256>::new(public_key)
            .verify(
                format!("{h}.{p}").as_bytes(),
                &rsa::pkcs1v15::Signature::try_from(signature.as_slice()).unwrap(),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_emulator_custom_token_is_unsigned() {
        let authority = emulator_authority();
        let token = authority.create_custom_token("user-1", &Map::new()).await.unwrap();
        let (h, p, s) = split_jwt(&token).unwrap();

        let header: Value = decode_jwt_segment(h).unwrap();
        let payload: Value = decode_jwt_segment(p).unwrap();
        assert_eq!(header["alg"], json!("none"));
        assert!(s.is_empty());
        assert_eq!(payload["iss"], json!(EMULATOR_SERVICE_ACCOUNT));
        assert!(payload.get("claims").is_none());
    }

    #[tokio::test]
    async fn test_emulator_access_token() {
        let authority = emulator_authority();
        assert_eq!(authority.admin_access_token().await.unwrap(), "owner");
    }

    #[tokio::test]
    async fn test_custom_token_rejects_invalid_uid() {
        let authority = production_authority();
        let err = authority
            .create_custom_token("", &Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::ARGUMENT_ERROR);
    }
}
