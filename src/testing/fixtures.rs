//! Test fixtures providing pre-built test objects
//!
//! Settings, cookie options and RS256-signed ID tokens that verify against
//! [`TestFixtures::signing_jwk`].

use std::sync::OnceLock;

use base64::{engine::general_purpose, Engine as _};
use rsa::RsaPrivateKey;
use serde_json::{json, Value};

use crate::authority::jwks::JsonWebKey;
use crate::models::claims::VerifiedClaims;
use crate::settings::{
    CookieSettings, FirebaseAdminSettings, FirebaseClientSettings, FirebridgeSettings,
};
use crate::utils::crypto::{
    create_jwt, create_jwt_header, create_jwt_payload, parse_private_key, JwtAlgorithm,
};

use super::constants::{
    TEST_API_KEY, TEST_CLIENT_EMAIL, TEST_COOKIE_KEYS, TEST_EMAIL, TEST_JWK_E, TEST_JWK_N,
    TEST_KEY_ID, TEST_PROJECT_ID, TEST_RSA_PRIVATE_KEY,
};

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// Signed cookie options with a domain, so every attribute is observable
    #[must_use]
    pub fn cookie_settings() -> CookieSettings {
        CookieSettings {
            name: "testapp".to_string(),
            keys: TEST_COOKIE_KEYS.iter().map(ToString::to_string).collect(),
            domain: Some("example.com".to_string()),
            ..CookieSettings::default()
        }
    }

    /// Complete, valid settings for a production (non-emulated) project
    #[must_use]
    pub fn settings() -> FirebridgeSettings {
        FirebridgeSettings {
            cookies: Self::cookie_settings(),
            firebase_admin: FirebaseAdminSettings {
                project_id: Some(TEST_PROJECT_ID.to_string()),
                client_email: Some(TEST_CLIENT_EMAIL.to_string()),
                private_key: Some(TEST_RSA_PRIVATE_KEY.to_string()),
                use_default_credential: false,
            },
            firebase_client: FirebaseClientSettings {
                api_key: Some(TEST_API_KEY.to_string()),
                auth_domain: Some(format!("{TEST_PROJECT_ID}.firebaseapp.com")),
                project_id: Some(TEST_PROJECT_ID.to_string()),
            },
            ..FirebridgeSettings::default()
        }
    }

    /// Public half of the fixture key, as published in the authority's JWKS
    #[must_use]
    pub fn signing_jwk() -> JsonWebKey {
        JsonWebKey {
            kty: "RSA".to_string(),
            kid: Some(TEST_KEY_ID.to_string()),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            n: Some(TEST_JWK_N.to_string()),
            e: Some(TEST_JWK_E.to_string()),
        }
    }

    /// # Panics
    ///
    /// Panics if the embedded test key is not valid PKCS#8
    #[must_use]
    pub fn signing_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| parse_private_key(TEST_RSA_PRIVATE_KEY).unwrap())
    }

    /// ID-token claims for `uid`, valid for an hour; `extra` is merged last
    /// and may override any standard claim
    #[must_use]
    pub fn id_token_claims(uid: &str, extra: Value) -> Value {
        let mut claims = create_jwt_payload(
            &format!("https://securetoken.google.com/{TEST_PROJECT_ID}"),
            uid,
            TEST_PROJECT_ID,
            60,
            None,
        );
        claims["user_id"] = json!(uid);
        claims["auth_time"] = claims["iat"].clone();
        claims["email"] = json!(TEST_EMAIL);
        claims["email_verified"] = json!(true);
        claims["firebase"] = json!({ "sign_in_provider": "custom" });

        if let (Value::Object(target), Value::Object(extra)) = (&mut claims, extra) {
            target.extend(extra);
        }
        claims
    }

    /// RS256-sign `claims` with the fixture key
    ///
    /// # Panics
    ///
    /// Panics if signing fails
    #[must_use]
    pub fn sign_claims(claims: &Value) -> String {
        create_jwt(
            &create_jwt_header(JwtAlgorithm::RS256, Some(TEST_KEY_ID)),
            claims,
            JwtAlgorithm::RS256,
            Some(Self::signing_key()),
        )
        .unwrap()
    }

    #[must_use]
    pub fn signed_id_token(uid: &str, extra: Value) -> String {
        Self::sign_claims(&Self::id_token_claims(uid, extra))
    }

    /// Base64url JWT segment for `value`
    #[must_use]
    pub fn encode_segment(value: &Value) -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(value.to_string())
    }

    /// Verified claims as the authority would return them for `uid`
    ///
    /// # Panics
    ///
    /// Panics if the fixture claims do not deserialize
    #[must_use]
    pub fn verified_claims(uid: &str, extra: Value) -> VerifiedClaims {
        serde_json::from_value(Self::id_token_claims(uid, extra)).unwrap()
    }
}
