// Cryptographic helpers: cookie signatures and compact JWTs

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rsa::pkcs1v15::{SigningKey, VerifyingKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign a message using HMAC-SHA256
///
/// # Errors
///
/// Returns an error if the key is rejected by the HMAC implementation
pub fn sign_hmac_sha256(message: &[u8], secret: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).context("Invalid HMAC key length")?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Signature of `name=value` as carried by a `.sig` cookie
///
/// # Errors
///
/// Returns an error if the key is rejected by the HMAC implementation
pub fn sign_cookie(name: &str, value: &str, key: &[u8]) -> Result<String> {
    let signature = sign_hmac_sha256(format!("{name}={value}").as_bytes(), key)?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(signature))
}

/// Check a cookie signature against every key in turn
///
/// Returns the index of the key that matched, so callers can tell whether
/// the cookie was signed with a rotated-out key.
#[must_use]
pub fn verify_cookie(name: &str, value: &str, signature: &str, keys: &[String]) -> Option<usize> {
    let Ok(expected) = general_purpose::URL_SAFE_NO_PAD.decode(signature.trim_end_matches('='))
    else {
        return None;
    };
    let message = format!("{name}={value}");

    keys.iter().position(|key| {
        <HmacSha256 as Mac>::new_from_slice(key.as_bytes()).is_ok_and(|mut mac| {
            mac.update(message.as_bytes());
            // constant-time comparison
            mac.verify_slice(&expected).is_ok()
        })
    })
}

/// JWT signing algorithms used for custom tokens and service-account assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256
    RS256,
    /// Unsigned; only accepted by the auth emulator
    None,
}

impl JwtAlgorithm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::None => "none",
        }
    }
}

/// Parse a PKCS#8 PEM private key
///
/// Keys copied out of JSON or environment variables often carry literal
/// `\n` sequences; those are normalised first.
///
/// # Errors
///
/// Returns an error if the PEM is not a valid PKCS#8 RSA key
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey> {
    let normalised = pem.replace("\\n", "\n");
    RsaPrivateKey::from_pkcs8_pem(normalised.trim())
        .map_err(|e| anyhow!("Failed to parse RSA private key: {e}"))
}

/// Create a compact JWT
///
/// # Errors
///
/// Returns an error if serialization fails or RS256 is requested without a key
pub fn create_jwt(
    header: &serde_json::Value,
    payload: &serde_json::Value,
    algorithm: JwtAlgorithm,
    key: Option<&RsaPrivateKey>,
) -> Result<String> {
    let header_json = serde_json::to_string(header).context("Failed to serialize JWT header")?;
    let payload_json = serde_json::to_string(payload).context("Failed to serialize JWT payload")?;

    let header_b64 = general_purpose::URL_SAFE_NO_PAD.encode(header_json.as_bytes());
    let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload_json.as_bytes());
    let message = format!("{header_b64}.{payload_b64}");

    let signature_b64 = match algorithm {
        JwtAlgorithm::RS256 => {
            let key = key.ok_or_else(|| anyhow!("RS256 signing requires a private key"))?;
            let signing_key = SigningKey::<Sha256>::new(key.clone());
            let signature = signing_key.sign(message.as_bytes());
            general_purpose::URL_SAFE_NO_PAD.encode(signature.to_vec())
        }
        JwtAlgorithm::None => String::new(),
    };

    Ok(format!("{message}.{signature_b64}"))
}

#[must_use]
pub fn create_jwt_header(algorithm: JwtAlgorithm, key_id: Option<&str>) -> serde_json::Value {
    let mut header = serde_json::json!({
        "alg": algorithm.as_str(),
        "typ": "JWT"
    });

    if let Some(kid) = key_id {
        header["kid"] = serde_json::Value::String(kid.to_string());
    }

    header
}

/// Standard `iss`/`sub`/`aud`/`iat`/`exp` payload merged with extra claims
#[must_use]
pub fn create_jwt_payload(
    issuer: &str,
    subject: &str,
    audience: &str,
    expiry_minutes: i64,
    additional_claims: Option<&serde_json::Value>,
) -> serde_json::Value {
    use chrono::{Duration, Utc};

    let now = Utc::now();
    let exp = now + Duration::minutes(expiry_minutes);

    let mut payload = serde_json::json!({
        "iss": issuer,
        "sub": subject,
        "aud": audience,
        "iat": now.timestamp(),
        "exp": exp.timestamp()
    });

    if let Some(serde_json::Value::Object(additional_map)) = additional_claims {
        if let serde_json::Value::Object(ref mut payload_map) = payload {
            for (key, value) in additional_map {
                payload_map.insert(key.clone(), value.clone());
            }
        }
    }

    payload
}

/// Split a compact JWT into its three segments
///
/// # Errors
///
/// Returns an error unless the token has exactly three dot-separated parts
pub fn split_jwt(token: &str) -> Result<(&str, &str, &str)> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Ok((header, payload, signature)),
        _ => Err(anyhow!("Invalid JWT format")),
    }
}

/// Decode one base64url JWT segment into a typed value, without verification
///
/// # Errors
///
/// Returns an error if the segment is not base64url or not JSON of the requested shape
pub fn decode_jwt_segment<T: DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .or_else(|_| general_purpose::STANDARD.decode(segment))
        .context("Base64 decode failed")?;
    serde_json::from_slice(&bytes).context("JSON parse failed")
}

/// Verify an RS256 signature over `header.payload`
///
/// # Errors
///
/// Returns an error if the signature is malformed or does not match
pub fn verify_rs256(signing_input: &str, signature_b64: &str, key: &RsaPublicKey) -> Result<()> {
    let signature_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .context("Invalid signature encoding")?;
    let signature = rsa::pkcs1v15::Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| anyhow!("Invalid signature format: {e}"))?;

    VerifyingKey::<Sha256>::new(key.clone())
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| anyhow!("JWT signature verification failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::constants::TEST_RSA_PRIVATE_KEY;
    use serde_json::json;

    const TEST_SECRET: &[u8] = b"test_secret_key_for_hmac_testing_32b";

    #[test]
    fn test_hmac_sha256_deterministic() {
        let sig1 = sign_hmac_sha256(b"test.message", TEST_SECRET).unwrap();
        let sig2 = sign_hmac_sha256(b"test.message", TEST_SECRET).unwrap();
        assert_eq!(sig1.len(), 32);
        assert_eq!(sig1, sig2);
        assert_ne!(sig1, sign_hmac_sha256(b"test.message2", TEST_SECRET).unwrap());
    }

    #[test]
    fn test_cookie_signature_round_trip() {
        let keys = vec!["primary-key".to_string()];
        let sig = sign_cookie("app.SessionData", "abc", keys[0].as_bytes()).unwrap();

        assert_eq!(verify_cookie("app.SessionData", "abc", &sig, &keys), Some(0));
        assert_eq!(verify_cookie("app.SessionData", "abd", &sig, &keys), None);
        assert_eq!(verify_cookie("app.SessionTokens", "abc", &sig, &keys), None);
    }

    #[test]
    fn test_cookie_signature_key_rotation() {
        let old_sig = sign_cookie("c", "v", b"old-key").unwrap();
        let keys = vec!["new-key".to_string(), "old-key".to_string()];
        assert_eq!(verify_cookie("c", "v", &old_sig, &keys), Some(1));
        assert_eq!(verify_cookie("c", "v", &old_sig, &keys[..1]), None);
    }

    #[test]
    fn test_cookie_signature_rejects_garbage() {
        let keys = vec!["k".to_string()];
        assert_eq!(verify_cookie("c", "v", "%%%", &keys), None);
        assert_eq!(verify_cookie("c", "v", "", &keys), None);
    }

    #[test]
    fn test_create_jwt_payload_with_additional_claims() {
        let payload = create_jwt_payload(
            "issuer",
            "subject",
            "audience",
            60,
            Some(&json!({ "uid": "user-1" })),
        );
        assert_eq!(payload["iss"], "issuer");
        assert_eq!(payload["uid"], "user-1");
        let iat = payload["iat"].as_i64().unwrap();
        let exp = payload["exp"].as_i64().unwrap();
        assert_eq!(exp - iat, 3600);
    }

    #[test]
    fn test_rs256_sign_and_verify() {
        let private_key = parse_private_key(TEST_RSA_PRIVATE_KEY).unwrap();
        let public_key = RsaPublicKey::from(&private_key);

        let header = create_jwt_header(JwtAlgorithm::RS256, Some("kid-1"));
        let jwt = create_jwt(&header, &json!({ "sub": "u" }), JwtAlgorithm::RS256, Some(&private_key))
            .unwrap();

        let (h, p, s) = split_jwt(&jwt).unwrap();
        assert!(verify_rs256(&format!("{h}.{p}"), s, &public_key).is_ok());
        assert!(verify_rs256(&format!("{h}.{p}x"), s, &public_key).is_err());

        let decoded_header: serde_json::Value = decode_jwt_segment(h).unwrap();
        assert_eq!(decoded_header["alg"], "RS256");
        assert_eq!(decoded_header["kid"], "kid-1");
    }

    #[test]
    fn test_private_key_with_escaped_newlines() {
        let escaped = TEST_RSA_PRIVATE_KEY.replace('\n', "\\n");
        assert!(parse_private_key(&escaped).is_ok());
        assert!(parse_private_key("not a key").is_err());
    }

    #[test]
    fn test_unsigned_jwt() {
        let header = create_jwt_header(JwtAlgorithm::None, None);
        let jwt = create_jwt(&header, &json!({ "sub": "u" }), JwtAlgorithm::None, None).unwrap();
        assert!(jwt.ends_with('.'));
        let (_, _, signature) = split_jwt(&jwt).unwrap();
        assert!(signature.is_empty());
    }

    #[test]
    fn test_rs256_requires_key() {
        let header = create_jwt_header(JwtAlgorithm::RS256, None);
        assert!(create_jwt(&header, &json!({}), JwtAlgorithm::RS256, None).is_err());
    }

    #[test]
    fn test_split_jwt_rejects_wrong_part_count() {
        assert!(split_jwt("a.b").is_err());
        assert!(split_jwt("a.b.c.d").is_err());
        assert!(split_jwt("a.b.c").is_ok());
    }
}
