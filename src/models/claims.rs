//! Decoded claim set of a verified ID token

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Registered and provider-reserved claims that never count as custom claims
pub const STANDARD_CLAIMS: &[&str] = &[
    "aud",
    "auth_time",
    "email",
    "email_verified",
    "exp",
    "firebase",
    "iat",
    "iss",
    "name",
    "phone_number",
    "picture",
    "sub",
    "uid",
    "user_id",
];

/// The provider-specific `firebase` claim
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirebaseClaim {
    pub sign_in_provider: Option<String>,
    pub tenant: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Claims of an ID token that the authority has verified
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifiedClaims {
    pub sub: String,
    pub iss: Option<String>,
    pub aud: Option<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub auth_time: Option<i64>,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub phone_number: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub firebase: Option<FirebaseClaim>,
    /// Everything not named above, including custom claims
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VerifiedClaims {
    /// Subject with no profile attributes
    #[must_use]
    pub fn for_subject(sub: &str) -> Self {
        Self {
            sub: sub.to_string(),
            ..Default::default()
        }
    }

    /// Custom claims with every standard claim stripped out
    #[must_use]
    pub fn custom_claims(&self) -> Map<String, Value> {
        filter_standard_claims(&self.extra)
    }

    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.firebase.as_ref().and_then(|f| f.tenant.as_deref())
    }
}

/// Drop registered claims from an arbitrary claim map
#[must_use]
pub fn filter_standard_claims(claims: &Map<String, Value>) -> Map<String, Value> {
    claims
        .iter()
        .filter(|(key, _)| !STANDARD_CLAIMS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_token_payload() {
        let payload = json!({
            "iss": "https://securetoken.google.com/demo-project",
            "aud": "demo-project",
            "auth_time": 1_700_000_000,
            "user_id": "user-1",
            "sub": "user-1",
            "iat": 1_700_000_000,
            "exp": 1_700_003_600,
            "email": "ada@example.com",
            "email_verified": true,
            "name": "Ada",
            "firebase": { "sign_in_provider": "password", "tenant": "tenant-a", "identities": {} },
            "admin": true,
            "plan": "pro"
        });

        let claims: VerifiedClaims = serde_json::from_value(payload).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.email_verified);
        assert_eq!(claims.name.as_deref(), Some("Ada"));
        assert_eq!(claims.tenant(), Some("tenant-a"));

        let custom = claims.custom_claims();
        assert_eq!(custom.len(), 2);
        assert_eq!(custom["admin"], json!(true));
        assert_eq!(custom["plan"], json!("pro"));
    }

    #[test]
    fn test_filter_standard_claims() {
        let raw = json!({ "uid": "x", "user_id": "x", "iss": "i", "role": "editor" });
        let Value::Object(map) = raw else { unreachable!() };
        let filtered = filter_standard_claims(&map);
        assert_eq!(filtered.keys().collect::<Vec<_>>(), vec!["role"]);
    }

    #[test]
    fn test_missing_email_verified_defaults_false() {
        let claims: VerifiedClaims = serde_json::from_value(json!({ "sub": "u" })).unwrap();
        assert!(!claims.email_verified);
        assert!(claims.custom_claims().is_empty());
    }
}
