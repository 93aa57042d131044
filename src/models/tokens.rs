use serde::{Deserialize, Serialize};

use super::user::AuthUser;

/// Payload of the session-tokens cookie
///
/// Both fields are nullable on the wire: a failed login still writes the
/// cookie, with nulls, so the pair stays consistent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Outcome of exchanging a verified ID token for a fresh token pair
#[derive(Debug, Clone)]
pub struct RefreshedSession {
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

impl RefreshedSession {
    /// Unauthenticated outcome with no tokens
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self {
            id_token: None,
            refresh_token: None,
            user: AuthUser::empty(),
        }
    }

    #[must_use]
    pub fn tokens(&self) -> SessionTokens {
        SessionTokens {
            id_token: self.id_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}
