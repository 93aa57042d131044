use serde::{Deserialize, Serialize};

pub mod claims;
pub mod tokens;
pub mod user;

pub use claims::VerifiedClaims;
pub use tokens::{RefreshedSession, SessionTokens};
pub use user::{AuthUser, AuthUserBuilder, ClientUser, CreateOptions, UserSource};

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

/// Body returned by the login and logout endpoints
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: bool,
}
