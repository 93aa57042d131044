//! Error taxonomy for session handling
//!
//! Only construction and configuration mistakes, plus the explicit login
//! flow, surface as errors. Token verification failures during ordinary
//! session materialization degrade to an unauthenticated user instead.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::encoding::DecodeError;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid combination of `AuthUser` constructor inputs
    #[error("Invalid AuthUser construction: {0}")]
    Construction(String),

    /// Required configuration is missing or inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The login flow could not verify the supplied ID token
    #[error("Identity verification failed: {0}")]
    IdentityVerification(String),

    /// Neither an explicit token nor an Authorization header was provided
    #[error("The request must have an Authorization header value, or an ID token must be provided explicitly")]
    MissingToken,

    #[error("Failed to decode session payload: {0}")]
    Decode(#[from] DecodeError),
}

impl AuthError {
    pub(crate) fn construction(msg: impl Into<String>) -> Self {
        Self::Construction(msg.into())
    }

    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::IdentityVerification(_) => StatusCode::UNAUTHORIZED,
            Self::Construction(_) | Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Configuration details stay in the server log
        let message = match self {
            Self::Construction(_) | Self::Configuration(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "status": false,
            "error": message,
        }))
    }
}
