//! Error callbacks for failures that are otherwise swallowed
//!
//! Verification and client sync never surface authority failures to the
//! caller; they degrade to an unauthenticated user and report here instead.

use std::fmt;
use std::sync::Arc;

use log::{error, warn};

use crate::authority::AuthorityError;

pub type ErrorHook = Arc<dyn Fn(&AuthorityError) + Send + Sync>;

#[derive(Clone)]
pub struct ErrorHooks {
    /// Verification failed with an unclassified error
    pub on_verify_token_error: ErrorHook,
    /// A refresh or the verify retry after it failed
    pub on_token_refresh_error: ErrorHook,
    /// Client sync could not POST the login endpoint
    pub on_login_request_error: ErrorHook,
    /// Client sync could not POST the logout endpoint
    pub on_logout_request_error: ErrorHook,
}

impl Default for ErrorHooks {
    fn default() -> Self {
        Self {
            on_verify_token_error: Arc::new(|err| error!("❌ ID token verification error: {err}")),
            on_token_refresh_error: Arc::new(|err| warn!("⚠️ ID token refresh failed: {err}")),
            on_login_request_error: Arc::new(|err| error!("❌ Login request failed: {err}")),
            on_logout_request_error: Arc::new(|err| error!("❌ Logout request failed: {err}")),
        }
    }
}

impl ErrorHooks {
    #[must_use]
    pub fn with_verify_token_error(mut self, hook: impl Fn(&AuthorityError) + Send + Sync + 'static) -> Self {
        self.on_verify_token_error = Arc::new(hook);
        self
    }

    #[must_use]
    pub fn with_token_refresh_error(mut self, hook: impl Fn(&AuthorityError) + Send + Sync + 'static) -> Self {
        self.on_token_refresh_error = Arc::new(hook);
        self
    }

    #[must_use]
    pub fn with_login_request_error(mut self, hook: impl Fn(&AuthorityError) + Send + Sync + 'static) -> Self {
        self.on_login_request_error = Arc::new(hook);
        self
    }

    #[must_use]
    pub fn with_logout_request_error(mut self, hook: impl Fn(&AuthorityError) + Send + Sync + 'static) -> Self {
        self.on_logout_request_error = Arc::new(hook);
        self
    }
}

impl fmt::Debug for ErrorHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHooks").finish_non_exhaustive()
    }
}
