// Centralized logging for recurring session and authority events
//
// Token values never reach these helpers; callers pass presence flags only.
use log::{debug, info, warn};

use crate::authority::AuthorityError;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log authority client initialization
    pub fn log_authority_init(project_id: &str, emulator_host: Option<&str>) {
        match emulator_host {
            Some(host) => info!("🧪 Identity authority for project '{project_id}' routed to emulator at {host}"),
            None => info!("🔐 Identity authority initialized for project '{project_id}'"),
        }
    }

    /// Log an outbound authority call
    pub fn log_authority_call(operation: &str, url: &str) {
        debug!("🌐 Authority {operation}: {url}");
    }

    pub fn log_verification_failure(error: &AuthorityError, class: &str) {
        debug!("🔒 ID token rejected ({class}): {}", error.code);
    }

    pub fn log_refresh_start() {
        info!("🔄 ID token possibly stale, attempting one refresh");
    }

    pub fn log_refresh_outcome(success: bool) {
        if success {
            info!("✅ ID token refreshed and re-verified");
        } else {
            warn!("❌ ID token refresh failed, continuing unauthenticated");
        }
    }

    pub fn log_claims_lookup_failed(uid: &str, error: &AuthorityError) {
        warn!("⚠️ Custom claims lookup for '{uid}' failed, using empty claims: {error}");
    }

    /// Log a cookie write
    pub fn log_cookie_write(name: &str, deleted: bool, signed: bool) {
        if deleted {
            debug!("🍪 Clearing cookie '{name}' (signed={signed})");
        } else {
            debug!("🍪 Writing cookie '{name}' (signed={signed})");
        }
    }

    pub fn log_invalid_cookie_signature(name: &str) {
        warn!("🚫 Signature mismatch for cookie '{name}', ignoring it");
    }

    pub fn log_session_committed(user_id: Option<&str>, has_tokens: bool) {
        match user_id {
            Some(id) => info!("Committed session for user: {id} (tokens={has_tokens})"),
            None => info!("Committed unauthenticated session (tokens={has_tokens})"),
        }
    }

    pub fn log_session_revoked() {
        info!("👋 Session cookies cleared");
    }
}
