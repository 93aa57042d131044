use actix_web::cookie::time::Duration;
use actix_web::cookie::Cookie;
use actix_web::{HttpRequest, HttpResponseBuilder};

use crate::encoding;
use crate::error::AuthError;
use crate::settings::CookieSettings;
use crate::utils::crypto::{sign_cookie, verify_cookie};
use crate::utils::logging::LoggingHelper;

/// Suffix of the cookie carrying the serialized `AuthUser`
pub const SESSION_DATA_SUFFIX: &str = "SessionData";
/// Suffix of the cookie carrying `{idToken, refreshToken}`
pub const SESSION_TOKENS_SUFFIX: &str = "SessionTokens";
/// Appended to a cookie name for its signature companion
pub const SIGNATURE_SUFFIX: &str = ".sig";

#[must_use]
pub fn signature_cookie_name(name: &str) -> String {
    format!("{name}{SIGNATURE_SUFFIX}")
}

// =============================================================================
// Read side
// =============================================================================

/// Anything that can hand out raw cookie values by name
pub trait CookieSource {
    fn cookie_value(&self, name: &str) -> Option<String>;
}

impl CookieSource for HttpRequest {
    fn cookie_value(&self, name: &str) -> Option<String> {
        self.cookie(name).map(|cookie| cookie.value().to_string())
    }
}

/// Request-like source built from a raw cookie value and its signature
///
/// Used when the caller already extracted the cookie, e.g. from a
/// non-HTTP transport.
#[derive(Debug, Clone)]
pub struct RawCookies {
    name: String,
    value: String,
    signature: Option<String>,
}

impl RawCookies {
    #[must_use]
    pub fn new(name: &str, value: &str, signature: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            signature: signature.map(ToString::to_string),
        }
    }
}

impl CookieSource for RawCookies {
    fn cookie_value(&self, name: &str) -> Option<String> {
        if name == self.name {
            Some(self.value.clone())
        } else if name == signature_cookie_name(&self.name) {
            self.signature.clone()
        } else {
            None
        }
    }
}

// =============================================================================
// Write side
// =============================================================================

/// One pending `Set-Cookie`, with the options it was written under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieWrite {
    pub name: String,
    /// `None` expires the cookie
    pub value: Option<String>,
    pub options: CookieSettings,
}

impl CookieWrite {
    #[must_use]
    pub const fn is_deletion(&self) -> bool {
        self.value.is_none()
    }

    #[must_use]
    pub fn to_cookie(&self) -> Cookie<'static> {
        let options = &self.options;
        let max_age = if self.value.is_some() {
            Duration::seconds(options.max_age_seconds)
        } else {
            Duration::seconds(-1)
        };

        let mut cookie = Cookie::build(self.name.clone(), self.value.clone().unwrap_or_default())
            .http_only(options.http_only)
            .secure(options.secure)
            .same_site(options.same_site.into())
            .path(options.path.clone())
            .max_age(max_age)
            .finish();
        if let Some(domain) = &options.domain {
            cookie.set_domain(domain.clone());
        }
        cookie
    }
}

/// Cookies collected for one response
#[derive(Debug, Clone, Default)]
pub struct ResponseCookies {
    writes: Vec<CookieWrite>,
}

impl ResponseCookies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write; with `overwrite` an earlier write of the same name is replaced
    pub fn push(&mut self, write: CookieWrite) {
        if write.options.overwrite {
            self.writes.retain(|existing| existing.name != write.name);
        }
        self.writes.push(write);
    }

    #[must_use]
    pub fn writes(&self) -> &[CookieWrite] {
        &self.writes
    }

    /// Most recent write for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CookieWrite> {
        self.writes.iter().rev().find(|write| write.name == name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    #[must_use]
    pub fn cookies(&self) -> Vec<Cookie<'static>> {
        self.writes.iter().map(CookieWrite::to_cookie).collect()
    }

    /// Attach every queued cookie to a response
    pub fn apply(&self, builder: &mut HttpResponseBuilder) {
        for cookie in self.cookies() {
            builder.cookie(cookie);
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Reads and writes base64/JSON cookie payloads under the configured options
#[derive(Debug, Clone)]
pub struct CookieCodec {
    settings: CookieSettings,
}

impl CookieCodec {
    #[must_use]
    pub const fn new(settings: CookieSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub const fn settings(&self) -> &CookieSettings {
        &self.settings
    }

    #[must_use]
    pub fn session_data_name(&self) -> String {
        format!("{}.{SESSION_DATA_SUFFIX}", self.settings.name)
    }

    #[must_use]
    pub fn session_tokens_name(&self) -> String {
        format!("{}.{SESSION_TOKENS_SUFFIX}", self.settings.name)
    }

    fn signing_keys(&self) -> Result<&[String], AuthError> {
        if self.settings.keys.is_empty() {
            return Err(AuthError::configuration(
                "Signed cookies require at least one key in cookies.keys",
            ));
        }
        Ok(&self.settings.keys)
    }

    /// Read, verify and decode a cookie
    ///
    /// A missing cookie, a missing or wrong signature, and an undecodable
    /// payload all yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if `signed` is set but no keys are configured
    pub fn get_cookie(
        &self,
        name: &str,
        source: &impl CookieSource,
        signed: bool,
    ) -> Result<Option<String>, AuthError> {
        let keys = if signed { Some(self.signing_keys()?) } else { None };

        let Some(raw) = source.cookie_value(name) else {
            return Ok(None);
        };

        if let Some(keys) = keys {
            let signature = source.cookie_value(&signature_cookie_name(name));
            let verified = signature
                .as_deref()
                .and_then(|sig| verify_cookie(name, &raw, sig, keys));
            match verified {
                None => {
                    LoggingHelper::log_invalid_cookie_signature(name);
                    return Ok(None);
                }
                Some(index) if index > 0 => {
                    log::debug!("Cookie '{name}' was signed with a rotated key (index {index})");
                }
                Some(_) => {}
            }
        }

        match encoding::decode::<String>(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::debug!("Ignoring undecodable cookie '{name}': {e}");
                Ok(None)
            }
        }
    }

    /// Encode and queue a cookie, or queue its deletion when `value` is `None`
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if cookies are signed but no keys
    /// are configured, or a signature cannot be computed
    pub fn set_cookie(
        &self,
        name: &str,
        value: Option<&str>,
        response: &mut ResponseCookies,
    ) -> Result<(), AuthError> {
        let signed = self.settings.signed;
        let keys = if signed { Some(self.signing_keys()?) } else { None };

        let encoded = value.map(encoding::encode).transpose()?;
        LoggingHelper::log_cookie_write(name, encoded.is_none(), signed);

        if let Some(keys) = keys {
            let signature = match &encoded {
                Some(encoded) => Some(
                    sign_cookie(name, encoded, keys[0].as_bytes())
                        .map_err(|e| AuthError::configuration(e.to_string()))?,
                ),
                None => None,
            };
            response.push(CookieWrite {
                name: name.to_string(),
                value: encoded,
                options: self.settings.clone(),
            });
            response.push(CookieWrite {
                name: signature_cookie_name(name),
                value: signature,
                options: self.settings.clone(),
            });
        } else {
            response.push(CookieWrite {
                name: name.to_string(),
                value: encoded,
                options: self.settings.clone(),
            });
        }
        Ok(())
    }

    /// Queue deletion of a cookie (and its signature when signed)
    ///
    /// # Errors
    ///
    /// Same as [`CookieCodec::set_cookie`]
    pub fn delete_cookie(&self, name: &str, response: &mut ResponseCookies) -> Result<(), AuthError> {
        self.set_cookie(name, None, response)
    }
}
