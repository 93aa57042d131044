use std::fs;
use std::path::{Path, PathBuf};

use actix_web::cookie::SameSite;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Longest cookie lifetime accepted by `validate`
pub const MAX_COOKIE_AGE_SECONDS: i64 = 14 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FirebridgeSettings {
    pub application: ApplicationSettings,
    pub cookies: CookieSettings,
    pub firebase_admin: FirebaseAdminSettings,
    pub firebase_client: FirebaseClientSettings,
    /// `host:port` of a running auth emulator
    pub auth_emulator_host: Option<String>,
    pub tenant_id: Option<String>,
    pub endpoints: EndpointSettings,
    pub authority: AuthoritySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    #[default]
    Lax,
    None,
}

impl From<SameSitePolicy> for SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Strict => Self::Strict,
            SameSitePolicy::Lax => Self::Lax,
            SameSitePolicy::None => Self::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    /// Base name; cookies are `{name}.SessionData` and `{name}.SessionTokens`
    pub name: String,
    /// Signing keys, newest first
    pub keys: Vec<String>,
    pub domain: Option<String>,
    pub http_only: bool,
    pub max_age_seconds: i64,
    /// Replace an earlier cookie of the same name set on the same response
    pub overwrite: bool,
    pub path: String,
    pub same_site: SameSitePolicy,
    pub secure: bool,
    pub signed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FirebaseAdminSettings {
    pub project_id: Option<String>,
    pub client_email: Option<String>,
    pub private_key: Option<String>,
    /// Read the service account from `GOOGLE_APPLICATION_CREDENTIALS`
    pub use_default_credential: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FirebaseClientSettings {
    pub api_key: Option<String>,
    pub auth_domain: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub login: String,
    pub logout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthoritySettings {
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: "http://localhost:3000,http://localhost:8080".to_string(),
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: "firebridge".to_string(),
            keys: Vec::new(),
            domain: None,
            http_only: true,
            max_age_seconds: 12 * 24 * 60 * 60,
            overwrite: true,
            path: "/".to_string(),
            same_site: SameSitePolicy::Lax,
            secure: true,
            signed: true,
        }
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            login: "/api/login".to_string(),
            logout: "/api/logout".to_string(),
        }
    }
}

impl Default for AuthoritySettings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl FirebridgeSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read or parsed
    /// - Logger initialization fails
    pub fn load() -> Result<Self> {
        Self::load_env_file(Path::new(".env"));

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);

        Self::initialize_logging(&settings.logging)?;
        Ok(settings)
    }

    /// Initialize `env_logger` with the configured filter (`RUST_LOG` syntax)
    ///
    /// # Errors
    ///
    /// Returns an error if a logger is already installed
    fn initialize_logging(logging: &LoggingSettings) -> Result<()> {
        env_logger::Builder::new()
            .parse_filters(&logging.level)
            .try_init()
            .context("Failed to initialize logger")
    }

    /// Load base settings from TOML file(s) or use defaults
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (applied separately afterwards)
    /// 2. Settings.toml in `FIREBRIDGE_SECRETS_DIR` (if set and present)
    /// 3. Settings.toml in the current directory (if present)
    /// 4. Defaults
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file exists but cannot be read or parsed
    pub fn load_base_settings() -> Result<Self> {
        let mut settings = Self::default();

        let default_config_path = PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_file(&default_config_path)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(secrets_dir) = std::env::var("FIREBRIDGE_SECRETS_DIR") {
            let secrets_path = Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                settings = Self::from_file(&secrets_path)?;
                println!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                println!(
                    "ℹ FIREBRIDGE_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Parse one TOML settings file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML
    pub fn from_file(path: &Path) -> Result<Self> {
        let toml_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        basic_toml::from_str(&toml_content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_cookie_env_overrides(&mut settings.cookies);
        Self::apply_firebase_env_overrides(settings);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
        if let Ok(cors_origins) = std::env::var("CORS_ORIGINS") {
            app_settings.cors_origins = cors_origins;
        }
    }

    /// Apply environment overrides for cookie settings
    pub fn apply_cookie_env_overrides(cookie_settings: &mut CookieSettings) {
        if let Ok(name) = std::env::var("COOKIE_NAME") {
            cookie_settings.name = name;
        }
        if let Ok(keys) = std::env::var("COOKIE_KEYS") {
            cookie_settings.keys = keys
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Ok(domain) = std::env::var("COOKIE_DOMAIN") {
            cookie_settings.domain = Some(domain).filter(|d| !d.is_empty());
        }
        Self::apply_bool_env_override("COOKIE_SECURE", &mut cookie_settings.secure);
        Self::apply_bool_env_override("COOKIE_SIGNED", &mut cookie_settings.signed);
    }

    fn apply_firebase_env_overrides(settings: &mut Self) {
        if let Ok(project_id) = std::env::var("FIREBASE_PROJECT_ID") {
            settings.firebase_admin.project_id = Some(project_id.clone());
            settings.firebase_client.project_id = Some(project_id);
        }
        if let Ok(client_email) = std::env::var("FIREBASE_CLIENT_EMAIL") {
            settings.firebase_admin.client_email = Some(client_email);
        }
        if let Ok(private_key) = std::env::var("FIREBASE_PRIVATE_KEY") {
            settings.firebase_admin.private_key = Some(private_key);
        }
        if let Ok(api_key) = std::env::var("FIREBASE_API_KEY") {
            settings.firebase_client.api_key = Some(api_key);
        }
        if let Ok(host) = std::env::var("FIREBASE_AUTH_EMULATOR_HOST") {
            settings.auth_emulator_host = Some(host).filter(|h| !h.is_empty());
        }
        if let Ok(tenant_id) = std::env::var("FIREBASE_TENANT_ID") {
            settings.tenant_id = Some(tenant_id).filter(|t| !t.is_empty());
        }
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    fn apply_bool_env_override(env_var: &str, target: &mut bool) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<bool>() {
                *target = value;
            }
        }
    }

    /// Load environment variables from a `.env` file, skipping comments
    pub fn load_env_file(path: &Path) {
        if let Ok(contents) = fs::read_to_string(path) {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim().trim_matches('"'));
                }
            }
        }
    }

    /// Check the settings for integration mistakes
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` describing the first problem found
    pub fn validate(&self) -> Result<(), AuthError> {
        let cookies = &self.cookies;
        if cookies.name.trim().is_empty() {
            return Err(AuthError::configuration("cookies.name must not be empty"));
        }
        if cookies.signed && cookies.keys.is_empty() {
            return Err(AuthError::configuration(
                "cookies.keys must be set when cookies.signed is true",
            ));
        }
        if cookies.max_age_seconds > MAX_COOKIE_AGE_SECONDS {
            return Err(AuthError::configuration(
                "cookies.max_age_seconds must not exceed 14 days",
            ));
        }
        if cookies.same_site == SameSitePolicy::None && !cookies.secure {
            return Err(AuthError::configuration(
                "cookies.same_site = \"none\" requires cookies.secure",
            ));
        }
        if self.firebase_client.api_key.is_none() {
            return Err(AuthError::configuration("firebase_client.api_key is required"));
        }

        let admin = &self.firebase_admin;
        let has_admin_credentials = admin.client_email.is_some() && admin.private_key.is_some();
        if !admin.use_default_credential
            && !has_admin_credentials
            && self.auth_emulator_host.is_none()
        {
            return Err(AuthError::configuration(
                "firebase_admin credentials are required unless use_default_credential is set or an emulator is configured",
            ));
        }
        Ok(())
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Get CORS origins as a vector of strings
    #[must_use]
    pub fn get_cors_origins(&self) -> Vec<String> {
        self.application
            .cors_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
