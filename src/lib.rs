#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the firebridge application
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod authority;
pub mod client;
pub mod encoding;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod models;
pub mod session;
pub mod settings;
pub mod utils;
pub mod verification;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use authority::{AuthorityError, ErrorClass, IdentityAuthority};
pub use client::{AuthStateSync, EndpointSync, TokenChangedHandler};
pub use error::AuthError;
pub use handlers::{current_session, health, login, logout};
pub use hooks::ErrorHooks;
pub use models::{AuthUser, ClientUser};
pub use session::{GetSessionOptions, ResponseCookies, SessionManager};
pub use settings::FirebridgeSettings;
pub use verification::TokenVerifier;
