//! Session Management Module
//!
//! # Modules
//!
//! - [`cookie`] - signed cookie reading and writing
//! - [`manager`] - session materialization, commit and revoke

pub mod cookie;
pub mod manager;

pub use cookie::{CookieCodec, CookieSource, CookieWrite, RawCookies, ResponseCookies};
pub use manager::{GetSessionOptions, SessionManager};
