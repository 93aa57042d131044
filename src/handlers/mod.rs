// HTTP request handlers for the session endpoints
pub mod auth;
pub mod health;


// Re-export the main handler functions
pub use auth::{current_session, login, logout};
pub use health::health;
