// Session handlers: login, logout and session inspection
use actix_web::http::header::ContentType;
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, info};
use serde::Deserialize;

use crate::error::AuthError;
use crate::models::StatusResponse;
use crate::session::{GetSessionOptions, ResponseCookies, SessionManager};

#[derive(Deserialize)]
pub struct SessionQuery {
    /// Verify the ID token against the authority (default) or trust the
    /// signed session-data cookie
    pub verify: Option<bool>,
}

/// Login handler
///
/// Reads the ID token from the `Authorization` header, exchanges it for a
/// fresh token pair and sets the session cookies.
///
/// # Errors
///
/// Returns `AuthError::MissingToken` (400) without an `Authorization` header,
/// or `AuthError::Configuration` (500) if cookies cannot be signed
pub async fn login(
    req: HttpRequest,
    session_manager: web::Data<SessionManager>,
) -> Result<HttpResponse, AuthError> {
    let mut cookies = ResponseCookies::new();
    let session = session_manager
        .commit_session(&req, &mut cookies, None)
        .await?;

    match session.user.id() {
        Some(uid) => info!("✅ Login for user {uid}"),
        None => debug!("Login token was not accepted, session cleared"),
    }

    let mut response = HttpResponse::Ok();
    cookies.apply(&mut response);
    Ok(response.json(StatusResponse { status: true }))
}

/// Logout handler: expires both session cookies
///
/// # Errors
///
/// Returns `AuthError::Configuration` (500) if cookies are signed without keys
pub async fn logout(session_manager: web::Data<SessionManager>) -> Result<HttpResponse, AuthError> {
    let mut cookies = ResponseCookies::new();
    session_manager.revoke_session(&mut cookies)?;

    let mut response = HttpResponse::Ok();
    cookies.apply(&mut response);
    Ok(response.json(StatusResponse { status: true }))
}

/// Current session as the serialized user, without its token
///
/// # Errors
///
/// Returns `AuthError::Configuration` (500) for a cookie setup that cannot
/// serve the requested read, or `AuthError::Decode` (400) for a corrupt
/// session-data cookie
pub async fn current_session(
    req: HttpRequest,
    query: web::Query<SessionQuery>,
    session_manager: web::Data<SessionManager>,
) -> Result<HttpResponse, AuthError> {
    let options =
        GetSessionOptions::for_request(&req).include_token(query.verify.unwrap_or(true));
    let user = session_manager.get_session_from_cookies(&options).await?;

    Ok(HttpResponse::Ok()
        .content_type(ContentType::json())
        .body(user.serialize(false)))
}
