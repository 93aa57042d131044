use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use firebridge::{
    authority::{codes, IdentityAuthority},
    client::{AuthStateSync, EndpointSync},
    encoding,
    error::AuthError,
    handlers::{login, logout},
    models::{AuthUser, AuthUserBuilder},
    session::{GetSessionOptions, ResponseCookies, SessionManager},
    settings::CookieSettings,
    testing::{
        fixtures::TestFixtures,
        mock::{HookRecorder, MockAuthority, MockClientUser},
        requests::RequestBuilder,
    },
};

fn manager_with(
    authority: MockAuthority,
    recorder: &HookRecorder,
) -> (SessionManager, Arc<MockAuthority>) {
    let authority = Arc::new(authority);
    let manager = SessionManager::new(
        TestFixtures::cookie_settings(),
        Arc::clone(&authority) as Arc<dyn IdentityAuthority>,
    )
    .with_hooks(recorder.hooks());
    (manager, authority)
}

/// Session cookies as they would come back from the browser after `commit_session`
fn tokens_cookie(manager: &SessionManager, id_token: &str, refresh_token: Option<&str>) -> ResponseCookies {
    let payload = serde_json::json!({ "idToken": id_token, "refreshToken": refresh_token });
    let mut cookies = ResponseCookies::new();
    manager
        .codec()
        .set_cookie(
            &manager.codec().session_tokens_name(),
            Some(&payload.to_string()),
            &mut cookies,
        )
        .unwrap();
    cookies
}

#[actix_web::test]
async fn test_user_token_expired_without_refresh_is_logged_out() {
    let recorder = HookRecorder::default();
    let (manager, authority) = manager_with(
        MockAuthority::new().with_verify_error("old", codes::USER_TOKEN_EXPIRED),
        &recorder,
    );

    let user = manager.verifier().verify_id_token("old", None).await;

    assert_eq!(user, AuthUser::empty());
    assert_eq!(authority.refresh_calls(), 0);
    assert_eq!(recorder.total(), 0);
}

#[actix_web::test]
async fn test_expired_id_token_is_refreshed_from_cookies() {
    let recorder = HookRecorder::default();
    let (manager, authority) = manager_with(
        MockAuthority::new()
            .with_verify_error("stale", codes::ID_TOKEN_EXPIRED)
            .with_refresh("refresh-1", "fresh")
            .with_valid_token("fresh", "user-1"),
        &recorder,
    );
    let cookies = tokens_cookie(&manager, "stale", Some("refresh-1"));
    let req = RequestBuilder::new().with_response_cookies(&cookies).build();

    let user = manager
        .get_session_from_cookies(&GetSessionOptions::for_request(&req))
        .await
        .unwrap();

    assert_eq!(user.id(), Some("user-1"));
    assert_eq!(user.embedded_token(), Some("fresh"));
    assert_eq!(authority.refresh_calls(), 1);
    assert_eq!(recorder.total(), 0);
}

#[actix_web::test]
async fn test_failed_refresh_is_logged_out_and_reported_once() {
    let recorder = HookRecorder::default();
    let (manager, authority) = manager_with(
        MockAuthority::new()
            .with_verify_error("stale", codes::ID_TOKEN_EXPIRED)
            .with_refresh_error("refresh-1", codes::INVALID_REFRESH_TOKEN),
        &recorder,
    );
    let cookies = tokens_cookie(&manager, "stale", Some("refresh-1"));
    let req = RequestBuilder::new().with_response_cookies(&cookies).build();

    let user = manager
        .get_session_from_cookies(&GetSessionOptions::for_request(&req))
        .await
        .unwrap();

    assert!(!user.is_authenticated());
    assert_eq!(authority.refresh_calls(), 1);
    assert_eq!(recorder.refresh_errors(), 1);
}

#[actix_web::test]
async fn test_lightweight_read_with_unsigned_cookies_fails_before_reading() {
    let authority = Arc::new(MockAuthority::new());
    let manager = SessionManager::new(
        CookieSettings {
            signed: false,
            keys: Vec::new(),
            ..TestFixtures::cookie_settings()
        },
        Arc::clone(&authority) as Arc<dyn IdentityAuthority>,
    );

    let result = manager
        .get_session_from_cookies(&GetSessionOptions::default().include_token(false))
        .await;

    // No request was supplied either; the signing check comes first
    match result {
        Err(AuthError::Configuration(message)) => assert!(message.contains("signed")),
        other => panic!("expected configuration error, got {other:?}"),
    }
    assert_eq!(authority.verify_calls(), 0);
}

#[actix_web::test]
async fn test_commit_without_token_writes_no_cookies() {
    let recorder = HookRecorder::default();
    let (manager, _) = manager_with(MockAuthority::new(), &recorder);
    let req = RequestBuilder::new().build();
    let mut cookies = ResponseCookies::new();

    let result = manager.commit_session(&req, &mut cookies, None).await;

    assert!(matches!(result, Err(AuthError::MissingToken)));
    assert!(cookies.is_empty());
}

#[actix_web::test]
async fn test_revoke_uses_exact_configured_options() {
    let recorder = HookRecorder::default();
    let (manager, _) = manager_with(MockAuthority::new(), &recorder);
    let mut cookies = ResponseCookies::new();

    manager.revoke_session(&mut cookies).unwrap();

    let expected = TestFixtures::cookie_settings();
    for name in ["testapp.SessionData", "testapp.SessionTokens"] {
        let write = cookies.get(name).unwrap();
        assert_eq!(write.value, None);
        assert_eq!(write.options, expected);
    }
}

#[actix_web::test]
async fn test_commit_then_read_both_ways() {
    let recorder = HookRecorder::default();
    let (manager, authority) = manager_with(
        MockAuthority::new()
            .with_claims(
                "client-token",
                TestFixtures::verified_claims("user-7", serde_json::json!({ "role": "editor" })),
            )
            .with_exchange("server-id-token", "server-refresh-token")
            .with_valid_token("server-id-token", "user-7"),
        &recorder,
    );

    let req = RequestBuilder::new()
        .with_authorization("Bearer client-token")
        .build();
    let mut cookies = ResponseCookies::new();
    let session = manager.commit_session(&req, &mut cookies, None).await.unwrap();
    assert_eq!(session.refresh_token.as_deref(), Some("server-refresh-token"));
    assert_eq!(authority.exchange_calls(), 1);

    // The data cookie never carries a token
    let data = cookies.get("testapp.SessionData").unwrap();
    let stored: String = encoding::decode(data.value.as_deref().unwrap()).unwrap();
    assert!(!stored.contains("_token"));

    let req = RequestBuilder::new().with_response_cookies(&cookies).build();

    let verified = manager
        .get_session_from_cookies(&GetSessionOptions::for_request(&req))
        .await
        .unwrap();
    assert_eq!(verified.id(), Some("user-7"));
    assert_eq!(verified.embedded_token(), Some("server-id-token"));

    let lightweight = manager
        .get_session_from_cookies(&GetSessionOptions::for_request(&req).include_token(false))
        .await
        .unwrap();
    assert_eq!(lightweight.id(), Some("user-7"));
    assert_eq!(lightweight.claims()["role"], serde_json::json!("editor"));
    assert_eq!(lightweight.embedded_token(), None);
}

#[actix_web::test]
async fn test_serialized_record_round_trip() {
    let original = AuthUser::from_verified_token(
        &TestFixtures::verified_claims("user-3", serde_json::json!({ "plan": "pro" })),
        Some("raw-token".to_string()),
    );

    let restored = AuthUserBuilder::new()
        .serialized(original.serialize(true))
        .build()
        .unwrap();

    assert_eq!(restored, original);
    assert_eq!(restored.id_token().await.unwrap().as_deref(), Some("raw-token"));
}

#[actix_web::test]
async fn test_client_sync_against_running_server() {
    let recorder = HookRecorder::default();
    let (manager, authority) = manager_with(
        MockAuthority::new().with_valid_token("client-token", "user-5"),
        &recorder,
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(manager.clone()))
            .route("/api/login", web::post().to(login))
            .route("/api/logout", web::post().to(logout))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    let server = server.run();
    let handle = server.handle();
    actix_web::rt::spawn(server);

    let endpoints =
        EndpointSync::new(&format!("http://{addr}"), "/api/login", "/api/logout").unwrap();
    let sync = AuthStateSync::new(Arc::new(endpoints)).with_hooks(recorder.hooks());

    let user = sync
        .on_id_token_changed(Some(Arc::new(
            MockClientUser::new("user-5").with_token("client-token"),
        )))
        .await
        .unwrap();
    assert!(user.client_initialized());
    assert_eq!(authority.exchange_calls(), 1);

    sync.on_id_token_changed(None).await.unwrap();

    // A live user without a token cannot log in
    sync.on_id_token_changed(Some(Arc::new(MockClientUser::new("user-6"))))
        .await
        .unwrap();

    assert_eq!(recorder.login_errors(), 1);
    assert_eq!(recorder.logout_errors(), 0);

    handle.stop(true).await;
}
