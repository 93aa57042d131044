#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use firebridge::{
    authority::init_authority,
    handlers::{current_session, health, login, logout},
    session::SessionManager,
    settings::FirebridgeSettings,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = FirebridgeSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;

    settings
        .validate()
        .map_err(|e| std::io::Error::other(format!("Invalid settings: {e}")))?;

    let authority = init_authority(&settings).map_err(|e| {
        std::io::Error::other(format!("Failed to initialize identity authority: {e}"))
    })?;

    let session_manager = SessionManager::new(settings.cookies.clone(), authority);

    println!("✓ Using signed cookie sessions");
    start_server(session_manager, settings).await
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if:
/// - Server binding fails
/// - Server fails to start
async fn start_server(
    session_manager: SessionManager,
    settings: FirebridgeSettings,
) -> std::io::Result<()> {
    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &settings);

    let cors_origins = settings.get_cors_origins();
    let login_path = settings.endpoints.login.clone();
    let logout_path = settings.endpoints.logout.clone();

    HttpServer::new(move || {
        let cors_origins = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _| {
                cors_origins
                    .iter()
                    .any(|allowed| allowed == origin.to_str().unwrap_or(""))
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec!["Authorization", "Content-Type", "Accept"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(session_manager.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .route(&login_path, web::post().to(login))
            .route(&logout_path, web::post().to(logout))
            .route("/api/session", web::get().to(current_session))
            .route("/ping", web::get().to(health))
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn print_startup_info(bind_address: &str, settings: &FirebridgeSettings) {
    println!("Starting Firebridge session service on http://{bind_address}");
    if let Some(host) = &settings.auth_emulator_host {
        println!("Auth emulator: {host}");
    }
    println!();
    println!("Session endpoints:");
    println!("  POST {}  - Exchange an ID token for session cookies", settings.endpoints.login);
    println!("  POST {} - Clear session cookies", settings.endpoints.logout);
    println!("  GET  /api/session - Current session user");
    println!();
    println!("System endpoints:");
    println!("  GET  /ping        - Health check");
    println!();
    println!("Cookies: {}.SessionData, {}.SessionTokens", settings.cookies.name, settings.cookies.name);
}
