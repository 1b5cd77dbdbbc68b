mod auth;
mod clients;
mod config;
mod db;
mod docs;
mod handlers;
mod models;
mod rooms;
mod routes;
mod services;
mod websocket;
mod ws;

use std::panic;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use clients::app_service_client;
use config::Config;
use db::docstore::{DocumentStore, NullDocumentStore, PgDocumentStore};
use docs::ApiDoc;
use rooms::manager::RoomManager;
use rooms::presence::PresenceRegistry;
use routes::api::create_api_routes;
use ws::user_channels::UserChannelRegistry;

/// Shared state injected into the websocket layer and the API handlers.
pub struct AppState {
    pub rooms: Arc<RoomManager>,
    pub presence: Arc<PresenceRegistry>,
    pub user_channels: Arc<UserChannelRegistry>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "penflow_rt=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    config::init_config(config.clone());
    if config.is_development() {
        info!("Running in development mode");
    }

    ws::userctx::init_user_ctx_cache();

    // The app service powers profile lookups and workspace analytics
    match (&config.app_service_url, &config.cloud_auth_jwt_secret) {
        (Some(url), Some(secret)) => {
            match app_service_client::init_app_service_client(
                url.clone(),
                secret.clone(),
                config.cloud_service_name.clone(),
            ) {
                Ok(_) => info!("App service client initialized"),
                Err(e) => error!("Failed to initialize app service client: {}", e),
            }
        }
        _ => warn!("No app service configured - profile lookup and analytics are disabled"),
    }

    // Initialize the document store if a database URL is provided
    let store: Arc<dyn DocumentStore> = match &config.db_url {
        Some(db_url) => match PgDocumentStore::connect(db_url).await {
            Ok(store) => {
                info!("Database initialized successfully");
                Arc::new(store)
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                warn!("Documents will neither load nor persist");
                Arc::new(NullDocumentStore)
            }
        },
        None => {
            warn!("No database URL configured - documents will neither load nor persist");
            Arc::new(NullDocumentStore)
        }
    };

    let state = Arc::new(AppState {
        rooms: Arc::new(RoomManager::new(
            store,
            Duration::from_millis(config.buffer_flush_ms),
        )),
        presence: Arc::new(PresenceRegistry::new()),
        user_channels: Arc::new(UserChannelRegistry::new()),
    });

    // Create API routes
    let api_routes = create_api_routes(state.clone());

    // Combine all routes
    let mut app_routes = Router::new()
        // Realtime editing endpoint
        .route("/ws", get(websocket::handler::websocket_handler))
        .with_state(state)
        // Mount API routes
        .nest("/api", api_routes)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    if let Some(origins) = &config.cors_origins {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|o| o.trim().parse().ok())
            .collect();
        app_routes = app_routes.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    // Start the server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 Realtime endpoint available at ws://{}/ws", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
