mod models;
mod handlers;
mod routes;
mod docs;
mod config;
mod db;
mod services;
mod ws;

use axum::{http::HeaderValue, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use routes::{create_api_routes, create_ws_routes};
use docs::ApiDoc;
use config::Config;
use db::{dbnotes::DbNotes, memory::MemoryNotes};
use services::{auth_service::JwtIdentityProvider, codec::codec_from_name, note_service::{DocumentStore, NoteDomain}};
use ws::{Hub, HubServices, HubSettings};
use tracing::{info, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use std::net::SocketAddr;
use std::panic;
use std::sync::Arc;

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origin_list()
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    if !origins.is_empty() {
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    } else if config.is_development() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    }
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
            "colabri_realtime=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    info!("Starting {} in {} mode", config.service_name, config.environment);

    // Connect the note store, falling back to memory without a database
    let store: Option<Arc<DbNotes>> = match &config.db_url {
        Some(db_url) => match DbNotes::new(db_url).await {
            Ok(db) => {
                info!("Database initialized successfully");
                Some(Arc::new(db))
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                warn!("Notes will only be kept in memory");
                None
            }
        },
        None => {
            warn!("No database URL configured - notes will only be kept in memory");
            None
        }
    };
    let (store, notes): (Arc<dyn DocumentStore>, Arc<dyn NoteDomain>) =
        match store {
            Some(db) => (db.clone() as Arc<dyn DocumentStore>, db as Arc<dyn NoteDomain>),
            None => {
                let memory = Arc::new(MemoryNotes::new());
                (memory.clone() as Arc<dyn DocumentStore>, memory as Arc<dyn NoteDomain>)
            }
        };

    let wire = codec_from_name(&config.wire_codec).unwrap_or_else(|e| {
        panic!("Invalid wire codec '{}': {}", config.wire_codec, e)
    });
    let persisted = codec_from_name(&config.store_codec).unwrap_or_else(|e| {
        panic!("Invalid store codec '{}': {}", config.store_codec, e)
    });

    info!("Payload codecs: wire={}, store={}", wire.name(), persisted.name());

    let hub = Arc::new(Hub::new(
        HubSettings::from(&config),
        HubServices {
            store,
            notes,
            identity: Arc::new(JwtIdentityProvider::new(config.auth_jwt_secret.clone())),
            wire,
            persisted,
        },
    ));
    hub.spawn_flush_scheduler(config.flush_interval());

    // Combine all routes
    let app_routes = Router::new()
        // Mount API routes
        .nest("/api", create_api_routes(hub.clone()))
        // Mount the client channel
        .merge(create_ws_routes(hub))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(&config))
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    // Start the HTTP/WebSocket server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/ws", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("Server failed to start");
}
