use axum::{routing::get, Router};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use bustrack::api;
use bustrack::config::Config;
use bustrack::tracking::{LocationStore, RoomRegistry};

#[derive(OpenApi)]
#[openapi(
    info(title = "Bus Tracking API", version = "0.1.0"),
    paths(
        api::driver::update_location,
        api::driver::get_bus_location,
        api::driver::end_trip,
        api::health::health_check,
    ),
    components(schemas(
        api::ErrorResponse,
        api::driver::LocationPayload,
        api::driver::UpdateLocationRequest,
        api::driver::UpdateLocationResponse,
        api::driver::BusLocationResponse,
        api::driver::EndTripRequest,
        api::driver::EndTripResponse,
        api::health::HealthResponse,
        bustrack::tracking::LocationSample,
        bustrack::tracking::StoredLocation,
        bustrack::tracking::SourceKind,
        bustrack::tracking::TripStatus,
        bustrack::tracking::TripEnded,
    )),
    tags(
        (name = "driver", description = "Location ingest and trip lifecycle"),
        (name = "health", description = "Service health")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".into()),
        )
        .init();

    // Load config
    let config = Config::load("config.yaml").expect("Failed to load config");
    tracing::info!(bind_addr = %config.bind_addr, "Loaded configuration");

    // Build CORS layer based on config
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode explicitly enabled (all origins allowed) - DO NOT USE IN PRODUCTION");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("CORS configuration error: Either set 'cors_origins' with allowed origins, or set 'cors_permissive: true' for development");
    };

    // Initialize SQLite database
    let pool = SqlitePool::connect(&config.database_url)
        .await
        .expect("Failed to connect to SQLite database");

    // Run migrations
    let migrator = sqlx::migrate!("./migrations");
    migrator.run(&pool).await.expect("Failed to run migrations");
    tracing::info!("Database migrations completed");

    // Load last-known locations from previous runs
    let store = LocationStore::new(pool);
    store
        .hydrate()
        .await
        .expect("Failed to hydrate location store");
    let rooms = RoomRegistry::new(config.tracking.room_capacity);

    // Build the app
    let app = Router::new()
        .route("/", get(root))
        .nest("/api", api::router(store, rooms))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind server address");

    tracing::info!("Server running on http://{}", config.bind_addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

async fn root() -> &'static str {
    "Bus Tracking API"
}
