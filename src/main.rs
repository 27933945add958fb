pub mod api;
mod catalog;
mod config;
mod fusion;
mod idnorm;
mod position;
mod segment;
mod service_day;
mod timetable;

use std::path::Path;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use config::Config;
use fusion::FusionPublisher;
use segment::SegmentIndex;

#[derive(OpenApi)]
#[openapi(
    info(title = "Rail Position Engine API", version = "0.1.0"),
    paths(
        api::positions::get_positions,
        api::lines::list_lines,
        api::stations::list_stations,
        api::stations::patch_station_rank,
        api::shape::get_shape,
        api::health::health_check,
    ),
    components(schemas(
        api::ErrorResponse,
        position::Position,
        position::PositionsResponse,
        position::Location,
        position::Status,
        position::Quality,
        timetable::Direction,
        api::lines::LineSummary,
        api::lines::LineListResponse,
        api::stations::StationSummary,
        api::stations::StationListResponse,
        api::stations::PatchStationRankRequest,
        catalog::Rank,
        api::shape::ShapeResponse,
        api::health::HealthResponse,
    )),
    tags(
        (name = "positions", description = "Live train position queries"),
        (name = "lines", description = "Static line metadata"),
        (name = "stations", description = "Station listing and admin rank edits"),
        (name = "shape", description = "Line geometry"),
        (name = "health", description = "Fusion publisher health")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    let config = match Config::load("config.yaml") {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(2);
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "configuration is not runnable");
        std::process::exit(2);
    }

    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode explicitly enabled (all origins allowed) - DO NOT USE IN PRODUCTION");
        CorsLayer::permissive()
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config.cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::PUT, axum::http::Method::OPTIONS])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    };

    let tz = config.timezone();
    let static_data_dir = Path::new(&config.static_data_dir);

    let catalog = match catalog::load_catalog(static_data_dir, &config.station_bounding_box) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!(error = %e, "failed to load static catalog");
            std::process::exit(1);
        }
    };

    let timetable = match timetable::load_timetables(static_data_dir, &catalog) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            tracing::error!(error = %e, "failed to load timetables");
            std::process::exit(1);
        }
    };

    let segment_index = Arc::new(SegmentIndex::build(&timetable, &catalog));
    tracing::info!(lines = catalog.lines.len(), trips = timetable.trips.len(), "static data and segment index loaded");

    let holidays = Arc::new(config.holidays.clone());

    let publisher = Arc::new(FusionPublisher::new(
        std::time::Duration::from_secs(config.refresh_interval_secs),
        config.degraded_after_failures,
    ));

    tokio::spawn(fusion::run_fusion_loop(
        publisher.clone(),
        config.gtfs_rt_url.clone(),
        config.gtfs_rt_key.clone(),
        timetable.clone(),
        catalog.clone(),
        segment_index.clone(),
        tz,
        holidays.clone(),
    ));

    let state = api::AppState {
        catalog,
        timetable,
        segment_index,
        publisher,
        tz,
        holidays,
    };

    let app = Router::new()
        .route("/", get(root))
        .nest("/api", api::router(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.bind_addr, "failed to bind listen address");
            std::process::exit(2);
        }
    };

    tracing::info!(addr = %config.bind_addr, "server listening");
    tracing::info!("Swagger UI: http://{}/swagger-ui", config.bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server terminated unexpectedly");
        std::process::exit(1);
    }
}

async fn root() -> &'static str {
    "Rail Position Engine"
}
