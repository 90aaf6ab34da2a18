use axum::{
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the main application router with all routes and middleware
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let extension_routes = Router::new()
        .route("/extension", post(handlers::extensions::create_extension))
        .route("/extension/:id", get(handlers::extensions::get_extension))
        .route(
            "/extension/:id",
            delete(handlers::extensions::delete_extension),
        )
        .route(
            "/extension/trigger_type/OnChange",
            get(handlers::extensions::list_on_change_extensions),
        )
        .route(
            "/extension/trigger_type/OnTime",
            get(handlers::extensions::list_on_time_extensions),
        );

    // Health and metrics (no envelope, scraped by infrastructure)
    let operational_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics_handler));

    Router::new()
        .merge(extension_routes)
        .merge(operational_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
