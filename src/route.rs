//! Route definitions for the humans.inc API
//!
//! This module configures all HTTP routes and maps them to their respective
//! handlers: the public page/block endpoints at the root, and the
//! authoring API nested under /api behind the identity middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, patch, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use crate::database::AppState;
use crate::handler::{
    create_block, create_collection, delete_block, delete_collection, get_profile,
    get_public_block, get_public_page, grouped_blocks, health, list_blocks, list_collections,
    move_block, reorder_blocks, serve_upload, update_block, update_collection, update_profile,
    upload_avatar,
};

use crate::middleware::identity_middleware;
use axum::middleware;

/// Request bodies are capped slightly above the avatar limit so image
/// uploads fit but nothing unbounded buffers.
const MAX_BODY_BYTES: usize = 6 * 1024 * 1024;

/// CORS from the ALLOWED_ORIGINS env var (comma-separated), falling back
/// to any origin; public pages are consumed cross-origin by the frontend.
fn configure_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Creates and configures the Axum application router with all routes
///
/// # Route Definitions
///
/// Public endpoints:
/// - `GET /health` - liveness probe
/// - `GET /uploads/{owner}/{file}` - stored avatar objects
/// - `GET /{username}` - public page data (profile + published blocks)
/// - `GET /{username}/{token}` - single published block by slug or UUID,
///   with canonical-slug redirect behavior
///
/// Authoring API (identity middleware):
/// - `GET|PATCH /api/profile`, `POST /api/profile/avatar`
/// - `GET|POST /api/blocks`, `PATCH|DELETE /api/blocks/{id}`,
///   `PUT /api/blocks/reorder`, `PATCH /api/blocks/{id}/collection`
/// - `GET|POST /api/collections`, `GET /api/collections/grouped`,
///   `PATCH|DELETE /api/collections/{id}`
pub fn create_app(state: AppState) -> Router {
    // Authoring routes require an established identity
    let api_routes = Router::new()
        .route("/profile", get(get_profile).patch(update_profile))
        .route("/profile/avatar", post(upload_avatar))
        .route("/blocks", get(list_blocks).post(create_block))
        .route("/blocks/reorder", put(reorder_blocks))
        .route("/blocks/{id}", patch(update_block).delete(delete_block))
        .route("/blocks/{id}/collection", patch(move_block))
        .route(
            "/collections",
            get(list_collections).post(create_collection),
        )
        .route("/collections/grouped", get(grouped_blocks))
        .route(
            "/collections/{id}",
            patch(update_collection).delete(delete_collection),
        )
        .layer(middleware::from_fn(identity_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/uploads/{owner}/{file}", get(serve_upload))
        // Public page endpoints - username routing keys at the root
        .route("/{username}", get(get_public_page))
        .route("/{username}/{token}", get(get_public_block))
        // Mount authoring routes under /api
        .nest("/api", api_routes)
        // Axum's built-in body cap defaults to 2 MB, below the avatar limit
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(configure_cors())
        // Inject the application state into all handlers
        .with_state(state)
}
