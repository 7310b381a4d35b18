//! API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`.
//!
//! Middleware stack (outermost → innermost):
//! 1. CORS + HTTP trace → 2. Audit logger → 3. Rate limiter

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(ctx: ApiContext) -> Router {
    // Layers are applied from bottom (innermost) to top (outermost):
    //   Extension → Audit → Rate limit → Handler
    let limited = Router::new()
        .route("/analyze-claims", post(endpoints::analyze::analyze))
        .route(
            "/analyze-claims/stream",
            post(endpoints::analyze::analyze_stream),
        )
        .route("/review-document", post(endpoints::review::review))
        .route("/format-citation", post(endpoints::citation::format))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::Extension(ctx.clone()));

    // Health is not rate limited
    let open = Router::new()
        .route("/health", get(endpoints::health::check))
        .with_state(ctx);

    Router::new()
        .nest("/api", limited.merge(open))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
