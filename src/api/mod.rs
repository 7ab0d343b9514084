//! REST API layer: route handlers, OpenAPI document, and router
//! composition.
//!
//! Operational endpoints are mounted under `/api/v1`; `/health` sits at
//! the root.

pub mod handlers;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI document for the operational endpoints.
#[derive(Debug, utoipa::OpenApi)]
#[openapi(
    info(title = "marketplace-reconciler", description = "NFT marketplace event reconciliation service"),
    paths(
        handlers::system::health_handler,
        handlers::reconciler::status,
        handlers::reconciler::run,
    ),
    components(schemas(
        handlers::system::HealthResponse,
        crate::scheduler::SchedulerStatus,
        crate::scheduler::PassReport,
        crate::scheduler::StageReport,
        crate::sync::BatchReport,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "System", description = "Liveness"),
        (name = "Reconciler", description = "Reconciliation scheduler control"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        router.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
    };

    router
}

/// Builds the full HTTP application: REST routes, `/ws`, and the tracing
/// and CORS layers.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(build_router())
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use utoipa::OpenApi;

    #[test]
    fn openapi_lists_reconciler_paths() {
        let doc = ApiDoc::openapi();
        for path in ["/health", "/api/v1/reconciler/status", "/api/v1/reconciler/run"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
