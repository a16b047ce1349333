pub mod error;
pub mod health;
pub mod response;
pub mod v1;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::AppConfig, controller::AppState};

pub fn router(state: AppState, cfg: &AppConfig) -> Router {
    let mut router = Router::new()
        .nest("/api", v1::router(state.clone(), cfg))
        .route("/health", axum::routing::get(health::health_check))
        .route("/health/ready", axum::routing::get(health::readiness_check))
        .route("/health/live", axum::routing::get(health::liveness_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cfg.server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }
    router
}

#[cfg(feature = "swagger")]
pub fn with_swagger(app: Router) -> Router {
    use utoipa::OpenApi;
    use utoipa_swagger_ui::SwaggerUi;

    #[derive(OpenApi)]
    #[openapi(paths(), components())]
    struct ApiDoc;

    app.merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
}

#[cfg(feature = "metrics")]
pub fn with_metrics(app: Router) -> Router {
    use axum_prometheus::PrometheusMetricLayer;
    let (layer, handle) = PrometheusMetricLayer::pair();
    app.layer(layer).route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}
