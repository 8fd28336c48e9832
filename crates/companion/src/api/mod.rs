pub mod error;
pub mod handler;
mod static_files;

use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post, MethodRouter};
use axum::{Extension, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::companion::CompanionService;
use handler::ApiDoc;

/// 组装全部路由，`service` 作为应用上下文注入每个请求
pub fn router(service: Arc<CompanionService>) -> Router {
    let companion: MethodRouter = get(handler::fetch_session)
        .post(handler::submit_turn)
        .fallback(handler::method_not_allowed);
    let session: MethodRouter = get(handler::fetch_session_by_path).fallback(handler::method_not_allowed);
    let mood: MethodRouter = post(handler::probe_mood).fallback(handler::method_not_allowed);
    let mood_page: MethodRouter = get(static_files::mood_test_page)
        .post(handler::probe_mood)
        .fallback(handler::method_not_allowed);

    // 页面可能部署在其它域名下
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/companion", companion.clone())
        .route("/api/companion", companion)
        .route("/companion/session/{session_id}", session.clone())
        .route("/api/companion/session/{session_id}", session)
        .route("/test-intent", mood_page)
        .route("/api/companion/mood", mood)
        .route("/health", get(handler::health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback(static_files::static_handler)
        .layer(Extension(service))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
