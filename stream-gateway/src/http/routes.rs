use super::handlers;
use crate::config::OutputConfig;
use crate::session::SessionManager;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub fn create_router(manager: SessionManager, output: &OutputConfig) -> Router {
    let prefix = output.url_prefix.trim_end_matches('/');

    Router::new()
        // 会话控制
        .route("/start", get(handlers::start_stream))
        .route("/stop", get(handlers::stop_stream))
        .route("/status", get(handlers::list_streams))

        // 健康检查
        .route("/health", get(handlers::health_check))

        // 播放列表和分片（只读）
        .nest_service(prefix, ServeDir::new(&output.root))

        .with_state(manager)

        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
