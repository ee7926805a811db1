//! HTTP 服务层
//!
//! 核心机制：
//! 1. 所有接口挂在 /api 下，返回统一的 ApiResponse 包装
//! 2. 处理器保持薄：读状态、触发后台任务、立即返回
//! 3. 跨域全放开，前端面板直接跨端口访问

pub mod handlers;
pub mod state;

pub use state::{build_notify_sink, AppState};

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// 组装路由
pub fn build_router(app_state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    Router::new()
        .route(
            "/api/config",
            get(handlers::get_config).post(handlers::update_config),
        )
        .route(
            "/api/schedule",
            get(handlers::get_schedule).post(handlers::update_schedule),
        )
        .route("/api/auth/url", get(handlers::get_auth_url))
        .route("/api/tokens", get(handlers::get_tokens))
        .route("/api/oauth/exchange", post(handlers::exchange_code))
        .route("/api/oauth/refresh", post(handlers::refresh_tokens))
        .route("/api/upload/scan", post(handlers::trigger_scan))
        .route("/api/upload/status", get(handlers::upload_status))
        .route("/api/upload/reset", post(handlers::reset_upload))
        .route("/api/upload/pause", post(handlers::pause_upload))
        .route("/api/upload/resume", post(handlers::resume_upload))
        .route("/api/download/manual", post(handlers::trigger_download))
        .route("/api/download/status", get(handlers::download_status))
        .route("/api/download/pause", post(handlers::pause_download))
        .route("/api/download/resume", post(handlers::resume_download))
        .route("/api/cycle/trigger", post(handlers::trigger_cycle))
        .route("/api/cycle/status", get(handlers::cycle_status))
        .route("/api/pause/status", get(handlers::pause_status))
        .route("/api/logs", get(handlers::get_logs))
        .route("/api/logs/clear", post(handlers::clear_logs))
        .route("/api/system/ffmpeg", get(handlers::ffmpeg_info))
        .route("/api/baidu/status", get(handlers::cli_status))
        .layer(middleware)
        .with_state(app_state)
}
