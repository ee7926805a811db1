use axum::{routing::get, Json};
use pdd_video_rust::{
    api::ContentApiClient,
    auth::TokenStore,
    common::PauseController,
    config::{load_json_or_default, AppConfig, DataPaths, LogConfig},
    cycle::AutoCycle,
    downloader::DownloadRunner,
    logging::{self, LogRing},
    media::{FfmpegProbe, HttpTitleGenerator, HttpTranscriber, SpeechTranscriber, TitleGenerator},
    scheduler::{BackgroundLoops, CycleRequest},
    server::{self, build_notify_sink, AppState},
    store::{CycleStateStore, DownloadStateStore, UploadStateStore},
    uploader::{UploadPipeline, UploadScanner},
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 加载日志配置
///
/// 尝试从配置文件加载，失败时返回默认配置
async fn load_log_config() -> LogConfig {
    let config_path = "config/app.toml";
    if let Ok(content) = tokio::fs::read_to_string(config_path).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }
    LogConfig::default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = DataPaths::new(PathBuf::from("data"));
    paths.ensure_dirs()?;

    let log_config = load_log_config().await;
    let log_ring = Arc::new(LogRing::new(paths.operator_log_path.clone()));
    // 必须保持 _log_guard 存活，否则文件写入线程会终止
    let _log_guard = logging::init_logging(&log_config, log_ring.clone());

    info!("拼多多视频自动发布服务 v0.4.0 启动中...");

    let startup_config: AppConfig = load_json_or_default(&paths.config_path);

    let upload_store = Arc::new(UploadStateStore::load(paths.upload_state_path.clone()));
    let download_store = Arc::new(DownloadStateStore::load(paths.download_state_path.clone()));
    let cycle_store = Arc::new(CycleStateStore::load(paths.cycle_state_path.clone()));
    let tokens = Arc::new(TokenStore::load(paths.token_path.clone()));
    let pause = Arc::new(PauseController::new());
    let cancel = CancellationToken::new();

    // 协作方端点在启动时绑定，改端点后需重启生效
    let collaborators = &startup_config.collaborators;
    let transcriber: Option<Arc<dyn SpeechTranscriber>> =
        if collaborators.asr_endpoint.trim().is_empty() {
            None
        } else {
            Some(Arc::new(HttpTranscriber::new(
                collaborators.asr_endpoint.clone(),
            )))
        };
    let titler: Option<Arc<dyn TitleGenerator>> = if collaborators.title_endpoint.trim().is_empty()
    {
        None
    } else {
        Some(Arc::new(HttpTitleGenerator::new(
            collaborators.title_endpoint.clone(),
        )))
    };
    let sink = build_notify_sink(&collaborators.notify_endpoint);

    let pipeline = Arc::new(UploadPipeline::new(
        ContentApiClient::new(),
        paths.clone(),
        transcriber,
        titler,
    ));
    let scanner = Arc::new(UploadScanner::new(
        paths.clone(),
        upload_store.clone(),
        tokens.clone(),
        pipeline,
        pause.clone(),
        sink.clone(),
    ));
    let downloader = Arc::new(DownloadRunner::new(
        paths.clone(),
        download_store.clone(),
        pause.clone(),
        sink.clone(),
        cancel.clone(),
    ));
    let cycle = Arc::new(AutoCycle::new(
        cycle_store.clone(),
        downloader.clone(),
        scanner.clone(),
    ));
    info!("应用状态初始化完成");

    let (cycle_tx, cycle_rx) = mpsc::channel::<CycleRequest>(8);
    let loops = BackgroundLoops::spawn(
        scanner.clone(),
        downloader.clone(),
        tokens.clone(),
        paths.clone(),
        cycle,
        cycle_rx,
        cancel.clone(),
    );

    let app_state = AppState {
        paths,
        upload_store,
        download_store,
        cycle_store,
        tokens,
        scanner,
        downloader,
        pause,
        log_ring,
        ffmpeg: Arc::new(FfmpegProbe::new()),
        cycle_tx,
    };

    // 健康检查响应结构
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
        service: String,
    }

    async fn health_check() -> Json<HealthResponse> {
        Json(HealthResponse {
            status: "ok".to_string(),
            service: "pdd-video-rust".to_string(),
        })
    }

    let app = server::build_router(app_state).route("/health", get(health_check));

    let port = std::env::var("PORT").unwrap_or_else(|_| "8000".to_string());
    let addr = format!("0.0.0.0:{}", port);
    info!("服务器启动在: http://{}", addr);
    info!("API 基础路径: http://{}/api", addr);
    info!("健康检查: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("服务器错误: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，开始优雅关闭...");
        }
    }

    loops.shutdown().await;
    info!("应用已安全退出");

    Ok(())
}
