// 配置读写处理器

use axum::extract::State;
use axum::Json;
use tracing::info;

use crate::config::{load_json_or_default, normalize_remote_root, save_json, AppConfig, Schedule};
use crate::server::AppState;

use super::ApiResponse;

/// 获取应用配置
pub async fn get_config(State(state): State<AppState>) -> Json<ApiResponse<AppConfig>> {
    let config: AppConfig = load_json_or_default(&state.paths.config_path);
    Json(ApiResponse::success(config))
}

/// 保存应用配置
///
/// 落盘前做两处清洗：商品映射去掉空键空值，远端根目录规范化。
pub async fn update_config(
    State(state): State<AppState>,
    Json(mut config): Json<AppConfig>,
) -> Json<ApiResponse<AppConfig>> {
    config.product_goods_map.retain(|product, goods_id| {
        !product.trim().is_empty() && !goods_id.trim().is_empty()
    });
    config.shop_goods_map.retain(|shop, map| {
        map.retain(|product, goods_id| {
            !product.trim().is_empty() && !goods_id.trim().is_empty()
        });
        !shop.trim().is_empty() && !map.is_empty()
    });
    config.download.remote_root = normalize_remote_root(&config.download.remote_root);

    if let Err(e) = save_json(&state.paths.config_path, &config) {
        return Json(ApiResponse::error(1, format!("保存配置失败: {}", e)));
    }
    info!("配置已保存");
    Json(ApiResponse::success(config))
}

/// 获取上传计划
pub async fn get_schedule(State(state): State<AppState>) -> Json<ApiResponse<Schedule>> {
    let schedule: Schedule = load_json_or_default(&state.paths.schedule_path);
    Json(ApiResponse::success(schedule))
}

/// 保存上传计划
pub async fn update_schedule(
    State(state): State<AppState>,
    Json(schedule): Json<Schedule>,
) -> Json<ApiResponse<Schedule>> {
    if let Err(e) = save_json(&state.paths.schedule_path, &schedule) {
        return Json(ApiResponse::error(1, format!("保存上传计划失败: {}", e)));
    }
    info!("上传计划已保存，店铺数: {}", schedule.shops.len());
    Json(ApiResponse::success(schedule))
}
