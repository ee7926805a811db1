// OAuth 授权处理器

use axum::extract::State;
use axum::Json;
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::auth::{add_refresh_meta, build_auth_url, OauthClient, TokenFile};
use crate::config::{load_json_or_default, AppConfig};
use crate::server::AppState;

use super::ApiResponse;

#[derive(Debug, Serialize)]
pub struct AuthUrl {
    pub url: String,
    pub state: String,
}

/// 生成商家授权入口 URL，并记录防伪 state
pub async fn get_auth_url(State(state): State<AppState>) -> Json<ApiResponse<AuthUrl>> {
    let config: AppConfig = load_json_or_default(&state.paths.config_path);
    if config.client_id.trim().is_empty() || config.redirect_uri.trim().is_empty() {
        return Json(ApiResponse::error(
            1,
            "请先配置 clientId 与 redirectUri".to_string(),
        ));
    }

    let auth_state = uuid::Uuid::new_v4().simple().to_string();
    if let Err(e) = state.tokens.set_auth_state(&auth_state).await {
        return Json(ApiResponse::error(1, format!("记录授权 state 失败: {}", e)));
    }
    match build_auth_url(&config, &auth_state) {
        Ok(url) => Json(ApiResponse::success(AuthUrl {
            url,
            state: auth_state,
        })),
        Err(e) => Json(ApiResponse::error(1, format!("生成授权链接失败: {}", e))),
    }
}

/// 查看当前令牌
pub async fn get_tokens(State(state): State<AppState>) -> Json<ApiResponse<TokenFile>> {
    Json(ApiResponse::success(state.tokens.snapshot().await))
}

/// 手动刷新访问令牌（不等后台循环到点）
pub async fn refresh_tokens(State(state): State<AppState>) -> Json<ApiResponse<TokenFile>> {
    let snapshot = state.tokens.snapshot().await;
    let Some(last) = snapshot.last_auth else {
        return Json(ApiResponse::error(1, "尚未完成授权".to_string()));
    };
    if last.refresh_token.is_empty() {
        return Json(ApiResponse::error(1, "缺少 refresh_token".to_string()));
    }
    let config: AppConfig = load_json_or_default(&state.paths.config_path);
    if config.client_id.trim().is_empty() || config.client_secret.trim().is_empty() {
        return Json(ApiResponse::error(
            1,
            "请先配置 clientId 与 clientSecret".to_string(),
        ));
    }

    let oauth = OauthClient::new();
    match oauth
        .refresh(&config.client_id, &config.client_secret, &last.refresh_token)
        .await
    {
        Ok(mut fresh) => {
            fresh.received_at = last.received_at;
            fresh.state = last.state;
            fresh.refreshed_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            add_refresh_meta(&mut fresh);
            if let Err(e) = state.tokens.store_auth(fresh).await {
                return Json(ApiResponse::error(1, format!("保存令牌失败: {}", e)));
            }
            info!("访问令牌已手动刷新");
            Json(ApiResponse::success(state.tokens.snapshot().await))
        }
        Err(e) => {
            error!("手动刷新令牌失败: {}", e);
            Json(ApiResponse::error(1, format!("刷新令牌失败: {}", e)))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub code: String,
    #[serde(default)]
    pub state: String,
}

/// 授权码换访问令牌
pub async fn exchange_code(
    State(state): State<AppState>,
    Json(request): Json<ExchangeRequest>,
) -> Json<ApiResponse<TokenFile>> {
    if request.code.trim().is_empty() {
        return Json(ApiResponse::error(1, "缺少授权码 code".to_string()));
    }
    // state 不一致只记错误日志，不拦截换码（历史记录可能已被覆盖）
    if !state.tokens.state_matches(&request.state).await {
        error!("授权回调 state 不一致: {}", request.state);
    }

    let config: AppConfig = load_json_or_default(&state.paths.config_path);
    if config.client_id.trim().is_empty() || config.client_secret.trim().is_empty() {
        return Json(ApiResponse::error(
            1,
            "请先配置 clientId 与 clientSecret".to_string(),
        ));
    }

    let oauth = OauthClient::new();
    match oauth
        .exchange_code(
            &config.client_id,
            &config.client_secret,
            &config.redirect_uri,
            &request.code,
        )
        .await
    {
        Ok(mut info) => {
            info.received_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            info.state = request.state;
            add_refresh_meta(&mut info);
            if let Err(e) = state.tokens.store_auth(info).await {
                warn!("保存令牌失败: {}", e);
                return Json(ApiResponse::error(1, format!("保存令牌失败: {}", e)));
            }
            info!("授权完成，访问令牌已保存");
            Json(ApiResponse::success(state.tokens.snapshot().await))
        }
        Err(e) => {
            error!("授权码换令牌失败: {}", e);
            Json(ApiResponse::error(1, format!("换取令牌失败: {}", e)))
        }
    }
}
