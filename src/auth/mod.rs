//! OAuth 授权模块
//!
//! 核心机制：
//! 1. 授权码换令牌、刷新令牌都走开放平台 /oauth/token，JSON 请求体
//! 2. 令牌落在 tokens.json（lastAuthState + lastAuth），带刷新元数据
//! 3. 后台每分钟检查一次 nextRefreshAt，到期提前 5 分钟刷新，
//!    刷新失败把下次刷新推到 2 分钟后重试

use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{load_json_or_default, save_json, AppConfig};

const OAUTH_TOKEN_URL: &str = "https://open-api.pinduoduo.com/oauth/token";

/// 提前刷新余量（秒）
const REFRESH_MARGIN_SECS: i64 = 300;
/// 最短刷新间隔（秒）
const MIN_REFRESH_DELAY_SECS: i64 = 60;
/// 刷新失败后的重试延迟（秒）
const REFRESH_RETRY_DELAY_SECS: i64 = 120;

/// 一次授权的令牌与元数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenInfo {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    /// 授权完成时刻
    #[serde(rename = "receivedAt")]
    pub received_at: String,
    /// 最近一次自动刷新时刻
    #[serde(rename = "refreshedAt")]
    pub refreshed_at: String,
    /// 下次刷新的 Unix 时间戳
    #[serde(rename = "nextRefreshAt")]
    pub next_refresh_at: i64,
    #[serde(rename = "nextRefreshAtIso")]
    pub next_refresh_at_iso: String,
    #[serde(rename = "expiresAtIso")]
    pub expires_at_iso: String,
    /// 发起授权时的防伪 state
    pub state: String,
    /// 平台返回的其余字段（owner_name、scope 等）原样保留
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// tokens.json 的整体结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenFile {
    /// 最近一次发起授权的 state，回调时校验
    pub last_auth_state: String,
    pub last_auth: Option<TokenInfo>,
}

impl TokenFile {
    pub fn access_token(&self) -> Option<&str> {
        self.last_auth
            .as_ref()
            .map(|auth| auth.access_token.as_str())
            .filter(|token| !token.is_empty())
    }
}

/// 令牌存储（单一持有者，变更后立即落盘）
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    state: Mutex<TokenFile>,
}

impl TokenStore {
    pub fn load(path: PathBuf) -> Self {
        let state = load_json_or_default(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub async fn snapshot(&self) -> TokenFile {
        self.state.lock().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .access_token()
            .map(|s| s.to_string())
    }

    /// 记录新发起授权的 state
    pub async fn set_auth_state(&self, state: &str) -> Result<()> {
        let mut file = self.state.lock().await;
        file.last_auth_state = state.to_string();
        save_json(&self.path, &*file)
    }

    /// 校验回调 state 是否与发起时一致（历史上没记录过则放行）
    pub async fn state_matches(&self, state: &str) -> bool {
        let file = self.state.lock().await;
        file.last_auth_state.is_empty() || file.last_auth_state == state
    }

    /// 保存一次完整授权结果
    pub async fn store_auth(&self, info: TokenInfo) -> Result<()> {
        let mut file = self.state.lock().await;
        file.last_auth = Some(info);
        save_json(&self.path, &*file)
    }

    /// 原地修改 lastAuth 并落盘
    pub async fn update_auth<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut TokenInfo),
    {
        let mut file = self.state.lock().await;
        if let Some(auth) = file.last_auth.as_mut() {
            mutate(auth);
            save_json(&self.path, &*file)?;
        }
        Ok(())
    }
}

/// 拼接商家授权入口 URL
pub fn build_auth_url(config: &AppConfig, state: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(&config.auth_base).context("authBase 不是合法 URL")?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("state", state)
        .append_pair("view", "web");
    Ok(url.to_string())
}

/// 开放平台 OAuth 客户端
#[derive(Debug, Clone)]
pub struct OauthClient {
    http: reqwest::Client,
}

impl OauthClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    /// 授权码换访问令牌
    pub async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        code: &str,
    ) -> Result<TokenInfo> {
        let payload = serde_json::json!({
            "client_id": client_id,
            "client_secret": client_secret,
            "code": code,
            "grant_type": "authorization_code",
            "redirect_uri": redirect_uri,
        });
        self.token_request(payload).await
    }

    /// 刷新访问令牌
    pub async fn refresh(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenInfo> {
        let payload = serde_json::json!({
            "client_id": client_id,
            "client_secret": client_secret,
            "refresh_token": refresh_token,
            "grant_type": "refresh_token",
        });
        self.token_request(payload).await
    }

    async fn token_request(&self, payload: Value) -> Result<TokenInfo> {
        let response = self
            .http
            .post(OAUTH_TOKEN_URL)
            .json(&payload)
            .send()
            .await
            .context("请求 oauth/token 失败")?;
        let parsed: Value = response.json().await.context("token 响应不是合法 JSON")?;
        parse_token_response(parsed)
    }
}

impl Default for OauthClient {
    fn default() -> Self {
        Self::new()
    }
}

/// 解析 token 响应，错误形态有两种：error_response 包装与顶层 error 字段
fn parse_token_response(parsed: Value) -> Result<TokenInfo> {
    if let Some(err) = parsed.get("error_response") {
        let code = err.get("error_code").cloned().unwrap_or(Value::Null);
        let msg = err
            .get("error_msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(anyhow!("{}:{}", code, msg));
    }
    if let Some(err) = parsed.get("error").and_then(Value::as_str) {
        let detail = parsed
            .get("error_description")
            .and_then(Value::as_str)
            .unwrap_or(err);
        return Err(anyhow!("{}", detail));
    }
    let info: TokenInfo = serde_json::from_value(parsed).context("解析 token 响应失败")?;
    if info.access_token.is_empty() {
        return Err(anyhow!("token 响应缺少 access_token"));
    }
    Ok(info)
}

/// 给令牌补上刷新元数据：到期前 5 分钟刷新，至少 1 分钟后
pub fn add_refresh_meta(info: &mut TokenInfo) {
    let now = Utc::now().timestamp();
    let delay = (info.expires_in - REFRESH_MARGIN_SECS).max(MIN_REFRESH_DELAY_SECS);
    info.next_refresh_at = now + delay;
    info.next_refresh_at_iso = iso_utc(info.next_refresh_at);
    info.expires_at_iso = if info.expires_in > 0 {
        iso_utc(now + info.expires_in)
    } else {
        String::new()
    };
}

fn iso_utc(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

/// 刷新检查：到期则刷新并落盘，失败把下次刷新推后 2 分钟
///
/// 任何一步缺少前置条件（无令牌、无凭证、未到期）都静默跳过，
/// 由后台循环下一分钟再来。
pub async fn refresh_if_due(store: &TokenStore, config: &AppConfig, oauth: &OauthClient) {
    let snapshot = store.snapshot().await;
    let Some(last) = snapshot.last_auth else {
        return;
    };
    if last.refresh_token.is_empty() {
        return;
    }
    let now = Utc::now().timestamp();
    if now < last.next_refresh_at {
        return;
    }
    if config.client_id.is_empty() || config.client_secret.is_empty() {
        return;
    }

    match oauth
        .refresh(&config.client_id, &config.client_secret, &last.refresh_token)
        .await
    {
        Ok(mut fresh) => {
            // 保留授权时刻与 state，只换令牌字段
            fresh.received_at = last.received_at;
            fresh.state = last.state;
            fresh.refreshed_at = iso_utc(now);
            add_refresh_meta(&mut fresh);
            if let Err(e) = store.store_auth(fresh).await {
                warn!("保存刷新后令牌失败: {}", e);
                return;
            }
            info!("访问令牌已自动刷新");
        }
        Err(e) => {
            warn!("令牌自动刷新失败: {}", e);
            let retry_at = now + REFRESH_RETRY_DELAY_SECS;
            let result = store
                .update_auth(|auth| {
                    auth.next_refresh_at = retry_at;
                    auth.next_refresh_at_iso = iso_utc(retry_at);
                })
                .await;
            if let Err(e) = result {
                warn!("记录刷新重试时间失败: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_parse_token_response_success() {
        let info = parse_token_response(json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 86400,
            "owner_name": "旗舰店"
        }))
        .unwrap();
        assert_eq!(info.access_token, "at");
        assert_eq!(info.refresh_token, "rt");
        assert_eq!(info.expires_in, 86400);
        // 未知字段原样保留
        assert_eq!(info.extra.get("owner_name").unwrap(), "旗舰店");
    }

    #[test]
    fn test_parse_token_response_error_response() {
        let err = parse_token_response(json!({
            "error_response": {"error_code": 10019, "error_msg": "code 已过期"}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("10019"));
    }

    #[test]
    fn test_parse_token_response_oauth_error() {
        let err = parse_token_response(json!({
            "error": "invalid_grant",
            "error_description": "授权码无效"
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "授权码无效");
    }

    #[test]
    fn test_parse_token_response_missing_token() {
        assert!(parse_token_response(json!({"expires_in": 3600})).is_err());
    }

    #[test]
    fn test_add_refresh_meta_margin() {
        let mut info = TokenInfo {
            expires_in: 86400,
            ..Default::default()
        };
        let before = Utc::now().timestamp();
        add_refresh_meta(&mut info);
        // 提前 5 分钟
        assert!(info.next_refresh_at >= before + 86400 - 300);
        assert!(!info.expires_at_iso.is_empty());
    }

    #[test]
    fn test_add_refresh_meta_short_expiry() {
        let mut info = TokenInfo {
            expires_in: 30,
            ..Default::default()
        };
        let before = Utc::now().timestamp();
        add_refresh_meta(&mut info);
        // 过期时间太短也至少 1 分钟后再刷
        assert!(info.next_refresh_at >= before + 60);
    }

    #[test]
    fn test_build_auth_url() {
        let config = AppConfig {
            client_id: "cid".to_string(),
            redirect_uri: "https://example.com/callback".to_string(),
            ..Default::default()
        };
        let url = build_auth_url(&config, "s123").unwrap();
        assert!(url.starts_with("https://mms.pinduoduo.com/open.html?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("state=s123"));
        assert!(url.contains("view=web"));
    }

    #[tokio::test]
    async fn test_token_store_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = TokenStore::load(path.clone());
        assert!(store.access_token().await.is_none());

        store.set_auth_state("s1").await.unwrap();
        assert!(store.state_matches("s1").await);
        assert!(!store.state_matches("s2").await);

        let mut info = TokenInfo {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_in: 3600,
            ..Default::default()
        };
        add_refresh_meta(&mut info);
        store.store_auth(info).await.unwrap();

        // 重新加载，确认落盘
        let reloaded = TokenStore::load(path);
        assert_eq!(reloaded.access_token().await.unwrap(), "at");
    }
}
