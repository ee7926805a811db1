// 配置管理模块
//
// 运行期配置分三份 JSON 文件落在 data/ 下：
// - config.json   应用配置（凭证、商品映射、下载设置）
// - schedule.json 上传计划（店铺、时段、比例）
// - tokens.json   OAuth 令牌（auth 模块负责读写）
// 日志配置走 config/app.toml，与域配置分开。

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 兜底商品 ID：产品映射完全缺失时使用
pub const DEFAULT_GOODS_ID: &str = "861017472489";

/// 数据目录布局
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub schedule_path: PathBuf,
    pub token_path: PathBuf,
    pub upload_state_path: PathBuf,
    pub download_state_path: PathBuf,
    pub cycle_state_path: PathBuf,
    pub operator_log_path: PathBuf,
    pub cover_dir: PathBuf,
}

impl DataPaths {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            config_path: data_dir.join("config.json"),
            schedule_path: data_dir.join("schedule.json"),
            token_path: data_dir.join("tokens.json"),
            upload_state_path: data_dir.join("upload_state.json"),
            download_state_path: data_dir.join("download_state.json"),
            cycle_state_path: data_dir.join("cycle_state.json"),
            operator_log_path: data_dir.join("upload.log"),
            cover_dir: data_dir.join("covers"),
            data_dir,
        }
    }

    /// 确保数据目录与封面目录存在
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("创建数据目录失败: {:?}", self.data_dir))?;
        std::fs::create_dir_all(&self.cover_dir)
            .with_context(|| format!("创建封面目录失败: {:?}", self.cover_dir))?;
        Ok(())
    }
}

/// 下载停滞处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StallPolicyConfig {
    /// 仅记录错误日志，传输继续（原始行为）
    #[default]
    LogOnly,
    /// 终止传输并对该文件记失败
    Abort,
}

/// 下载设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadSettings {
    /// 是否启用自动下载
    pub enabled: bool,
    /// 自动下载触发时间 "HH:MM"
    pub time: String,
    /// 远端根目录（接受分享链接，保存前已规范化）
    pub remote_root: String,
    /// 本地视频根目录
    pub local_root: PathBuf,
    /// BaiduPCS-Go 可执行文件路径（留空走 PATH 查找）
    pub cli_path: String,
    /// 远端列表命令超时（秒）
    pub listing_timeout_secs: u64,
    /// 停滞处理策略
    pub stall_policy: StallPolicyConfig,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            time: "08:30".to_string(),
            remote_root: String::new(),
            local_root: PathBuf::from("video"),
            cli_path: String::new(),
            listing_timeout_secs: 60,
            stall_policy: StallPolicyConfig::default(),
        }
    }
}

/// 外部协作方端点（语音转写、标题生成、通知推送）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollaboratorEndpoints {
    pub asr_endpoint: String,
    pub title_endpoint: String,
    pub notify_endpoint: String,
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// 商家授权入口
    pub auth_base: String,
    /// 店铺级兜底商品 ID
    pub goods_id: String,
    /// 产品名 -> 商品 ID（店铺通用映射）
    pub product_goods_map: BTreeMap<String, String>,
    /// 店铺名 -> (产品名 -> 商品 ID)（店铺专属覆盖，优先生效）
    pub shop_goods_map: BTreeMap<String, BTreeMap<String, String>>,
    /// 发布文案（标题生成失败兜底不使用它，标题失败即任务失败）
    pub video_desc: String,
    /// 追加到标题的话题标签
    pub topics: Vec<String>,
    /// 扫描上传前是否要求已完成授权
    pub require_auth: bool,
    pub download: DownloadSettings,
    pub collaborators: CollaboratorEndpoints,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            auth_base: "https://mms.pinduoduo.com/open.html".to_string(),
            goods_id: DEFAULT_GOODS_ID.to_string(),
            product_goods_map: BTreeMap::new(),
            shop_goods_map: BTreeMap::new(),
            video_desc: String::new(),
            topics: Vec::new(),
            require_auth: true,
            download: DownloadSettings::default(),
            collaborators: CollaboratorEndpoints::default(),
        }
    }
}

impl AppConfig {
    /// 解析产品对应的商品 ID
    ///
    /// 顺序：店铺专属映射 -> 店铺通用映射 -> 兜底 goods_id，
    /// 走到兜底时记日志提醒补映射。
    pub fn resolve_goods_id(&self, shop: &str, product: &str) -> String {
        if let Some(shop_map) = self.shop_goods_map.get(shop) {
            if let Some(id) = shop_map.get(product) {
                return id.clone();
            }
        }
        if let Some(id) = self.product_goods_map.get(product) {
            return id.clone();
        }
        let fallback = if self.goods_id.trim().is_empty() {
            DEFAULT_GOODS_ID.to_string()
        } else {
            self.goods_id.clone()
        };
        tracing::info!(
            "未找到产品商品ID映射，产品={} 店铺={}，使用默认 goods_id={}",
            product,
            shop,
            fallback
        );
        fallback
    }
}

/// 单店铺上传计划
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShopSchedule {
    /// 单次运行模式的开始时间 "HH:MM"
    pub start_time: String,
    /// 两个任务之间的最小间隔（秒）
    pub interval_seconds: u64,
    /// 每日完成上限
    pub daily_limit: u32,
    pub enabled: bool,
}

impl Default for ShopSchedule {
    fn default() -> Self {
        Self {
            start_time: "09:00".to_string(),
            interval_seconds: 300,
            daily_limit: 50,
            enabled: true,
        }
    }
}

/// 上传计划
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub shops: BTreeMap<String, ShopSchedule>,
    pub video_root: PathBuf,
    pub time_zone: String,
    /// 发布时段标签，空表示单次运行模式
    pub time_slots: Vec<String>,
    /// 与 time_slots 等长的发布比例，长度不符时退回单次运行模式
    pub slot_ratios: Vec<u32>,
}

impl Default for Schedule {
    fn default() -> Self {
        let mut shops = BTreeMap::new();
        shops.insert("拼多多旗舰店".to_string(), ShopSchedule::default());
        Self {
            shops,
            video_root: PathBuf::from("video"),
            time_zone: "Asia/Shanghai".to_string(),
            time_slots: Vec::new(),
            slot_ratios: Vec::new(),
        }
    }
}

/// 日志配置（config/app.toml 的 [log] 段）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

/// 读取 JSON 文件，损坏或缺失时回退到默认值
///
/// 状态文件损坏绝不允许拖垮进程，这里吞掉错误只留一条警告。
pub fn load_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("解析 {:?} 失败，使用默认结构: {}", path, e);
                T::default()
            }
        },
        Err(_) => T::default(),
    }
}

/// 保存 JSON 文件（pretty 格式，便于人工排查）
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value).context("序列化 JSON 失败")?;
    std::fs::write(path, raw).with_context(|| format!("写入 {:?} 失败", path))?;
    Ok(())
}

/// 规范化远端根目录
///
/// 接受三种输入：
/// - 纯路径 "/video"
/// - 带 path= 参数的分享链接
/// - pan.baidu.com 页面 URL（取其 path 部分）
/// 输出保证以 "/" 开头；空输入原样返回空串。
pub fn normalize_remote_root(value: &str) -> String {
    let mut raw = value.trim().to_string();
    if raw.is_empty() {
        return String::new();
    }
    if raw.contains("pan.baidu.com") || raw.contains("path=") {
        let re = Regex::new(r"(?:[?#&]|^)path=([^&#]+)").expect("静态正则必然合法");
        if let Some(caps) = re.captures(&raw) {
            let encoded = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            raw = percent_decode(encoded);
        } else if let Ok(url) = reqwest::Url::parse(&raw) {
            let path = url.path();
            if !path.is_empty() && path != "/" {
                raw = path.to_string();
            }
        }
    }
    if !raw.starts_with('/') {
        raw = format!("/{}", raw);
    }
    raw
}

/// 最小化的百分号解码（仅处理 %XX 与 +）
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                let hex = [bytes[i + 1], bytes[i + 2]];
                let hex = std::str::from_utf8(&hex).expect("十六进制字符必为 ASCII");
                out.push(u8::from_str_radix(hex, 16).expect("已校验为十六进制"));
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = AppConfig::default();
        save_json(&path, &config).unwrap();
        let loaded: AppConfig = load_json_or_default(&path);
        assert_eq!(loaded.goods_id, DEFAULT_GOODS_ID);
        assert!(loaded.require_auth);
        assert_eq!(loaded.download.time, "08:30");
    }

    #[test]
    fn test_corrupt_state_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let loaded: AppConfig = load_json_or_default(&path);
        assert_eq!(loaded.goods_id, DEFAULT_GOODS_ID);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let loaded: Schedule = load_json_or_default(Path::new("/nonexistent/schedule.json"));
        assert!(loaded.shops.contains_key("拼多多旗舰店"));
    }

    #[test]
    fn test_resolve_goods_id_precedence() {
        let mut config = AppConfig::default();
        config.goods_id = "111".to_string();
        config
            .product_goods_map
            .insert("杯子".to_string(), "222".to_string());
        let mut shop_map = BTreeMap::new();
        shop_map.insert("杯子".to_string(), "333".to_string());
        config.shop_goods_map.insert("旗舰店".to_string(), shop_map);

        // 店铺专属优先
        assert_eq!(config.resolve_goods_id("旗舰店", "杯子"), "333");
        // 其他店铺走通用映射
        assert_eq!(config.resolve_goods_id("分店", "杯子"), "222");
        // 无映射走兜底
        assert_eq!(config.resolve_goods_id("分店", "碗"), "111");
    }

    #[test]
    fn test_normalize_remote_root_plain() {
        assert_eq!(normalize_remote_root("video"), "/video");
        assert_eq!(normalize_remote_root("/video"), "/video");
        assert_eq!(normalize_remote_root("  "), "");
    }

    #[test]
    fn test_normalize_remote_root_share_url() {
        assert_eq!(
            normalize_remote_root("https://pan.baidu.com/disk/main#/index?category=all&path=%2Fvideo%2F2024"),
            "/video/2024"
        );
        assert_eq!(normalize_remote_root("path=/backup/video"), "/backup/video");
    }

    #[test]
    fn test_schedule_defaults() {
        let schedule = Schedule::default();
        let shop = schedule.shops.get("拼多多旗舰店").unwrap();
        assert_eq!(shop.start_time, "09:00");
        assert_eq!(shop.interval_seconds, 300);
        assert_eq!(shop.daily_limit, 50);
        assert!(schedule.time_slots.is_empty());
    }
}
