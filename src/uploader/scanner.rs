//! 上传扫描器
//!
//! 核心机制：
//! 1. 每次扫描读一份配置快照，按店铺独立评估：启用、授权、触发窗口
//! 2. 目录约定 {video_root}/{YYYYMMDD}/{店铺}/{产品}/{文件}
//! 3. 已处理集合按相对路径与裸文件名双重匹配，防路径规范化漂移
//! 4. 时段比例模式下按产品独立计算累计配额，超额文件等下一时段
//! 5. 自动模式每个调度周期只处理一个文件并遵守间隔与每日上限；
//!    手动模式连续处理直到没有候选，同一轮内每个文件至多尝试一次
//! 6. 暂停时拒绝开工不建任务；上传中途被暂停的任务记录会被抹掉，
//!    暂停不算失败
//! 7. 单店铺失败不影响其他店铺，批次完成推送去重通知

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use walkdir::WalkDir;

use crate::api::ApiCredentials;
use crate::auth::TokenStore;
use crate::common::PauseController;
use crate::config::{load_json_or_default, AppConfig, DataPaths, Schedule, ShopSchedule};
use crate::media::is_video_file;
use crate::notify::{event_key, notify_once, NotifySink};
use crate::quota::{allowed_through_slot, ratios_usable};
use crate::store::UploadStateStore;
use crate::trigger::{
    due_slot, in_window, now_day_seconds, parse_clock_or, parse_slots, run_key, slot_run_key,
    today_str, TimeSlot, DEFAULT_UPLOAD_START_SECS,
};
use crate::uploader::pipeline::{UploadPipeline, UploadResult};
use crate::uploader::task::{Task, TaskStatus};

/// 授权缺失告警的最小间隔
const AUTH_WARN_INTERVAL: Duration = Duration::from_secs(120);

/// 一次扫描的参数
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// 手动触发：跳过窗口判定，连续处理所有候选
    pub manual: bool,
    /// 只扫这些店铺（自动周期用），None 表示全部
    pub shops: Option<Vec<String>>,
    /// 忽略时段配额（手动补传用）
    pub ignore_slots: bool,
}

/// 候选文件
struct Candidate {
    rel_path: String,
    path: PathBuf,
    product: String,
}

pub struct UploadScanner {
    paths: DataPaths,
    store: Arc<UploadStateStore>,
    tokens: Arc<TokenStore>,
    pipeline: Arc<UploadPipeline>,
    pause: Arc<PauseController>,
    sink: Arc<dyn NotifySink>,
    last_auth_warn: Mutex<Option<Instant>>,
}

impl UploadScanner {
    pub fn new(
        paths: DataPaths,
        store: Arc<UploadStateStore>,
        tokens: Arc<TokenStore>,
        pipeline: Arc<UploadPipeline>,
        pause: Arc<PauseController>,
        sink: Arc<dyn NotifySink>,
    ) -> Self {
        Self {
            paths,
            store,
            tokens,
            pipeline,
            pause,
            sink,
            last_auth_warn: Mutex::new(None),
        }
    }

    /// 执行一轮扫描
    pub async fn scan_once(&self, opts: ScanOptions) {
        if opts.manual {
            info!("手动触发扫描上传");
        }
        let config: AppConfig = load_json_or_default(&self.paths.config_path);
        let schedule: Schedule = load_json_or_default(&self.paths.schedule_path);

        let access_token = self.tokens.access_token().await.unwrap_or_default();
        if config.require_auth && access_token.is_empty() {
            self.warn_auth_missing(opts.manual);
            return;
        }
        let creds = ApiCredentials {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            access_token,
        };

        let date = today_str();
        for (shop, shop_cfg) in &schedule.shops {
            if let Some(filter) = opts.shops.as_ref() {
                if !filter.is_empty() && !filter.contains(shop) {
                    continue;
                }
            }
            if let Err(e) = self
                .scan_shop(shop, shop_cfg, &schedule, &config, &creds, &date, &opts)
                .await
            {
                error!("[{}] 扫描失败: {}", shop, e);
            }
        }
    }

    /// 授权缺失告警，自动模式下限流防刷屏
    fn warn_auth_missing(&self, manual: bool) {
        let mut last = self.last_auth_warn.lock();
        let due = manual
            || last
                .map(|at| at.elapsed() > AUTH_WARN_INTERVAL)
                .unwrap_or(true);
        if due {
            error!("未授权或 access_token 缺失，已暂停上传，请先完成授权。");
            *last = Some(Instant::now());
        }
    }

    async fn scan_shop(
        &self,
        shop: &str,
        shop_cfg: &ShopSchedule,
        schedule: &Schedule,
        config: &AppConfig,
        creds: &ApiCredentials,
        date: &str,
        opts: &ScanOptions,
    ) -> Result<()> {
        if !shop_cfg.enabled {
            if opts.manual {
                info!("[{}] 已禁用，跳过", shop);
            }
            return Ok(());
        }

        let slots = parse_slots(&schedule.time_slots);
        let slot_mode = ratios_usable(&schedule.slot_ratios, slots.len()) && !opts.ignore_slots;
        let now_secs = now_day_seconds();

        // 自动模式先过触发窗口，标记落盘后才开工，崩溃不会当天重复触发
        let mut active_slot: Option<(usize, TimeSlot)> = None;
        if slot_mode {
            match decide_slot(&slots, now_secs, opts.manual) {
                SlotDecision::Skip => return Ok(()),
                SlotDecision::Untagged => {
                    info!("[{}] 手动触发早于首个时段，本轮不挂时段标签", shop);
                }
                SlotDecision::Tagged(idx, slot) => {
                    if !opts.manual {
                        if !in_window(now_secs, slot.offset_secs) {
                            return Ok(());
                        }
                        if !self
                            .store
                            .mark_auto_run(&slot_run_key(shop, &slot), date)
                            .await?
                        {
                            return Ok(());
                        }
                        info!("[{}] 到达时段 {}，自动开始扫描", shop, slot.label);
                        notify_once(
                            self.store.as_ref(),
                            self.sink.as_ref(),
                            &event_key(date, shop, Some(idx), "slot_started"),
                            &format!("[{}] 时段 {} 开始发布", shop, slot.label),
                        )
                        .await;
                    }
                    active_slot = Some((idx, slot));
                }
            }
        } else if !opts.manual {
            let start_secs = parse_clock_or(&shop_cfg.start_time, DEFAULT_UPLOAD_START_SECS);
            if !in_window(now_secs, start_secs) {
                return Ok(());
            }
            if !self.store.mark_auto_run(&run_key(shop), date).await? {
                return Ok(());
            }
            info!("[{}] 到达开始时间 {}，自动开始扫描", shop, shop_cfg.start_time);
        }

        let shop_dir = schedule.video_root.join(date).join(shop);
        if !shop_dir.exists() {
            if opts.manual {
                info!("[{}] 目录不存在：{:?}", shop, shop_dir);
            }
            return Ok(());
        }
        let files = list_candidates(&shop_dir);
        if files.is_empty() {
            if opts.manual {
                info!("[{}] 目录为空或无视频文件：{:?}", shop, shop_dir);
            }
            notify_once(
                self.store.as_ref(),
                self.sink.as_ref(),
                &event_key(date, shop, active_slot.as_ref().map(|(i, _)| *i), "batch_empty"),
                &format!("[{}] 今日无待发布视频", shop),
            )
            .await;
            return Ok(());
        }
        if opts.manual {
            info!("[{}] 发现文件 {} 个", shop, files.len());
        }

        // 本轮已尝试过的文件：失败任务不进已处理集合（下次扫描还能重试），
        // 但同一轮内不许原地重选，否则确定性失败会变成死循环
        let mut tried_this_run: HashSet<String> = HashSet::new();
        loop {
            let today_tasks = self.store.tasks_for(shop, date).await;
            let done_count = today_tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Done)
                .count();
            if today_tasks
                .iter()
                .any(|t| t.status == TaskStatus::Processing)
            {
                if opts.manual {
                    info!("[{}] 已有进行中的上传任务，等待完成后再继续", shop);
                }
                return Ok(());
            }
            if !opts.manual {
                if done_count >= shop_cfg.daily_limit as usize {
                    return Ok(());
                }
                if !interval_elapsed(&today_tasks, shop_cfg.interval_seconds) {
                    return Ok(());
                }
            }

            let Some(candidate) = pick_candidate(
                &files,
                &today_tasks,
                active_slot.as_ref().map(|(idx, _)| *idx),
                &schedule.slot_ratios,
                &tried_this_run,
            ) else {
                info!("[{}] 今日文件已处理完毕", shop);
                notify_once(
                    self.store.as_ref(),
                    self.sink.as_ref(),
                    &event_key(date, shop, active_slot.as_ref().map(|(i, _)| *i), "batch_complete"),
                    &format!("[{}] 今日批次发布完成（完成 {} 个）", shop, done_count),
                )
                .await;
                return Ok(());
            };

            if !self.pause.upload().allowed() {
                info!("[{}] 上传已暂停，本轮不开始新任务", shop);
                return Ok(());
            }

            tried_this_run.insert(candidate.rel_path.clone());
            let task = Task::new(
                shop,
                date,
                &candidate.rel_path,
                &candidate.product,
                &candidate.path,
                active_slot.as_ref().map(|(idx, _)| *idx),
            );
            let task_id = task.id.clone();
            self.store.append_task(task).await?;
            info!("[{}] 开始上传 {}", shop, candidate.rel_path);

            let result = self
                .pipeline
                .upload_video_file(
                    creds,
                    config,
                    &candidate.path,
                    shop,
                    &candidate.product,
                    self.pause.upload(),
                )
                .await;
            match result {
                Ok(UploadResult::Done(outcome)) => {
                    self.store
                        .finish_task(&task_id, |t| {
                            t.mark_done(
                                &outcome.vid,
                                &outcome.video_id,
                                &outcome.cover_url,
                                &outcome.title,
                            )
                        })
                        .await?;
                    info!(
                        "[{}] 上传发布完成 {} vid={} video_id={}",
                        shop, candidate.rel_path, outcome.vid, outcome.video_id
                    );
                }
                Ok(UploadResult::Paused) => {
                    // 暂停不是失败，抹掉记录等恢复后重来
                    self.store.discard_task(&task_id).await?;
                    info!("[{}] 上传被暂停，任务 {} 不计入记录", shop, candidate.rel_path);
                    return Ok(());
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    self.store
                        .finish_task(&task_id, |t| t.mark_failed(&message))
                        .await?;
                    error!("[{}] 上传失败 {}: {}", shop, candidate.rel_path, message);
                }
            }

            if !opts.manual {
                // 自动模式每个周期只推进一个文件
                return Ok(());
            }
        }
    }
}

/// 时段模式下本轮扫描的时段归属
#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotDecision {
    /// 未到首个时段，本轮跳过
    Skip,
    /// 带时段标签继续
    Tagged(usize, TimeSlot),
    /// 手动触发早于首个时段：不挂标签直接处理候选
    Untagged,
}

fn decide_slot(slots: &[TimeSlot], now_secs: u32, manual: bool) -> SlotDecision {
    match due_slot(slots, now_secs) {
        Some((idx, slot)) => SlotDecision::Tagged(idx, slot.clone()),
        None if manual => SlotDecision::Untagged,
        None => SlotDecision::Skip,
    }
}

/// 枚举 {产品}/{文件} 两层目录下的视频文件，按名称排序
fn list_candidates(shop_dir: &Path) -> Vec<Candidate> {
    WalkDir::new(shop_dir)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_video_file(entry.path()))
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(shop_dir).ok()?;
            let product = rel
                .components()
                .next()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())?;
            let filename = entry.file_name().to_string_lossy().into_owned();
            Some(Candidate {
                rel_path: format!("{}/{}", product, filename),
                path: entry.path().to_path_buf(),
                product,
            })
        })
        .collect()
}

/// 距上一个任务结束是否已满最小间隔
fn interval_elapsed(today_tasks: &[Task], interval_seconds: u64) -> bool {
    let Some(last_ended) = today_tasks
        .iter()
        .map(|t| t.ended_at.as_str())
        .filter(|s| !s.is_empty())
        .max()
    else {
        return true;
    };
    match NaiveDateTime::parse_from_str(last_ended, "%Y-%m-%d %H:%M:%S") {
        Ok(last) => {
            let elapsed = Local::now().naive_local() - last;
            elapsed.num_seconds() >= interval_seconds as i64
        }
        Err(_) => true,
    }
}

/// 选出下一个候选文件
///
/// 已处理集合同时按相对路径与裸文件名匹配；时段模式下每个产品
/// 只放行「累计配额 - 已处理数」个新文件。`tried` 是本轮已经
/// 尝试过的相对路径，无论成败都不再重选。
fn pick_candidate<'a>(
    files: &'a [Candidate],
    today_tasks: &[Task],
    slot: Option<usize>,
    ratios: &[u32],
    tried: &HashSet<String>,
) -> Option<&'a Candidate> {
    let attempted: Vec<&Task> = today_tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Done | TaskStatus::Processing))
        .collect();
    let attempted_paths: HashSet<&str> = attempted.iter().map(|t| t.rel_path.as_str()).collect();
    let attempted_names: HashSet<&str> = attempted.iter().map(|t| t.filename()).collect();

    // 时段模式：按产品算剩余放行量
    let mut allowance: Option<BTreeMap<&str, usize>> = slot.map(|slot_idx| {
        let mut per_product: BTreeMap<&str, usize> = BTreeMap::new();
        for file in files {
            *per_product.entry(file.product.as_str()).or_insert(0) += 1;
        }
        per_product
            .into_iter()
            .map(|(product, total)| {
                let allowed = allowed_through_slot(total, ratios, slot_idx);
                let used = attempted
                    .iter()
                    .filter(|t| t.product == product)
                    .count();
                (product, allowed.saturating_sub(used))
            })
            .collect()
    });

    for file in files {
        if tried.contains(&file.rel_path) {
            continue;
        }
        if attempted_paths.contains(file.rel_path.as_str()) {
            continue;
        }
        let bare = file
            .rel_path
            .rsplit('/')
            .next()
            .unwrap_or(file.rel_path.as_str());
        if attempted_names.contains(bare) {
            continue;
        }
        if let Some(allowance) = allowance.as_mut() {
            match allowance.get_mut(file.product.as_str()) {
                Some(left) if *left > 0 => *left -= 1,
                _ => continue,
            }
        }
        return Some(file);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn candidate(product: &str, name: &str) -> Candidate {
        Candidate {
            rel_path: format!("{}/{}", product, name),
            path: PathBuf::from(format!("/video/20260825/店/{}/{}", product, name)),
            product: product.to_string(),
        }
    }

    fn done_task(product: &str, name: &str) -> Task {
        let mut task = Task::new(
            "店",
            "20260825",
            &format!("{}/{}", product, name),
            product,
            Path::new("/x"),
            None,
        );
        task.mark_done("v", "v", "c", "");
        task.ended_at = "2026-08-25 09:00:00".to_string();
        task
    }

    #[test]
    fn test_list_candidates_two_levels() {
        let dir = tempdir().unwrap();
        let shop_dir = dir.path().join("20260825").join("旗舰店");
        let product_dir = shop_dir.join("杯子");
        std::fs::create_dir_all(&product_dir).unwrap();
        std::fs::write(product_dir.join("b.mp4"), b"x").unwrap();
        std::fs::write(product_dir.join("a.mp4"), b"x").unwrap();
        std::fs::write(product_dir.join("notes.txt"), b"x").unwrap();
        // 店铺目录下的散文件不算候选
        std::fs::write(shop_dir.join("stray.mp4"), b"x").unwrap();

        let files = list_candidates(&shop_dir);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].rel_path, "杯子/a.mp4");
        assert_eq!(files[1].rel_path, "杯子/b.mp4");
        assert_eq!(files[0].product, "杯子");
    }

    #[test]
    fn test_pick_skips_attempted_by_rel_path_and_bare_name() {
        let files = vec![candidate("杯子", "a.mp4"), candidate("碗", "a.mp4"), candidate("碗", "b.mp4")];
        let tasks = vec![done_task("杯子", "a.mp4")];
        // 裸文件名相同的 碗/a.mp4 也被跳过
        let picked = pick_candidate(&files, &tasks, None, &[], &HashSet::new()).unwrap();
        assert_eq!(picked.rel_path, "碗/b.mp4");
    }

    #[test]
    fn test_idempotent_scan_creates_nothing_new() {
        let files = vec![candidate("杯子", "a.mp4"), candidate("杯子", "b.mp4")];
        let tasks = vec![done_task("杯子", "a.mp4"), done_task("杯子", "b.mp4")];
        assert!(pick_candidate(&files, &tasks, None, &[], &HashSet::new()).is_none());
    }

    #[test]
    fn test_failed_file_not_repicked_within_same_run() {
        let files = vec![candidate("杯子", "a.mp4"), candidate("杯子", "b.mp4")];
        // 失败任务不进已处理集合，后续扫描仍可重试
        let mut failed = Task::new("店", "20260825", "杯子/a.mp4", "杯子", Path::new("/x"), None);
        failed.mark_failed("上传失败");
        let tasks = vec![failed];
        assert_eq!(
            pick_candidate(&files, &tasks, None, &[], &HashSet::new())
                .unwrap()
                .rel_path,
            "杯子/a.mp4"
        );

        // 但同一轮内已尝试过的文件不许重选，轮到下一个
        let mut tried = HashSet::new();
        tried.insert("杯子/a.mp4".to_string());
        let picked = pick_candidate(&files, &tasks, None, &[], &tried).unwrap();
        assert_eq!(picked.rel_path, "杯子/b.mp4");

        // 全部试过后本轮结束
        tried.insert("杯子/b.mp4".to_string());
        assert!(pick_candidate(&files, &tasks, None, &[], &tried).is_none());
    }

    #[test]
    fn test_slot_quota_limits_per_product() {
        // 杯子 3 个文件，比例 [2,1]：时段 0 累计配额 = ceil(3*2/3) = 2
        let files = vec![
            candidate("杯子", "a.mp4"),
            candidate("杯子", "b.mp4"),
            candidate("杯子", "c.mp4"),
        ];
        let picked = pick_candidate(&files, &[], Some(0), &[2, 1], &HashSet::new()).unwrap();
        assert_eq!(picked.rel_path, "杯子/a.mp4");

        // 已处理 2 个之后，时段 0 不再放行
        let tasks = vec![done_task("杯子", "a.mp4"), done_task("杯子", "b.mp4")];
        assert!(pick_candidate(&files, &tasks, Some(0), &[2, 1], &HashSet::new()).is_none());
        // 时段 1 放行剩余文件
        let picked = pick_candidate(&files, &tasks, Some(1), &[2, 1], &HashSet::new()).unwrap();
        assert_eq!(picked.rel_path, "杯子/c.mp4");
    }

    #[test]
    fn test_products_progress_independently() {
        // 杯子已用完时段 0 配额，碗还没动：应放行碗的文件
        let files = vec![
            candidate("杯子", "a.mp4"),
            candidate("杯子", "b.mp4"),
            candidate("碗", "w1.mp4"),
        ];
        let tasks = vec![done_task("杯子", "a.mp4")];
        // 杯子 2 个文件比例 [1,1]：时段 0 配额 ceil(2*1/2)=1 已用完
        let picked = pick_candidate(&files, &tasks, Some(0), &[1, 1], &HashSet::new()).unwrap();
        assert_eq!(picked.rel_path, "碗/w1.mp4");
    }

    #[test]
    fn test_manual_scan_proceeds_before_first_slot() {
        let slots = parse_slots(&["10:00".to_string(), "14:00".to_string()]);
        // 08:00 未到首个时段：自动跳过，手动不挂标签继续
        assert_eq!(decide_slot(&slots, 8 * 3600, false), SlotDecision::Skip);
        assert_eq!(decide_slot(&slots, 8 * 3600, true), SlotDecision::Untagged);
        // 到点后两种模式都挂当前时段标签
        match decide_slot(&slots, 10 * 3600 + 60, false) {
            SlotDecision::Tagged(idx, slot) => {
                assert_eq!(idx, 0);
                assert_eq!(slot.label, "10:00");
            }
            other => panic!("意外判定: {:?}", other),
        }
    }

    #[test]
    fn test_interval_elapsed() {
        let mut task = done_task("杯子", "a.mp4");
        task.ended_at = (Local::now() - chrono::Duration::seconds(30))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let tasks = vec![task];
        assert!(!interval_elapsed(&tasks, 300));
        assert!(interval_elapsed(&tasks, 10));
        // 没有已结束任务时不受间隔限制
        assert!(interval_elapsed(&[], 300));
    }
}
