//! 触发窗口评估
//!
//! 判断"现在"是否落在某个计划条目允许触发的时间窗口内，
//! 以及该键今天是否已经触发过。
//!
//! 核心机制：
//! 1. 把当前时间折算为当日秒数 `hour*3600 + minute*60 + second`
//! 2. 时段模式下选中 offset <= 当前秒数 的最后一个时段
//! 3. 仅当当前秒数位于 `[offset, offset + WINDOW)` 内才允许触发
//! 4. 触发标记按 (键, 时段, 日期) 持久化，日期不变则不再触发

use chrono::{Local, Timelike};

/// 自动触发窗口长度（秒）
///
/// 必须显著大于调度循环的轮询周期，否则会错过窗口。
pub const AUTO_RUN_WINDOW_SECONDS: u32 = 120;

/// 上传计划开始时间解析失败时的兜底（09:00）
pub const DEFAULT_UPLOAD_START_SECS: u32 = 9 * 3600;

/// 下载计划开始时间解析失败时的兜底（08:30）
pub const DEFAULT_DOWNLOAD_START_SECS: u32 = 8 * 3600 + 30 * 60;

/// 有序的发布时段（标签 "HH:MM" + 当日偏移秒数）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    pub label: String,
    pub offset_secs: u32,
}

/// 解析 "HH:MM" 为当日偏移秒数
pub fn parse_clock(raw: &str) -> Option<u32> {
    let mut parts = raw.trim().splitn(2, ':');
    let hour: u32 = parts.next()?.parse().ok()?;
    let minute: u32 = parts.next()?.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(hour * 3600 + minute * 60)
}

/// 解析 "HH:MM"，失败时回退到固定默认偏移
pub fn parse_clock_or(raw: &str, fallback: u32) -> u32 {
    parse_clock(raw).unwrap_or(fallback)
}

/// 把标签列表解析为时段列表，忽略非法标签
///
/// 时段按时间排序，保证"选最后一个 offset <= now"的语义成立。
pub fn parse_slots(labels: &[String]) -> Vec<TimeSlot> {
    let mut slots: Vec<TimeSlot> = labels
        .iter()
        .filter_map(|label| {
            parse_clock(label).map(|offset_secs| TimeSlot {
                label: label.clone(),
                offset_secs,
            })
        })
        .collect();
    slots.sort_by_key(|s| s.offset_secs);
    slots
}

/// 当前时间折算为当日秒数
pub fn now_day_seconds() -> u32 {
    let now = Local::now();
    now.hour() * 3600 + now.minute() * 60 + now.second()
}

/// 当前逻辑日期（YYYYMMDD）
pub fn today_str() -> String {
    Local::now().format("%Y%m%d").to_string()
}

/// 当前秒数是否落在某个开始时间的触发窗口内
pub fn in_window(now_secs: u32, start_secs: u32) -> bool {
    now_secs >= start_secs && now_secs < start_secs + AUTO_RUN_WINDOW_SECONDS
}

/// 时段模式下选中当前到点的时段：offset <= now 的最后一个
///
/// 返回 (时段下标, 时段)；全部未到点时返回 None。
pub fn due_slot<'a>(slots: &'a [TimeSlot], now_secs: u32) -> Option<(usize, &'a TimeSlot)> {
    slots
        .iter()
        .enumerate()
        .rev()
        .find(|(_, slot)| slot.offset_secs <= now_secs)
}

/// 单次运行模式的触发判定
///
/// 标记检查由调用方结合持久化的 auto_runs 映射完成，
/// 这里只回答"窗口是否打开"。
pub fn single_run_due(now_secs: u32, start_raw: &str, fallback_secs: u32) -> bool {
    let start_secs = parse_clock_or(start_raw, fallback_secs);
    in_window(now_secs, start_secs)
}

/// 触发标记键：单次运行模式直接用业务键
pub fn run_key(base: &str) -> String {
    base.to_string()
}

/// 触发标记键：时段模式按 (业务键, 时段标签) 组合
pub fn slot_run_key(base: &str, slot: &TimeSlot) -> String {
    format!("{}#{}", base, slot.label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(labels: &[&str]) -> Vec<TimeSlot> {
        parse_slots(&labels.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("09:00"), Some(9 * 3600));
        assert_eq!(parse_clock("00:00"), Some(0));
        assert_eq!(parse_clock("23:59"), Some(23 * 3600 + 59 * 60));
        assert_eq!(parse_clock("24:00"), None);
        assert_eq!(parse_clock("morning"), None);
        assert_eq!(parse_clock(""), None);
    }

    #[test]
    fn test_parse_clock_fallback() {
        assert_eq!(parse_clock_or("bad", DEFAULT_UPLOAD_START_SECS), 9 * 3600);
        assert_eq!(parse_clock_or("10:30", DEFAULT_UPLOAD_START_SECS), 10 * 3600 + 30 * 60);
    }

    #[test]
    fn test_parse_slots_sorted_and_filtered() {
        let parsed = slots(&["14:00", "09:00", "oops"]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].label, "09:00");
        assert_eq!(parsed[1].label, "14:00");
    }

    #[test]
    fn test_window_boundaries() {
        let start = 9 * 3600; // 09:00
        assert!(!in_window(start - 1, start));
        assert!(in_window(start, start));
        assert!(in_window(start + AUTO_RUN_WINDOW_SECONDS - 1, start));
        assert!(!in_window(start + AUTO_RUN_WINDOW_SECONDS, start));
    }

    #[test]
    fn test_due_slot_picks_last_reached() {
        let parsed = slots(&["09:00", "14:00"]);
        // 08:00 一个都没到点
        assert!(due_slot(&parsed, 8 * 3600).is_none());
        // 09:10 选中 09:00
        let (idx, slot) = due_slot(&parsed, 9 * 3600 + 600).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(slot.label, "09:00");
        // 15:00 选中 14:00
        let (idx, slot) = due_slot(&parsed, 15 * 3600).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(slot.label, "14:00");
    }

    #[test]
    fn test_fire_once_per_day_window() {
        // 09:00 时段，窗口 120 秒：09:01 在窗口内，09:20 已过窗口
        let parsed = slots(&["09:00"]);
        let (_, slot) = due_slot(&parsed, 9 * 3600 + 60).unwrap();
        assert!(in_window(9 * 3600 + 60, slot.offset_secs));
        assert!(!in_window(9 * 3600 + 20 * 60, slot.offset_secs));
    }

    #[test]
    fn test_single_run_due() {
        assert!(single_run_due(8 * 3600 + 30 * 60 + 10, "08:30", DEFAULT_DOWNLOAD_START_SECS));
        assert!(!single_run_due(8 * 3600, "08:30", DEFAULT_DOWNLOAD_START_SECS));
        // 非法时间串回退到 08:30
        assert!(single_run_due(8 * 3600 + 30 * 60, "??", DEFAULT_DOWNLOAD_START_SECS));
    }

    #[test]
    fn test_run_keys() {
        let slot = TimeSlot { label: "09:00".into(), offset_secs: 9 * 3600 };
        assert_eq!(run_key("download"), "download");
        assert_eq!(slot_run_key("旗舰店", &slot), "旗舰店#09:00");
    }
}
