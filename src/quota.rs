//! 时段配额分配
//!
//! 把一个产品的候选文件按配置比例切分到各个发布时段。
//! 分配是顺序进行的：每个时段按 `ceil(remaining * ratio / R)` 取额，
//! 最后一个时段吞掉全部剩余，保证所有文件最终被分完。

/// 顺序计算每个时段的配额
///
/// # 参数
/// * `total` - 产品当日候选文件总数 N
/// * `ratios` - 与时段列表等长的正整数比例
///
/// # 返回
/// 与 `ratios` 等长的配额列表，各项之和恒等于 `total`
pub fn slot_quotas(total: usize, ratios: &[u32]) -> Vec<usize> {
    if ratios.is_empty() {
        return Vec::new();
    }
    let ratio_sum: u64 = ratios.iter().map(|&r| r as u64).sum();
    if ratio_sum == 0 {
        // 非法比例，全部压到最后一个时段
        let mut quotas = vec![0; ratios.len()];
        quotas[ratios.len() - 1] = total;
        return quotas;
    }

    let mut quotas = Vec::with_capacity(ratios.len());
    let mut remaining = total;
    for (idx, &ratio) in ratios.iter().enumerate() {
        let quota = if idx == ratios.len() - 1 {
            // 末位时段吸收取整余量
            remaining
        } else {
            let exact = remaining as u64 * ratio as u64;
            let ceil = exact.div_ceil(ratio_sum) as usize;
            ceil.min(remaining)
        };
        quotas.push(quota);
        remaining -= quota;
    }
    quotas
}

/// 截至时段 `slot`（含）累计允许发布的文件数
///
/// 扫描端用它与已处理数取差，得到本时段还允许新发布的数量。
pub fn allowed_through_slot(total: usize, ratios: &[u32], slot: usize) -> usize {
    slot_quotas(total, ratios)
        .iter()
        .take(slot + 1)
        .sum()
}

/// 比例配置与时段列表是否匹配
///
/// 不匹配时按单次运行模式处理（不做时段标记）。
pub fn ratios_usable(ratios: &[u32], slot_count: usize) -> bool {
    !ratios.is_empty() && ratios.len() == slot_count && ratios.iter().all(|&r| r > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_two_slot_allocation() {
        // N=9, ratios=[2,1]: 时段0 取 ceil(9*2/3)=6，时段1 吞掉剩余 3
        let quotas = slot_quotas(9, &[2, 1]);
        assert_eq!(quotas, vec![6, 3]);
    }

    #[test]
    fn test_single_slot_takes_all() {
        assert_eq!(slot_quotas(7, &[5]), vec![7]);
    }

    #[test]
    fn test_zero_files() {
        assert_eq!(slot_quotas(0, &[1, 2, 3]), vec![0, 0, 0]);
    }

    #[test]
    fn test_fewer_files_than_slots() {
        let quotas = slot_quotas(2, &[1, 1, 1]);
        assert_eq!(quotas.iter().sum::<usize>(), 2);
        // 前面的时段先取额
        assert_eq!(quotas[0], 1);
    }

    #[test]
    fn test_allowed_through_slot() {
        // quotas = [6, 3]
        assert_eq!(allowed_through_slot(9, &[2, 1], 0), 6);
        assert_eq!(allowed_through_slot(9, &[2, 1], 1), 9);
    }

    #[test]
    fn test_ratios_usable() {
        assert!(ratios_usable(&[2, 1], 2));
        assert!(!ratios_usable(&[2, 1], 3));
        assert!(!ratios_usable(&[], 0));
        assert!(!ratios_usable(&[2, 0], 2));
    }

    proptest! {
        /// 配额守恒：任意 N、任意正整数比例，各时段配额之和恒等于 N
        #[test]
        fn prop_quota_conservation(
            total in 0usize..500,
            ratios in proptest::collection::vec(1u32..20, 1..6),
        ) {
            let quotas = slot_quotas(total, &ratios);
            prop_assert_eq!(quotas.len(), ratios.len());
            prop_assert_eq!(quotas.iter().sum::<usize>(), total);
        }

        /// 累计允许量单调不减，终点等于 N
        #[test]
        fn prop_allowed_monotonic(
            total in 0usize..200,
            ratios in proptest::collection::vec(1u32..10, 1..5),
        ) {
            let mut prev = 0;
            for slot in 0..ratios.len() {
                let allowed = allowed_through_slot(total, &ratios, slot);
                prop_assert!(allowed >= prev);
                prev = allowed;
            }
            prop_assert_eq!(prev, total);
        }
    }
}
