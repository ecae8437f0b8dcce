use std::collections::HashSet;
use std::sync::Mutex;

/// 进程内的计划认领表，防止同一计划被两个并发轮次同时处理
///
/// 跨进程的互斥由数据库的 FOR UPDATE SKIP LOCKED 保证，这里只挡住
/// 本进程内相邻轮询的重复派发。
#[derive(Default)]
pub struct PlanClaimTable {
    claimed: Mutex<HashSet<i64>>,
}

impl PlanClaimTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 认领成功返回true；已被认领返回false
    pub fn try_claim(&self, plan_id: i64) -> bool {
        let mut claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        claimed.insert(plan_id)
    }

    pub fn release(&self, plan_id: i64) {
        let mut claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        claimed.remove(&plan_id);
    }

    pub fn active_count(&self) -> usize {
        self.claimed.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive() {
        let table = PlanClaimTable::new();
        assert!(table.try_claim(42));
        assert!(!table.try_claim(42));
        assert!(table.try_claim(43));
        assert_eq!(table.active_count(), 2);
    }

    #[test]
    fn test_release_allows_reclaim() {
        let table = PlanClaimTable::new();
        assert!(table.try_claim(42));
        table.release(42);
        assert!(table.try_claim(42));
    }

    #[test]
    fn test_release_of_unclaimed_is_noop() {
        let table = PlanClaimTable::new();
        table.release(99);
        assert_eq!(table.active_count(), 0);
    }
}
