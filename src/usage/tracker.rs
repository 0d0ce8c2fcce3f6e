//! In-memory usage ledger and daily budget checks.

use crate::utils::{duration_ms, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::RwLock;
use std::time::Duration;
use tracing::warn;

/// One upstream (or cache) outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub endpoint: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub timestamp_ms: u64,
    pub model: String,
    pub success: bool,
}

impl UsageRecord {
    /// Record stamped with the current time.
    pub fn now(
        user_id: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        tokens_used: u64,
        cost_usd: f64,
        success: bool,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            endpoint: endpoint.into(),
            tokens_used,
            cost_usd,
            timestamp_ms: now_ms(),
            model: model.into(),
            success,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }
}

#[derive(Debug, Clone)]
pub struct UsageConfig {
    pub max_records: usize,
    pub daily_limit_usd: f64,
    /// A single record above this cost is logged as a warning.
    pub expensive_call_threshold_usd: f64,
    pub budget_window: Duration,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            max_records: 10_000,
            daily_limit_usd: 5.0,
            expensive_call_threshold_usd: 0.10,
            budget_window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl UsageConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = max;
        self
    }
    pub fn with_daily_limit_usd(mut self, limit: f64) -> Self {
        self.daily_limit_usd = limit;
        self
    }
    pub fn with_expensive_call_threshold_usd(mut self, threshold: f64) -> Self {
        self.expensive_call_threshold_usd = threshold;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub user_id: String,
    pub spent_usd: f64,
    pub limit_usd: f64,
    pub remaining_usd: f64,
    pub exceeded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BreakdownEntry {
    pub calls: u64,
    pub cost_usd: f64,
    pub tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageStats {
    pub total_records: usize,
    pub max_records: usize,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub unique_users: usize,
    pub by_endpoint: BTreeMap<String, BreakdownEntry>,
    pub by_model: BTreeMap<String, BreakdownEntry>,
}

/// Bounded ring buffer of [`UsageRecord`]s for this process.
///
/// It is an approximate, per-instance view used as a soft guard: each gateway
/// instance sees only the calls it served, and nothing survives a restart.
pub struct UsageTracker {
    config: UsageConfig,
    records: RwLock<VecDeque<UsageRecord>>,
}

impl UsageTracker {
    pub fn new(config: UsageConfig) -> Self {
        let cap = config.max_records.clamp(1, 4096);
        Self {
            records: RwLock::new(VecDeque::with_capacity(cap)),
            config,
        }
    }

    pub fn config(&self) -> &UsageConfig {
        &self.config
    }

    pub fn track_usage(&self, record: UsageRecord) {
        if record.cost_usd > self.config.expensive_call_threshold_usd {
            warn!(
                user_id = %record.user_id,
                endpoint = %record.endpoint,
                model = %record.model,
                cost_usd = record.cost_usd,
                tokens = record.tokens_used,
                "expensive AI call"
            );
        }
        if let Ok(mut records) = self.records.write() {
            records.push_back(record);
            while records.len() > self.config.max_records.max(1) {
                records.pop_front();
            }
        }
    }

    /// Records for `user_id` no older than `window`.
    pub fn get_user_usage(&self, user_id: &str, window: Duration) -> Vec<UsageRecord> {
        let cutoff = now_ms().saturating_sub(duration_ms(window));
        self.records
            .read()
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.user_id == user_id && r.timestamp_ms >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sum of every retained cost, for one user or for everyone.
    pub fn get_total_cost(&self, user_id: Option<&str>) -> f64 {
        self.records
            .read()
            .map(|records| {
                records
                    .iter()
                    .filter(|r| user_id.map_or(true, |u| r.user_id == u))
                    .map(|r| r.cost_usd)
                    .sum()
            })
            .unwrap_or(0.0)
    }

    /// Trailing-window spend for `user_id` against the daily limit.
    pub fn check_budget(&self, user_id: &str) -> BudgetStatus {
        let spent_usd: f64 = self
            .get_user_usage(user_id, self.config.budget_window)
            .iter()
            .map(|r| r.cost_usd)
            .sum();
        let limit_usd = self.config.daily_limit_usd;
        BudgetStatus {
            user_id: user_id.to_string(),
            spent_usd,
            limit_usd,
            remaining_usd: (limit_usd - spent_usd).max(0.0),
            exceeded: spent_usd >= limit_usd,
        }
    }

    pub fn get_usage_stats(&self) -> UsageStats {
        let Ok(records) = self.records.read() else {
            return UsageStats::default();
        };
        let mut stats = UsageStats {
            total_records: records.len(),
            max_records: self.config.max_records,
            ..Default::default()
        };
        let mut users = HashSet::new();
        for r in records.iter() {
            stats.total_cost_usd += r.cost_usd;
            stats.total_tokens += r.tokens_used;
            if r.success {
                stats.success_count += 1;
            } else {
                stats.failure_count += 1;
            }
            users.insert(r.user_id.as_str());
            for (map, key) in [
                (&mut stats.by_endpoint, &r.endpoint),
                (&mut stats.by_model, &r.model),
            ] {
                let e = map.entry(key.clone()).or_default();
                e.calls += 1;
                e.cost_usd += r.cost_usd;
                e.tokens += r.tokens_used;
            }
        }
        stats.unique_users = users.len();
        if stats.total_records > 0 {
            stats.success_rate = stats.success_count as f64 / stats.total_records as f64;
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(user: &str, cost: f64) -> UsageRecord {
        UsageRecord::now(user, "/api/ai/greeting", "gpt-4o-mini", 100, cost, true)
    }

    #[test]
    fn test_defaults() {
        let cfg = UsageConfig::default();
        assert_eq!(cfg.max_records, 10_000);
        assert_eq!(cfg.daily_limit_usd, 5.0);
        assert_eq!(cfg.budget_window, Duration::from_secs(86_400));
    }

    #[test]
    fn test_total_cost_per_user() {
        let tracker = UsageTracker::new(UsageConfig::default());
        tracker.track_usage(rec("alice", 0.01));
        tracker.track_usage(rec("alice", 0.02));
        tracker.track_usage(rec("bob", 0.5));
        assert!((tracker.get_total_cost(Some("alice")) - 0.03).abs() < 1e-9);
        assert!((tracker.get_total_cost(None) - 0.53).abs() < 1e-9);
        assert_eq!(tracker.get_total_cost(Some("carol")), 0.0);
    }

    #[test]
    fn test_user_usage_excludes_old_records() {
        let tracker = UsageTracker::new(UsageConfig::default());
        let two_hours_ago = now_ms() - 2 * 60 * 60 * 1000;
        tracker.track_usage(rec("alice", 0.01).with_timestamp(two_hours_ago));
        tracker.track_usage(rec("alice", 0.02));
        let recent = tracker.get_user_usage("alice", Duration::from_secs(3600));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].cost_usd, 0.02);
        assert_eq!(tracker.get_user_usage("alice", Duration::from_secs(3 * 3600)).len(), 2);
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let tracker = UsageTracker::new(UsageConfig::new().with_max_records(3));
        for i in 0..5 {
            tracker.track_usage(rec(&format!("u{}", i), 0.0));
        }
        assert_eq!(tracker.len(), 3);
        assert!(tracker.get_user_usage("u0", Duration::from_secs(60)).is_empty());
        assert_eq!(tracker.get_user_usage("u4", Duration::from_secs(60)).len(), 1);
    }

    #[test]
    fn test_budget_uses_trailing_window() {
        let tracker = UsageTracker::new(UsageConfig::new().with_daily_limit_usd(1.0));
        let yesterday = now_ms() - 25 * 60 * 60 * 1000;
        tracker.track_usage(rec("alice", 5.0).with_timestamp(yesterday));
        tracker.track_usage(rec("alice", 0.4));
        let status = tracker.check_budget("alice");
        assert!(!status.exceeded);
        assert!((status.spent_usd - 0.4).abs() < 1e-9);
        assert!((status.remaining_usd - 0.6).abs() < 1e-9);

        tracker.track_usage(rec("alice", 0.6));
        assert!(tracker.check_budget("alice").exceeded);
    }

    #[test]
    fn test_usage_stats_breakdown() {
        let tracker = UsageTracker::new(UsageConfig::default());
        tracker.track_usage(rec("alice", 0.01));
        tracker.track_usage(UsageRecord::now("bob", "/api/ai/insight", "cache", 0, 0.0, true));
        tracker.track_usage(UsageRecord::now("bob", "/api/ai/insight", "gpt-4o-mini", 0, 0.0, false));

        let stats = tracker.get_usage_stats();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.unique_users, 2);
        assert_eq!(stats.by_endpoint["/api/ai/insight"].calls, 2);
        assert_eq!(stats.by_model["gpt-4o-mini"].calls, 2);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
    }
}
