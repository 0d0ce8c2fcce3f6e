//! 用量模块：记录每次 AI 调用的 token 与费用，并按用户执行每日预算检查。
//!
//! # Usage & Budget Module
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`UsageTracker`] | Bounded in-memory ledger of [`UsageRecord`]s with budget checks |
//! | [`ModelPricing`] | Per-1K-token prices used to estimate the cost of a call |
//! | [`BudgetStatus`] | Trailing 24h spend of one user against the daily limit |
//!
//! The ledger is per-instance and volatile. Budget enforcement is therefore a
//! soft guard: across N gateway instances a user can spend up to N times the
//! daily limit.

mod pricing;
mod tracker;

pub use pricing::{format_usd, ModelPricing, TokenUsage};
pub use tracker::{
    BreakdownEntry, BudgetStatus, UsageConfig, UsageRecord, UsageStats, UsageTracker,
};
