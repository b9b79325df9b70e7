//! 用量限制：计数配额或金额余额，二选一（或不限）。

use crate::pool::types::{FailureKind, LimitSpec, Outcome};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum LimitMode {
    Unlimited,
    Quota {
        used: u64,
        limit: u64,
    },
    Balance {
        current: f64,
        min_threshold: f64,
        /// 归一化剩余容量时使用的参照余额（见过的最高余额）。
        reference: f64,
    },
}

#[derive(Debug, Clone)]
pub struct UsageLimiter {
    mode: LimitMode,
    /// 服务方明确回报了配额耗尽。
    exhausted: bool,
    stale_after: Duration,
    balance_updated_at: Instant,
    balance_polled_at: Option<Instant>,
    balance_query_failures: u32,
    reset_interval: Option<Duration>,
    last_reset: Instant,
}

impl UsageLimiter {
    pub fn new(spec: &LimitSpec, stale_after: Duration, now: Instant) -> Self {
        let (mode, reset_interval) = match spec {
            LimitSpec::Unlimited => (LimitMode::Unlimited, None),
            LimitSpec::Quota {
                limit,
                reset_interval_ms,
            } => (
                LimitMode::Quota {
                    used: 0,
                    limit: *limit,
                },
                reset_interval_ms.map(Duration::from_millis),
            ),
            LimitSpec::Balance {
                initial_balance,
                min_threshold,
            } => (
                LimitMode::Balance {
                    current: *initial_balance,
                    min_threshold: *min_threshold,
                    reference: *initial_balance,
                },
                None,
            ),
        };
        Self {
            mode,
            exhausted: false,
            stale_after,
            balance_updated_at: now,
            balance_polled_at: None,
            balance_query_failures: 0,
            reset_interval,
            last_reset: now,
        }
    }

    pub fn record_outcome(&mut self, outcome: &Outcome) {
        if outcome.failure == Some(FailureKind::QuotaExhausted) {
            self.exhausted = true;
        }
        self.record_usage(outcome);
    }

    /// 只记账，不处理耗尽回报。轮换出的令牌/模型耗尽时由轮换策略自己判断是否还有容量。
    pub fn record_usage(&mut self, outcome: &Outcome) {
        match &mut self.mode {
            LimitMode::Unlimited => {}
            LimitMode::Quota { used, .. } => {
                if outcome.is_success() {
                    *used = used.saturating_add(1);
                }
            }
            LimitMode::Balance { current, .. } => {
                *current -= outcome.cost;
            }
        }
    }

    pub fn is_available(&self, now: Instant) -> bool {
        if self.exhausted {
            return false;
        }
        match &self.mode {
            LimitMode::Unlimited => true,
            LimitMode::Quota { used, limit } => used < limit,
            LimitMode::Balance {
                current,
                min_threshold,
                ..
            } => !self.is_stale(now) && *current >= *min_threshold,
        }
    }

    /// 余额查询失败且上次成功刷新已超过 `stale_after`：保守地视为不可用。
    /// 从未查询失败（包括没有接入余额查询）时只按本地扣费判断。
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.mode {
            LimitMode::Balance { .. } => {
                self.balance_query_failures > 0
                    && now.saturating_duration_since(self.balance_updated_at) > self.stale_after
            }
            _ => false,
        }
    }

    pub fn set_stale_after(&mut self, stale_after: Duration) {
        self.stale_after = stale_after;
    }

    /// 剩余容量，归一化到 [0, 1]。
    pub fn remaining_capacity(&self) -> f64 {
        if self.exhausted {
            return 0.0;
        }
        match &self.mode {
            LimitMode::Unlimited => 1.0,
            LimitMode::Quota { used, limit } => {
                if *limit == 0 {
                    return 0.0;
                }
                (limit.saturating_sub(*used) as f64 / *limit as f64).clamp(0.0, 1.0)
            }
            LimitMode::Balance {
                current,
                min_threshold,
                reference,
            } => {
                let span = reference - min_threshold;
                if span <= 0.0 {
                    return if current >= min_threshold && *current > 0.0 {
                        1.0
                    } else {
                        0.0
                    };
                }
                ((current - min_threshold) / span).clamp(0.0, 1.0)
            }
        }
    }

    pub fn is_balance_mode(&self) -> bool {
        matches!(self.mode, LimitMode::Balance { .. })
    }

    /// 余额查询成功：覆盖当前余额并清除过期标记。
    pub fn apply_balance(&mut self, balance: f64, now: Instant) {
        if !balance.is_finite() {
            return;
        }
        if let LimitMode::Balance {
            current,
            min_threshold,
            reference,
        } = &mut self.mode
        {
            *current = balance;
            if balance > *reference {
                *reference = balance;
            }
            if balance >= *min_threshold {
                self.exhausted = false;
            }
        }
        self.balance_updated_at = now;
        self.balance_polled_at = Some(now);
        self.balance_query_failures = 0;
    }

    /// 余额查询失败：保留旧值，只记录失败。
    pub fn record_balance_failure(&mut self, now: Instant) {
        self.balance_polled_at = Some(now);
        self.balance_query_failures = self.balance_query_failures.saturating_add(1);
    }

    pub fn balance_poll_due(&self, now: Instant, interval: Duration) -> bool {
        if !self.is_balance_mode() {
            return false;
        }
        match self.balance_polled_at {
            None => true,
            Some(t) => now.saturating_duration_since(t) >= interval,
        }
    }

    pub fn reset_due(&self, now: Instant) -> bool {
        self.reset_interval
            .is_some_and(|i| now.saturating_duration_since(self.last_reset) >= i)
    }

    /// 清零配额计数并解除耗尽标记（定时重置或人工操作）。
    pub fn reset(&mut self, now: Instant) {
        if let LimitMode::Quota { used, .. } = &mut self.mode {
            *used = 0;
        }
        self.exhausted = false;
        self.last_reset = now;
    }

    pub fn snapshot(&self, now: Instant) -> LimiterSnapshot {
        let (mode, used, limit, balance, min_threshold) = match &self.mode {
            LimitMode::Unlimited => ("unlimited", None, None, None, None),
            LimitMode::Quota { used, limit } => ("quota", Some(*used), Some(*limit), None, None),
            LimitMode::Balance {
                current,
                min_threshold,
                ..
            } => ("balance", None, None, Some(*current), Some(*min_threshold)),
        };
        LimiterSnapshot {
            mode,
            used,
            limit,
            balance,
            min_threshold,
            remaining: self.remaining_capacity(),
            available: self.is_available(now),
            stale: self.is_stale(now),
            exhausted: self.exhausted,
            balance_query_failures: self.balance_query_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LimiterSnapshot {
    pub mode: &'static str,
    pub used: Option<u64>,
    pub limit: Option<u64>,
    pub balance: Option<f64>,
    pub min_threshold: Option<f64>,
    pub remaining: f64,
    pub available: bool,
    pub stale: bool,
    pub exhausted: bool,
    pub balance_query_failures: u32,
}
