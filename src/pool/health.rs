//! 健康状态机：Healthy / Unhealthy / Probation。
//!
//! - 硬故障（鉴权失败）阈值默认 1，且不会被后台探测自动恢复
//! - 软故障（限流/503/网络）达到阈值后进入 Unhealthy，按指数退避安排下次探测
//! - 探测后无论结果如何进入 Probation，只放行一个真实请求来确认恢复

use crate::pool::types::{FailureKind, Severity};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Probation,
}

impl HealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Probation => "probation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPolicy {
    pub hard_failure_threshold: u32,
    pub soft_failure_threshold: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            hard_failure_threshold: 1,
            soft_failure_threshold: 3,
            base_delay_ms: 30_000,
            max_delay_ms: 30 * 60 * 1000,
        }
    }
}

impl HealthPolicy {
    /// backoff(n) = min(base * 2^(n-1), max)
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exp).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    fn threshold(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Hard => self.hard_failure_threshold.max(1),
            _ => self.soft_failure_threshold.max(1),
        }
    }
}

/// 一次状态迁移（用于日志和事件）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthState,
    pub to: HealthState,
}

#[derive(Debug, Clone)]
pub struct HealthTracker {
    state: HealthState,
    consecutive_failures: u32,
    total_failures: u64,
    last_failure_at: Option<Instant>,
    last_failure_kind: Option<FailureKind>,
    next_probe_at: Option<Instant>,
    /// 鉴权类故障或人工强制下线：后台探测不再尝试恢复。
    locked: bool,
    /// Probation 状态下是否已放行过一个真实请求。
    probation_admitted: bool,
    last_probe_at: Option<Instant>,
    last_probe_ok: Option<bool>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            total_failures: 0,
            last_failure_at: None,
            last_failure_kind: None,
            next_probe_at: None,
            locked: false,
            probation_admitted: false,
            last_probe_at: None,
            last_probe_ok: None,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// 是否可以参与选择：健康，或处于 Probation 且还没放行请求。
    pub fn is_selectable(&self) -> bool {
        match self.state {
            HealthState::Healthy => true,
            HealthState::Probation => !self.probation_admitted,
            HealthState::Unhealthy => false,
        }
    }

    /// 为 Probation 放行唯一的真实请求；已放行过则返回 false。
    pub fn admit_probation(&mut self) -> bool {
        if self.state != HealthState::Probation || self.probation_admitted {
            return false;
        }
        self.probation_admitted = true;
        true
    }

    /// Probation 请求没有给出健康结论（例如调用方自身的 400），允许下一个请求重试。
    pub fn withdraw_probation(&mut self) {
        if self.state == HealthState::Probation {
            self.probation_admitted = false;
        }
    }

    pub fn record_success(&mut self) -> Option<Transition> {
        self.consecutive_failures = 0;
        self.next_probe_at = None;
        self.probation_admitted = false;
        self.locked = false;
        self.set_state(HealthState::Healthy)
    }

    pub fn record_failure(
        &mut self,
        kind: FailureKind,
        now: Instant,
        policy: &HealthPolicy,
    ) -> Option<Transition> {
        let severity = kind.severity();
        if matches!(severity, Severity::Neutral | Severity::Quota) {
            self.withdraw_probation();
            return None;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures = self.total_failures.saturating_add(1);
        self.last_failure_at = Some(now);
        self.last_failure_kind = Some(kind);

        let trip = match self.state {
            HealthState::Probation | HealthState::Unhealthy => true,
            HealthState::Healthy => self.consecutive_failures >= policy.threshold(severity),
        };
        if !trip {
            return None;
        }

        // 只有由硬故障触发的下线才锁定。
        if severity == Severity::Hard {
            self.locked = true;
        }
        self.probation_admitted = false;
        self.next_probe_at = Some(now + policy.backoff(self.consecutive_failures));
        self.set_state(HealthState::Unhealthy)
    }

    pub fn probe_due(&self, now: Instant) -> bool {
        self.state == HealthState::Unhealthy
            && !self.locked
            && self.next_probe_at.is_some_and(|t| t <= now)
    }

    /// 探测完成：无论结果，Unhealthy 一律进入 Probation。
    pub fn finish_probe(&mut self, reachable: bool, now: Instant) -> Option<Transition> {
        self.last_probe_at = Some(now);
        self.last_probe_ok = Some(reachable);
        if self.state != HealthState::Unhealthy {
            return None;
        }
        self.probation_admitted = false;
        self.next_probe_at = None;
        self.set_state(HealthState::Probation)
    }

    /// 人工强制状态。强制 Unhealthy 会锁定，直到再次被强制恢复。
    pub fn force(&mut self, state: HealthState, now: Instant) -> Option<Transition> {
        match state {
            HealthState::Healthy => self.record_success(),
            HealthState::Unhealthy => {
                self.locked = true;
                self.probation_admitted = false;
                self.next_probe_at = None;
                self.last_failure_at = Some(now);
                self.set_state(HealthState::Unhealthy)
            }
            HealthState::Probation => {
                self.locked = false;
                self.probation_admitted = false;
                self.next_probe_at = None;
                self.set_state(HealthState::Probation)
            }
        }
    }

    fn set_state(&mut self, to: HealthState) -> Option<Transition> {
        let from = self.state;
        self.state = to;
        (from != to).then_some(Transition { from, to })
    }

    pub fn snapshot(&self, now: Instant) -> HealthSnapshot {
        HealthSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            total_failures: self.total_failures,
            last_failure_kind: self.last_failure_kind,
            last_failure_secs_ago: self
                .last_failure_at
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
            next_probe_in_secs: self
                .next_probe_at
                .map(|t| t.saturating_duration_since(now).as_secs_f64()),
            locked: self.locked,
            probation_admitted: self.probation_admitted,
            last_probe_ok: self.last_probe_ok,
            last_probe_secs_ago: self
                .last_probe_at
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_failure_kind: Option<FailureKind>,
    pub last_failure_secs_ago: Option<f64>,
    pub next_probe_in_secs: Option<f64>,
    pub locked: bool,
    pub probation_admitted: bool,
    pub last_probe_ok: Option<bool>,
    pub last_probe_secs_ago: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> HealthPolicy {
        HealthPolicy {
            hard_failure_threshold: 1,
            soft_failure_threshold: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(4));
        assert_eq!(p.backoff(4), Duration::from_secs(5));
        assert_eq!(p.backoff(200), Duration::from_secs(5));
    }

    #[test]
    fn hard_failure_trips_immediately_and_blocks_probing() {
        let now = Instant::now();
        let mut h = HealthTracker::new();
        let t = h.record_failure(FailureKind::Auth, now, &policy());
        assert_eq!(
            t,
            Some(Transition {
                from: HealthState::Healthy,
                to: HealthState::Unhealthy
            })
        );
        assert!(!h.is_selectable());
        assert!(h.is_locked());
        assert!(!h.probe_due(now + Duration::from_secs(3600)));
    }

    #[test]
    fn hard_failure_below_threshold_does_not_lock() {
        let now = Instant::now();
        let p = HealthPolicy {
            hard_failure_threshold: 2,
            soft_failure_threshold: 2,
            ..policy()
        };
        let mut h = HealthTracker::new();
        assert!(h.record_failure(FailureKind::Auth, now, &p).is_none());
        assert!(!h.is_locked());

        // 软故障触发下线：仍按退避参与后台探测。
        assert!(h.record_failure(FailureKind::RateLimited, now, &p).is_some());
        assert_eq!(h.state(), HealthState::Unhealthy);
        assert!(!h.is_locked());
        assert!(h.probe_due(now + p.backoff(2)));

        // 硬故障达到阈值才锁定。
        let mut h = HealthTracker::new();
        h.record_failure(FailureKind::Auth, now, &p);
        assert!(h.record_failure(FailureKind::Auth, now, &p).is_some());
        assert!(h.is_locked());
    }

    #[test]
    fn soft_failures_trip_at_threshold() {
        let now = Instant::now();
        let p = policy();
        let mut h = HealthTracker::new();
        assert!(h.record_failure(FailureKind::RateLimited, now, &p).is_none());
        assert!(h.record_failure(FailureKind::ServiceUnavailable, now, &p).is_none());
        assert!(h.is_selectable());
        assert!(h.record_failure(FailureKind::RateLimited, now, &p).is_some());
        assert_eq!(h.state(), HealthState::Unhealthy);

        // 第三次失败 → backoff(3) = 4s
        assert!(!h.probe_due(now + Duration::from_millis(3_999)));
        assert!(h.probe_due(now + Duration::from_secs(4)));
    }

    #[test]
    fn success_resets_failure_streak() {
        let now = Instant::now();
        let p = policy();
        let mut h = HealthTracker::new();
        h.record_failure(FailureKind::Network, now, &p);
        h.record_failure(FailureKind::Network, now, &p);
        h.record_success();
        h.record_failure(FailureKind::Network, now, &p);
        assert_eq!(h.state(), HealthState::Healthy);
        assert_eq!(h.consecutive_failures(), 1);
    }

    #[test]
    fn probation_admits_exactly_one_request() {
        let now = Instant::now();
        let p = policy();
        let mut h = HealthTracker::new();
        for _ in 0..3 {
            h.record_failure(FailureKind::ServiceUnavailable, now, &p);
        }
        let later = now + Duration::from_secs(10);
        assert!(h.probe_due(later));
        h.finish_probe(false, later);
        assert_eq!(h.state(), HealthState::Probation);

        assert!(h.is_selectable());
        assert!(h.admit_probation());
        assert!(!h.is_selectable());
        assert!(!h.admit_probation());

        h.record_success();
        assert_eq!(h.state(), HealthState::Healthy);
        assert_eq!(h.consecutive_failures(), 0);
    }

    #[test]
    fn probation_failure_returns_to_unhealthy_with_longer_backoff() {
        let now = Instant::now();
        let p = policy();
        let mut h = HealthTracker::new();
        for _ in 0..3 {
            h.record_failure(FailureKind::ServiceUnavailable, now, &p);
        }
        let t1 = now + Duration::from_secs(4);
        h.finish_probe(true, t1);
        h.admit_probation();
        h.record_failure(FailureKind::ServiceUnavailable, t1, &p);
        assert_eq!(h.state(), HealthState::Unhealthy);
        // 第四次失败 → min(8s, 5s) = 5s
        assert!(!h.probe_due(t1 + Duration::from_millis(4_999)));
        assert!(h.probe_due(t1 + Duration::from_secs(5)));
    }

    #[test]
    fn neutral_failure_during_probation_frees_the_admission() {
        let now = Instant::now();
        let mut h = HealthTracker::new();
        h.force(HealthState::Probation, now);
        assert!(h.admit_probation());
        assert!(h.record_failure(FailureKind::InvalidRequest, now, &policy()).is_none());
        assert_eq!(h.state(), HealthState::Probation);
        assert!(h.is_selectable());
    }

    #[test]
    fn quota_exhaustion_is_not_a_health_failure() {
        let now = Instant::now();
        let mut h = HealthTracker::new();
        for _ in 0..10 {
            h.record_failure(FailureKind::QuotaExhausted, now, &policy());
        }
        assert_eq!(h.state(), HealthState::Healthy);
        assert_eq!(h.consecutive_failures(), 0);
    }

    #[test]
    fn forced_unhealthy_is_locked_until_forced_healthy() {
        let now = Instant::now();
        let mut h = HealthTracker::new();
        h.force(HealthState::Unhealthy, now);
        assert!(!h.probe_due(now + Duration::from_secs(86_400)));
        h.force(HealthState::Healthy, now);
        assert!(h.is_selectable());
        assert!(!h.is_locked());
    }
}
