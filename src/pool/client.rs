//! 客户端：绑定 (厂商, 凭证, 模型, 价格) 的可选择单元。
//!
//! 每个客户端独占一个 UsageLimiter 和一个 HealthTracker，可选一个 RotationPolicy；
//! 三者都放在同一把客户端锁后面，保证结果回报时不会丢更新。

use crate::error::PoolError;
use crate::pool::health::{HealthPolicy, HealthSnapshot, HealthState, HealthTracker, Transition};
use crate::pool::limiter::{LimiterSnapshot, UsageLimiter};
use crate::pool::rotation::{RotationPolicy, RotationSnapshot};
use crate::pool::types::{
    ClientId, ClientSpec, FailureKind, Outcome, RotationSpec, RotationTarget,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Client {
    spec: ClientSpec,
    state: Mutex<ClientState>,
}

#[derive(Debug)]
struct ClientState {
    limiter: UsageLimiter,
    health: HealthTracker,
    rotation: Option<RotationPolicy>,
    stats: ClientStats,
}

#[derive(Debug, Default, Clone)]
struct ClientStats {
    acquire_count: u64,
    success_count: u64,
    failure_sum: u64,
    probe_count: u64,
    in_flight: u32,
    last_acquired: Option<Instant>,
    last_released: Option<Instant>,
}

/// 选择阶段在客户端锁内复制出来的只读视图，排序时不再接触客户端状态。
#[derive(Debug, Clone)]
pub struct CandidateView {
    pub client: Arc<Client>,
    pub price: f64,
    pub recent_failures: u32,
    pub last_acquired: Option<Instant>,
    pub probation: bool,
}

/// 一次成功准入的结果。
#[derive(Debug, Clone)]
pub struct Admission {
    pub rotated: Option<String>,
    pub probation: bool,
}

impl Client {
    pub fn from_spec(spec: ClientSpec, stale_after: Duration, now: Instant) -> Self {
        let limiter = UsageLimiter::new(&spec.limit, stale_after, now);
        let rotation = spec.rotation.as_ref().map(RotationPolicy::from_spec);
        Self {
            state: Mutex::new(ClientState {
                limiter,
                health: HealthTracker::new(),
                rotation,
                stats: ClientStats::default(),
            }),
            spec,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.spec.id
    }

    pub fn provider(&self) -> &str {
        &self.spec.provider
    }

    pub fn price(&self) -> f64 {
        self.spec.price
    }

    pub fn group(&self) -> &str {
        self.spec.group_name()
    }

    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.spec.capabilities
    }

    pub fn spec(&self) -> &ClientSpec {
        &self.spec
    }

    /// 实际使用的 (凭证, 模型)：轮换出的标识按目标替换其中之一。
    pub fn resolve_identity(&self, rotated: Option<&str>) -> (String, String) {
        let target = self.spec.rotation.as_ref().map(RotationSpec::target);
        match (rotated, target) {
            (Some(id), Some(RotationTarget::Token)) => (id.to_string(), self.spec.model.clone()),
            (Some(id), Some(RotationTarget::Model)) => {
                (self.spec.credential.clone(), id.to_string())
            }
            _ => (self.spec.credential.clone(), self.spec.model.clone()),
        }
    }

    /// 可参与选择时返回候选视图。
    pub async fn view(self: &Arc<Self>, now: Instant) -> Option<CandidateView> {
        let st = self.state.lock().await;
        if !eligible(&st, now) {
            return None;
        }
        Some(CandidateView {
            client: self.clone(),
            price: self.spec.price,
            recent_failures: st.health.consecutive_failures(),
            last_acquired: st.stats.last_acquired,
            probation: st.health.state() == HealthState::Probation,
        })
    }

    /// 拿到分组槽位之后的最终准入：重新检查资格（状态可能已变化），并取出轮换候选。
    pub async fn admit(&self, probation: bool, now: Instant) -> Option<Admission> {
        let mut st = self.state.lock().await;
        if !eligible(&st, now) {
            return None;
        }
        let in_probation = st.health.state() == HealthState::Probation;
        if in_probation != probation {
            return None;
        }

        let rotated = match st.rotation.as_mut() {
            Some(r) => Some(r.next_candidate()?),
            None => None,
        };
        if probation && !st.health.admit_probation() {
            return None;
        }

        st.stats.acquire_count += 1;
        st.stats.in_flight += 1;
        st.stats.last_acquired = Some(now);
        Some(Admission { rotated, probation })
    }

    /// 回报一次调用结果，返回健康状态迁移（如有）。
    pub async fn settle(
        &self,
        admission: &Admission,
        outcome: &Outcome,
        policy: &HealthPolicy,
        now: Instant,
    ) -> Option<Transition> {
        let mut st = self.state.lock().await;
        st.stats.in_flight = st.stats.in_flight.saturating_sub(1);
        st.stats.last_released = Some(now);

        // 轮换出的令牌/模型被拒绝（鉴权/配额）只影响该候选；
        // 轮换策略没有剩余容量时，鉴权失败才落到整个客户端。
        let rotation_left = match (admission.rotated.as_deref(), st.rotation.as_mut()) {
            (Some(id), Some(r)) => {
                r.report_outcome(id, outcome);
                Some(r.has_capacity())
            }
            _ => None,
        };
        if rotation_left.is_some() {
            st.limiter.record_usage(outcome);
        } else {
            st.limiter.record_outcome(outcome);
        }

        match outcome.failure {
            None => {
                st.stats.success_count += 1;
                st.health.record_success()
            }
            Some(FailureKind::Auth) if rotation_left == Some(true) => {
                tracing::warn!(
                    client_id = %self.spec.id,
                    "轮换候选鉴权失败，已停用该候选"
                );
                st.health.withdraw_probation();
                None
            }
            Some(kind) => {
                let before = st.health.consecutive_failures();
                let t = st.health.record_failure(kind, now, policy);
                if st.health.consecutive_failures() > before {
                    st.stats.failure_sum += 1;
                }
                t
            }
        }
    }

    /// 热重载时沿用运行时状态，只更新余额过期时间。
    pub async fn set_stale_after(&self, stale_after: Duration) {
        self.state.lock().await.limiter.set_stale_after(stale_after);
    }

    pub async fn probe_due(&self, now: Instant) -> bool {
        self.state.lock().await.health.probe_due(now)
    }

    /// 探测时使用的身份：轮换策略当前的候选（不消耗次数）。
    pub async fn probe_identity(&self) -> (String, String) {
        let current = {
            let st = self.state.lock().await;
            st.rotation
                .as_ref()
                .and_then(|r| r.current().map(str::to_string))
        };
        self.resolve_identity(current.as_deref())
    }

    pub async fn finish_probe(&self, reachable: bool, now: Instant) -> Option<Transition> {
        let mut st = self.state.lock().await;
        st.stats.probe_count += 1;
        st.health.finish_probe(reachable, now)
    }

    pub async fn force_health(&self, state: HealthState, now: Instant) -> Option<Transition> {
        self.state.lock().await.health.force(state, now)
    }

    /// 清零用量并重置轮换（人工重置或每日重置）。
    pub async fn reset_usage(&self, now: Instant) {
        let mut st = self.state.lock().await;
        st.limiter.reset(now);
        if let Some(r) = st.rotation.as_mut() {
            r.reset();
        }
    }

    /// 到期的定时配额重置；返回是否执行了重置。
    pub async fn reset_usage_if_due(&self, now: Instant) -> bool {
        let mut st = self.state.lock().await;
        if !st.limiter.reset_due(now) {
            return false;
        }
        st.limiter.reset(now);
        if let Some(r) = st.rotation.as_mut() {
            r.reset();
        }
        true
    }

    pub async fn balance_poll_due(&self, now: Instant, interval: Duration) -> bool {
        self.state.lock().await.limiter.balance_poll_due(now, interval)
    }

    pub async fn apply_balance(&self, balance: f64, now: Instant) {
        self.state.lock().await.limiter.apply_balance(balance, now);
    }

    pub async fn record_balance_failure(&self, now: Instant) {
        self.state.lock().await.limiter.record_balance_failure(now);
    }

    pub async fn update_token_balance(&self, token: &str, balance: f64) -> Result<(), PoolError> {
        let mut st = self.state.lock().await;
        let found = st
            .rotation
            .as_mut()
            .is_some_and(|r| r.update_token_balance(token, balance));
        if found {
            Ok(())
        } else {
            Err(PoolError::unknown_client(format!(
                "{} 中没有该令牌",
                self.spec.id
            )))
        }
    }

    pub async fn balance_tokens(&self) -> Vec<String> {
        let st = self.state.lock().await;
        st.rotation
            .as_ref()
            .map(RotationPolicy::balance_tokens)
            .unwrap_or_default()
    }

    pub async fn snapshot(&self, now: Instant) -> ClientSnapshot {
        let st = self.state.lock().await;
        let chats = st.stats.success_count + st.stats.failure_sum;
        let error_rate_percent = if chats > 0 {
            st.stats.failure_sum as f64 / chats as f64 * 100.0
        } else {
            0.0
        };
        ClientSnapshot {
            id: self.spec.id.clone(),
            provider: self.spec.provider.clone(),
            group: self.group().to_string(),
            model: self.spec.model.clone(),
            credential: crate::logging::mask_secret(&self.spec.credential),
            price: self.spec.price,
            capabilities: self.spec.capabilities.iter().cloned().collect(),
            selectable: eligible(&st, now),
            health: st.health.snapshot(now),
            usage: st.limiter.snapshot(now),
            rotation: st.rotation.as_ref().map(RotationPolicy::snapshot),
            stats: StatsSnapshot {
                acquire_count: st.stats.acquire_count,
                success_count: st.stats.success_count,
                error_count: st.health.consecutive_failures(),
                error_sum: st.stats.failure_sum,
                error_rate_percent: (error_rate_percent * 10.0).round() / 10.0,
                probe_count: st.stats.probe_count,
                in_flight: st.stats.in_flight,
                last_acquired_secs_ago: st
                    .stats
                    .last_acquired
                    .map(|t| now.saturating_duration_since(t).as_secs_f64()),
                last_released_secs_ago: st
                    .stats
                    .last_released
                    .map(|t| now.saturating_duration_since(t).as_secs_f64()),
            },
        }
    }
}

fn eligible(st: &ClientState, now: Instant) -> bool {
    st.health.is_selectable()
        && st.limiter.is_available(now)
        && st.rotation.as_ref().is_none_or(RotationPolicy::has_capacity)
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub id: String,
    pub provider: String,
    pub group: String,
    pub model: String,
    pub credential: String,
    pub price: f64,
    pub capabilities: Vec<String>,
    pub selectable: bool,
    pub health: HealthSnapshot,
    pub usage: LimiterSnapshot,
    pub rotation: Option<RotationSnapshot>,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub acquire_count: u64,
    pub success_count: u64,
    /// 当前连续失败次数。
    pub error_count: u32,
    /// 累计计入健康的失败次数。
    pub error_sum: u64,
    pub error_rate_percent: f64,
    pub probe_count: u64,
    pub in_flight: u32,
    pub last_acquired_secs_ago: Option<f64>,
    pub last_released_secs_ago: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::types::{BatchTokenSpec, CountingCandidateSpec, LimitSpec};

    fn spec(rotation: Option<RotationSpec>, limit: LimitSpec) -> ClientSpec {
        ClientSpec {
            id: "c1".to_string(),
            provider: "zhipu".to_string(),
            credential: "base-key-123456".to_string(),
            model: "glm-4".to_string(),
            price: 1.0,
            capabilities: BTreeSet::new(),
            group: String::new(),
            limit,
            rotation,
        }
    }

    fn models(caps: &[(&str, u32)]) -> Option<RotationSpec> {
        Some(RotationSpec::Counting {
            target: RotationTarget::Model,
            candidates: caps
                .iter()
                .map(|(id, cap)| CountingCandidateSpec {
                    id: id.to_string(),
                    cap: Some(*cap),
                })
                .collect(),
            recycle: false,
        })
    }

    #[tokio::test]
    async fn admission_hands_out_rotated_models_until_exhausted() {
        let now = Instant::now();
        let c = Arc::new(Client::from_spec(
            spec(models(&[("A", 2), ("B", 1)]), LimitSpec::Unlimited),
            Duration::from_secs(60),
            now,
        ));
        let mut seen = Vec::new();
        while let Some(adm) = c.admit(false, now).await {
            let (cred, model) = c.resolve_identity(adm.rotated.as_deref());
            assert_eq!(cred, "base-key-123456");
            seen.push(model);
        }
        assert_eq!(seen, ["A", "A", "B"]);
        assert!(c.view(now).await.is_none());

        c.reset_usage(now).await;
        assert!(c.view(now).await.is_some());
    }

    #[tokio::test]
    async fn settle_updates_limiter_health_and_stats() {
        let now = Instant::now();
        let policy = HealthPolicy::default();
        let c = Client::from_spec(
            spec(
                None,
                LimitSpec::Quota {
                    limit: 1,
                    reset_interval_ms: None,
                },
            ),
            Duration::from_secs(60),
            now,
        );
        let adm = c.admit(false, now).await.expect("admit");
        assert!(c.settle(&adm, &Outcome::success(0.0), &policy, now).await.is_none());

        // 配额已用完：仍然健康，但不可选。
        assert!(c.admit(false, now).await.is_none());
        let snap = c.snapshot(now).await;
        assert_eq!(snap.health.state, HealthState::Healthy);
        assert!(!snap.selectable);
        assert_eq!(snap.stats.success_count, 1);
        assert_eq!(snap.stats.in_flight, 0);
    }

    #[tokio::test]
    async fn auth_failure_makes_client_unselectable() {
        let now = Instant::now();
        let c = Arc::new(Client::from_spec(
            spec(None, LimitSpec::Unlimited),
            Duration::from_secs(60),
            now,
        ));
        let adm = c.admit(false, now).await.expect("admit");
        let t = c
            .settle(&adm, &Outcome::failure(FailureKind::Auth), &HealthPolicy::default(), now)
            .await;
        assert_eq!(t.map(|t| t.to), Some(HealthState::Unhealthy));
        assert!(c.view(now).await.is_none());
        assert_eq!(c.snapshot(now).await.stats.error_sum, 1);
    }

    fn tokens(balances: &[(&str, f64)]) -> Option<RotationSpec> {
        Some(RotationSpec::Batch {
            target: RotationTarget::Token,
            tokens: balances
                .iter()
                .map(|(id, balance)| BatchTokenSpec {
                    id: id.to_string(),
                    balance: *balance,
                })
                .collect(),
            min_balance: 0.0,
        })
    }

    #[tokio::test]
    async fn rejected_token_is_isolated_until_no_sibling_is_left() {
        let now = Instant::now();
        let policy = HealthPolicy::default();
        let c = Arc::new(Client::from_spec(
            spec(tokens(&[("tok-a", 5.0), ("tok-b", 9.0)]), LimitSpec::Unlimited),
            Duration::from_secs(60),
            now,
        ));

        let adm = c.admit(false, now).await.expect("admit");
        assert_eq!(adm.rotated.as_deref(), Some("tok-b"));
        let auth = Outcome::failure(FailureKind::Auth);
        assert!(c.settle(&adm, &auth, &policy, now).await.is_none());

        let snap = c.snapshot(now).await;
        assert_eq!(snap.health.state, HealthState::Healthy);
        assert!(!snap.health.locked);
        let adm = c.admit(false, now).await.expect("sibling");
        assert_eq!(adm.rotated.as_deref(), Some("tok-a"));

        // 最后一个令牌也被拒绝：整个客户端下线并锁定。
        let t = c.settle(&adm, &auth, &policy, now).await;
        assert_eq!(t.map(|t| t.to), Some(HealthState::Unhealthy));
        assert!(c.snapshot(now).await.health.locked);
    }

    #[tokio::test]
    async fn rotated_quota_exhaustion_leaves_limiter_available() {
        let now = Instant::now();
        let policy = HealthPolicy::default();
        let c = Arc::new(Client::from_spec(
            spec(
                models(&[("A", 5), ("B", 5)]),
                LimitSpec::Quota {
                    limit: 100,
                    reset_interval_ms: None,
                },
            ),
            Duration::from_secs(60),
            now,
        ));
        let adm = c.admit(false, now).await.expect("admit");
        assert_eq!(adm.rotated.as_deref(), Some("A"));
        c.settle(&adm, &Outcome::failure(FailureKind::QuotaExhausted), &policy, now)
            .await;

        assert!(!c.snapshot(now).await.usage.exhausted);
        let adm = c.admit(false, now).await.expect("next model");
        assert_eq!(adm.rotated.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn probation_admission_requires_matching_flag() {
        let now = Instant::now();
        let c = Client::from_spec(spec(None, LimitSpec::Unlimited), Duration::from_secs(60), now);
        c.force_health(HealthState::Probation, now).await;
        assert!(c.admit(false, now).await.is_none());
        assert!(c.admit(true, now).await.is_some());
        assert!(c.admit(true, now).await.is_none());
    }

    #[test]
    fn token_rotation_replaces_credential() {
        let now = Instant::now();
        let c = Client::from_spec(
            spec(
                Some(RotationSpec::Batch {
                    target: RotationTarget::Token,
                    tokens: Vec::new(),
                    min_balance: 0.0,
                }),
                LimitSpec::Unlimited,
            ),
            Duration::from_secs(60),
            now,
        );
        assert_eq!(
            c.resolve_identity(Some("sk-rotated")),
            ("sk-rotated".to_string(), "glm-4".to_string())
        );
        assert_eq!(
            c.resolve_identity(None),
            ("base-key-123456".to_string(), "glm-4".to_string())
        );
    }
}
