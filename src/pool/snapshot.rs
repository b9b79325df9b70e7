//! 只读视图：管理端快照、句柄审计、状态事件。

use crate::error::PoolError;
use crate::pool::client::ClientSnapshot;
use crate::pool::group::GroupSnapshot;
use crate::pool::health::HealthState;
use crate::pool::types::FailureKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;

/// 交给 EventSink 的状态事件。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    StatusChanged {
        client_id: String,
        from: HealthState,
        to: HealthState,
        reason: String,
    },
    Acquired {
        client_id: String,
        group: String,
        lease_id: u64,
        probation: bool,
    },
    Released {
        client_id: String,
        group: String,
        lease_id: u64,
        failure: Option<FailureKind>,
        cost: f64,
        held_ms: u64,
    },
    Probed {
        client_id: String,
        reachable: bool,
        manual: bool,
    },
}

impl PoolEvent {
    pub fn client_id(&self) -> &str {
        match self {
            Self::StatusChanged { client_id, .. }
            | Self::Acquired { client_id, .. }
            | Self::Released { client_id, .. }
            | Self::Probed { client_id, .. } => client_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    pub clients_total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub probation: usize,
    pub selectable: usize,
    pub acquired_total: u64,
    pub released_total: u64,
    pub outstanding: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub taken_at: DateTime<Utc>,
    pub summary: PoolSummary,
    pub groups: Vec<GroupSnapshot>,
    pub clients: Vec<ClientSnapshot>,
}

impl PoolSnapshot {
    pub fn new(
        groups: Vec<GroupSnapshot>,
        clients: Vec<ClientSnapshot>,
        acquired_total: u64,
        released_total: u64,
        outstanding: usize,
    ) -> Self {
        let count = |s: HealthState| clients.iter().filter(|c| c.health.state == s).count();
        let summary = PoolSummary {
            clients_total: clients.len(),
            healthy: count(HealthState::Healthy),
            unhealthy: count(HealthState::Unhealthy),
            probation: count(HealthState::Probation),
            selectable: clients.iter().filter(|c| c.selectable).count(),
            acquired_total,
            released_total,
            outstanding,
        };
        Self {
            taken_at: Utc::now(),
            summary,
            groups,
            clients,
        }
    }

    pub fn client(&self, id: &str) -> Option<&ClientSnapshot> {
        self.clients.iter().find(|c| c.id == id)
    }

    pub fn to_json(&self) -> Result<String, PoolError> {
        sonic_rs::to_string(self).map_err(|e| PoolError::Anyhow(anyhow::anyhow!("序列化快照失败: {e}")))
    }

    /// 纯文本看板：每个客户端一行。
    pub fn format_report(&self) -> String {
        let mut out = String::new();
        let s = &self.summary;
        let _ = writeln!(
            out,
            "[{}] 客户端 {} 个：健康 {}，不健康 {}，观察期 {}，可选 {}；未归还句柄 {}",
            self.taken_at.format("%Y-%m-%d %H:%M:%S"),
            s.clients_total,
            s.healthy,
            s.unhealthy,
            s.probation,
            s.selectable,
            s.outstanding,
        );
        for g in &self.groups {
            let _ = writeln!(
                out,
                "  分组 {:<16} 并发 {}/{}{}",
                g.name,
                g.active,
                g.max_concurrent,
                g.probation_client
                    .as_deref()
                    .map(|c| format!("（观察中: {c}）"))
                    .unwrap_or_default(),
            );
        }
        for c in &self.clients {
            let usage = match (c.usage.used, c.usage.limit, c.usage.balance) {
                (Some(used), Some(limit), _) => format!("{used}/{limit}"),
                (_, _, Some(balance)) if c.usage.stale => format!("余额 {balance:.2}（过期）"),
                (_, _, Some(balance)) => format!("余额 {balance:.2}"),
                _ => "不限".to_string(),
            };
            let _ = writeln!(
                out,
                "  {:<24} {:<10} {:<9} 价格 {:<6} 用量 {:<16} 调用 {:<6} 失败 {}/{} ({:.1}%)",
                c.id,
                c.group,
                c.health.state.as_str(),
                c.price,
                usage,
                c.stats.acquire_count,
                c.stats.error_count,
                c.stats.error_sum,
                c.stats.error_rate_percent,
            );
        }
        out
    }
}

/// 句柄存活审计：未归还的句柄与计数器、分组占用是否一致。
#[derive(Debug, Clone, Serialize)]
pub struct LeaseAudit {
    pub acquired_total: u64,
    pub released_total: u64,
    pub outstanding: usize,
    /// acquired_total - released_total == outstanding
    pub counters_consistent: bool,
    /// 每个分组的占用数等于挂在该分组上的未归还句柄数。
    pub slots_consistent: bool,
    pub leases: Vec<LeaseSnapshot>,
}

impl LeaseAudit {
    pub fn is_consistent(&self) -> bool {
        self.counters_consistent && self.slots_consistent
    }

    /// 持有时间最长的句柄（秒）。
    pub fn oldest_held_secs(&self) -> Option<f64> {
        self.leases.iter().map(|l| l.held_secs).reduce(f64::max)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaseSnapshot {
    pub lease_id: u64,
    pub client_id: String,
    pub group: String,
    pub probation: bool,
    pub held_secs: f64,
}
