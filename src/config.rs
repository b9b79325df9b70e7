use crate::error::PoolError;
use crate::pool::health::HealthPolicy;
use crate::pool::types::{ClientSpec, LimitSpec, RotationSpec};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "CLIENT_POOL_";
const DEFAULT_PROBE_INTERVAL_MS: u64 = 60_000;
const DEFAULT_BALANCE_POLL_INTERVAL_MS: u64 = 10 * 60 * 1000;
const DEFAULT_BALANCE_STALE_AFTER_MS: u64 = 30 * 60 * 1000;
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_CONCURRENT_PROBES: usize = 3;
const DEFAULT_GROUP_CONCURRENCY: usize = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// 日志等级：off/low/medium/high。
    pub debug: String,
    pub probe_interval_ms: u64,
    pub balance_poll_interval_ms: u64,
    pub balance_stale_after_ms: u64,
    pub drain_timeout_ms: u64,
    pub max_concurrent_probes: usize,
    /// 客户端引用了未声明的分组时，该分组的并发上限。
    pub default_group_concurrency: usize,
    pub health: HealthPolicy,
    pub selection: SelectionPolicy,
    pub groups: Vec<GroupConfig>,
    pub clients: Vec<ClientSpec>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            debug: "low".to_string(),
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
            balance_poll_interval_ms: DEFAULT_BALANCE_POLL_INTERVAL_MS,
            balance_stale_after_ms: DEFAULT_BALANCE_STALE_AFTER_MS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
            default_group_concurrency: DEFAULT_GROUP_CONCURRENCY,
            health: HealthPolicy::default(),
            selection: SelectionPolicy::default(),
            groups: Vec::new(),
            clients: Vec::new(),
        }
    }
}

/// 同价候选之间的排序规则。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    /// true：先按最久未使用，再按失败次数（更看重分摊负载）。
    pub fairness_first: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub max_concurrent: usize,
}

impl PoolConfig {
    /// 默认值 ← TOML 文件（可选）← `CLIENT_POOL_*` 环境变量（`__` 表示嵌套）。
    pub fn load(path: Option<&Path>) -> Result<Self, PoolError> {
        let mut figment = Figment::from(Serialized::defaults(PoolConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let cfg: PoolConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| PoolError::config(format!("解析配置失败: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, PoolError> {
        let cfg: PoolConfig = Figment::from(Serialized::defaults(PoolConfig::default()))
            .merge(Toml::string(s))
            .extract()
            .map_err(|e| PoolError::config(format!("解析配置失败: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.probe_interval_ms == 0 {
            return Err(PoolError::config("probe_interval_ms 必须大于 0"));
        }
        if self.max_concurrent_probes == 0 {
            return Err(PoolError::config("max_concurrent_probes 必须大于 0"));
        }
        if self.default_group_concurrency == 0 {
            return Err(PoolError::config("default_group_concurrency 必须大于 0"));
        }
        if self.health.base_delay_ms > self.health.max_delay_ms {
            return Err(PoolError::config("health.base_delay_ms 不能大于 max_delay_ms"));
        }

        let mut group_names = HashSet::new();
        for g in &self.groups {
            if g.name.trim().is_empty() {
                return Err(PoolError::config("分组名不能为空"));
            }
            if g.max_concurrent == 0 {
                return Err(PoolError::config(format!(
                    "分组 {} 的 max_concurrent 必须大于 0",
                    g.name
                )));
            }
            if !group_names.insert(g.name.trim()) {
                return Err(PoolError::config(format!("分组名重复: {}", g.name)));
            }
        }

        let mut ids = HashSet::new();
        for c in &self.clients {
            validate_client(c)?;
            if !ids.insert(c.id.trim()) {
                return Err(PoolError::config(format!("客户端 id 重复: {}", c.id)));
            }
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn balance_poll_interval(&self) -> Duration {
        Duration::from_millis(self.balance_poll_interval_ms)
    }

    pub fn balance_stale_after(&self) -> Duration {
        Duration::from_millis(self.balance_stale_after_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn group_limit(&self, name: &str) -> usize {
        self.groups
            .iter()
            .find(|g| g.name.trim() == name)
            .map(|g| g.max_concurrent)
            .unwrap_or(self.default_group_concurrency)
    }
}

fn validate_client(c: &ClientSpec) -> Result<(), PoolError> {
    if c.id.trim().is_empty() {
        return Err(PoolError::config("客户端 id 不能为空"));
    }
    if c.group_name().is_empty() {
        return Err(PoolError::config(format!(
            "客户端 {} 缺少 provider/group",
            c.id
        )));
    }
    if !c.price.is_finite() || c.price < 0.0 {
        return Err(PoolError::config(format!("客户端 {} 的价格无效", c.id)));
    }
    if let LimitSpec::Quota { limit: 0, .. } = c.limit {
        return Err(PoolError::config(format!("客户端 {} 的配额上限必须大于 0", c.id)));
    }
    match &c.rotation {
        Some(RotationSpec::Counting { candidates, .. }) if candidates.is_empty() => Err(
            PoolError::config(format!("客户端 {} 的轮换候选不能为空", c.id)),
        ),
        Some(RotationSpec::Batch { tokens, .. }) if tokens.is_empty() => Err(PoolError::config(
            format!("客户端 {} 的令牌批次不能为空", c.id),
        )),
        _ => Ok(()),
    }
}
