use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

pub type ClientId = String;

/// 一次调用失败的分类，决定健康状态与用量如何变化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 凭证无效/被封禁：立即不健康，且需要人工重置。
    Auth,
    RateLimited,
    ServiceUnavailable,
    Network,
    /// 调用成功但内容校验失败（外部投诉）。
    InvalidResponse,
    /// 配额/余额耗尽：不算健康故障，只影响可用性。
    QuotaExhausted,
    /// 请求本身有问题（例如 400），与客户端无关。
    InvalidRequest,
    Other,
}

/// 失败对健康状态机的影响程度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Hard,
    Soft,
    Quota,
    Neutral,
}

impl FailureKind {
    pub fn severity(self) -> Severity {
        match self {
            Self::Auth => Severity::Hard,
            Self::RateLimited
            | Self::ServiceUnavailable
            | Self::Network
            | Self::InvalidResponse
            | Self::Other => Severity::Soft,
            Self::QuotaExhausted => Severity::Quota,
            Self::InvalidRequest => Severity::Neutral,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Network => "network",
            Self::InvalidResponse => "invalid_response",
            Self::QuotaExhausted => "quota_exhausted",
            Self::InvalidRequest => "invalid_request",
            Self::Other => "other",
        }
    }
}

/// 调用方通过 release 回报的一次调用结果。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// 本次调用产生的费用（余额模式下从余额中扣除）。
    pub cost: f64,
    pub failure: Option<FailureKind>,
}

impl Outcome {
    pub fn success(cost: f64) -> Self {
        Self {
            cost: sanitize_cost(cost),
            failure: None,
        }
    }

    pub fn failure(kind: FailureKind) -> Self {
        Self {
            cost: 0.0,
            failure: Some(kind),
        }
    }

    pub fn failure_with_cost(kind: FailureKind, cost: f64) -> Self {
        Self {
            cost: sanitize_cost(cost),
            failure: Some(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

fn sanitize_cost(cost: f64) -> f64 {
    if cost.is_finite() { cost.max(0.0) } else { 0.0 }
}

/// 一次 acquire 的筛选条件。
#[derive(Debug, Clone, Default)]
pub struct Requirements {
    /// 客户端必须同时具备的能力标签。
    pub capabilities: BTreeSet<String>,
    pub target_group: Option<String>,
    /// 只接受指定客户端（优先级最高的过滤条件）。
    pub target_client: Option<ClientId>,
    /// 排除的客户端，用于“换一个”的场景。
    pub exclude: HashSet<ClientId>,
}

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.target_group = Some(group.into());
        self
    }

    pub fn only_client(mut self, id: impl Into<String>) -> Self {
        self.target_client = Some(id.into());
        self
    }

    pub fn excluding(mut self, id: impl Into<String>) -> Self {
        self.exclude.insert(id.into());
        self
    }

    pub fn matches(&self, id: &str, group: &str, capabilities: &BTreeSet<String>) -> bool {
        if let Some(target) = &self.target_client {
            if target != id {
                return false;
            }
        }
        if let Some(target) = &self.target_group {
            if target != group {
                return false;
            }
        }
        if self.exclude.contains(id) {
            return false;
        }
        self.capabilities.is_subset(capabilities)
    }
}

/// 单个客户端的静态描述（来自配置）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSpec {
    pub id: ClientId,
    pub provider: String,
    pub credential: String,
    pub model: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// 为空时使用 provider 作为分组名。
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub limit: LimitSpec,
    #[serde(default)]
    pub rotation: Option<RotationSpec>,
}

impl ClientSpec {
    pub fn group_name(&self) -> &str {
        let g = self.group.trim();
        if g.is_empty() { self.provider.trim() } else { g }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LimitSpec {
    #[default]
    Unlimited,
    Quota {
        limit: u64,
        /// 计数器的定时重置周期（例如每日免费额度）。
        #[serde(default)]
        reset_interval_ms: Option<u64>,
    },
    Balance {
        #[serde(default)]
        initial_balance: f64,
        #[serde(default)]
        min_threshold: f64,
    },
}

/// 轮换出的标识替换的是凭证还是模型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationTarget {
    #[default]
    Token,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RotationSpec {
    Counting {
        #[serde(default)]
        target: RotationTarget,
        candidates: Vec<CountingCandidateSpec>,
        /// 全部用完后是否从头开始（否则等待重置）。
        #[serde(default)]
        recycle: bool,
    },
    Batch {
        #[serde(default)]
        target: RotationTarget,
        tokens: Vec<BatchTokenSpec>,
        #[serde(default)]
        min_balance: f64,
    },
}

impl RotationSpec {
    pub fn target(&self) -> RotationTarget {
        match self {
            Self::Counting { target, .. } | Self::Batch { target, .. } => *target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountingCandidateSpec {
    pub id: String,
    /// 每个候选的使用上限；None 表示不限。
    #[serde(default)]
    pub cap: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTokenSpec {
    pub id: String,
    #[serde(default)]
    pub balance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_separates_hard_soft_and_non_health_failures() {
        assert_eq!(FailureKind::Auth.severity(), Severity::Hard);
        assert_eq!(FailureKind::RateLimited.severity(), Severity::Soft);
        assert_eq!(FailureKind::ServiceUnavailable.severity(), Severity::Soft);
        assert_eq!(FailureKind::QuotaExhausted.severity(), Severity::Quota);
        assert_eq!(FailureKind::InvalidRequest.severity(), Severity::Neutral);
    }

    #[test]
    fn requirements_filter_by_target_group_exclusion_and_capabilities() {
        let caps: BTreeSet<String> = ["chat", "vision"].iter().map(|s| s.to_string()).collect();

        assert!(Requirements::new().require("chat").matches("a", "g", &caps));
        assert!(!Requirements::new().require("audio").matches("a", "g", &caps));
        assert!(!Requirements::new().only_client("b").matches("a", "g", &caps));
        assert!(!Requirements::new().in_group("other").matches("a", "g", &caps));
        assert!(!Requirements::new().excluding("a").matches("a", "g", &caps));
    }

    #[test]
    fn outcome_cost_is_never_negative() {
        assert_eq!(Outcome::success(-3.0).cost, 0.0);
        assert_eq!(Outcome::success(f64::NAN).cost, 0.0);
        assert!(Outcome::success(1.5).is_success());
        assert!(!Outcome::failure(FailureKind::Auth).is_success());
    }

    #[test]
    fn group_name_falls_back_to_provider() {
        let spec = ClientSpec {
            id: "a".to_string(),
            provider: "openai".to_string(),
            credential: "sk".to_string(),
            model: "gpt".to_string(),
            price: 1.0,
            capabilities: BTreeSet::new(),
            group: "  ".to_string(),
            limit: LimitSpec::Unlimited,
            rotation: None,
        };
        assert_eq!(spec.group_name(), "openai");
    }
}
