//! 客户端池（Client Pool）模块。
//!
//! 在多个厂商、多组凭证/模型之间为每次请求挑选最便宜且可用的客户端，
//! 同时跟踪健康状态、用量额度与分组并发，并在后台探测恢复不健康的客户端。

mod client;
pub mod group;
pub mod health;
pub mod limiter;
mod manager;
mod prober;
pub mod rotation;
mod selector;
mod snapshot;
pub mod types;

pub use client::{ClientSnapshot, StatsSnapshot};
pub use group::{ClientGroup, GroupSnapshot};
pub use health::{HealthPolicy, HealthSnapshot, HealthState};
pub use limiter::{LimiterSnapshot, UsageLimiter};
pub use manager::{ClientHandle, ClientPoolManager};
pub use prober::CycleReport;
pub use rotation::{CandidateSnapshot, RotationPolicy, RotationSnapshot};
pub use snapshot::{LeaseAudit, LeaseSnapshot, PoolEvent, PoolSnapshot, PoolSummary};
pub use types::{
    BatchTokenSpec, ClientId, ClientSpec, CountingCandidateSpec, FailureKind, LimitSpec, Outcome,
    Requirements, RotationSpec, RotationTarget, Severity,
};
