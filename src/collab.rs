//! 核心之外的协作方接口：能力调用、余额查询、连通性探测、事件输出。
//!
//! 具体实现（各厂商 HTTP 调用等）不在本 crate 内。

use crate::pool::types::{Outcome, Requirements};
use crate::pool::PoolEvent;
use async_trait::async_trait;

/// 厂商能力调用。由调用方在 acquire 之后执行，核心只接收回报的结果。
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn invoke(&self, requirements: &Requirements, credential: &str, model: &str) -> Outcome;
}

/// 余额查询（余额模式的客户端及批量令牌定期轮询）。
#[async_trait]
pub trait BalanceQuery: Send + Sync {
    async fn query_balance(&self, credential: &str) -> anyhow::Result<f64>;
}

/// 对不健康客户端发起的合成探测。
#[async_trait]
pub trait Prober: Send + Sync {
    /// Ok(true) 表示可达；Ok(false) 或 Err 均视为不可达。
    async fn probe(&self, credential: &str, model: &str) -> anyhow::Result<bool>;
}

/// 状态事件输出（例如持久化到外部状态日志）。调用时不持有任何池内锁。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PoolEvent);
}

/// 不做任何探测、总是返回可达的探测器。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProber;

#[async_trait]
impl Prober for NoopProber {
    async fn probe(&self, _credential: &str, _model: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}
