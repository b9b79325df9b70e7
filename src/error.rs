use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("配置错误: {0}")]
    Config(String),

    /// 没有任何候选客户端可用（池耗尽或等待超时）。
    #[error("无可用客户端: {0}")]
    Unavailable(String),

    #[error("未知客户端: {0}")]
    UnknownClient(String),

    #[error("未知分组: {0}")]
    UnknownGroup(String),

    /// 句柄不属于本管理器，或已经被释放过。
    #[error("无效的句柄释放: lease={0}")]
    UnknownHandle(u64),

    /// 分组计数器在没有占用的情况下被释放。
    #[error("分组 {0} 释放次数多于占用次数")]
    SlotUnderflow(String),

    #[error("关闭时仍有 {0} 个句柄未释放")]
    OutstandingHandles(usize),

    #[error("后台探测任务已在运行")]
    AlreadyRunning,

    #[error("外部协作方调用失败: {0}")]
    Collaborator(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl PoolError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn unknown_client(id: impl Into<String>) -> Self {
        Self::UnknownClient(id.into())
    }

    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::Collaborator(message.into())
    }

    /// 调用方是否违反了 acquire/release 的配对约定。
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::UnknownHandle(_) | Self::SlotUnderflow(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violations_are_distinguished_from_unavailability() {
        assert!(PoolError::UnknownHandle(7).is_contract_violation());
        assert!(PoolError::SlotUnderflow("openai".to_string()).is_contract_violation());
        assert!(!PoolError::unavailable("empty").is_contract_violation());
        assert!(!PoolError::config("bad").is_contract_violation());
    }
}
