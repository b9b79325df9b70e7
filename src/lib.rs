//! 多厂商 AI 客户端池：按价格选择客户端，跟踪健康、额度与并发，并在后台探测恢复。
//!
//! 入口是 [`pool::ClientPoolManager`]；厂商调用、余额查询与探测通过 [`collab`] 中的 trait 注入。

pub mod collab;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use pool::{ClientHandle, ClientPoolManager, Outcome, Requirements};
