//! 后台维护任务：周期性执行定时配额重置、不健康客户端探测与余额轮询。
//!
//! 每轮先在各客户端锁内收集到期项，再在锁外调用协作方。

use crate::collab::{BalanceQuery, Prober};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::logging::mask_secret;
use crate::pool::client::Client;
use crate::pool::manager::{ClientPoolManager, Registry};
use crate::pool::snapshot::PoolEvent;
use futures::StreamExt;
use futures::stream;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// 一轮维护的统计结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub resets: usize,
    pub probed: usize,
    pub reachable: usize,
    pub balances_polled: usize,
    pub balance_failures: usize,
    pub tokens_polled: usize,
}

/// 启动后台维护任务。
///
/// 任务只持有管理器的弱引用；管理器被释放或收到停止信号后退出。
pub(crate) fn spawn_probe_task(
    manager: Weak<ClientPoolManager>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let interval = {
                let Some(m) = manager.upgrade() else {
                    break;
                };
                let report = m.run_probe_cycle().await;
                if report != CycleReport::default() {
                    tracing::debug!(?report, "后台维护完成");
                }
                m.config().probe_interval()
            };

            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!("后台探测任务已退出");
    })
}

pub(crate) async fn run_cycle(m: &ClientPoolManager) -> CycleReport {
    let registry = m.registry();
    let cfg = m.config();
    let mut report = CycleReport::default();
    let now = Instant::now();

    for c in &registry.clients {
        if c.reset_usage_if_due(now).await {
            report.resets += 1;
            tracing::info!(client_id = %c.id(), "定时重置客户端用量");
        }
    }

    let mut due = Vec::new();
    for c in &registry.clients {
        if c.probe_due(now).await {
            due.push(c.clone());
        }
    }
    if !due.is_empty() {
        tracing::info!("发现 {} 个待探测客户端", due.len());
        let prober = m.prober();
        let results: Vec<(Arc<Client>, bool)> = stream::iter(due)
            .map(|c| {
                let prober = prober.clone();
                async move {
                    let reachable = probe_client(prober.as_ref(), &c).await.unwrap_or(false);
                    (c, reachable)
                }
            })
            .buffer_unordered(cfg.max_concurrent_probes.max(1))
            .collect()
            .await;

        for (c, reachable) in results {
            report.probed += 1;
            if reachable {
                report.reachable += 1;
            }
            let reason = if reachable { "probe_ok" } else { "probe_failed" };
            if let Some(t) = c.finish_probe(reachable, Instant::now()).await {
                m.on_transition(c.id(), t, reason);
            }
            m.emit(PoolEvent::Probed {
                client_id: c.id().clone(),
                reachable,
                manual: false,
            });
        }
    }

    if let Some(query) = m.balance_query() {
        poll_balances(m, &registry, query.as_ref(), &cfg, &mut report).await;
    }

    if report != CycleReport::default() {
        m.notify_changed();
    }
    report
}

/// 用客户端当前身份调用探测协作方。协作方报错时返回 `Collaborator`，调用方按不可达处理。
pub(crate) async fn probe_client(prober: &dyn Prober, client: &Client) -> Result<bool, PoolError> {
    let (credential, model) = client.probe_identity().await;
    match prober.probe(&credential, &model).await {
        Ok(reachable) => {
            tracing::info!(client_id = %client.id(), reachable, "探测完成");
            Ok(reachable)
        }
        Err(e) => {
            tracing::warn!(client_id = %client.id(), "探测失败：{e:#}");
            Err(PoolError::collaborator(format!("{}: {e:#}", client.id())))
        }
    }
}

async fn poll_balances(
    m: &ClientPoolManager,
    registry: &Registry,
    query: &dyn BalanceQuery,
    cfg: &PoolConfig,
    report: &mut CycleReport,
) {
    let interval = cfg.balance_poll_interval();
    let now = Instant::now();

    for c in &registry.clients {
        if !c.balance_poll_due(now, interval).await {
            continue;
        }
        report.balances_polled += 1;
        let (credential, _) = c.resolve_identity(None);
        match query.query_balance(&credential).await {
            Ok(balance) => {
                tracing::debug!(client_id = %c.id(), balance, "余额已刷新");
                c.apply_balance(balance, Instant::now()).await;
            }
            Err(e) => {
                report.balance_failures += 1;
                tracing::warn!(client_id = %c.id(), "查询余额失败，保留旧值：{e:#}");
                c.record_balance_failure(Instant::now()).await;
            }
        }
    }

    if !m.take_token_poll_slot(now, interval).await {
        return;
    }
    for c in &registry.clients {
        for token in c.balance_tokens().await {
            match query.query_balance(&token).await {
                Ok(balance) => {
                    if c.update_token_balance(&token, balance).await.is_ok() {
                        report.tokens_polled += 1;
                    }
                }
                Err(e) => {
                    report.balance_failures += 1;
                    tracing::warn!(
                        client_id = %c.id(),
                        token = %mask_secret(&token),
                        "查询令牌余额失败：{e:#}"
                    );
                }
            }
        }
    }
}
