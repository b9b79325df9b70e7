use crate::collab::{BalanceQuery, CapabilityProvider, EventSink, Prober};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::pool::client::{Admission, CandidateView, Client};
use crate::pool::group::ClientGroup;
use crate::pool::health::{HealthState, Transition};
use crate::pool::prober::{self, CycleReport};
use crate::pool::selector;
use crate::pool::snapshot::{LeaseAudit, LeaseSnapshot, PoolEvent, PoolSnapshot};
use crate::pool::types::{ClientId, FailureKind, Outcome, Requirements, Severity};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// 某一时刻的客户端与分组集合。热更新时整体替换（写时复制），
/// 正在遍历旧集合的 acquire 不受影响。
#[derive(Debug)]
pub(crate) struct Registry {
    pub(crate) clients: Vec<Arc<Client>>,
    pub(crate) groups: HashMap<String, Arc<ClientGroup>>,
}

impl Registry {
    /// 按配置构建注册表。`previous` 中配置未变的客户端与同名分组会被复用（保留运行时状态），
    /// 返回值中附带需要调整并发上限的已有分组。
    fn build(
        cfg: &PoolConfig,
        previous: Option<&Registry>,
        now: Instant,
    ) -> (Self, Vec<(Arc<ClientGroup>, usize)>) {
        let mut groups: HashMap<String, Arc<ClientGroup>> = HashMap::new();
        let mut resized = Vec::new();
        let names = cfg
            .groups
            .iter()
            .map(|g| g.name.trim())
            .chain(cfg.clients.iter().map(|c| c.group_name()));
        for name in names {
            if groups.contains_key(name) {
                continue;
            }
            let limit = cfg.group_limit(name);
            let group = match previous.and_then(|p| p.groups.get(name)) {
                Some(g) => {
                    resized.push((g.clone(), limit));
                    g.clone()
                }
                None => Arc::new(ClientGroup::new(name, limit)),
            };
            groups.insert(name.to_string(), group);
        }

        let clients = cfg
            .clients
            .iter()
            .map(|spec| {
                previous
                    .and_then(|p| p.clients.iter().find(|c| c.spec() == spec))
                    .cloned()
                    .unwrap_or_else(|| {
                        Arc::new(Client::from_spec(
                            spec.clone(),
                            cfg.balance_stale_after(),
                            now,
                        ))
                    })
            })
            .collect();

        (Self { clients, groups }, resized)
    }

    pub(crate) fn client(&self, id: &str) -> Option<&Arc<Client>> {
        self.clients.iter().find(|c| c.id() == id)
    }
}

#[derive(Debug)]
struct LeaseRecord {
    client_id: ClientId,
    group: Arc<ClientGroup>,
    probation: bool,
    acquired_at: Instant,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// acquire 成功后交给调用方的句柄；必须且只能通过 `release` 归还一次。
#[derive(Debug)]
#[must_use = "句柄必须通过 release 归还，否则分组槽位会泄漏"]
pub struct ClientHandle {
    pool: Uuid,
    lease_id: u64,
    client: Arc<Client>,
    group: Arc<ClientGroup>,
    admission: Admission,
    credential: String,
    model: String,
    acquired_at: Instant,
}

impl ClientHandle {
    pub fn lease_id(&self) -> u64 {
        self.lease_id
    }

    pub fn client_id(&self) -> &str {
        self.client.id()
    }

    pub fn provider(&self) -> &str {
        self.client.provider()
    }

    pub fn group(&self) -> &str {
        self.group.name()
    }

    /// 本次调用应使用的凭证（可能来自令牌轮换）。
    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// 本次调用应使用的模型（可能来自模型轮换）。
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn price(&self) -> f64 {
        self.client.price()
    }

    /// 该请求是 Probation 客户端的恢复确认请求。
    pub fn is_probation(&self) -> bool {
        self.admission.probation
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }
}

/// 客户端池管理器：集中维护所有客户端与分组，负责选择、结果回报、后台探测与管理操作。
pub struct ClientPoolManager {
    instance: Uuid,
    registry: ArcSwap<Registry>,
    config: ArcSwap<PoolConfig>,
    prober: Arc<dyn Prober>,
    balance_query: Option<Arc<dyn BalanceQuery>>,
    events: Option<Arc<dyn EventSink>>,
    leases: Mutex<HashMap<u64, LeaseRecord>>,
    next_lease: AtomicU64,
    acquired_total: AtomicU64,
    released_total: AtomicU64,
    closed: AtomicBool,
    /// 有句柄归还、状态恢复或配置变化时唤醒阻塞等待者。
    changed: Notify,
    token_polled_at: Mutex<Option<Instant>>,
    reload_lock: Mutex<()>,
    worker: Mutex<Option<Worker>>,
}

impl fmt::Debug for ClientPoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientPoolManager")
            .field("instance", &self.instance)
            .field("clients", &self.registry.load().clients.len())
            .field("acquired_total", &self.acquired_total.load(Ordering::Relaxed))
            .field("released_total", &self.released_total.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ClientPoolManager {
    pub fn new(config: PoolConfig, prober: Arc<dyn Prober>) -> Result<Self, PoolError> {
        config.validate()?;
        let (registry, _) = Registry::build(&config, None, Instant::now());
        tracing::info!(
            clients = registry.clients.len(),
            groups = registry.groups.len(),
            "客户端池已创建"
        );
        Ok(Self {
            instance: Uuid::new_v4(),
            registry: ArcSwap::from_pointee(registry),
            config: ArcSwap::from_pointee(config),
            prober,
            balance_query: None,
            events: None,
            leases: Mutex::new(HashMap::new()),
            next_lease: AtomicU64::new(1),
            acquired_total: AtomicU64::new(0),
            released_total: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            changed: Notify::new(),
            token_polled_at: Mutex::new(None),
            reload_lock: Mutex::new(()),
            worker: Mutex::new(None),
        })
    }

    pub fn with_balance_query(mut self, query: Arc<dyn BalanceQuery>) -> Self {
        self.balance_query = Some(query);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn config(&self) -> Arc<PoolConfig> {
        self.config.load_full()
    }

    pub(crate) fn registry(&self) -> Arc<Registry> {
        self.registry.load_full()
    }

    pub(crate) fn prober(&self) -> Arc<dyn Prober> {
        self.prober.clone()
    }

    pub(crate) fn balance_query(&self) -> Option<Arc<dyn BalanceQuery>> {
        self.balance_query.clone()
    }

    pub(crate) fn notify_changed(&self) {
        self.changed.notify_waiters();
    }

    pub(crate) fn emit(&self, event: PoolEvent) {
        if let Some(sink) = &self.events {
            sink.emit(&event);
        }
    }

    pub(crate) fn on_transition(&self, client_id: &str, t: Transition, reason: &str) {
        match t.to {
            HealthState::Unhealthy => tracing::warn!(
                client_id = %client_id,
                from = t.from.as_str(),
                reason,
                "客户端进入不健康状态"
            ),
            _ => tracing::info!(
                client_id = %client_id,
                from = t.from.as_str(),
                to = t.to.as_str(),
                reason,
                "客户端健康状态变化"
            ),
        }
        self.emit(PoolEvent::StatusChanged {
            client_id: client_id.to_string(),
            from: t.from,
            to: t.to,
            reason: reason.to_string(),
        });
    }

    /// 批量令牌余额是否到了轮询时间；到期时顺便记下本次轮询时间。
    pub(crate) async fn take_token_poll_slot(&self, now: Instant, interval: Duration) -> bool {
        let mut polled = self.token_polled_at.lock().await;
        let due = polled.is_none_or(|t| now.saturating_duration_since(t) >= interval);
        if due {
            *polled = Some(now);
        }
        due
    }

    /// 非阻塞获取：没有可用客户端时立即返回 `Unavailable`。
    pub async fn acquire(&self, requirements: &Requirements) -> Result<ClientHandle, PoolError> {
        match self.try_acquire_once(requirements).await? {
            Some(handle) => Ok(handle),
            None => Err(PoolError::unavailable(describe(requirements))),
        }
    }

    /// 阻塞获取：最多等待 `timeout`，期间每当有句柄归还或状态变化就重新选择一次。
    pub async fn acquire_timeout(
        &self,
        requirements: &Requirements,
        timeout: Duration,
    ) -> Result<ClientHandle, PoolError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(handle) = self.try_acquire_once(requirements).await? {
                return Ok(handle);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return match self.try_acquire_once(requirements).await? {
                    Some(handle) => Ok(handle),
                    None => Err(PoolError::unavailable(format!(
                        "等待 {}ms 后仍无可用客户端（{}）",
                        timeout.as_millis(),
                        describe(requirements)
                    ))),
                };
            }
        }
    }

    async fn try_acquire_once(
        &self,
        requirements: &Requirements,
    ) -> Result<Option<ClientHandle>, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::unavailable("客户端池已停止"));
        }

        let registry = self.registry.load_full();
        if let Some(target) = &requirements.target_client {
            if registry.client(target).is_none() {
                return Err(PoolError::unknown_client(target.clone()));
            }
        }
        if let Some(group) = &requirements.target_group {
            if !registry.groups.contains_key(group) {
                return Err(PoolError::UnknownGroup(group.clone()));
            }
        }

        let cfg = self.config.load_full();
        let now = Instant::now();
        let mut matched = 0usize;
        let mut candidates: Vec<CandidateView> = Vec::new();
        for client in &registry.clients {
            if !requirements.matches(client.id(), client.group(), client.capabilities()) {
                continue;
            }
            matched += 1;
            if let Some(view) = client.view(now).await {
                candidates.push(view);
            }
        }
        if candidates.is_empty() {
            tracing::debug!(matched, "没有满足条件且可用的客户端");
            return Ok(None);
        }

        selector::rank(&mut candidates, &cfg.selection);
        tracing::trace!(
            order = ?candidates.iter().map(|c| c.client.id().as_str()).collect::<Vec<_>>(),
            "候选排序"
        );

        for cand in candidates {
            let client = cand.client;
            let Some(group) = registry.groups.get(client.group()).cloned() else {
                tracing::warn!(client_id = %client.id(), group = client.group(), "客户端引用的分组不存在");
                continue;
            };

            let slot = if cand.probation {
                group.try_acquire_probation(client.id()).await
            } else {
                group.try_acquire().await
            };
            if !slot {
                tracing::debug!(client_id = %client.id(), group = group.name(), "分组并发已满，尝试下一个候选");
                continue;
            }

            let Some(admission) = client.admit(cand.probation, Instant::now()).await else {
                // 选择到占用之间客户端状态发生了变化：撤回已占的槽位。
                if cand.probation {
                    group.end_probation(client.id()).await;
                }
                group.release().await?;
                continue;
            };

            return Ok(Some(self.register_lease(client, group, admission).await));
        }

        tracing::debug!(matched, "候选客户端所在分组均已满");
        Ok(None)
    }

    async fn register_lease(
        &self,
        client: Arc<Client>,
        group: Arc<ClientGroup>,
        admission: Admission,
    ) -> ClientHandle {
        let lease_id = self.next_lease.fetch_add(1, Ordering::Relaxed);
        let acquired_at = Instant::now();
        let (credential, model) = client.resolve_identity(admission.rotated.as_deref());

        self.leases.lock().await.insert(
            lease_id,
            LeaseRecord {
                client_id: client.id().clone(),
                group: group.clone(),
                probation: admission.probation,
                acquired_at,
            },
        );
        self.acquired_total.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            client_id = %client.id(),
            group = group.name(),
            lease_id,
            probation = admission.probation,
            "已分配客户端"
        );
        self.emit(PoolEvent::Acquired {
            client_id: client.id().clone(),
            group: group.name().to_string(),
            lease_id,
            probation: admission.probation,
        });

        ClientHandle {
            pool: self.instance,
            lease_id,
            client,
            group,
            admission,
            credential,
            model,
            acquired_at,
        }
    }

    /// 归还句柄并回报调用结果。
    ///
    /// 句柄不属于本管理器或已归还过时返回 `UnknownHandle`，此时不修改任何状态。
    pub async fn release(&self, handle: ClientHandle, outcome: Outcome) -> Result<(), PoolError> {
        if handle.pool != self.instance {
            tracing::warn!(lease_id = handle.lease_id, "归还了不属于本连接池的句柄");
            return Err(PoolError::UnknownHandle(handle.lease_id));
        }
        let record = self.leases.lock().await.remove(&handle.lease_id);
        let Some(record) = record else {
            tracing::warn!(lease_id = handle.lease_id, "重复归还或未知的句柄");
            return Err(PoolError::UnknownHandle(handle.lease_id));
        };

        let cfg = self.config.load_full();
        let now = Instant::now();
        let client_id = handle.client.id().as_str();
        log_outcome(client_id, &outcome);

        let transition = handle
            .client
            .settle(&handle.admission, &outcome, &cfg.health, now)
            .await;
        if record.probation {
            record.group.end_probation(client_id).await;
        }
        let slot = record.group.release().await;
        self.released_total.fetch_add(1, Ordering::Relaxed);

        if let Some(t) = transition {
            let reason = outcome.failure.map(FailureKind::as_str).unwrap_or("success");
            self.on_transition(client_id, t, reason);
        }
        self.emit(PoolEvent::Released {
            client_id: record.client_id,
            group: record.group.name().to_string(),
            lease_id: handle.lease_id,
            failure: outcome.failure,
            cost: outcome.cost,
            held_ms: now.saturating_duration_since(record.acquired_at).as_millis() as u64,
        });
        self.changed.notify_waiters();
        slot
    }

    /// 调用在传输层成功、但内容校验失败（外部投诉）：按软故障归还。
    pub async fn complain(&self, handle: ClientHandle, cost: f64) -> Result<(), PoolError> {
        self.release(handle, Outcome::failure_with_cost(FailureKind::InvalidResponse, cost))
            .await
    }

    /// 获取、调用、归还的完整流程。调用方拿到的是协作方回报的结果，而不是选择层的错误。
    pub async fn dispatch(
        &self,
        requirements: &Requirements,
        provider: &dyn CapabilityProvider,
        timeout: Duration,
    ) -> Result<Outcome, PoolError> {
        let handle = self.acquire_timeout(requirements, timeout).await?;
        let outcome = provider
            .invoke(requirements, handle.credential(), handle.model())
            .await;
        self.release(handle, outcome).await?;
        Ok(outcome)
    }

    fn client(&self, id: &str) -> Result<Arc<Client>, PoolError> {
        self.registry
            .load()
            .client(id)
            .cloned()
            .ok_or_else(|| PoolError::unknown_client(id))
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let registry = self.registry.load_full();
        let now = Instant::now();
        let mut clients = Vec::with_capacity(registry.clients.len());
        for c in &registry.clients {
            clients.push(c.snapshot(now).await);
        }
        let mut groups = Vec::with_capacity(registry.groups.len());
        for g in registry.groups.values() {
            groups.push(g.snapshot().await);
        }
        groups.sort_by(|a, b| a.name.cmp(&b.name));

        let outstanding = self.leases.lock().await.len();
        PoolSnapshot::new(
            groups,
            clients,
            self.acquired_total.load(Ordering::Relaxed),
            self.released_total.load(Ordering::Relaxed),
            outstanding,
        )
    }

    /// 人工强制健康状态。强制 Unhealthy 后不会被后台探测自动恢复。
    pub async fn force_health(&self, client_id: &str, state: HealthState) -> Result<(), PoolError> {
        let client = self.client(client_id)?;
        if let Some(t) = client.force_health(state, Instant::now()).await {
            self.on_transition(client_id, t, "manual");
        }
        self.changed.notify_waiters();
        Ok(())
    }

    pub async fn reset_usage(&self, client_id: &str) -> Result<(), PoolError> {
        let client = self.client(client_id)?;
        client.reset_usage(Instant::now()).await;
        tracing::info!(client_id, "已重置客户端用量");
        self.changed.notify_waiters();
        Ok(())
    }

    /// 重置全部客户端的用量计数（每日重置等外部事件）。
    pub async fn reset_all_usage(&self) {
        let registry = self.registry.load_full();
        let now = Instant::now();
        for c in &registry.clients {
            c.reset_usage(now).await;
        }
        tracing::info!(clients = registry.clients.len(), "已重置全部客户端用量");
        self.changed.notify_waiters();
    }

    pub async fn update_balance(&self, client_id: &str, balance: f64) -> Result<(), PoolError> {
        let client = self.client(client_id)?;
        client.apply_balance(balance, Instant::now()).await;
        self.changed.notify_waiters();
        Ok(())
    }

    pub async fn update_token_balance(
        &self,
        client_id: &str,
        token: &str,
        balance: f64,
    ) -> Result<(), PoolError> {
        let client = self.client(client_id)?;
        client.update_token_balance(token, balance).await?;
        self.changed.notify_waiters();
        Ok(())
    }

    /// 立即对单个客户端执行一次探测；返回探测是否可达。
    ///
    /// 与后台探测一致，不健康的客户端无论结果如何都会进入 Probation；
    /// 探测协作方本身报错时以 `Collaborator` 返回。
    pub async fn trigger_probe(&self, client_id: &str) -> Result<bool, PoolError> {
        let client = self.client(client_id)?;
        let result = prober::probe_client(self.prober.as_ref(), &client).await;
        let reachable = matches!(result, Ok(true));
        if let Some(t) = client.finish_probe(reachable, Instant::now()).await {
            self.on_transition(client_id, t, "manual_probe");
        }
        self.emit(PoolEvent::Probed {
            client_id: client_id.to_string(),
            reachable,
            manual: true,
        });
        self.changed.notify_waiters();
        result
    }

    /// 执行一轮后台维护（定时重置、探测、余额轮询）。后台任务按 `probe_interval` 调用它。
    pub async fn run_probe_cycle(&self) -> CycleReport {
        prober::run_cycle(self).await
    }

    /// 热更新配置。配置未变的客户端保留运行时状态；已移除客户端上未归还的句柄仍可正常归还。
    pub async fn reload(&self, config: PoolConfig) -> Result<(), PoolError> {
        config.validate()?;
        let _guard = self.reload_lock.lock().await;

        let previous = self.registry.load_full();
        let (registry, resized) = Registry::build(&config, Some(&previous), Instant::now());
        for (group, limit) in resized {
            group.set_max_concurrent(limit).await;
        }
        let stale_after = config.balance_stale_after();
        let mut kept = 0;
        for c in &registry.clients {
            if previous.clients.iter().any(|p| Arc::ptr_eq(p, c)) {
                c.set_stale_after(stale_after).await;
                kept += 1;
            }
        }
        tracing::info!(
            clients = registry.clients.len(),
            groups = registry.groups.len(),
            kept,
            "客户端池配置已重新加载"
        );

        self.registry.store(Arc::new(registry));
        self.config.store(Arc::new(config));
        self.changed.notify_waiters();
        Ok(())
    }

    /// 句柄存活审计：比较未归还句柄、累计计数器与各分组的占用数。
    pub async fn audit(&self) -> LeaseAudit {
        let now = Instant::now();
        let leases = self.leases.lock().await;
        let acquired_total = self.acquired_total.load(Ordering::Relaxed);
        let released_total = self.released_total.load(Ordering::Relaxed);

        let mut per_group: HashMap<usize, (Arc<ClientGroup>, usize)> = HashMap::new();
        for g in self.registry.load().groups.values() {
            per_group.insert(Arc::as_ptr(g) as usize, (g.clone(), 0));
        }
        let mut snapshots = Vec::with_capacity(leases.len());
        for (id, rec) in leases.iter() {
            per_group
                .entry(Arc::as_ptr(&rec.group) as usize)
                .or_insert_with(|| (rec.group.clone(), 0))
                .1 += 1;
            snapshots.push(LeaseSnapshot {
                lease_id: *id,
                client_id: rec.client_id.clone(),
                group: rec.group.name().to_string(),
                probation: rec.probation,
                held_secs: now.saturating_duration_since(rec.acquired_at).as_secs_f64(),
            });
        }
        snapshots.sort_by_key(|l| l.lease_id);

        let mut slots_consistent = true;
        for (group, leased) in per_group.values() {
            if group.active_count().await != *leased {
                slots_consistent = false;
            }
        }
        let outstanding = leases.len();
        LeaseAudit {
            acquired_total,
            released_total,
            outstanding,
            counters_consistent: acquired_total.saturating_sub(released_total) == outstanding as u64,
            slots_consistent,
            leases: snapshots,
        }
    }

    /// 启动后台探测任务。重复启动返回 `AlreadyRunning`。
    pub async fn start(self: &Arc<Self>) -> Result<(), PoolError> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(PoolError::AlreadyRunning);
        }
        self.closed.store(false, Ordering::Release);
        let (tx, rx) = watch::channel(false);
        let handle = prober::spawn_probe_task(Arc::downgrade(self), rx);
        *worker = Some(Worker {
            shutdown: tx,
            handle,
        });
        tracing::info!("客户端池已启动");
        Ok(())
    }

    /// 停止后台任务，拒绝新的获取，并在 `drain_timeout` 内等待在途句柄归还。
    pub async fn stop(&self) -> Result<(), PoolError> {
        self.closed.store(true, Ordering::Release);
        let worker = self.worker.lock().await.take();
        if let Some(w) = worker {
            let _ = w.shutdown.send(true);
            if let Err(e) = w.handle.await {
                tracing::warn!("后台探测任务异常退出：{e}");
            }
        }

        let deadline = Instant::now() + self.config.load().drain_timeout();
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.leases.lock().await.is_empty() {
                tracing::info!("客户端池已停止");
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let outstanding = self.leases.lock().await.len();
                if outstanding == 0 {
                    return Ok(());
                }
                tracing::warn!(outstanding, "停止时仍有未归还的句柄");
                return Err(PoolError::OutstandingHandles(outstanding));
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }
}

fn describe(requirements: &Requirements) -> String {
    let mut parts = Vec::new();
    if !requirements.capabilities.is_empty() {
        let caps: Vec<&str> = requirements.capabilities.iter().map(String::as_str).collect();
        parts.push(format!("能力 {}", caps.join(",")));
    }
    if let Some(g) = &requirements.target_group {
        parts.push(format!("分组 {g}"));
    }
    if let Some(c) = &requirements.target_client {
        parts.push(format!("客户端 {c}"));
    }
    if !requirements.exclude.is_empty() {
        parts.push(format!("排除 {} 个", requirements.exclude.len()));
    }
    if parts.is_empty() {
        "无筛选条件".to_string()
    } else {
        parts.join("；")
    }
}

fn log_outcome(client_id: &str, outcome: &Outcome) {
    let Some(kind) = outcome.failure else {
        return;
    };
    match kind.severity() {
        Severity::Hard => tracing::warn!(client_id, kind = kind.as_str(), "客户端鉴权失败"),
        Severity::Soft => tracing::info!(client_id, kind = kind.as_str(), "客户端调用失败"),
        Severity::Quota => tracing::info!(client_id, "客户端额度已耗尽"),
        Severity::Neutral => tracing::debug!(client_id, kind = kind.as_str(), "请求失败（与客户端无关）"),
    }
}
