//! 并发分组：同一厂商下所有客户端共享的执行槽位。

use crate::error::PoolError;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

#[derive(Debug)]
pub struct ClientGroup {
    name: String,
    state: Mutex<GroupState>,
    released: Notify,
}

#[derive(Debug)]
struct GroupState {
    max_concurrent: usize,
    /// 始终满足 active <= max_concurrent（缩容时除外，见 set_max_concurrent）。
    active: usize,
    /// 正在以 Probation 身份服务真实请求的客户端（每组至多一个）。
    probation_client: Option<String>,
}

impl ClientGroup {
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(GroupState {
                max_concurrent: max_concurrent.max(1),
                active: 0,
                probation_client: None,
            }),
            released: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn try_acquire(&self) -> bool {
        let mut st = self.state.lock().await;
        if st.active >= st.max_concurrent {
            return false;
        }
        st.active += 1;
        true
    }

    /// 为 Probation 客户端占用槽位：槽位与“本组唯一的 Probation 名额”原子地一起获取。
    pub async fn try_acquire_probation(&self, client_id: &str) -> bool {
        let mut st = self.state.lock().await;
        if st.active >= st.max_concurrent || st.probation_client.is_some() {
            return false;
        }
        st.active += 1;
        st.probation_client = Some(client_id.to_string());
        true
    }

    /// 阻塞等待槽位，最长 `timeout`。
    pub async fn acquire_blocking(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_acquire().await {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_acquire().await;
            }
        }
    }

    pub async fn release(&self) -> Result<(), PoolError> {
        {
            let mut st = self.state.lock().await;
            if st.active == 0 {
                return Err(PoolError::SlotUnderflow(self.name.clone()));
            }
            st.active -= 1;
        }
        self.released.notify_waiters();
        Ok(())
    }

    /// 释放 Probation 名额（只有持有者本人能释放）。
    pub async fn end_probation(&self, client_id: &str) {
        let mut st = self.state.lock().await;
        if st.probation_client.as_deref() == Some(client_id) {
            st.probation_client = None;
        }
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active
    }

    pub async fn max_concurrent(&self) -> usize {
        self.state.lock().await.max_concurrent
    }

    /// 热更新并发上限。缩容时已占用的槽位不会被收回，只是暂时不再发放新槽位。
    pub async fn set_max_concurrent(&self, max_concurrent: usize) {
        {
            let mut st = self.state.lock().await;
            st.max_concurrent = max_concurrent.max(1);
        }
        self.released.notify_waiters();
    }

    pub async fn snapshot(&self) -> GroupSnapshot {
        let st = self.state.lock().await;
        GroupSnapshot {
            name: self.name.clone(),
            active: st.active,
            max_concurrent: st.max_concurrent,
            probation_client: st.probation_client.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    pub name: String,
    pub active: usize,
    pub max_concurrent: usize,
    pub probation_client: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn try_acquire_respects_limit_and_release_underflow_is_an_error() {
        let g = ClientGroup::new("openai", 2);
        assert!(g.try_acquire().await);
        assert!(g.try_acquire().await);
        assert!(!g.try_acquire().await);
        assert_eq!(g.active_count().await, 2);

        g.release().await.expect("release");
        g.release().await.expect("release");
        assert!(matches!(g.release().await, Err(PoolError::SlotUnderflow(_))));
        assert_eq!(g.active_count().await, 0);
    }

    #[tokio::test]
    async fn only_one_probation_slot_per_group() {
        let g = ClientGroup::new("zhipu", 4);
        assert!(g.try_acquire_probation("a").await);
        assert!(!g.try_acquire_probation("b").await);
        // 普通槽位不受影响。
        assert!(g.try_acquire().await);

        g.end_probation("b").await;
        assert!(!g.try_acquire_probation("b").await);
        g.end_probation("a").await;
        assert!(g.try_acquire_probation("b").await);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_blocking_times_out_then_succeeds_after_release() {
        let g = Arc::new(ClientGroup::new("g", 1));
        assert!(g.try_acquire().await);
        assert!(!g.acquire_blocking(Duration::from_millis(50)).await);

        let waiter = {
            let g = g.clone();
            tokio::spawn(async move { g.acquire_blocking(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        g.release().await.expect("release");
        assert!(waiter.await.expect("join"));
        assert_eq!(g.active_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_holders_never_exceed_limit() {
        let g = Arc::new(ClientGroup::new("g", 3));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let g = g.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    if !g.acquire_blocking(Duration::from_secs(5)).await {
                        continue;
                    }
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    g.release().await.expect("release");
                }
            }));
        }
        for t in tasks {
            t.await.expect("join");
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(g.active_count().await, 0);
    }
}
