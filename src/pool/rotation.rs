//! 令牌/模型轮换。
//!
//! 两种策略，按客户端配置选择：
//! - Counting：按顺序使用候选，当前候选用满上限后切到下一个
//! - Batch：一大批独立余额的令牌，每次挑余额最高的（贪心），单个令牌失效不影响其他令牌

use crate::pool::types::{FailureKind, Outcome, RotationSpec, RotationTarget};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct RotationPolicy {
    target: RotationTarget,
    kind: RotatorKind,
}

#[derive(Debug, Clone)]
enum RotatorKind {
    Counting(CountingRotator),
    Batch(BatchRotator),
}

impl RotationPolicy {
    pub fn from_spec(spec: &RotationSpec) -> Self {
        match spec {
            RotationSpec::Counting {
                target,
                candidates,
                recycle,
            } => Self {
                target: *target,
                kind: RotatorKind::Counting(CountingRotator::new(
                    candidates.iter().map(|c| (c.id.clone(), c.cap)),
                    *recycle,
                )),
            },
            RotationSpec::Batch {
                target,
                tokens,
                min_balance,
            } => Self {
                target: *target,
                kind: RotatorKind::Batch(BatchRotator::new(
                    tokens.iter().map(|t| (t.id.clone(), t.balance)),
                    *min_balance,
                )),
            },
        }
    }

    pub fn target(&self) -> RotationTarget {
        self.target
    }

    pub fn next_candidate(&mut self) -> Option<String> {
        match &mut self.kind {
            RotatorKind::Counting(r) => r.next_candidate(),
            RotatorKind::Batch(r) => r.next_candidate(),
        }
    }

    pub fn report_outcome(&mut self, id: &str, outcome: &Outcome) {
        match &mut self.kind {
            RotatorKind::Counting(r) => r.report_outcome(id, outcome),
            RotatorKind::Batch(r) => r.report_outcome(id, outcome),
        }
    }

    pub fn has_capacity(&self) -> bool {
        match &self.kind {
            RotatorKind::Counting(r) => r.has_capacity(),
            RotatorKind::Batch(r) => r.has_capacity(),
        }
    }

    /// 当前（下一次将要使用的）候选，不消耗次数。
    pub fn current(&self) -> Option<&str> {
        match &self.kind {
            RotatorKind::Counting(r) => r.current(),
            RotatorKind::Batch(r) => r.peek(),
        }
    }

    pub fn reset(&mut self) {
        match &mut self.kind {
            RotatorKind::Counting(r) => r.reset(),
            RotatorKind::Batch(r) => r.reset(),
        }
    }

    /// 仅对 Batch 有意义；返回是否找到该令牌。
    pub fn update_token_balance(&mut self, id: &str, balance: f64) -> bool {
        match &mut self.kind {
            RotatorKind::Counting(_) => false,
            RotatorKind::Batch(r) => r.update_balance(id, balance),
        }
    }

    /// 需要单独查询余额的令牌（Batch + Token 目标）。
    pub fn balance_tokens(&self) -> Vec<String> {
        match (&self.kind, self.target) {
            (RotatorKind::Batch(r), RotationTarget::Token) => {
                r.tokens.iter().map(|t| t.id.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn snapshot(&self) -> RotationSnapshot {
        match &self.kind {
            RotatorKind::Counting(r) => RotationSnapshot {
                mode: "counting",
                target: self.target,
                current: r.current().map(|id| mask(id, self.target)),
                candidates: r
                    .slots
                    .iter()
                    .map(|s| CandidateSnapshot {
                        id: mask(&s.id, self.target),
                        used: Some(s.used),
                        cap: s.cap,
                        balance: None,
                        exhausted: s.is_exhausted(),
                    })
                    .collect(),
            },
            RotatorKind::Batch(r) => RotationSnapshot {
                mode: "batch",
                target: self.target,
                current: r.peek().map(|id| mask(id, self.target)),
                candidates: r
                    .tokens
                    .iter()
                    .map(|t| CandidateSnapshot {
                        id: mask(&t.id, self.target),
                        used: None,
                        cap: None,
                        balance: Some(t.balance),
                        exhausted: !t.usable(r.min_balance),
                    })
                    .collect(),
            },
        }
    }
}

fn mask(id: &str, target: RotationTarget) -> String {
    match target {
        RotationTarget::Model => id.to_string(),
        RotationTarget::Token => crate::logging::mask_secret(id),
    }
}

#[derive(Debug, Clone)]
struct CountingSlot {
    id: String,
    cap: Option<u32>,
    used: u32,
    /// 服务方明确拒绝过该候选（鉴权/配额），只有人工重置能恢复。
    suspended: bool,
}

impl CountingSlot {
    fn is_exhausted(&self) -> bool {
        self.suspended || self.cap.is_some_and(|c| self.used >= c)
    }
}

#[derive(Debug, Clone)]
struct CountingRotator {
    slots: Vec<CountingSlot>,
    /// 除非全部耗尽，否则总是指向一个未耗尽的候选。
    cursor: usize,
    recycle: bool,
}

impl CountingRotator {
    fn new(candidates: impl IntoIterator<Item = (String, Option<u32>)>, recycle: bool) -> Self {
        let slots = candidates
            .into_iter()
            .map(|(id, cap)| CountingSlot {
                id,
                cap,
                used: 0,
                suspended: false,
            })
            .collect();
        let mut r = Self {
            slots,
            cursor: 0,
            recycle,
        };
        r.settle();
        r
    }

    fn next_candidate(&mut self) -> Option<String> {
        if self.slots.is_empty() {
            return None;
        }
        if self.all_exhausted() {
            if !self.recycle {
                return None;
            }
            for s in &mut self.slots {
                s.used = 0;
            }
            self.cursor = 0;
            self.settle();
            if self.all_exhausted() {
                return None;
            }
        }

        let slot = &mut self.slots[self.cursor];
        slot.used = slot.used.saturating_add(1);
        let id = slot.id.clone();
        self.settle();
        Some(id)
    }

    fn report_outcome(&mut self, id: &str, outcome: &Outcome) {
        if !matches!(
            outcome.failure,
            Some(FailureKind::Auth | FailureKind::QuotaExhausted)
        ) {
            return;
        }
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == id) {
            slot.suspended = true;
        }
        self.settle();
    }

    fn has_capacity(&self) -> bool {
        if self.recycle {
            return self.slots.iter().any(|s| !s.suspended);
        }
        !self.all_exhausted()
    }

    fn current(&self) -> Option<&str> {
        self.slots
            .get(self.cursor)
            .filter(|s| !s.is_exhausted())
            .map(|s| s.id.as_str())
    }

    fn reset(&mut self) {
        for s in &mut self.slots {
            s.used = 0;
            s.suspended = false;
        }
        self.cursor = 0;
    }

    fn all_exhausted(&self) -> bool {
        self.slots.iter().all(CountingSlot::is_exhausted)
    }

    /// 把 cursor 向后（环绕）移动到第一个未耗尽的候选；全部耗尽时保持不动。
    fn settle(&mut self) {
        let n = self.slots.len();
        if n == 0 {
            return;
        }
        for step in 0..n {
            let idx = (self.cursor + step) % n;
            if !self.slots[idx].is_exhausted() {
                self.cursor = idx;
                return;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct BatchToken {
    id: String,
    balance: f64,
    suspended: bool,
    drained: bool,
}

impl BatchToken {
    fn usable(&self, min_balance: f64) -> bool {
        !self.suspended && !self.drained && self.balance > min_balance
    }
}

#[derive(Debug, Clone)]
struct BatchRotator {
    tokens: Vec<BatchToken>,
    min_balance: f64,
}

impl BatchRotator {
    fn new(tokens: impl IntoIterator<Item = (String, f64)>, min_balance: f64) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(id, balance)| BatchToken {
                    id,
                    balance,
                    suspended: false,
                    drained: false,
                })
                .collect(),
            min_balance,
        }
    }

    /// 余额最高者优先；余额相同取靠前的。
    fn best(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, t) in self.tokens.iter().enumerate() {
            if !t.usable(self.min_balance) {
                continue;
            }
            match best {
                Some(b) if self.tokens[b].balance >= t.balance => {}
                _ => best = Some(i),
            }
        }
        best
    }

    fn next_candidate(&mut self) -> Option<String> {
        self.best().map(|i| self.tokens[i].id.clone())
    }

    fn peek(&self) -> Option<&str> {
        self.best().map(|i| self.tokens[i].id.as_str())
    }

    fn report_outcome(&mut self, id: &str, outcome: &Outcome) {
        let Some(token) = self.tokens.iter_mut().find(|t| t.id == id) else {
            return;
        };
        token.balance -= outcome.cost;
        match outcome.failure {
            Some(FailureKind::Auth) => token.suspended = true,
            Some(FailureKind::QuotaExhausted) => token.drained = true,
            _ => {}
        }
    }

    fn has_capacity(&self) -> bool {
        self.tokens.iter().any(|t| t.usable(self.min_balance))
    }

    fn update_balance(&mut self, id: &str, balance: f64) -> bool {
        let Some(token) = self.tokens.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        if balance.is_finite() {
            token.balance = balance;
            if balance > self.min_balance {
                token.drained = false;
            }
        }
        true
    }

    fn reset(&mut self) {
        for t in &mut self.tokens {
            t.suspended = false;
            t.drained = false;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RotationSnapshot {
    pub mode: &'static str,
    pub target: RotationTarget,
    pub current: Option<String>,
    pub candidates: Vec<CandidateSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateSnapshot {
    pub id: String,
    pub used: Option<u32>,
    pub cap: Option<u32>,
    pub balance: Option<f64>,
    pub exhausted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::types::{BatchTokenSpec, CountingCandidateSpec};

    fn counting(caps: &[(&str, Option<u32>)], recycle: bool) -> RotationPolicy {
        RotationPolicy::from_spec(&RotationSpec::Counting {
            target: RotationTarget::Model,
            candidates: caps
                .iter()
                .map(|(id, cap)| CountingCandidateSpec {
                    id: id.to_string(),
                    cap: *cap,
                })
                .collect(),
            recycle,
        })
    }

    fn batch(tokens: &[(&str, f64)]) -> RotationPolicy {
        RotationPolicy::from_spec(&RotationSpec::Batch {
            target: RotationTarget::Token,
            tokens: tokens
                .iter()
                .map(|(id, balance)| BatchTokenSpec {
                    id: id.to_string(),
                    balance: *balance,
                })
                .collect(),
            min_balance: 0.0,
        })
    }

    #[test]
    fn counting_rotator_exhausts_in_order() {
        let mut r = counting(&[("A", Some(2)), ("B", Some(1))], false);
        assert_eq!(r.next_candidate().as_deref(), Some("A"));
        assert_eq!(r.next_candidate().as_deref(), Some("A"));
        assert!(r.has_capacity());
        assert_eq!(r.next_candidate().as_deref(), Some("B"));
        assert!(!r.has_capacity());
        assert_eq!(r.next_candidate(), None);

        r.reset();
        assert!(r.has_capacity());
        assert_eq!(r.next_candidate().as_deref(), Some("A"));
    }

    #[test]
    fn counting_rotator_with_recycle_cycles_forever() {
        let mut r = counting(&[("m1", Some(2)), ("m2", Some(2))], true);
        let seq: Vec<String> = (0..6).filter_map(|_| r.next_candidate()).collect();
        assert_eq!(seq, ["m1", "m1", "m2", "m2", "m1", "m1"]);
        assert!(r.has_capacity());
    }

    #[test]
    fn counting_rotator_skips_suspended_candidate() {
        let mut r = counting(&[("A", None), ("B", None)], false);
        assert_eq!(r.next_candidate().as_deref(), Some("A"));
        r.report_outcome("A", &Outcome::failure(FailureKind::QuotaExhausted));
        assert_eq!(r.current(), Some("B"));
        assert_eq!(r.next_candidate().as_deref(), Some("B"));

        // 软故障不影响候选。
        r.report_outcome("B", &Outcome::failure(FailureKind::RateLimited));
        assert_eq!(r.next_candidate().as_deref(), Some("B"));
    }

    #[test]
    fn batch_rotator_prefers_most_headroom() {
        let mut r = batch(&[("t1", 5.0), ("t2", 9.0), ("t3", 7.0)]);
        assert_eq!(r.next_candidate().as_deref(), Some("t2"));
        r.report_outcome("t2", &Outcome::success(3.0));
        assert_eq!(r.next_candidate().as_deref(), Some("t3"));
    }

    #[test]
    fn batch_rotator_failure_only_affects_that_token() {
        let mut r = batch(&[("t1", 5.0), ("t2", 9.0)]);
        r.report_outcome("t2", &Outcome::failure(FailureKind::Auth));
        assert_eq!(r.next_candidate().as_deref(), Some("t1"));
        assert!(r.has_capacity());

        r.report_outcome("t1", &Outcome::failure(FailureKind::QuotaExhausted));
        assert!(!r.has_capacity());
        assert_eq!(r.next_candidate(), None);

        // 余额刷新只恢复“耗尽”的令牌，不恢复被封禁的令牌。
        assert!(r.update_token_balance("t1", 3.0));
        assert!(r.update_token_balance("t2", 30.0));
        assert_eq!(r.next_candidate().as_deref(), Some("t1"));
        assert!(!r.update_token_balance("missing", 1.0));
    }

    #[test]
    fn snapshot_masks_tokens_but_not_models() {
        let r = batch(&[("sk-abcdefghijklmnop", 1.0)]);
        let snap = r.snapshot();
        assert_eq!(snap.mode, "batch");
        assert!(!snap.candidates[0].id.contains("efghijkl"));

        let c = counting(&[("gpt-4o", Some(1))], false);
        assert_eq!(c.snapshot().candidates[0].id, "gpt-4o");
    }
}
