//! 选择算法：最低价优先，同价按连续失败次数与最近使用时间打破平局。
//!
//! 排序只作用于已经过滤好的候选视图，不接触任何锁。

use crate::config::SelectionPolicy;
use crate::pool::client::CandidateView;
use std::cmp::Ordering;

/// 比较两个候选；Less 表示 `a` 更优。
pub fn compare(a: &CandidateView, b: &CandidateView, policy: &SelectionPolicy) -> Ordering {
    let by_failures = a.recent_failures.cmp(&b.recent_failures);
    // None（从未被使用）排在最前。
    let by_lru = a.last_acquired.cmp(&b.last_acquired);
    let (first, second) = if policy.fairness_first {
        (by_lru, by_failures)
    } else {
        (by_failures, by_lru)
    };

    a.price
        .total_cmp(&b.price)
        .then(first)
        .then(second)
        .then_with(|| a.client.id().cmp(b.client.id()))
}

/// 原地排序，最优候选在前。
pub fn rank(candidates: &mut [CandidateView], policy: &SelectionPolicy) {
    candidates.sort_by(|a, b| compare(a, b, policy));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::client::Client;
    use crate::pool::types::{ClientSpec, LimitSpec};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn view(id: &str, price: f64, failures: u32, last: Option<Instant>) -> CandidateView {
        let spec = ClientSpec {
            id: id.to_string(),
            provider: "p".to_string(),
            credential: "k".to_string(),
            model: "m".to_string(),
            price,
            capabilities: BTreeSet::new(),
            group: String::new(),
            limit: LimitSpec::Unlimited,
            rotation: None,
        };
        CandidateView {
            client: Arc::new(Client::from_spec(spec, Duration::from_secs(60), Instant::now())),
            price,
            recent_failures: failures,
            last_acquired: last,
            probation: false,
        }
    }

    fn ids(v: &[CandidateView]) -> Vec<&str> {
        v.iter().map(|c| c.client.id().as_str()).collect()
    }

    #[test]
    fn cheapest_first() {
        let mut v = vec![view("c3", 3.0, 0, None), view("c1", 1.0, 0, None), view("c2", 2.0, 0, None)];
        rank(&mut v, &SelectionPolicy::default());
        assert_eq!(ids(&v), ["c1", "c2", "c3"]);
    }

    #[test]
    fn equal_price_breaks_ties_by_failures_then_lru_then_id() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);
        let mut v = vec![
            view("d", 1.0, 0, Some(t1)),
            view("c", 1.0, 0, Some(t0)),
            view("b", 1.0, 2, None),
            view("a", 1.0, 0, Some(t1)),
        ];
        rank(&mut v, &SelectionPolicy::default());
        assert_eq!(ids(&v), ["c", "a", "d", "b"]);
    }

    #[test]
    fn fairness_first_prefers_least_recently_used() {
        let t0 = Instant::now();
        let mut v = vec![view("busy", 1.0, 0, Some(t0)), view("flaky", 1.0, 2, None)];
        rank(
            &mut v,
            &SelectionPolicy {
                fairness_first: true,
            },
        );
        assert_eq!(ids(&v), ["flaky", "busy"]);

        rank(&mut v, &SelectionPolicy::default());
        assert_eq!(ids(&v), ["busy", "flaky"]);
    }
}
