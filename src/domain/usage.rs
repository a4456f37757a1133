//! Per-request usage aggregation.
//!
//! Turns the proxy rules matched by a request into the metric increments that
//! get reported to the backend.

use crate::domain::rule::{match_paths, ProxyRule};
use std::collections::BTreeMap;

/// Metric name to accumulated delta for a single request.
///
/// Ordered so that encoded payloads are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricDeltaMap(BTreeMap<String, i64>);

impl MetricDeltaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to `metric`; the first occurrence sets the value.
    pub fn add(&mut self, metric: &str, delta: i64) {
        match self.0.get_mut(metric) {
            Some(total) => *total = total.saturating_add(delta),
            None => {
                self.0.insert(metric.to_string(), delta);
            }
        }
    }

    pub fn get(&self, metric: &str) -> Option<i64> {
        self.0.get(metric).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in metric-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(name, delta)| (name.as_str(), *delta))
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for MetricDeltaMap {
    fn from_iter<I: IntoIterator<Item = (S, i64)>>(iter: I) -> Self {
        let mut map = MetricDeltaMap::new();
        for (metric, delta) in iter {
            let metric: String = metric.into();
            map.add(&metric, delta);
        }
        map
    }
}

/// Compute the usage deltas a request contributes.
///
/// Every rule whose path pattern matches `destination` is considered; rules
/// whose method differs (case-insensitively) from `http_method` are skipped.
/// Deltas of rules sharing a metric are summed.
pub fn compute_deltas(destination: &str, http_method: &str, rules: &[ProxyRule]) -> MetricDeltaMap {
    let mut usage = MetricDeltaMap::new();
    for index in match_paths(destination, rules) {
        let rule = &rules[index];
        if !rule.applies_to_method(http_method) {
            continue;
        }
        tracing::trace!(rule = %rule, destination, "matched proxy rule");
        usage.add(rule.metric_system_name(), rule.delta());
    }
    usage
}
