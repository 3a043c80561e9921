//! Router Metrics
//!
//! Track how queries were answered and what they cost.

use crate::answer::AnswerSource;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Router metrics tracker
#[derive(Debug, Default)]
pub struct RouterMetrics {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    fallback_calls: AtomicU64,
    placeholders: AtomicU64,
    budget_denials: AtomicU64,
    unparseable_completions: AtomicU64,
    tokens_spent: AtomicU64,
    sources: DashMap<String, u64>,
    strategies: DashMap<String, u64>,
    transport_errors: DashMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub queries: u64,
    pub cache_hits: u64,
    pub fallback_calls: u64,
    pub placeholders: u64,
    pub budget_denials: u64,
    /// Completions that arrived but could not be read as answer JSON
    pub unparseable_completions: u64,
    pub tokens_spent: u64,
    pub sources: BTreeMap<String, u64>,
    pub strategies: BTreeMap<String, u64>,
    pub transport_errors: BTreeMap<String, u64>,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_answer(&self, source: AnswerSource, tokens: u64) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.tokens_spent.fetch_add(tokens, Ordering::Relaxed);
        *self.sources.entry(source.as_str().to_string()).or_insert(0) += 1;
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_call(&self) {
        self.fallback_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_placeholder(&self) {
        self.placeholders.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_budget_denial(&self) {
        self.budget_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unparseable_completion(&self) {
        self.unparseable_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_strategy(&self, strategy: &str) {
        *self.strategies.entry(strategy.to_string()).or_insert(0) += 1;
    }

    pub fn record_transport_error(&self, class: &str) {
        *self.transport_errors.entry(class.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let collect = |map: &DashMap<String, u64>| {
            map.iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect::<BTreeMap<_, _>>()
        };
        MetricsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
            placeholders: self.placeholders.load(Ordering::Relaxed),
            budget_denials: self.budget_denials.load(Ordering::Relaxed),
            unparseable_completions: self.unparseable_completions.load(Ordering::Relaxed),
            tokens_spent: self.tokens_spent.load(Ordering::Relaxed),
            sources: collect(&self.sources),
            strategies: collect(&self.strategies),
            transport_errors: collect(&self.transport_errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_snapshot_counts() {
        let metrics = RouterMetrics::new();
        metrics.record_cache_hit();
        metrics.record_answer(AnswerSource::Cache, 0);
        metrics.record_fallback_call();
        metrics.record_answer(AnswerSource::Fallback, 320);
        metrics.record_strategy("full_ai");
        metrics.record_transport_error("timeout");
        metrics.record_unparseable_completion();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries, 2);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.tokens_spent, 320);
        assert_eq!(snapshot.sources.get("cache"), Some(&1));
        assert_eq!(snapshot.strategies.get("full_ai"), Some(&1));
        assert_eq!(snapshot.transport_errors.get("timeout"), Some(&1));
        assert_eq!(snapshot.transport_errors.len(), 1);
        assert_eq!(snapshot.unparseable_completions, 1);
    }

    #[test]
    fn test_concurrent_recording() {
        let metrics = Arc::new(RouterMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.record_answer(AnswerSource::Placeholder, 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries, 800);
        assert_eq!(snapshot.sources.get("placeholder"), Some(&800));
    }
}
