//! Context Extractor
//!
//! Picks the dump fragments most relevant to a query that missed the cache,
//! to ground the fallback prompt. Relevance is keyword overlap weighted by
//! recency; selection is top-N under a token ceiling.

use crate::config::ContextConfig;
use crate::dump_store::{DumpRecord, DumpSnapshot};
use crate::normalize::{estimate_tokens, normalize_query, tokens};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Rows included in a single excerpt before token trimming
const MAX_EXCERPT_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSnippet {
    pub dump_id: String,
    pub excerpt: String,
    pub relevance_score: f64,
    pub estimated_tokens: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FallbackContext {
    pub snippets: Vec<ContextSnippet>,
    pub estimated_tokens: usize,
}

impl FallbackContext {
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ContextExtractor {
    pub top_n: usize,
    pub max_tokens: usize,
    pub recency_half_life_days: f64,
}

impl Default for ContextExtractor {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

impl ContextExtractor {
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            top_n: config.top_n,
            max_tokens: config.max_tokens,
            recency_half_life_days: config.recency_half_life_days,
        }
    }

    pub fn extract(&self, query: &str, snapshot: &DumpSnapshot) -> FallbackContext {
        self.extract_at(query, snapshot, Utc::now())
    }

    /// Never fails: no relevant dumps yields an empty context
    pub fn extract_at(
        &self,
        query: &str,
        snapshot: &DumpSnapshot,
        now: DateTime<Utc>,
    ) -> FallbackContext {
        let query_tokens = tokens(&normalize_query(query));
        if query_tokens.is_empty() || self.top_n == 0 {
            return FallbackContext::default();
        }

        let mut scored: Vec<(f64, &DumpRecord)> = snapshot
            .records()
            .filter_map(|record| {
                let terms = record_terms(record, snapshot);
                let overlap = overlap_fraction(&query_tokens, &terms);
                if overlap <= 0.0 {
                    return None;
                }
                Some((overlap * self.recency_weight(record, now), record.as_ref()))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.pattern_id.cmp(&b.1.pattern_id))
        });

        let mut context = FallbackContext::default();
        for (score, record) in scored {
            if context.snippets.len() >= self.top_n {
                break;
            }
            let remaining = self.max_tokens.saturating_sub(context.estimated_tokens);
            if let Some(excerpt) = excerpt_within(record, remaining) {
                let estimated = estimate_tokens(&excerpt);
                context.estimated_tokens += estimated;
                context.snippets.push(ContextSnippet {
                    dump_id: record.pattern_id.clone(),
                    excerpt,
                    relevance_score: score,
                    estimated_tokens: estimated,
                });
            }
        }

        debug!(
            "Extracted {} snippets (~{} tokens) for fallback context",
            context.snippets.len(),
            context.estimated_tokens
        );
        context
    }

    /// Halves every `recency_half_life_days`
    fn recency_weight(&self, record: &DumpRecord, now: DateTime<Utc>) -> f64 {
        if self.recency_half_life_days <= 0.0 {
            return 1.0;
        }
        let age_days = record.age(now).num_seconds().max(0) as f64 / 86_400.0;
        0.5f64.powf(age_days / self.recency_half_life_days)
    }
}

/// Searchable vocabulary of a record: its pattern keywords, category,
/// column names and string cell values
fn record_terms(record: &DumpRecord, snapshot: &DumpSnapshot) -> BTreeSet<String> {
    let mut text = vec![record.category.clone(), record.pattern_id.replace('_', " ")];
    if let Some(pattern) = snapshot.pattern(&record.pattern_id) {
        text.extend(pattern.keywords.iter().cloned());
    }
    for row in &record.rows {
        for (column, value) in row {
            text.push(column.replace('_', " "));
            if let Some(s) = value.as_str() {
                text.push(s.to_string());
            }
        }
    }
    tokens(&normalize_query(&text.join(" ")))
}

fn overlap_fraction(query: &BTreeSet<String>, terms: &BTreeSet<String>) -> f64 {
    let hits = query
        .iter()
        .filter(|q| terms.contains(*q) || terms.contains(q.trim_end_matches('s')))
        .count();
    hits as f64 / query.len() as f64
}

/// Compact excerpt of the record's leading rows, trimmed until it fits
fn excerpt_within(record: &DumpRecord, max_tokens: usize) -> Option<String> {
    let mut take = record.rows.len().min(MAX_EXCERPT_ROWS);
    while take > 0 {
        let rows = serde_json::to_string(&record.rows[..take]).ok()?;
        let excerpt = format!(
            "[{}/{} v{}] {}",
            record.category, record.pattern_id, record.version, rows
        );
        if estimate_tokens(&excerpt) <= max_tokens {
            return Some(excerpt);
        }
        take -= 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump_store::{row, DumpStore, QueryPattern};
    use chrono::Duration;
    use serde_json::json;

    fn store() -> DumpStore {
        let now = Utc::now();
        DumpStore::new(
            vec![
                QueryPattern::new("sales_by_region", "sales", &["sales", "region"], &[]),
                QueryPattern::new("sales_by_dealer", "sales", &["sales", "dealer"], &[]),
                QueryPattern::new("stock_by_plant", "inventory", &["stock", "plant"], &[]),
            ],
            vec![
                DumpRecord::new(
                    "sales_by_region",
                    "sales",
                    vec![row([("region", json!("Northeast")), ("units", json!(420))])],
                    now - Duration::days(1),
                    1,
                ),
                DumpRecord::new(
                    "sales_by_dealer",
                    "sales",
                    vec![row([("dealer", json!("Apex Motors")), ("units", json!(88))])],
                    now - Duration::days(30),
                    1,
                ),
                DumpRecord::new(
                    "stock_by_plant",
                    "inventory",
                    vec![row([("plant", json!("Pune")), ("stock", json!(1200))])],
                    now,
                    1,
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_recent_relevant_dumps_rank_first() {
        let context = ContextExtractor::default().extract("sales by region", &store().snapshot());
        assert_eq!(context.snippets[0].dump_id, "sales_by_region");
        assert!(context.snippets.iter().all(|s| s.dump_id != "stock_by_plant"));
        assert!(context.snippets[0].excerpt.contains("Northeast"));
    }

    #[test]
    fn test_nothing_relevant_gives_empty_context() {
        let context = ContextExtractor::default()
            .extract("why did ev charging complaints spike", &store().snapshot());
        assert!(context.is_empty());
        assert_eq!(context.estimated_tokens, 0);
    }

    #[test]
    fn test_token_ceiling_and_top_n_are_respected() {
        let extractor = ContextExtractor {
            top_n: 1,
            max_tokens: 2_000,
            recency_half_life_days: 7.0,
        };
        let context = extractor.extract("sales units", &store().snapshot());
        assert_eq!(context.snippets.len(), 1);

        let tight = ContextExtractor {
            top_n: 5,
            max_tokens: 5,
            recency_half_life_days: 7.0,
        };
        let context = tight.extract("sales units", &store().snapshot());
        assert!(context.estimated_tokens <= 5);
    }
}
