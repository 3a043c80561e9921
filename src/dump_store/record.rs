//! Dump records and query patterns
//!
//! Both are produced by the regeneration job and are read-only to the router.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One result row, as emitted by the dump job (column name -> value)
pub type Row = serde_json::Map<String, serde_json::Value>;

/// How often the regeneration job rebuilds a category's dumps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshCadence {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl RefreshCadence {
    /// Age after which a record is overdue for regeneration
    pub fn max_age(&self) -> Duration {
        match self {
            RefreshCadence::Daily => Duration::days(1),
            RefreshCadence::Weekly => Duration::days(7),
            RefreshCadence::Monthly => Duration::days(31),
        }
    }
}

/// A canonical query shape the dump job pre-computes answers for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPattern {
    pub id: String,
    pub category: String,
    /// Lowercase keywords; multi-word entries match as phrases
    pub keywords: BTreeSet<String>,
    /// Example phrasings used for fuzzy matching
    #[serde(default)]
    pub phrasings: Vec<String>,
    #[serde(default)]
    pub cadence: RefreshCadence,
}

impl QueryPattern {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        keywords: &[&str],
        phrasings: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            phrasings: phrasings.iter().map(|p| p.to_string()).collect(),
            cadence: RefreshCadence::default(),
        }
    }

    pub fn with_cadence(mut self, cadence: RefreshCadence) -> Self {
        self.cadence = cadence;
        self
    }
}

/// Pre-computed answer for one pattern. Never mutated once published;
/// regeneration produces a new record with a higher `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpRecord {
    pub pattern_id: String,
    pub category: String,
    pub rows: Vec<Row>,
    #[serde(default)]
    pub chart_hint: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub version: u64,
}

impl DumpRecord {
    pub fn new(
        pattern_id: impl Into<String>,
        category: impl Into<String>,
        rows: Vec<Row>,
        generated_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            pattern_id: pattern_id.into(),
            category: category.into(),
            rows,
            chart_hint: None,
            generated_at,
            version,
        }
    }

    pub fn with_chart_hint(mut self, hint: impl Into<String>) -> Self {
        self.chart_hint = Some(hint.into());
        self
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.generated_at)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, cadence: RefreshCadence) -> bool {
        self.age(now) > cadence.max_age()
    }
}

/// Build a row from `(column, value)` pairs
pub fn row<I, K>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, serde_json::Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_staleness_follows_cadence() {
        let now = Utc::now();
        let record = DumpRecord::new("p", "sales", vec![], now - Duration::days(3), 1);
        assert!(record.is_stale(now, RefreshCadence::Daily));
        assert!(!record.is_stale(now, RefreshCadence::Weekly));
    }

    #[test]
    fn test_pattern_deserializes_with_defaults() {
        let pattern: QueryPattern = serde_json::from_value(json!({
            "id": "sales_by_region",
            "category": "sales",
            "keywords": ["sales", "region"]
        }))
        .unwrap();
        assert!(pattern.phrasings.is_empty());
        assert_eq!(pattern.cadence, RefreshCadence::Daily);
    }
}
