//! Query Router
//!
//! One request/response cycle: normalize, try the whole query against the
//! cache, otherwise decompose, resolve each component (cache or fallback),
//! merge, chart. Only dump-store corruption is returned as an error.

use crate::answer::{Answer, AnswerSource};
use crate::chart::{ChartConfig, ChartSynthesizer};
use crate::config::RouterConfig;
use crate::context_extractor::ContextExtractor;
use crate::decomposer::{QueryDecomposer, Resolution, ResolvedComponent, SubQuery};
use crate::dump_store::{spawn_refresh, DumpRecord, DumpSnapshot, DumpStore};
use crate::error::{RouterError, Result};
use crate::fallback::{FallbackAnswer, FallbackOutcome, FallbackResponder};
use crate::llm::{CompletionService, LlmClient};
use crate::metrics::RouterMetrics;
use crate::normalize::normalize_query;
use crate::pattern_matcher::{MatchResult, PatternMatcher};
use crate::token_budget::TokenBudgetManager;
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct QueryRouter {
    store: DumpStore,
    matcher: PatternMatcher,
    extractor: ContextExtractor,
    decomposer: QueryDecomposer,
    charts: ChartSynthesizer,
    responder: FallbackResponder,
    budget: Arc<TokenBudgetManager>,
    metrics: Arc<RouterMetrics>,
}

impl QueryRouter {
    pub fn new(
        store: DumpStore,
        completion: Arc<dyn CompletionService>,
        config: &RouterConfig,
    ) -> Self {
        Self::with_budget(store, completion, TokenBudgetManager::new(&config.budget), config)
    }

    /// Share one budget between routers (or hand in one with a test clock)
    pub fn with_budget(
        store: DumpStore,
        completion: Arc<dyn CompletionService>,
        budget: Arc<TokenBudgetManager>,
        config: &RouterConfig,
    ) -> Self {
        Self {
            store,
            matcher: PatternMatcher::from_config(&config.matcher),
            extractor: ContextExtractor::from_config(&config.context),
            decomposer: QueryDecomposer,
            charts: ChartSynthesizer,
            responder: FallbackResponder::new(
                completion,
                Arc::clone(&budget),
                config.fallback.clone(),
            ),
            budget,
            metrics: Arc::new(RouterMetrics::new()),
        }
    }

    /// Validate `config`, load the dump directory and build the HTTP client.
    /// A missing dump directory starts the router with an empty store.
    pub fn from_config(config: &RouterConfig) -> Result<Self> {
        config.validate()?;
        let store = if config.dumps.dir.exists() {
            DumpStore::load_dir(&config.dumps.dir)?
        } else {
            warn!(
                "Dump directory {} not found; every query will use the fallback path",
                config.dumps.dir.display()
            );
            DumpStore::empty()
        };

        let client = LlmClient::new(&config.completion, config.fallback.timeout())?;
        if client.is_offline() {
            warn!(
                "No completion API key configured; misses will be answered with placeholder data"
            );
        }
        Ok(Self::new(store, Arc::new(client), config))
    }

    pub fn store(&self) -> &DumpStore {
        &self.store
    }

    pub fn budget(&self) -> &Arc<TokenBudgetManager> {
        &self.budget
    }

    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    /// Poll `dir` for regenerated dumps; routing picks them up through the
    /// snapshot pointer. Abort the handle to stop watching.
    pub fn watch_dumps(&self, dir: PathBuf, interval: Duration) -> JoinHandle<()> {
        spawn_refresh(dir, self.store.publisher(), interval)
    }

    pub async fn route(&self, query: &str) -> Result<Answer> {
        let request_id = Uuid::new_v4();
        let normalized = normalize_query(query);
        info!("[{}] Routing '{}'", request_id, normalized);

        if normalized.is_empty() {
            info!("[{}] Nothing to answer", request_id);
            let answer = Answer {
                request_id,
                query: query.to_string(),
                data: Vec::new(),
                chart_config: ChartConfig::table(),
                tokens_used: 0,
                source: AnswerSource::Placeholder,
                summary: "The question is empty; nothing to answer.".to_string(),
                match_result: None,
                plan: None,
            };
            self.metrics.record_answer(answer.source, 0);
            return Ok(answer);
        }

        // One snapshot for the whole request, so every component sees the same version
        let snapshot = self.store.snapshot();
        let matched = self.matcher.match_query(&normalized, &snapshot);
        info!(
            "[{}] Match: {:?} score {:.2} {:?}",
            request_id, matched.method, matched.score, matched.pattern_id
        );

        if let Some(record) = cached_record(&snapshot, &matched)? {
            self.metrics.record_cache_hit();
            let answer = Answer {
                request_id,
                query: query.to_string(),
                chart_config: self.charts.synthesize(&record.rows, record.chart_hint.as_deref()),
                summary: verbatim(&record.rows),
                data: record.rows.clone(),
                tokens_used: 0,
                source: AnswerSource::Cache,
                match_result: Some(matched),
                plan: None,
            };
            self.metrics.record_answer(AnswerSource::Cache, 0);
            info!("[{}] Served '{}' v{} from cache", request_id, record.pattern_id, record.version);
            return Ok(answer);
        }

        self.decomposed_answer(request_id, query, &snapshot, matched).await
    }

    async fn decomposed_answer(
        &self,
        request_id: Uuid,
        query: &str,
        snapshot: &DumpSnapshot,
        whole_query_match: MatchResult,
    ) -> Result<Answer> {
        let decomposition = self.decomposer.decompose(query);
        info!(
            "[{}] Decomposed ({:?}) into {} components",
            request_id,
            decomposition.cue,
            decomposition.components.len()
        );

        // Cache pass first: it is free, and tells us whether any component is cached at all
        let mut cached = Vec::with_capacity(decomposition.components.len());
        for sub_query in &decomposition.components {
            let matched = self.matcher.match_query(&normalize_query(&sub_query.text), snapshot);
            cached.push(cached_record(snapshot, &matched)?);
        }

        let mut resolved = Vec::new();
        if cached.iter().all(Option::is_none) {
            // Nothing cached: one metered call for the whole question
            // instead of one per component
            info!("[{}] No component cached; answering with one fallback call", request_id);
            let whole = SubQuery {
                name: "answer".to_string(),
                text: query.trim().to_string(),
            };
            resolved.push(self.fallback_component(snapshot, whole).await);
        } else {
            for (sub_query, record) in decomposition.components.into_iter().zip(cached) {
                let component = match record {
                    Some(record) => cache_component(sub_query, &record),
                    None => self.fallback_component(snapshot, sub_query).await,
                };
                debug!(
                    "[{}] Component '{}' resolved via {:?}",
                    request_id, component.sub_query.name, component.resolution
                );
                resolved.push(component);
            }
        }

        let hint = match resolved.as_slice() {
            [only] if only.resolution == Resolution::Cache => only
                .pattern_id
                .as_deref()
                .and_then(|id| snapshot.record(id))
                .and_then(|r| r.chart_hint.clone()),
            _ => None,
        };

        let merged = self.decomposer.merge(decomposition.cue, resolved);
        self.metrics.record_strategy(merged.plan.strategy.as_str());
        self.metrics.record_answer(merged.source, merged.tokens_used);
        info!(
            "[{}] Answered: source {}, strategy {}, {} rows, {} tokens",
            request_id,
            merged.source.as_str(),
            merged.plan.strategy.as_str(),
            merged.rows.len(),
            merged.tokens_used
        );

        Ok(Answer {
            request_id,
            query: query.to_string(),
            chart_config: self.charts.synthesize(&merged.rows, hint.as_deref()),
            data: merged.rows,
            tokens_used: merged.tokens_used,
            source: merged.source,
            summary: merged.summary,
            match_result: Some(whole_query_match),
            plan: Some(merged.plan),
        })
    }

    async fn fallback_component(
        &self,
        snapshot: &DumpSnapshot,
        sub_query: SubQuery,
    ) -> ResolvedComponent {
        let context = self.extractor.extract(&sub_query.text, snapshot);
        let answer = self.responder.respond(&sub_query.text, &context).await;
        self.record_fallback(&answer);
        ResolvedComponent {
            sub_query,
            resolution: Resolution::Fallback,
            pattern_id: None,
            rows: answer.rows,
            narrative: answer.narrative,
            tokens_used: answer.tokens_used,
            source: answer.source,
        }
    }

    fn record_fallback(&self, answer: &FallbackAnswer) {
        match &answer.outcome {
            FallbackOutcome::Completed => self.metrics.record_fallback_call(),
            FallbackOutcome::Unparseable { .. } => {
                self.metrics.record_fallback_call();
                self.metrics.record_unparseable_completion();
            }
            FallbackOutcome::TransportFailure { class, .. } => {
                self.metrics.record_fallback_call();
                self.metrics.record_transport_error(class);
            }
            FallbackOutcome::BudgetExhausted { .. } => self.metrics.record_budget_denial(),
        }
        if answer.source == AnswerSource::Placeholder {
            self.metrics.record_placeholder();
        }
    }
}

/// The record behind a hit, if it can serve one. A hit whose record is
/// missing from the snapshot is corruption; an empty record is a miss.
fn cached_record(
    snapshot: &DumpSnapshot,
    matched: &MatchResult,
) -> Result<Option<Arc<DumpRecord>>> {
    let Some(pattern_id) = matched.pattern_id.as_deref() else {
        return Ok(None);
    };
    let record = snapshot.record(pattern_id).cloned().ok_or_else(|| {
        RouterError::DumpStore(format!(
            "Pattern '{}' matched but snapshot {} has no record for it",
            pattern_id,
            snapshot.generation()
        ))
    })?;

    if record.rows.is_empty() {
        warn!("Dump for '{}' v{} has no rows; treating as a miss", pattern_id, record.version);
        return Ok(None);
    }

    if let Some(pattern) = snapshot.pattern(pattern_id) {
        if record.is_stale(Utc::now(), pattern.cadence) {
            warn!(
                "Serving stale dump '{}' (generated {}, {:?} cadence)",
                pattern_id, record.generated_at, pattern.cadence
            );
        }
    }
    Ok(Some(record))
}

fn cache_component(sub_query: SubQuery, record: &DumpRecord) -> ResolvedComponent {
    ResolvedComponent {
        sub_query,
        resolution: Resolution::Cache,
        pattern_id: Some(record.pattern_id.clone()),
        rows: record.rows.clone(),
        narrative: None,
        tokens_used: 0,
        source: AnswerSource::Cache,
    }
}

fn verbatim(rows: &[crate::dump_store::Row]) -> String {
    Value::Array(rows.iter().cloned().map(Value::Object).collect()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump_store::{row, QueryPattern};
    use crate::error::CompletionError;
    use crate::llm::{CompletionRequest, CompletionResponse};
    use async_trait::async_trait;
    use serde_json::json;

    struct Offline;

    #[async_trait]
    impl CompletionService for Offline {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, CompletionError> {
            Err(CompletionError::Unavailable("offline".into()))
        }
    }

    fn router(patterns: Vec<QueryPattern>, records: Vec<DumpRecord>) -> QueryRouter {
        let store = DumpStore::new(patterns, records).unwrap();
        QueryRouter::new(store, Arc::new(Offline), &RouterConfig::default())
    }

    #[tokio::test]
    async fn test_empty_query_is_unanswerable() {
        let answer = router(vec![], vec![]).route("  ?! ").await.unwrap();
        assert!(answer.data.is_empty());
        assert_eq!(answer.source, AnswerSource::Placeholder);
        assert_eq!(answer.chart_config.chart_type, crate::chart::ChartType::None);
    }

    #[tokio::test]
    async fn test_empty_record_is_a_miss() {
        let pattern = QueryPattern::new("stock_by_plant", "inventory", &["stock", "plant"], &[]);
        let record = DumpRecord::new("stock_by_plant", "inventory", vec![], Utc::now(), 1);
        let answer = router(vec![pattern], vec![record]).route("stock by plant").await.unwrap();
        assert_eq!(answer.source, AnswerSource::Placeholder);
        assert!(!answer.data.is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_records_metrics() {
        let pattern = QueryPattern::new("stock_by_plant", "inventory", &["stock", "plant"], &[]);
        let record = DumpRecord::new(
            "stock_by_plant",
            "inventory",
            vec![row([("plant", json!("Pune")), ("stock", json!(40))])],
            Utc::now(),
            2,
        );
        let router = router(vec![pattern], vec![record]);
        let answer = router.route("Show me stock by plant").await.unwrap();
        assert_eq!(answer.source, AnswerSource::Cache);
        assert_eq!(answer.summary, r#"[{"plant":"Pune","stock":40}]"#);
        let metrics = router.metrics().snapshot();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.tokens_spent, 0);
    }

    #[tokio::test]
    async fn test_offline_miss_counts_placeholder() {
        let router = router(vec![], vec![]);
        let answer = router.route("warranty claims by model").await.unwrap();
        assert_eq!(answer.tokens_used, 0);
        assert_eq!(answer.data.len(), 3);
        let metrics = router.metrics().snapshot();
        assert_eq!(metrics.placeholders, 1);
        assert_eq!(metrics.transport_errors.get("unavailable"), Some(&1));
        assert_eq!(metrics.strategies.get("full_ai"), Some(&1));
    }
}
