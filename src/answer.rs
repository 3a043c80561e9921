use crate::chart::ChartConfig;
use crate::decomposer::AnalysisPlan;
use crate::dump_store::Row;
use crate::pattern_matcher::MatchResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where an answer's data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Cache,
    Fallback,
    Hybrid,
    Placeholder,
}

impl AnswerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerSource::Cache => "cache",
            AnswerSource::Fallback => "fallback",
            AnswerSource::Hybrid => "hybrid",
            AnswerSource::Placeholder => "placeholder",
        }
    }
}

/// What the router returns for every query
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub request_id: Uuid,
    pub query: String,
    pub data: Vec<Row>,
    pub chart_config: ChartConfig,
    pub tokens_used: u64,
    pub source: AnswerSource,
    /// Cached figures verbatim plus any model-written narrative
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_result: Option<MatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<AnalysisPlan>,
}
