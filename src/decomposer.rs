//! Query Decomposer
//!
//! Splits compound analytical questions into named sub-queries using a fixed
//! template per cue family, then merges the per-component results and
//! classifies the strategy from the realized cache-hit ratio.

use crate::answer::AnswerSource;
use crate::dump_store::Row;
use crate::normalize::{is_stopword, normalize_query, strip_filler};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

lazy_static! {
    static ref LIST_SEPARATOR: Regex =
        Regex::new(r"\s*,\s*|\s+(?:and|vs|versus|with|against)\s+").unwrap();
    static ref LIST_NOISE: Regex = Regex::new(r"[^a-z0-9,\s-]").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

const DASHBOARD_CUES: &[&str] = &["dashboard", "overview"];
const KPI_CUES: &[&str] = &["kpi", "kpis"];
const COMPARE_CUES: &[&str] = &["compare", "comparison", "vs", "versus"];
const BREAKDOWN_CUES: &[&str] = &["break down", "breakdown", "split"];
const DRILL_CUES: &[&str] = &["drill into", "drill down"];
const EXPLAIN_CUES: &[&str] = &["why", "explain", "reason", "root cause"];

/// Dropped when reducing an analytical question to its subject
const NON_SUBJECT_WORDS: &[&str] = &[
    // cues
    "why", "explain", "reason", "reasons", "root", "cause", "break", "down", "breakdown", "split",
    "drill", "into",
    // auxiliaries
    "did", "does", "do", "has", "have", "had", "been", "be", "so",
    // change verbs
    "drop", "dropped", "fall", "fell", "rise", "rose", "increase", "increased", "decrease",
    "decreased", "decline", "declined", "change", "changed", "go", "went", "up", "spike", "spiked",
    "low", "lower", "high", "higher",
    // time
    "yesterday", "today", "last", "this", "week", "month", "quarter", "year", "recently",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CueFamily {
    Dashboard,
    Compare,
    Breakdown,
    DrillDown,
    Explain,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubQuery {
    pub name: String,
    pub text: String,
}

impl SubQuery {
    fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decomposition {
    pub cue: Option<CueFamily>,
    pub components: Vec<SubQuery>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Cache,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    CacheHeavy,
    BalancedHybrid,
    AiHeavy,
    FullAi,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CacheHeavy => "cache_heavy",
            Strategy::BalancedHybrid => "balanced_hybrid",
            Strategy::AiHeavy => "ai_heavy",
            Strategy::FullAi => "full_ai",
        }
    }
}

/// Classify by the fraction of components served from cache
pub fn classify_strategy(cache_hits: usize, total: usize) -> Strategy {
    if total == 0 || cache_hits == 0 {
        return Strategy::FullAi;
    }
    let h = cache_hits as f64 / total as f64;
    if h >= 0.8 {
        Strategy::CacheHeavy
    } else if h >= 0.4 {
        Strategy::BalancedHybrid
    } else {
        Strategy::AiHeavy
    }
}

/// A component after resolution, as the router hands it back
#[derive(Debug, Clone)]
pub struct ResolvedComponent {
    pub sub_query: SubQuery,
    pub resolution: Resolution,
    pub pattern_id: Option<String>,
    pub rows: Vec<Row>,
    pub narrative: Option<String>,
    pub tokens_used: u64,
    pub source: AnswerSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentResult {
    pub source: AnswerSource,
    pub row_count: usize,
    pub tokens_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanComponent {
    pub name: String,
    pub sub_query: String,
    pub resolution: Resolution,
    pub result: ComponentResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cue: Option<CueFamily>,
    pub components: Vec<PlanComponent>,
    pub strategy: Strategy,
    pub cache_hit_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct MergedAnswer {
    pub rows: Vec<Row>,
    pub summary: String,
    pub tokens_used: u64,
    pub source: AnswerSource,
    pub plan: AnalysisPlan,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueryDecomposer;

impl QueryDecomposer {
    /// Split `query` by the first cue family that applies, in dashboard,
    /// compare, breakdown, drill-down, explain order. No cue (or a list cue
    /// with fewer than two items) yields the query as a single component.
    pub fn decompose(&self, query: &str) -> Decomposition {
        let normalized = normalize_query(query);
        let padded = format!(" {} ", normalized);
        let has = |cues: &[&str]| cues.iter().any(|c| padded.contains(&format!(" {} ", c)));

        if has(DASHBOARD_CUES) || has(KPI_CUES) {
            let items = list_items(query, DASHBOARD_CUES);
            if items.len() >= 2 {
                return decomposition(CueFamily::Dashboard, items);
            }
        }

        if has(COMPARE_CUES) {
            let items = list_items(query, &["compare", "comparison of", "comparison"]);
            if items.len() >= 2 {
                return decomposition(CueFamily::Compare, items);
            }
        }

        let subject = subject_of(&normalized);
        if has(BREAKDOWN_CUES) {
            return Decomposition {
                cue: Some(CueFamily::Breakdown),
                components: vec![
                    SubQuery::new("breakdown", subject.clone()),
                    SubQuery::new("share", format!("share of {}", subject)),
                ],
            };
        }
        if has(DRILL_CUES) {
            return Decomposition {
                cue: Some(CueFamily::DrillDown),
                components: vec![
                    SubQuery::new("overview", subject.clone()),
                    SubQuery::new("detail", format!("{} detail", subject)),
                ],
            };
        }
        if has(EXPLAIN_CUES) {
            return Decomposition {
                cue: Some(CueFamily::Explain),
                components: vec![
                    SubQuery::new("trend", format!("{} trend", subject)),
                    SubQuery::new("breakdown", format!("{} by region", subject)),
                    SubQuery::new("root_cause", query.trim()),
                ],
            };
        }

        Decomposition {
            cue: None,
            components: vec![SubQuery::new("answer", query.trim())],
        }
    }

    /// Combine resolved components into one answer. Rows gain a `component`
    /// column when more than one component contributed.
    pub fn merge(&self, cue: Option<CueFamily>, resolved: Vec<ResolvedComponent>) -> MergedAnswer {
        let total = resolved.len();
        let cache_hits = resolved.iter().filter(|c| c.resolution == Resolution::Cache).count();
        let strategy = classify_strategy(cache_hits, total);
        let tag_rows = total > 1;

        let source = if total > 0 && cache_hits == total {
            AnswerSource::Cache
        } else if cache_hits > 0 {
            AnswerSource::Hybrid
        } else if total > 0 && resolved.iter().all(|c| c.source == AnswerSource::Placeholder) {
            AnswerSource::Placeholder
        } else {
            AnswerSource::Fallback
        };

        let mut rows = Vec::new();
        let mut summary = Vec::new();
        let mut components = Vec::with_capacity(total);
        let mut tokens_used = 0;

        for component in resolved {
            tokens_used += component.tokens_used;
            let prefix = if tag_rows {
                format!("{}: ", component.sub_query.name)
            } else {
                String::new()
            };
            match component.resolution {
                // Cached figures go into the summary verbatim
                Resolution::Cache => summary.push(format!(
                    "{}{}",
                    prefix,
                    Value::Array(component.rows.iter().cloned().map(Value::Object).collect())
                )),
                Resolution::Fallback => {
                    if let Some(narrative) = &component.narrative {
                        summary.push(format!("{}{}", prefix, narrative));
                    }
                }
            }

            components.push(PlanComponent {
                name: component.sub_query.name.clone(),
                sub_query: component.sub_query.text.clone(),
                resolution: component.resolution,
                result: ComponentResult {
                    source: component.source,
                    row_count: component.rows.len(),
                    tokens_used: component.tokens_used,
                    pattern_id: component.pattern_id.clone(),
                },
            });

            for mut row in component.rows {
                if tag_rows {
                    row.insert(
                        "component".to_string(),
                        Value::String(component.sub_query.name.clone()),
                    );
                }
                rows.push(row);
            }
        }

        let cache_hit_ratio = if total == 0 { 0.0 } else { cache_hits as f64 / total as f64 };
        debug!("Merged {} components: {:?}, {} tokens", total, strategy, tokens_used);

        MergedAnswer {
            rows,
            summary: summary.join("\n"),
            tokens_used,
            source,
            plan: AnalysisPlan {
                cue,
                components,
                strategy,
                cache_hit_ratio,
            },
        }
    }
}

fn decomposition(cue: CueFamily, items: Vec<(String, String)>) -> Decomposition {
    Decomposition {
        cue: Some(cue),
        components: items.into_iter().map(|(name, text)| SubQuery::new(name, text)).collect(),
    }
}

/// Enumerated subjects after an anchor word, as `(name, sub-query text)`.
/// Works on the raw query because normalization drops the commas.
/// A noun shared by the list ("sales, inventory and warranty KPIs") is
/// carried onto every single-word item.
fn list_items(query: &str, anchors: &[&str]) -> Vec<(String, String)> {
    let lowered = LIST_NOISE.replace_all(&query.to_lowercase(), " ").to_string();
    let cleaned = WHITESPACE.replace_all(lowered.trim(), " ").to_string();
    let cleaned = strip_filler(&cleaned);

    let mut body = cleaned.as_str();
    for anchor in anchors {
        if let Some(pos) = find_word(body, anchor) {
            body = body[pos + anchor.len()..].trim_start();
            for lead in ["of ", "for ", "on ", "the "] {
                body = body.strip_prefix(lead).unwrap_or(body);
            }
            break;
        }
    }

    let mut items: Vec<String> = LIST_SEPARATOR
        .split(body)
        .map(|item| {
            let item = item.trim();
            let item = item.strip_prefix("and ").unwrap_or(item);
            trim_stopwords(item)
        })
        .filter(|item| !item.is_empty())
        .collect();

    if items.len() < 2 {
        return Vec::new();
    }

    let last_words: Vec<&str> = items[items.len() - 1].split_whitespace().collect();
    let leading_are_single_words = items[..items.len() - 1].iter().all(|i| !i.contains(' '));
    let shared_noun = if last_words.len() > 1 && leading_are_single_words {
        last_words.last().map(|w| w.to_string())
    } else {
        None
    };

    if let Some(noun) = &shared_noun {
        let last = items.len() - 1;
        for item in items[..last].iter_mut() {
            *item = format!("{} {}", item, noun);
        }
    }

    items
        .into_iter()
        .map(|text| {
            let name_part = match &shared_noun {
                Some(noun) => text.strip_suffix(noun.as_str()).unwrap_or(&text).trim().to_string(),
                None => text.clone(),
            };
            (name_part.replace(' ', "_"), text)
        })
        .collect()
}

/// Byte offset of `word` in `text` at word boundaries
fn find_word(text: &str, word: &str) -> Option<usize> {
    // A match in the padded text starts one byte early, at the space
    format!(" {} ", text).find(&format!(" {} ", word))
}

fn trim_stopwords(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.iter().position(|w| !is_stopword(w)).unwrap_or(words.len());
    let end = words.iter().rposition(|w| !is_stopword(w)).map(|i| i + 1).unwrap_or(start);
    words[start..end.max(start)].join(" ")
}

/// What an analytical question is about: cue, auxiliary, change and time
/// words removed, stopwords trimmed from the edges
fn subject_of(normalized: &str) -> String {
    let kept: Vec<&str> = normalized
        .split_whitespace()
        .filter(|w| !NON_SUBJECT_WORDS.contains(w))
        .collect();
    let subject = trim_stopwords(&kept.join(" "));
    if subject.is_empty() {
        normalized.to_string()
    } else {
        subject
    }
}
