use crate::config::MatcherConfig;
use crate::dump_store::{DumpSnapshot, QueryPattern};
use crate::normalize::{is_stopword, normalize_query, tokens};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use strsim::{jaro_winkler, normalized_levenshtein};
use tracing::debug;

/// Two tokens count as the same word above this Jaro-Winkler similarity
const TOKEN_SIMILARITY: f64 = 0.9;
const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Exact,
    Fuzzy,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub pattern_id: Option<String>,
    /// Combined score in [0, 1]
    pub score: f64,
    pub method: MatchMethod,
}

impl MatchResult {
    pub fn none(best_score: f64) -> Self {
        Self {
            pattern_id: None,
            score: best_score,
            method: MatchMethod::None,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.pattern_id.is_some()
    }
}

/// Per-pattern breakdown, useful for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternScore {
    pub pattern_id: String,
    pub exact: f64,
    pub fuzzy: f64,
}

impl PatternScore {
    pub fn combined(&self) -> f64 {
        self.exact.max(self.fuzzy)
    }
}

/// Scores normalized queries against the pattern library.
/// Pure: no I/O, no budget interaction.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pub exact_threshold: f64,
    pub fuzzy_threshold: f64,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::from_config(&MatcherConfig::default())
    }
}

impl PatternMatcher {
    pub fn new(exact_threshold: f64, fuzzy_threshold: f64) -> Self {
        Self {
            exact_threshold,
            fuzzy_threshold,
        }
    }

    pub fn from_config(config: &MatcherConfig) -> Self {
        Self::new(config.exact_threshold, config.fuzzy_threshold)
    }

    /// Fraction of the pattern's keywords present in the query.
    /// Multi-word keywords must appear as a phrase.
    pub fn exact_score(&self, normalized_query: &str, pattern: &QueryPattern) -> f64 {
        if pattern.keywords.is_empty() {
            return 0.0;
        }
        let query_tokens = tokens(normalized_query);
        let padded = format!(" {} ", normalized_query);

        let hits = pattern
            .keywords
            .iter()
            .filter(|keyword| {
                if keyword.contains(' ') {
                    padded.contains(&format!(" {} ", keyword))
                } else {
                    query_tokens.iter().any(|t| same_stem(t, keyword))
                }
            })
            .count();

        hits as f64 / pattern.keywords.len() as f64
    }

    /// Best similarity between the query and any canonical phrasing: the mean
    /// of a typo-tolerant token Jaccard and whole-phrase edit similarity.
    pub fn fuzzy_score(&self, normalized_query: &str, pattern: &QueryPattern) -> f64 {
        let query_tokens = tokens(normalized_query);
        if query_tokens.is_empty() {
            return 0.0;
        }
        let query_content = join_tokens(normalized_query);

        pattern
            .phrasings
            .iter()
            .map(|phrasing| {
                let normalized = normalize_query(phrasing);
                let phrase_tokens = tokens(&normalized);
                let jaccard = soft_jaccard(&query_tokens, &phrase_tokens);
                let edit = normalized_levenshtein(&query_content, &join_tokens(&normalized));
                (jaccard + edit) / 2.0
            })
            .fold(0.0, f64::max)
    }

    pub fn score(&self, normalized_query: &str, pattern: &QueryPattern) -> PatternScore {
        PatternScore {
            pattern_id: pattern.id.clone(),
            exact: self.exact_score(normalized_query, pattern),
            fuzzy: self.fuzzy_score(normalized_query, pattern),
        }
    }

    fn qualifies(&self, score: &PatternScore) -> bool {
        score.exact >= self.exact_threshold || score.fuzzy >= self.fuzzy_threshold
    }

    /// Every pattern that has a dump, best first
    pub fn rank(&self, normalized_query: &str, snapshot: &DumpSnapshot) -> Vec<PatternScore> {
        let mut scores: Vec<(PatternScore, Option<DateTime<Utc>>)> = snapshot
            .patterns()
            .iter()
            .filter(|p| snapshot.record(&p.id).is_some())
            .map(|p| (self.score(normalized_query, p), snapshot.generated_at(&p.id)))
            .collect();
        scores.sort_by(|a, b| compare_candidates(b, a));
        scores.into_iter().map(|(s, _)| s).collect()
    }

    /// Find the cache entry for a query. Patterns whose dump has not been
    /// generated yet cannot serve a hit and are skipped. Ties on score go to
    /// the pattern with the most recently generated dump.
    pub fn match_query(&self, normalized_query: &str, snapshot: &DumpSnapshot) -> MatchResult {
        let ranked = self.rank(normalized_query, snapshot);
        let best_seen = ranked.first().map(|s| s.combined()).unwrap_or(0.0);

        let winner = ranked.into_iter().find(|s| self.qualifies(s));
        match winner {
            Some(score) => {
                let method = if score.exact >= self.exact_threshold {
                    MatchMethod::Exact
                } else {
                    MatchMethod::Fuzzy
                };
                debug!(
                    "Pattern '{}' matched ({:?}, exact {:.2}, fuzzy {:.2})",
                    score.pattern_id, method, score.exact, score.fuzzy
                );
                MatchResult {
                    score: score.combined(),
                    pattern_id: Some(score.pattern_id),
                    method,
                }
            }
            None => {
                debug!("No pattern qualified (best score {:.2})", best_seen);
                MatchResult::none(best_seen)
            }
        }
    }
}

fn compare_candidates(
    a: &(PatternScore, Option<DateTime<Utc>>),
    b: &(PatternScore, Option<DateTime<Utc>>),
) -> Ordering {
    let (sa, sb) = (a.0.combined(), b.0.combined());
    if (sa - sb).abs() > SCORE_EPSILON {
        return sa.partial_cmp(&sb).unwrap_or(Ordering::Equal);
    }
    // None < Some, so a pattern with a fresher dump wins
    a.1.cmp(&b.1)
}

/// Equal words, or equal after dropping a plural "s"
fn same_stem(a: &str, b: &str) -> bool {
    a == b || a.trim_end_matches('s') == b.trim_end_matches('s')
}

fn join_tokens(normalized: &str) -> String {
    normalized
        .split_whitespace()
        .filter(|t| !is_stopword(t))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaccard over token sets where near-identical words (typos, plurals) match
fn soft_jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matched = a
        .iter()
        .filter(|x| b.iter().any(|y| same_stem(x, y) || jaro_winkler(x, y) >= TOKEN_SIMILARITY))
        .count();
    let union = (a.len() + b.len() - matched).max(a.len().max(b.len()));
    (matched as f64 / union as f64).min(1.0)
}
