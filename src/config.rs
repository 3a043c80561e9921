//! Router Configuration
//!
//! Defaults, optionally overlaid by a JSON config file, then by environment
//! variables (a `.env` file is honoured). CLI flags are applied last by the binary.

use crate::error::{RouterError, Result};
use crate::fallback::prompt::PROMPT_OVERHEAD_TOKENS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub matcher: MatcherConfig,
    pub budget: BudgetConfig,
    pub context: ContextConfig,
    pub fallback: FallbackConfig,
    pub completion: CompletionConfig,
    pub dumps: DumpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum keyword-overlap score for a cache hit
    pub exact_threshold: f64,
    /// Minimum phrasing-similarity score for a cache hit
    pub fuzzy_threshold: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            exact_threshold: 0.6,
            fuzzy_threshold: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub per_minute_limit: u64,
    pub per_day_limit: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_minute_limit: 10_000,
            per_day_limit: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub top_n: usize,
    pub max_tokens: usize,
    pub recency_half_life_days: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            max_tokens: 2_000,
            recency_half_life_days: 7.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub max_tokens_per_query: u64,
    pub timeout_secs: u64,
    pub min_points: usize,
    pub max_points: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_query: 500,
            timeout_secs: 5,
            min_points: 3,
            max_points: 10,
        }
    }
}

impl FallbackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// No key means offline mode: every fallback degrades to placeholder rows
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    pub dir: PathBuf,
    pub refresh_interval_secs: u64,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("dumps"),
            refresh_interval_secs: 60,
        }
    }
}

impl DumpConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

impl RouterConfig {
    /// Load from a JSON file; missing sections fall back to defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: RouterConfig = serde_json::from_str(&raw).map_err(|e| {
            RouterError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    /// Defaults overlaid with the process environment (after loading `.env`)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values from an environment lookup. Split out so tests can
    /// feed a map instead of mutating the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.completion.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.completion.base_url = url;
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.completion.model = model;
        }
        if let Some(dir) = lookup("INSIGHT_DUMP_DIR") {
            self.dumps.dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("INSIGHT_TOKENS_PER_MINUTE") {
            self.budget.per_minute_limit = parse_number("INSIGHT_TOKENS_PER_MINUTE", &v)?;
        }
        if let Some(v) = lookup("INSIGHT_TOKENS_PER_DAY") {
            self.budget.per_day_limit = parse_number("INSIGHT_TOKENS_PER_DAY", &v)?;
        }
        if let Some(v) = lookup("INSIGHT_FALLBACK_TIMEOUT_SECS") {
            self.fallback.timeout_secs = parse_number("INSIGHT_FALLBACK_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.matcher.exact_threshold) || !in_unit(self.matcher.fuzzy_threshold) {
            return Err(RouterError::Config(
                "Matcher thresholds must lie in [0, 1]".to_string(),
            ));
        }
        if self.budget.per_minute_limit == 0 || self.budget.per_day_limit == 0 {
            return Err(RouterError::Config("Token limits must be non-zero".to_string()));
        }
        if self.budget.per_minute_limit > self.budget.per_day_limit {
            return Err(RouterError::Config(format!(
                "Per-minute limit {} exceeds per-day limit {}",
                self.budget.per_minute_limit, self.budget.per_day_limit
            )));
        }
        if self.fallback.max_tokens_per_query > self.budget.per_minute_limit {
            return Err(RouterError::Config(format!(
                "Per-query ceiling {} exceeds per-minute limit {}",
                self.fallback.max_tokens_per_query, self.budget.per_minute_limit
            )));
        }
        let per_query = self.fallback.max_tokens_per_query
            + self.context.max_tokens as u64
            + PROMPT_OVERHEAD_TOKENS;
        if per_query > self.budget.per_minute_limit {
            return Err(RouterError::Config(format!(
                "A fallback call may need {} tokens (completion {} + context {} + prompt {}), \
                 above the per-minute limit {}",
                per_query,
                self.fallback.max_tokens_per_query,
                self.context.max_tokens,
                PROMPT_OVERHEAD_TOKENS,
                self.budget.per_minute_limit
            )));
        }
        if self.fallback.min_points == 0 || self.fallback.min_points > self.fallback.max_points {
            return Err(RouterError::Config(format!(
                "Invalid data point range {}..={}",
                self.fallback.min_points, self.fallback.max_points
            )));
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| RouterError::Config(format!("{} must be an integer ({}): {}", key, value, e)))
}
