//! Fallback Responder
//!
//! Answers a sub-query the cache cannot serve. Order of operations:
//! build prompt -> reserve budget -> call with timeout -> commit or release
//! -> parse -> placeholder rows if anything went wrong. Always returns rows.

use crate::answer::AnswerSource;
use crate::config::FallbackConfig;
use crate::context_extractor::FallbackContext;
use crate::dump_store::{row, Row};
use crate::error::CompletionError;
use crate::fallback::domain::Domain;
use crate::fallback::parse::{parse_completion, ParsedResponse};
use crate::fallback::placeholder::placeholder_rows;
use crate::fallback::prompt::{build_prompt, prompt_tokens};
use crate::llm::CompletionService;
use crate::token_budget::{DenialReason, TokenBudgetManager};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Smallest completion ceiling worth calling the service for
const MIN_COMPLETION_TOKENS: u64 = 150;

/// How a fallback attempt ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackOutcome {
    Completed,
    BudgetExhausted { reason: DenialReason },
    TransportFailure { class: &'static str, message: String },
    Unparseable { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackAnswer {
    pub rows: Vec<Row>,
    pub narrative: Option<String>,
    pub tokens_used: u64,
    pub source: AnswerSource,
    pub domain: Domain,
    pub outcome: FallbackOutcome,
}

pub struct FallbackResponder {
    completion: Arc<dyn CompletionService>,
    budget: Arc<TokenBudgetManager>,
    config: FallbackConfig,
}

impl FallbackResponder {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        budget: Arc<TokenBudgetManager>,
        config: FallbackConfig,
    ) -> Self {
        Self {
            completion,
            budget,
            config,
        }
    }

    pub async fn respond(&self, query: &str, context: &FallbackContext) -> FallbackAnswer {
        let domain = Domain::detect(query);
        let mut request = build_prompt(
            query,
            domain,
            context,
            self.config.min_points,
            self.config.max_points,
            self.config.max_tokens_per_query,
        );
        let prompt = prompt_tokens(&request);
        let room = self.budget.max_reservation().saturating_sub(prompt);
        if request.max_tokens > room && room >= MIN_COMPLETION_TOKENS {
            debug!("Completion ceiling lowered from {} to {} tokens", request.max_tokens, room);
            request.max_tokens = room;
        }
        let ceiling = prompt + request.max_tokens;

        let reservation = match self.budget.reserve(ceiling) {
            Ok(r) => r,
            Err(denied) => {
                info!("Fallback skipped for '{}': {}", query, denied);
                return budget_exhausted(domain, denied.reason);
            }
        };

        let call = self.completion.complete(request);
        let response = match tokio::time::timeout(self.config.timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.config.timeout().as_millis() as u64)),
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                reservation.release();
                warn!("Completion failed ({}); serving placeholder rows", e);
                let outcome = FallbackOutcome::TransportFailure {
                    class: e.class(),
                    message: e.to_string(),
                };
                return placeholder(query, domain, 0, outcome);
            }
        };

        let charged = reservation.commit(response.tokens_used);
        match parse_completion(&response.text, self.config.max_points) {
            ParsedResponse::Parsed { rows, narrative } => {
                info!(
                    "Fallback answered '{}' with {} rows ({} tokens)",
                    query,
                    rows.len(),
                    charged
                );
                FallbackAnswer {
                    rows,
                    narrative,
                    tokens_used: charged,
                    source: AnswerSource::Fallback,
                    domain,
                    outcome: FallbackOutcome::Completed,
                }
            }
            ParsedResponse::Unparseable(reason) => {
                warn!("Unusable completion ({}); serving placeholder rows", reason);
                placeholder(query, domain, charged, FallbackOutcome::Unparseable { reason })
            }
        }
    }
}

fn placeholder(
    query: &str,
    domain: Domain,
    tokens_used: u64,
    outcome: FallbackOutcome,
) -> FallbackAnswer {
    FallbackAnswer {
        rows: placeholder_rows(query, domain),
        narrative: Some(format!(
            "Illustrative {} figures only; live analysis was unavailable.",
            domain.as_str()
        )),
        tokens_used,
        source: AnswerSource::Placeholder,
        domain,
        outcome,
    }
}

/// Zero-token template answer for an exhausted budget
fn budget_exhausted(domain: Domain, reason: DenialReason) -> FallbackAnswer {
    let retry = match reason {
        DenialReason::PerMinuteExceeded => "in about a minute",
        DenialReason::PerDailyExceeded => "after the daily budget resets (00:00 UTC)",
    };
    let message = format!("AI token budget exhausted ({}). Please retry {}.", reason, retry);
    FallbackAnswer {
        rows: vec![row([
            ("status", json!("budget_exhausted")),
            ("message", json!(message.clone())),
            ("retry", json!(retry)),
        ])],
        narrative: Some(message),
        tokens_used: 0,
        source: AnswerSource::Placeholder,
        domain,
        outcome: FallbackOutcome::BudgetExhausted { reason },
    }
}
