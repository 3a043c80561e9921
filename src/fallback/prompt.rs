use crate::context_extractor::FallbackContext;
use crate::fallback::domain::Domain;
use crate::llm::CompletionRequest;
use crate::normalize::estimate_tokens;
use itertools::Itertools;

/// Upper bound on the fixed instructions around the question and context
pub const PROMPT_OVERHEAD_TOKENS: u64 = 200;

const SYSTEM_PROMPT: &str = "You are a business analytics assistant for an automotive \
dealer network. You answer with a single JSON object and nothing else.";

/// Token-optimized prompt: compact context, one explicit output contract
pub fn build_prompt(
    query: &str,
    domain: Domain,
    context: &FallbackContext,
    min_points: usize,
    max_points: usize,
    max_tokens: u64,
) -> CompletionRequest {
    let fields = domain
        .fields()
        .iter()
        .map(|f| format!("\"{}\"", f))
        .join(",");

    let context_block = if context.is_empty() {
        "Context: none available. Use typical figures for this business.".to_string()
    } else {
        let lines = context.snippets.iter().map(|s| format!("- {}", s.excerpt)).join("\n");
        format!("Context (cached results):\n{}", lines)
    };

    let user_prompt = format!(
        r#"Question: "{}"
Domain: {}
{}
Return JSON: {{"summary":"1-2 sentences","data":[{{{}}}]}}
Rules: "data" MUST hold {} to {} objects with fields {} even if context is missing.
Numbers as JSON numbers."#,
        query,
        domain.as_str(),
        context_block,
        domain
            .fields()
            .iter()
            .map(|f| format!("\"{}\":...", f))
            .join(","),
        min_points,
        max_points,
        fields
    );

    CompletionRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt,
        max_tokens,
    }
}

/// Estimated prompt size, reserved on top of the completion ceiling
pub fn prompt_tokens(request: &CompletionRequest) -> u64 {
    (estimate_tokens(&request.system_prompt) + estimate_tokens(&request.user_prompt)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_extractor::ContextSnippet;

    #[test]
    fn test_prompt_demands_points_without_context() {
        let request = build_prompt(
            "Why did EV sales drop?",
            Domain::Sales,
            &FallbackContext::default(),
            3,
            10,
            500,
        );
        assert_eq!(request.max_tokens, 500);
        assert!(request.user_prompt.contains("3 to 10 objects"));
        assert!(request.user_prompt.contains("\"dealer\",\"region\",\"volume\""));
        assert!(request.user_prompt.contains("none available"));
    }

    #[test]
    fn test_prompt_includes_snippets() {
        let context = FallbackContext {
            snippets: vec![ContextSnippet {
                dump_id: "sales_by_region".into(),
                excerpt: "[sales/sales_by_region v3] [{\"region\":\"Northeast\"}]".into(),
                relevance_score: 0.9,
                estimated_tokens: 14,
            }],
            estimated_tokens: 14,
        };
        let request = build_prompt("sales trend", Domain::Sales, &context, 3, 10, 500);
        assert!(request.user_prompt.contains("sales_by_region v3"));
        assert!(prompt_tokens(&request) > 14);
    }
}
