use crate::config::CompletionConfig;
use crate::error::{classify_status, CompletionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One synchronous completion call; the router keeps no conversation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    pub tokens_used: u64,
}

/// The metered external completion service
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError>;
}

/// OpenAI-compatible chat completions client
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f64,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &CompletionConfig, timeout: Duration) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                CompletionError::Unavailable(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout,
        })
    }

    pub fn is_offline(&self) -> bool {
        self.api_key.is_none()
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CompletionError::Unavailable("no API key configured".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": request.max_tokens
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    CompletionError::Unavailable(format!("LLM API call failed: {}", e))
                }
            })?;

        if let Some(err) = classify_status(response.status().as_u16()) {
            return Err(err);
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| {
                CompletionError::Malformed(format!("Failed to parse LLM response: {}", e))
            })?;

        parse_chat_response(&response_json)
    }
}

/// Pull the text and token usage out of a chat-completions payload
pub fn parse_chat_response(
    response_json: &serde_json::Value,
) -> Result<CompletionResponse, CompletionError> {
    let text = response_json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| CompletionError::Malformed("No content in LLM response".to_string()))?;

    // Some gateways omit usage; estimate from the text rather than charging nothing
    let tokens_used = response_json["usage"]["total_tokens"]
        .as_u64()
        .unwrap_or_else(|| crate::normalize::estimate_tokens(text) as u64);

    debug!("Completion returned {} chars, {} tokens", text.len(), tokens_used);
    Ok(CompletionResponse {
        text: text.to_string(),
        tokens_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_chat_response() {
        let payload = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": "[{\"label\":\"a\",\"value\":1}]"
            }}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
        });
        let parsed = parse_chat_response(&payload).unwrap();
        assert_eq!(parsed.tokens_used, 150);
        assert!(parsed.text.starts_with('['));
    }

    #[test]
    fn test_parse_chat_response_without_content() {
        let err = parse_chat_response(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, CompletionError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_offline_client_is_unavailable_without_io() {
        let client = LlmClient::new(&CompletionConfig::default(), Duration::from_secs(1)).unwrap();
        assert!(client.is_offline());
        let err = client
            .complete(CompletionRequest {
                system_prompt: "s".into(),
                user_prompt: "u".into(),
                max_tokens: 10,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Unavailable(_)));
    }
}
