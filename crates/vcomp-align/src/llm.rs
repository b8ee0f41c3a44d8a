//! LLM structured-output client.
//!
//! The LLM is only ever asked for output matching a JSON schema, and every
//! response is re-validated by deterministic rules before use, so the rest
//! of the pipeline depends on the validated record types, never on the
//! model. The whole client is optional; callers fall back to deterministic
//! logic when it is disabled or failing.

use std::time::Duration;

use reqwest::Client;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AlignError, AlignResult};
use crate::splitter;
use crate::types::{KeywordOutput, SpanRules, SpanSplitOutput};

/// Configuration for the LLM client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Structured-output endpoint URL
    pub endpoint: String,
    /// Model identifier
    pub model: String,
    /// API key, sent as a bearer token when present
    pub api_key: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8900/v1/structured".to_string(),
            model: "default".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Structured-output request envelope.
#[derive(Debug, Serialize)]
struct StructuredRequest {
    model: String,
    prompt: String,
    output_schema: serde_json::Value,
}

/// Client for LLM structured-output calls.
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new LLM client.
    pub fn new(config: LlmConfig) -> AlignResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(AlignError::Network)?;

        Ok(Self { http, config })
    }

    /// Issue a structured-output call and deserialize into `T`.
    pub async fn structured<T>(&self, prompt: &str) -> AlignResult<T>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = serde_json::to_value(schema_for!(T))
            .map_err(|e| AlignError::llm_failed(format!("schema serialization: {}", e)))?;

        let request = StructuredRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            output_schema: schema,
        };

        debug!(model = %self.config.model, "Sending structured LLM request");

        let mut builder = self.http.post(&self.config.endpoint).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(AlignError::Network)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AlignError::llm_failed(format!(
                "LLM returned {}: {}",
                status, body
            )));
        }

        let text = response.text().await.map_err(AlignError::Network)?;
        parse_structured(&text)
    }

    /// Split a transcript into display spans via the LLM, repaired by the
    /// deterministic rule checker.
    pub async fn split_spans(
        &self,
        transcript: &str,
        rules: &SpanRules,
    ) -> AlignResult<Vec<String>> {
        let prompt = format!(
            "Split the following transcript into subtitle lines for on-screen \
             display. Each line must contain {} to {} words and at most {} \
             characters. Never split compound or hyphenated words. Preserve \
             every word in order; do not rephrase.\n\nTRANSCRIPT:\n{}",
            rules.min_words, rules.max_words, rules.max_chars, transcript
        );

        let output: SpanSplitOutput = self.structured(&prompt).await?;
        let repaired = splitter::repair_spans(output.segments, rules);

        // The repairer preserves words; a mismatch means the model rephrased.
        let original: Vec<&str> = transcript.split_whitespace().collect();
        let produced: Vec<String> = repaired
            .iter()
            .flat_map(|s| s.split_whitespace().map(str::to_string))
            .collect();
        if produced.len() != original.len() {
            warn!(
                expected = original.len(),
                produced = produced.len(),
                "LLM span split altered the transcript, rejecting"
            );
            return Err(AlignError::SchemaValidation(
                "span split does not preserve transcript words".to_string(),
            ));
        }

        Ok(repaired)
    }

    /// Extract 1-5 short search keywords from segment context.
    pub async fn extract_keywords(&self, context: &str) -> AlignResult<Vec<String>> {
        let prompt = format!(
            "Extract 1 to 5 short image-search keywords capturing the visual \
             subject of this content. Return only the keywords.\n\nCONTENT:\n{}",
            context
        );

        let output: KeywordOutput = self.structured(&prompt).await?;
        let keywords: Vec<String> = output
            .keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .take(5)
            .collect();

        if keywords.is_empty() {
            return Err(AlignError::SchemaValidation(
                "keyword extraction returned no keywords".to_string(),
            ));
        }
        Ok(keywords)
    }
}

/// Parse a structured response body, tolerating markdown code fences.
fn parse_structured<T: DeserializeOwned>(text: &str) -> AlignResult<T> {
    let text = text.trim();
    let text = text.strip_prefix("```json").unwrap_or(text);
    let text = text.strip_prefix("```").unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);

    serde_json::from_str(text.trim())
        .map_err(|e| AlignError::SchemaValidation(format!("structured output mismatch: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> LlmConfig {
        LlmConfig {
            endpoint: format!("{}/v1/structured", server.uri()),
            model: "test-model".to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_parse_structured_plain_and_fenced() {
        let plain: SpanSplitOutput = parse_structured(r#"{"segments": ["a b"]}"#).unwrap();
        assert_eq!(plain.segments, vec!["a b"]);

        let fenced: SpanSplitOutput =
            parse_structured("```json\n{\"segments\": [\"a b\"]}\n```").unwrap();
        assert_eq!(fenced.segments, vec!["a b"]);
    }

    #[tokio::test]
    async fn test_split_spans_includes_schema_in_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/structured"))
            .and(body_partial_json(serde_json::json!({ "model": "test-model" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "segments": ["Hello world foo"]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(config_for(&server)).unwrap();
        let spans = client
            .split_spans("Hello world foo", &SpanRules::default())
            .await
            .unwrap();
        assert_eq!(spans, vec!["Hello world foo"]);
    }

    #[tokio::test]
    async fn test_split_spans_rejects_rephrased_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/structured"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "segments": ["Completely different words entirely made up"]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(config_for(&server)).unwrap();
        let err = client
            .split_spans("Hello world", &SpanRules::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AlignError::SchemaValidation(_)));
    }

    #[tokio::test]
    async fn test_extract_keywords_caps_at_five() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/structured"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "keywords": ["a", "b", "c", "d", "e", "f", "g"]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(config_for(&server)).unwrap();
        let keywords = client.extract_keywords("some context").await.unwrap();
        assert_eq!(keywords.len(), 5);
    }

    #[tokio::test]
    async fn test_llm_error_status_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/structured"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = LlmClient::new(config_for(&server)).unwrap();
        let err = client.extract_keywords("ctx").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
