//! Forced-aligner HTTP client.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{AlignError, AlignResult};
use crate::types::WordTimestamp;

/// Configuration for the aligner client.
#[derive(Debug, Clone)]
pub struct AlignerConfig {
    /// Base URL of the forced-aligner service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8765".to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 2,
        }
    }
}

/// Aligner response envelope. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct AlignResponse {
    words: Vec<AlignedWord>,
}

#[derive(Debug, Deserialize)]
struct AlignedWord {
    word: String,
    start: f64,
    end: f64,
}

/// Client for the forced-alignment service.
pub struct AlignerClient {
    http: Client,
    config: AlignerConfig,
}

impl AlignerClient {
    /// Create a new aligner client.
    pub fn new(config: AlignerConfig) -> AlignResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(AlignError::Network)?;

        Ok(Self { http, config })
    }

    /// Check if the aligner service is reachable.
    pub async fn health_check(&self) -> AlignResult<bool> {
        let url = format!("{}/health", self.config.base_url);

        match self.http.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                warn!("Aligner health check error: {}", e);
                Ok(false)
            }
        }
    }

    /// Align a transcript against its voice-over audio.
    ///
    /// Returns per-word timestamps in transcript order.
    pub async fn align(
        &self,
        audio_path: &Path,
        transcript: &str,
    ) -> AlignResult<Vec<WordTimestamp>> {
        let url = format!("{}/align", self.config.base_url);
        let audio = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());

        debug!(
            audio = %audio_path.display(),
            transcript_len = transcript.len(),
            "Sending alignment request to {}", url
        );

        let response = self
            .with_retry(|| async {
                let form = Form::new()
                    .part(
                        "audio",
                        Part::bytes(audio.clone()).file_name(file_name.clone()),
                    )
                    .text("transcript", transcript.to_string());

                let response = self
                    .http
                    .post(&url)
                    .multipart(form)
                    .send()
                    .await
                    .map_err(AlignError::Network)?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(AlignError::request_failed(format!(
                        "aligner returned {}: {}",
                        status, body
                    )));
                }

                Ok(response)
            })
            .await?;

        let parsed: AlignResponse = response
            .json()
            .await
            .map_err(|e| AlignError::invalid_response(e.to_string()))?;

        Ok(parsed
            .words
            .into_iter()
            .map(|w| WordTimestamp {
                word: w.word,
                start: w.start,
                end: w.end,
            })
            .collect())
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> AlignResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = AlignResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Aligner request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| AlignError::request_failed("unknown error")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> AlignerConfig {
        AlignerConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
            max_retries: 0,
        }
    }

    #[tokio::test]
    async fn test_align_parses_words_ignoring_unknown_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/align"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "words": [
                    { "word": "Hello", "start": 0.0, "end": 0.42, "case": "success" },
                    { "word": "world", "start": 0.5, "end": 0.98, "case": "success" }
                ],
                "extra": true
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("a.mp3");
        tokio::fs::write(&audio, b"fake audio").await.unwrap();

        let client = AlignerClient::new(config_for(&server)).unwrap();
        let words = client.align(&audio, "Hello world").await.unwrap();

        assert_eq!(words.len(), 2);
        assert_eq!(words[0].word, "Hello");
        assert!((words[1].end - 0.98).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_align_surfaces_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/align"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("a.mp3");
        tokio::fs::write(&audio, b"fake audio").await.unwrap();

        let client = AlignerClient::new(config_for(&server)).unwrap();
        let err = client.align(&audio, "Hello").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = AlignerClient::new(config_for(&server)).unwrap();
        assert!(client.health_check().await.unwrap());
    }
}
