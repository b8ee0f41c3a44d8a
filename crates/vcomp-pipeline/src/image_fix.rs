//! Image auto-fixer.
//!
//! Detects segments whose image is missing, unreadable or failing the
//! size/aspect heuristic, searches the external image provider for a
//! replacement keyed by segment context, and falls back to a generated
//! placeholder when search comes up empty. Per-segment failures never
//! abort the pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vcomp_align::LlmClient;
use vcomp_models::{AssetRef, Job, OutputFormat, Segment};

use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::metrics::MetricsCollector;
use crate::scope::ResourceScope;
use crate::settings::Settings;

const STAGE: &str = "image_auto";

/// Minimum acceptable image edge, pixels.
const MIN_EDGE: u32 = 200;
/// Acceptable width/height ratio bounds.
const MIN_ASPECT: f64 = 0.2;
const MAX_ASPECT: f64 = 5.0;

/// Image search response: a list of candidate URLs.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    url: String,
}

/// Client for the external image-search provider.
pub struct ImageSearchClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ImageSearchClient {
    pub fn new(endpoint: String, api_key: Option<String>, timeout: Duration) -> PipelineResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            PipelineError::new(STAGE, ErrorKind::Download, "failed to build HTTP client")
                .with_cause(e)
        })?;
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    /// First result URL for a keyword query, if any.
    pub async fn search(&self, keywords: &[String]) -> PipelineResult<Option<String>> {
        let query = keywords.join(" ");
        let mut request = self.http.get(&self.endpoint).query(&[("query", query.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key.as_str())]);
        }

        let response = request.send().await.map_err(|e| {
            PipelineError::new(STAGE, ErrorKind::Download, format!("image search failed: {}", e))
                .with_cause(e)
        })?;

        if !response.status().is_success() {
            return Err(PipelineError::new(
                STAGE,
                ErrorKind::Download,
                format!("image search returned {}", response.status()),
            ));
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| {
            PipelineError::new(STAGE, ErrorKind::Processing, "invalid image search response")
                .with_cause(e)
        })?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| r.url)
            .find(|url| url.starts_with("http://") || url.starts_with("https://")))
    }
}

/// Why a segment's image needs fixing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDefect {
    Missing,
    Unreadable,
    TooSmall,
    BadAspect,
}

impl ImageDefect {
    fn as_str(&self) -> &'static str {
        match self {
            ImageDefect::Missing => "missing",
            ImageDefect::Unreadable => "unreadable",
            ImageDefect::TooSmall => "too_small",
            ImageDefect::BadAspect => "bad_aspect",
        }
    }
}

/// Inspect a resolved image file against the size/aspect heuristic.
pub fn inspect_image(asset: &AssetRef) -> Option<ImageDefect> {
    let path = match asset.resolved() {
        Some(path) => path,
        None => return Some(ImageDefect::Missing),
    };
    if !path.is_file() {
        return Some(ImageDefect::Missing);
    }

    let (width, height) = match image::image_dimensions(path) {
        Ok(dims) => dims,
        Err(_) => return Some(ImageDefect::Unreadable),
    };

    if width < MIN_EDGE || height < MIN_EDGE {
        return Some(ImageDefect::TooSmall);
    }
    let aspect = width as f64 / height as f64;
    if !(MIN_ASPECT..=MAX_ASPECT).contains(&aspect) {
        return Some(ImageDefect::BadAspect);
    }
    None
}

/// Derive 1-5 search keywords from segment context without the LLM.
pub fn derive_keywords(job: &Job, segment: &Segment) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();

    if let Some(niche) = &job.niche {
        keywords.push(niche.clone());
    }
    keywords.extend(job.keywords.iter().take(2).cloned());

    if let Some(content) = segment.voice_over.as_ref().and_then(|v| v.content.as_deref()) {
        // Longest words carry the most visual signal.
        let mut words: Vec<&str> = content
            .split_whitespace()
            .filter(|w| w.len() > 4)
            .collect();
        words.sort_by_key(|w| std::cmp::Reverse(w.len()));
        keywords.extend(
            words
                .into_iter()
                .take(2)
                .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()),
        );
    }

    keywords.retain(|k| !k.is_empty());
    keywords.dedup();
    keywords.truncate(5);

    if keywords.is_empty() {
        keywords.push("background".to_string());
    }
    keywords
}

/// Replaces broken segment images via search or placeholder.
pub struct ImageAutoFixer {
    search: Option<ImageSearchClient>,
    llm: Option<Arc<LlmClient>>,
    format: OutputFormat,
}

impl ImageAutoFixer {
    pub fn new(settings: &Settings, llm: Option<Arc<LlmClient>>) -> PipelineResult<Self> {
        let search = match &settings.ai.image_search_endpoint {
            Some(endpoint) => Some(ImageSearchClient::new(
                endpoint.clone(),
                settings.ai.image_search_api_key.clone(),
                settings.download.timeout,
            )?),
            None => None,
        };

        Ok(Self {
            search,
            llm,
            format: settings.output_format(),
        })
    }

    /// Fix every defective image in the job. Returns the number of
    /// segments that were touched.
    ///
    /// `fetch` downloads a substitute URL into the scope and returns its
    /// local path; the downloader provides it so fetching stays in one
    /// place.
    pub async fn fix_job<F, Fut>(
        &self,
        job: &mut Job,
        scope: &ResourceScope,
        metrics: &MetricsCollector,
        cancel: CancellationToken,
        fetch: F,
    ) -> PipelineResult<u32>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = PipelineResult<PathBuf>>,
    {
        let mut fixed = 0u32;

        for index in 0..job.segments.len() {
            if cancel.is_cancelled() {
                return Err(PipelineError::cancelled(STAGE));
            }

            // Video segments render without an image.
            if job.segments[index].video.is_some() {
                continue;
            }
            let defect = match &job.segments[index].image {
                Some(image) => match inspect_image(image) {
                    Some(defect) => defect,
                    None => continue,
                },
                None => continue,
            };

            let segment_id = job.segments[index].id.clone();
            let original_url = job.segments[index]
                .image
                .as_ref()
                .map(|i| i.url.clone())
                .unwrap_or_default();

            debug!(
                segment_id = %segment_id,
                defect = defect.as_str(),
                "Segment image needs fixing"
            );

            match self
                .substitute(job, index, scope, cancel.clone(), &fetch)
                .await
            {
                Ok(substitute_url) => {
                    fixed += 1;
                    metrics.warn(
                        "ImageSubstituted",
                        Some(&segment_id),
                        format!(
                            "image '{}' ({}) replaced by '{}'",
                            original_url,
                            defect.as_str(),
                            substitute_url
                        ),
                    );
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    // Isolated: the segment keeps its defective reference
                    // and the renderer reports it if it cannot cope.
                    warn!(
                        segment_id = %segment_id,
                        error = %e,
                        "Image fix failed for segment"
                    );
                    metrics.warn(
                        "ImageFixFailed",
                        Some(&segment_id),
                        format!("could not substitute image '{}': {}", original_url, e.message),
                    );
                }
            }
        }

        if fixed > 0 {
            info!(fixed = fixed, "Image auto-fixer substituted images");
        }
        Ok(fixed)
    }

    /// Search, fetch and attach a substitute; placeholder on any miss.
    async fn substitute<F, Fut>(
        &self,
        job: &mut Job,
        index: usize,
        scope: &ResourceScope,
        cancel: CancellationToken,
        fetch: &F,
    ) -> PipelineResult<String>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = PipelineResult<PathBuf>>,
    {
        let keywords = self.keywords_for(job, index).await;

        if let Some(search) = &self.search {
            match search.search(&keywords).await {
                Ok(Some(url)) => match fetch(url.clone()).await {
                    Ok(path) => {
                        let image = AssetRef {
                            url: url.clone(),
                            local_path: Some(path),
                        };
                        if inspect_image(&image).is_none() {
                            job.segments[index].image = Some(image);
                            return Ok(url);
                        }
                        debug!(url = %url, "Search result failed image heuristic");
                    }
                    Err(e) => debug!(url = %url, error = %e, "Search result fetch failed"),
                },
                Ok(None) => debug!(keywords = ?keywords, "Image search returned no results"),
                Err(e) => debug!(error = %e, "Image search unavailable"),
            }
        }

        // Deterministic fallback: a generated placeholder canvas.
        let placeholder_dir = scope.acquire_temp("placeholders")?;
        let path = placeholder_dir.join(format!("segment_{:03}.png", index));
        let label = job.niche.clone();
        vcomp_media::generate_placeholder(&path, &self.format, label.as_deref(), cancel)
            .await
            .map_err(|e| PipelineError::from_media(STAGE, e))?;

        job.segments[index].image = Some(AssetRef {
            url: format!("placeholder://segment/{}", job.segments[index].id),
            local_path: Some(path),
        });
        Ok("placeholder".to_string())
    }

    async fn keywords_for(&self, job: &Job, index: usize) -> Vec<String> {
        let segment = &job.segments[index];

        if let Some(llm) = &self.llm {
            let context = format!(
                "niche: {}\nkeywords: {}\ntranscript: {}",
                job.niche.as_deref().unwrap_or(""),
                job.keywords.join(", "),
                segment
                    .voice_over
                    .as_ref()
                    .and_then(|v| v.content.as_deref())
                    .unwrap_or("")
            );
            match llm.extract_keywords(&context).await {
                Ok(keywords) => return keywords,
                Err(e) => debug!(error = %e, "LLM keyword extraction failed, using heuristic"),
            }
        }

        derive_keywords(job, segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcomp_models::Job;

    fn job_with_content(content: &str) -> Job {
        Job::from_json(&serde_json::json!({
            "niche": "astronomy",
            "keywords": ["space", "stars"],
            "segments": [{
                "id": "s1",
                "image": { "url": "http://ex/a.jpg" },
                "voice_over": { "url": "http://ex/a.mp3", "content": content }
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_missing_local_path_is_defect() {
        let asset = AssetRef::new("http://ex/a.jpg");
        assert_eq!(inspect_image(&asset), Some(ImageDefect::Missing));
    }

    #[test]
    fn test_unreadable_file_is_defect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();

        let asset = AssetRef {
            url: "http://ex/a.jpg".into(),
            local_path: Some(path),
        };
        assert_eq!(inspect_image(&asset), Some(ImageDefect::Unreadable));
    }

    #[test]
    fn test_keywords_prefer_niche_and_job_keywords() {
        let job = job_with_content("telescopes observing distant galaxies tonight");
        let keywords = derive_keywords(&job, &job.segments[0]);

        assert!(keywords.len() <= 5);
        assert_eq!(keywords[0], "astronomy");
        assert!(keywords.contains(&"space".to_string()));
        // Long transcript words contribute visual signal.
        assert!(keywords.iter().any(|k| k.contains("telescopes") || k.contains("observing")));
    }

    #[test]
    fn test_keywords_never_empty() {
        let job = Job::from_json(&serde_json::json!({
            "segments": [{ "id": "s1", "image": { "url": "http://ex/a.jpg" } }]
        }))
        .unwrap();
        let keywords = derive_keywords(&job, &job.segments[0]);
        assert_eq!(keywords, vec!["background"]);
    }

    #[tokio::test]
    async fn test_search_client_picks_first_http_url() {
        use wiremock::matchers::{method, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("query", "astronomy space"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    { "url": "ftp://bad.example/x.jpg" },
                    { "url": "https://images.example/good.jpg" }
                ]
            })))
            .mount(&server)
            .await;

        let client =
            ImageSearchClient::new(server.uri(), None, Duration::from_secs(5)).unwrap();
        let url = client
            .search(&["astronomy".into(), "space".into()])
            .await
            .unwrap();
        assert_eq!(url.as_deref(), Some("https://images.example/good.jpg"));
    }

    #[tokio::test]
    async fn test_search_client_error_status() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client =
            ImageSearchClient::new(server.uri(), None, Duration::from_secs(5)).unwrap();
        assert!(client.search(&["x".into()]).await.is_err());
    }
}
