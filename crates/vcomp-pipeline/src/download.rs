//! Concurrent asset downloader.
//!
//! Walks every asset reference of a job, deduplicates by URL, fetches
//! remote assets under a bounded concurrency and assigns each reference its
//! resolved `local_path`. The same URL referenced N times produces exactly
//! one file. Local paths pass through after an existence check.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vcomp_models::{AssetKind, Job};

use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::retry::{retry_async, RetryPolicy, RetryResult};
use crate::scope::ResourceScope;
use crate::settings::DownloadSettings;

const STAGE: &str = "download";

/// A reference that could not be fetched but is fixable downstream.
#[derive(Debug, Clone)]
pub struct ImageFailure {
    pub segment_id: Option<String>,
    pub url: String,
    pub message: String,
}

/// Result of resolving a job's assets.
#[derive(Debug, Default)]
pub struct DownloadOutcome {
    /// Unique remote files fetched
    pub fetched: u32,
    /// Image fetch failures left for the auto-fixer
    pub image_failures: Vec<ImageFailure>,
}

/// One deduplicated remote asset and everywhere it is referenced.
#[derive(Debug)]
struct RemoteAsset {
    url: String,
    kinds: HashSet<AssetKind>,
    segment_ids: Vec<Option<String>>,
}

/// Concurrent, deduplicating asset fetcher.
pub struct Downloader {
    http: reqwest::Client,
    settings: DownloadSettings,
    /// Leave failed image refs unresolved instead of failing the job
    allow_missing_images: bool,
}

impl Downloader {
    pub fn new(settings: DownloadSettings, allow_missing_images: bool) -> PipelineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| {
                PipelineError::new(STAGE, ErrorKind::Download, "failed to build HTTP client")
                    .with_cause(e)
            })?;

        Ok(Self {
            http,
            settings,
            allow_missing_images,
        })
    }

    /// Resolve every asset reference of `job` to a readable local path
    /// inside the scope.
    pub async fn resolve_assets(
        &self,
        job: &mut Job,
        scope: &ResourceScope,
        cancel: CancellationToken,
    ) -> PipelineResult<DownloadOutcome> {
        let download_dir = scope.acquire_temp("downloads")?;

        // Pass 1: collect references; local paths resolve immediately.
        let mut remotes: HashMap<String, RemoteAsset> = HashMap::new();
        let mut local_failures: Vec<PipelineError> = Vec::new();
        let mut image_failures: Vec<ImageFailure> = Vec::new();

        job.visit_assets_mut(|kind, segment_id, asset| {
            if asset.is_remote() {
                let entry = remotes
                    .entry(asset.url.clone())
                    .or_insert_with(|| RemoteAsset {
                        url: asset.url.clone(),
                        kinds: HashSet::new(),
                        segment_ids: Vec::new(),
                    });
                entry.kinds.insert(kind);
                entry.segment_ids.push(segment_id.map(str::to_string));
                return;
            }

            let path = PathBuf::from(&asset.url);
            if path.is_file() {
                asset.local_path = Some(path);
            } else if kind == AssetKind::Image && self.allow_missing_images {
                image_failures.push(ImageFailure {
                    segment_id: segment_id.map(str::to_string),
                    url: asset.url.clone(),
                    message: "local file not found".to_string(),
                });
            } else {
                let mut err = PipelineError::asset(
                    STAGE,
                    format!("local {} '{}' not found or unreadable", kind, asset.url),
                );
                if let Some(id) = segment_id {
                    err = err.with_segment(id);
                }
                local_failures.push(err);
            }
        });

        if let Some(err) = local_failures.into_iter().next() {
            return Err(err);
        }

        // Pass 2: fetch unique remote URLs concurrently.
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent.max(1)));
        let futures = remotes.values().map(|asset| {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let download_dir = download_dir.clone();
            async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let result = self.fetch_one(asset, &download_dir, cancel).await;
                (asset.url.clone(), result)
            }
        });
        let results = futures::future::join_all(futures).await;

        let mut resolved: HashMap<String, PathBuf> = HashMap::new();
        let mut fetched = 0u32;
        for (url, result) in results {
            match result {
                Ok(path) => {
                    fetched += 1;
                    resolved.insert(url, path);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    let asset = &remotes[&url];
                    let image_only = asset.kinds.len() == 1 && asset.kinds.contains(&AssetKind::Image);
                    if image_only && self.allow_missing_images {
                        image_failures.push(ImageFailure {
                            segment_id: asset.segment_ids.iter().flatten().next().cloned(),
                            url: url.clone(),
                            message: e.message.clone(),
                        });
                    } else {
                        // A required asset is still missing after retries.
                        let mut err = PipelineError::asset(
                            STAGE,
                            format!("required asset '{}' failed to download: {}", url, e.message),
                        );
                        if let Some(id) = asset.segment_ids.iter().flatten().next() {
                            err = err.with_segment(id.clone());
                        }
                        if let Some(cause) = e.cause {
                            err.cause = Some(cause);
                        }
                        return Err(err);
                    }
                }
            }
        }

        // Pass 3: assign resolved paths to every referencing asset.
        job.visit_assets_mut(|_kind, _segment_id, asset| {
            if asset.local_path.is_none() {
                if let Some(path) = resolved.get(&asset.url) {
                    asset.local_path = Some(path.clone());
                }
            }
        });

        info!(
            fetched = fetched,
            deduplicated = remotes.len(),
            image_failures = image_failures.len(),
            "Assets resolved"
        );

        Ok(DownloadOutcome {
            fetched,
            image_failures,
        })
    }

    /// Fetch a single URL into the scope, outside the job walk.
    ///
    /// Used by the image auto-fixer to pull substitute images through the
    /// same retry, size-cap and content-type machinery.
    pub async fn fetch_url(
        &self,
        url: &str,
        kind: AssetKind,
        scope: &ResourceScope,
        cancel: CancellationToken,
    ) -> PipelineResult<PathBuf> {
        let download_dir = scope.acquire_temp("downloads")?;
        let asset = RemoteAsset {
            url: url.to_string(),
            kinds: [kind].into(),
            segment_ids: Vec::new(),
        };
        self.fetch_one(&asset, &download_dir, cancel).await
    }

    /// Fetch one URL with retries, size cap and content-type check.
    async fn fetch_one(
        &self,
        asset: &RemoteAsset,
        download_dir: &Path,
        cancel: CancellationToken,
    ) -> PipelineResult<PathBuf> {
        let policy = RetryPolicy::new(format!("download {}", asset.url))
            .with_max_attempts(self.settings.max_retries);

        let result = retry_async(&policy, PipelineError::is_retryable, || {
            self.fetch_once(asset, download_dir, cancel.clone())
        })
        .await;

        match result {
            RetryResult::Success(path) => Ok(path),
            RetryResult::Failed { error, attempts } => {
                debug!(url = %asset.url, attempts = attempts, "Download failed permanently");
                Err(error)
            }
        }
    }

    async fn fetch_once(
        &self,
        asset: &RemoteAsset,
        download_dir: &Path,
        cancel: CancellationToken,
    ) -> PipelineResult<PathBuf> {
        if cancel.is_cancelled() {
            return Err(PipelineError::cancelled(STAGE));
        }

        let response = self.http.get(&asset.url).send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                ErrorKind::Timeout
            } else {
                ErrorKind::Download
            };
            PipelineError::new(STAGE, kind, format!("GET {} failed: {}", asset.url, e))
                .with_cause(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let kind = if status.is_server_error() || status.as_u16() == 429 {
                ErrorKind::Download
            } else {
                // 4xx responses will not improve with retries.
                ErrorKind::Asset
            };
            return Err(PipelineError::new(
                STAGE,
                kind,
                format!("GET {} returned {}", asset.url, status),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if self.settings.check_content_type {
            if let Some(ct) = content_type.as_deref() {
                if !content_type_matches(ct, &asset.kinds) {
                    return Err(PipelineError::asset(
                        STAGE,
                        format!("'{}' has unexpected content type '{}'", asset.url, ct),
                    ));
                }
            }
        }

        let max_bytes = self.settings.max_size_mb.saturating_mul(1024 * 1024);
        if let Some(length) = response.content_length() {
            if length > max_bytes {
                return Err(PipelineError::asset(
                    STAGE,
                    format!("'{}' is {} bytes, over the {} MB cap", asset.url, length, self.settings.max_size_mb),
                ));
            }
        }

        let file_name = cache_file_name(&asset.url, content_type.as_deref());
        let path = download_dir.join(file_name);

        let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
            PipelineError::new(STAGE, ErrorKind::Resource, "failed to create download file")
                .with_cause(e)
        })?;

        let mut response = response;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            PipelineError::new(STAGE, ErrorKind::Download, format!("read from {} failed: {}", asset.url, e))
                .with_cause(e)
        })? {
            if cancel.is_cancelled() {
                return Err(PipelineError::cancelled(STAGE));
            }
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(PipelineError::asset(
                    STAGE,
                    format!("'{}' exceeded the {} MB cap mid-stream", asset.url, self.settings.max_size_mb),
                ));
            }
            file.write_all(&chunk).await.map_err(|e| {
                PipelineError::new(STAGE, ErrorKind::Resource, "failed to write download")
                    .with_cause(e)
            })?;
        }
        file.flush().await.map_err(|e| {
            PipelineError::new(STAGE, ErrorKind::Resource, "failed to flush download")
                .with_cause(e)
        })?;

        debug!(url = %asset.url, bytes = written, path = %path.display(), "Asset downloaded");
        Ok(path)
    }
}

/// Deterministic cache file name: sha256 of the URL plus an extension.
fn cache_file_name(url: &str, content_type: Option<&str>) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{}.{}", hex::encode(digest), extension_for(url, content_type))
}

fn extension_for(url: &str, content_type: Option<&str>) -> String {
    if let Some(ct) = content_type {
        let ext = match ct.split(';').next().unwrap_or("").trim() {
            "image/jpeg" => Some("jpg"),
            "image/png" => Some("png"),
            "image/webp" => Some("webp"),
            "video/mp4" => Some("mp4"),
            "video/webm" => Some("webm"),
            "audio/mpeg" => Some("mp3"),
            "audio/wav" | "audio/x-wav" => Some("wav"),
            "audio/aac" => Some("aac"),
            "audio/ogg" => Some("ogg"),
            _ => None,
        };
        if let Some(ext) = ext {
            return ext.to_string();
        }
    }

    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
        })
        .filter(|e| !e.is_empty() && e.len() <= 5)
        .unwrap_or_else(|| "bin".to_string())
}

/// Accepts matching media types plus generic binary responses.
fn content_type_matches(content_type: &str, kinds: &HashSet<AssetKind>) -> bool {
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if ct == "application/octet-stream" || ct == "binary/octet-stream" || ct.is_empty() {
        return true;
    }
    kinds.iter().any(|kind| match kind {
        AssetKind::Image => ct.starts_with("image/"),
        AssetKind::Video => ct.starts_with("video/"),
        AssetKind::Audio => ct.starts_with("audio/") || ct == "application/ogg",
    })
}
