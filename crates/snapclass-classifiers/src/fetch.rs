//! Locating and transferring model artifacts
//!
//! Artifacts can live on the local filesystem, behind an HTTP(S) URL, or in
//! a Hugging Face Hub repository. Every source is probed for existence before
//! it is transferred.

use crate::manifest::ModelManifest;
use crate::model::ModelArtifact;
use crate::progress::{LoadEvent, ProgressSink};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use snapclass_core::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::AsyncReadExt;
use url::Url;

const READ_CHUNK: usize = 1 << 20;
const DEFAULT_MANIFEST: &str = "model.json";

/// Where a model manifest lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelLocation {
    /// Local file system path to `model.json`
    Local(PathBuf),

    /// Absolute HTTP(S) URL of `model.json`
    Remote(Url),

    /// Manifest inside a Hugging Face Hub model repository
    HuggingFace {
        repo: String,
        revision: String,
        filename: String,
    },
}

impl ModelLocation {
    /// Location of a file stored next to the manifest
    pub fn sibling(&self, name: &str) -> Result<Self> {
        match self {
            Self::Local(path) => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                Ok(Self::Local(dir.join(name)))
            }
            Self::Remote(url) => url
                .join(name)
                .map(Self::Remote)
                .map_err(|e| Error::config(format!("Invalid weights path '{}': {}", name, e))),
            Self::HuggingFace {
                repo,
                revision,
                filename,
            } => {
                let filename = match filename.rsplit_once('/') {
                    Some((dir, _)) => format!("{}/{}", dir, name),
                    None => name.to_string(),
                };
                Ok(Self::HuggingFace {
                    repo: repo.clone(),
                    revision: revision.clone(),
                    filename,
                })
            }
        }
    }
}

impl FromStr for ModelLocation {
    type Err = Error;

    /// Parse `hf://owner/repo[@revision][/file]`, `http(s)://…` or a path
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::config("Model location is empty"));
        }

        if let Some(rest) = s.strip_prefix("hf://") {
            let mut parts = rest.splitn(3, '/');
            let owner = parts.next().filter(|p| !p.is_empty());
            let name = parts.next().filter(|p| !p.is_empty());
            let (owner, name) = owner.zip(name).ok_or_else(|| {
                Error::config(format!("Hub location '{}' must be hf://owner/repo", s))
            })?;

            let (name, revision) = match name.split_once('@') {
                Some((name, rev)) => (name, rev.to_string()),
                None => (name, "main".to_string()),
            };
            let filename = parts
                .next()
                .filter(|p| !p.is_empty())
                .unwrap_or(DEFAULT_MANIFEST)
                .to_string();

            return Ok(Self::HuggingFace {
                repo: format!("{}/{}", owner, name),
                revision,
                filename,
            });
        }

        if s.starts_with("http://") || s.starts_with("https://") {
            let url = Url::parse(s)
                .map_err(|e| Error::config(format!("Invalid model URL '{}': {}", s, e)))?;
            return Ok(Self::Remote(url));
        }

        Ok(Self::Local(PathBuf::from(s)))
    }
}

impl fmt::Display for ModelLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{}", url),
            Self::HuggingFace {
                repo,
                revision,
                filename,
            } => write!(f, "hf://{}@{}/{}", repo, revision, filename),
        }
    }
}

/// Source of model artifacts
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Cheap existence check run before every transfer
    async fn probe(&self, location: &ModelLocation) -> bool;

    /// Transfer the manifest and its weights, reporting progress to `sink`
    ///
    /// A manifest that cannot be parsed is an [`Error::Config`]; every
    /// transfer failure uses another variant.
    async fn fetch(
        &self,
        location: &ModelLocation,
        sink: &dyn ProgressSink,
    ) -> Result<ModelArtifact>;
}

/// Fetcher for local files, HTTP(S) and the Hugging Face Hub
#[derive(Debug, Clone, Default)]
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client (timeouts, proxies, headers)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn head_ok(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!("Error checking file {}: {}", url, e);
                false
            }
        }
    }

    /// Read one file fully, reporting byte progress when `report` is set
    async fn read(
        &self,
        location: &ModelLocation,
        sink: &dyn ProgressSink,
        report: bool,
    ) -> Result<Bytes> {
        match location {
            ModelLocation::Local(path) => read_file(path, sink, report).await,
            ModelLocation::Remote(url) => self.download(url, sink, report).await,
            ModelLocation::HuggingFace {
                repo,
                revision,
                filename,
            } => {
                let path = hub_get(repo, revision, filename).await?;
                read_file(&path, sink, report).await
            }
        }
    }

    async fn download(&self, url: &Url, sink: &dyn ProgressSink, report: bool) -> Result<Bytes> {
        tracing::debug!("Downloading {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::internal(format!("Failed to download {}: {}", url, e)))?;

        let total = response.content_length();
        let mut buffer = BytesMut::with_capacity(capacity_hint(total));
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::internal(format!("Transfer of {} failed: {}", url, e)))?;
            buffer.extend_from_slice(&chunk);
            if report {
                report_fraction(sink, buffer.len() as u64, total);
            }
        }

        Ok(buffer.freeze())
    }
}

#[async_trait]
impl ArtifactFetcher for DefaultFetcher {
    async fn probe(&self, location: &ModelLocation) -> bool {
        match location {
            ModelLocation::Local(path) => tokio::fs::metadata(path)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false),
            ModelLocation::Remote(url) => self.head_ok(url.as_str()).await,
            ModelLocation::HuggingFace {
                repo,
                revision,
                filename,
            } => {
                if hub_cached(repo, revision, filename) {
                    return true;
                }
                let url = format!(
                    "https://huggingface.co/{}/resolve/{}/{}",
                    repo, revision, filename
                );
                self.head_ok(&url).await
            }
        }
    }

    async fn fetch(
        &self,
        location: &ModelLocation,
        sink: &dyn ProgressSink,
    ) -> Result<ModelArtifact> {
        let manifest_bytes = self.read(location, sink, false).await?;
        let manifest = ModelManifest::from_slice(&manifest_bytes)?;

        let weights_location = location.sibling(&manifest.weights)?;
        tracing::debug!("Fetching weights from {}", weights_location);
        let weights = self.read(&weights_location, sink, true).await?;

        sink.emit(LoadEvent::Progress { fraction: 1.0 });
        Ok(ModelArtifact::new(manifest, weights))
    }
}

fn report_fraction(sink: &dyn ProgressSink, received: u64, total: Option<u64>) {
    if let Some(total) = total.filter(|t| *t > 0) {
        let fraction = (received as f64 / total as f64).min(1.0) as f32;
        sink.emit(LoadEvent::Progress { fraction });
    }
}

/// Initial buffer size; a declared length is only trusted up to one chunk
fn capacity_hint(total: Option<u64>) -> usize {
    total.map_or(0, |t| t.min(READ_CHUNK as u64) as usize)
}

async fn read_file(path: &Path, sink: &dyn ProgressSink, report: bool) -> Result<Bytes> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::internal(format!("Failed to open {}: {}", path.display(), e)))?;
    let total = file.metadata().await.ok().map(|m| m.len());

    let mut buffer = BytesMut::with_capacity(capacity_hint(total));
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if report {
            report_fraction(sink, buffer.len() as u64, total);
        }
    }

    Ok(buffer.freeze())
}

#[cfg(feature = "hf-hub")]
fn hub_repo(repo: &str, revision: &str) -> hf_hub::Repo {
    hf_hub::Repo::with_revision(repo.to_string(), hf_hub::RepoType::Model, revision.to_string())
}

#[cfg(feature = "hf-hub")]
fn hub_cached(repo: &str, revision: &str, filename: &str) -> bool {
    hf_hub::Cache::default()
        .repo(hub_repo(repo, revision))
        .get(filename)
        .is_some()
}

#[cfg(not(feature = "hf-hub"))]
fn hub_cached(_repo: &str, _revision: &str, _filename: &str) -> bool {
    false
}

/// Download (or reuse from cache) one file of a Hub repository
#[cfg(feature = "hf-hub")]
async fn hub_get(repo: &str, revision: &str, filename: &str) -> Result<PathBuf> {
    tracing::info!("Downloading {} from HuggingFace: {} @ {}", filename, repo, revision);

    let repo = hub_repo(repo, revision);
    let filename = filename.to_string();

    tokio::task::spawn_blocking(move || {
        let api = hf_hub::api::sync::Api::new()
            .map_err(|e| Error::internal(format!("Failed to initialize HF API: {}", e)))?;
        api.repo(repo)
            .get(&filename)
            .map_err(|e| Error::internal(format!("Failed to download {} from HF: {}", filename, e)))
    })
    .await
    .map_err(|e| Error::internal(format!("Hub download task failed: {}", e)))?
}

#[cfg(not(feature = "hf-hub"))]
async fn hub_get(_repo: &str, _revision: &str, _filename: &str) -> Result<PathBuf> {
    Err(Error::internal("HuggingFace download requires the 'hf-hub' feature"))
}
