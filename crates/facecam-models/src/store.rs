//! Remote artifact stores.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_REVISION: &str = "main";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Identifies one file in a remote repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub repo_id: String,
    pub filename: String,
    pub revision: String,
}

impl ArtifactRef {
    pub fn new(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: filename.into(),
            revision: DEFAULT_REVISION.to_string(),
        }
    }

    pub fn at_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }
}

/// A place artifacts can be fetched from into a local cache.
pub trait ArtifactStore {
    /// Make `artifact` available under `cache_dir` and return its cached path.
    fn fetch(&self, artifact: &ArtifactRef, cache_dir: &Path) -> Result<PathBuf, StoreError>;
}

/// Hugging Face Hub (or a compatible mirror) over HTTPS.
pub struct HubStore {
    endpoint: String,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl HubStore {
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("facecam/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StoreError::Client)?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    /// Download URL for `artifact`.
    pub fn url(&self, artifact: &ArtifactRef) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint, artifact.repo_id, artifact.revision, artifact.filename
        )
    }

    fn download(&self, url: &str, dest: &Path) -> Result<(), StoreError> {
        let temp_path = partial_path(dest);
        let result = self.download_inner(url, dest, &temp_path);
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn download_inner(&self, url: &str, dest: &Path, temp_path: &Path) -> Result<(), StoreError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let mut response = request
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|source| StoreError::Download {
                url: url.to_string(),
                source,
            })?;

        let total = response.content_length().unwrap_or(0);
        let write_err = |path: &Path, source: std::io::Error| StoreError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut file = fs::File::create(temp_path).map_err(|e| write_err(temp_path, e))?;
        let mut buf = vec![0u8; 1024 * 1024];
        let mut downloaded = 0u64;
        loop {
            let n = response.read(&mut buf).map_err(|e| write_err(temp_path, e))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).map_err(|e| write_err(temp_path, e))?;
            downloaded += n as u64;
            tracing::trace!(downloaded, total, "download progress");
        }
        file.flush().map_err(|e| write_err(temp_path, e))?;
        drop(file);

        fs::rename(temp_path, dest).map_err(|e| write_err(dest, e))?;
        tracing::info!(url, bytes = downloaded, "download complete");
        Ok(())
    }
}

impl ArtifactStore for HubStore {
    fn fetch(&self, artifact: &ArtifactRef, cache_dir: &Path) -> Result<PathBuf, StoreError> {
        let cached = cache_path(cache_dir, artifact);
        if cached.exists() {
            tracing::info!(path = %cached.display(), "using cached artifact");
            return Ok(cached);
        }

        if let Some(parent) = cached.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let url = self.url(artifact);
        tracing::info!(%url, "downloading artifact");
        self.download(&url, &cached)?;
        Ok(cached)
    }
}

/// Cache location, mirroring the hub client layout:
/// `{cache_dir}/models--{owner}--{name}/snapshots/{revision}/{filename}`.
pub fn cache_path(cache_dir: &Path, artifact: &ArtifactRef) -> PathBuf {
    cache_dir
        .join(format!("models--{}", artifact.repo_id.replace('/', "--")))
        .join("snapshots")
        .join(&artifact.revision)
        .join(&artifact.filename)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
