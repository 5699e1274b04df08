//! Download-if-missing provisioning of model artifacts.

use crate::store::{ArtifactRef, ArtifactStore, StoreError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("failed to fetch {filename} from {repo_id}: {source}")]
    Fetch {
        repo_id: String,
        filename: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("model file not found at {0} after moving")]
    Missing(PathBuf),
}

/// How an artifact ended up at its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    /// Already present; nothing was fetched.
    Present(PathBuf),
    /// Fetched into the cache, then moved to `path`.
    Fetched { path: PathBuf, cached_from: PathBuf },
}

impl Provisioned {
    pub fn path(&self) -> &Path {
        match self {
            Self::Present(path) => path,
            Self::Fetched { path, .. } => path,
        }
    }

    pub fn was_fetched(&self) -> bool {
        matches!(self, Self::Fetched { .. })
    }
}

/// Ensures artifacts exist in `dest_dir`, fetching absent ones through `store`.
///
/// There is no retry: the first failure is returned.
pub struct Provisioner<S> {
    store: S,
    cache_dir: PathBuf,
    dest_dir: PathBuf,
}

impl<S: ArtifactStore> Provisioner<S> {
    pub fn new(store: S, cache_dir: impl Into<PathBuf>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            cache_dir: cache_dir.into(),
            dest_dir: dest_dir.into(),
        }
    }

    /// Destination path of `artifact`.
    pub fn destination(&self, artifact: &ArtifactRef) -> PathBuf {
        self.dest_dir.join(&artifact.filename)
    }

    pub fn ensure(&self, artifact: &ArtifactRef) -> Result<Provisioned, ProvisionError> {
        let destination = self.destination(artifact);
        if destination.exists() {
            tracing::debug!(path = %destination.display(), "artifact present");
            return Ok(Provisioned::Present(destination));
        }

        tracing::info!(
            repo_id = %artifact.repo_id,
            filename = %artifact.filename,
            revision = %artifact.revision,
            "artifact missing, fetching"
        );
        let cached = self
            .store
            .fetch(artifact, &self.cache_dir)
            .map_err(|source| ProvisionError::Fetch {
                repo_id: artifact.repo_id.clone(),
                filename: artifact.filename.clone(),
                source,
            })?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|source| ProvisionError::Move {
                from: cached.clone(),
                to: destination.clone(),
                source,
            })?;
        }
        move_file(&cached, &destination).map_err(|source| ProvisionError::Move {
            from: cached.clone(),
            to: destination.clone(),
            source,
        })?;

        if !destination.exists() {
            return Err(ProvisionError::Missing(destination));
        }

        tracing::info!(path = %destination.display(), "artifact provisioned");
        Ok(Provisioned::Fetched {
            path: destination,
            cached_from: cached,
        })
    }

    /// Ensure every artifact in order, stopping at the first failure.
    pub fn ensure_all(
        &self,
        artifacts: &[ArtifactRef],
    ) -> Result<Vec<Provisioned>, ProvisionError> {
        artifacts.iter().map(|a| self.ensure(a)).collect()
    }
}

/// Rename, falling back to copy + remove when crossing filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tracing::debug!(error = %rename_err, "rename failed, copying instead");
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
