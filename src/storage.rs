//! Artifact storage backends.
//!
//! | Backend | Config | Location returned |
//! |---------|--------|-------------------|
//! | `local` | `[storage.local]` | `file://<root>/<bucket>/<object>` |
//! | `s3` | `[storage.s3]` | `s3://<bucket>/<object>` |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{LocalStorageConfig, StorageConfig};
use crate::storage_s3::S3Store;
use crate::traits::ArtifactStore;

/// Object store on the local filesystem. The bucket is a directory.
pub struct LocalStore {
    root: PathBuf,
    bucket: String,
}

impl LocalStore {
    pub fn new(config: &LocalStorageConfig) -> Self {
        Self {
            root: config.root.clone(),
            bucket: config.bucket.clone(),
        }
    }

    pub fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    /// Filesystem path an object name maps to.
    pub fn object_path(&self, object_name: &str) -> PathBuf {
        object_name
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.bucket_dir(), |path, part| path.join(part))
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn upload(&self, object_name: &str, local_path: &Path) -> Result<String> {
        if object_name.split('/').any(|part| part == "..") {
            bail!("object name must not contain '..': {}", object_name);
        }

        let dest = self.object_path(object_name);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::copy(local_path, &dest)
            .await
            .with_context(|| format!("Failed to copy archive to {}", dest.display()))?;

        let absolute = std::path::absolute(&dest).unwrap_or(dest);
        Ok(format!("file://{}", absolute.display()))
    }
}

/// Build the configured artifact store.
pub fn store_from_config(config: &StorageConfig) -> Result<Arc<dyn ArtifactStore>> {
    match config.backend.as_str() {
        "local" => Ok(Arc::new(LocalStore::new(&config.local))),
        "s3" => {
            let s3 = config
                .s3
                .clone()
                .context("storage.s3 must be configured when backend is 's3'")?;
            Ok(Arc::new(S3Store::new(s3)))
        }
        other => bail!(
            "Unknown storage backend: '{}'. Must be local or s3.",
            other
        ),
    }
}
