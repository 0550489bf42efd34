//! Source normalization: turns a [`SourceDescriptor`] into a document tree.
//!
//! Each job gets its own tree at `<work_root>/ingest/<job_id>`. The
//! descriptor is validated before anything touches the disk, so invalid
//! input never leaves a working directory behind. Any tree left by an
//! earlier attempt for the same job is removed first.
//!
//! | Kind | Result |
//! |------|--------|
//! | `upload` | zip archive fully extracted, or a local directory copied |
//! | `website` | one fetched page saved as `index.html` |
//! | `git_repo` | depth-1 clone with `.git` removed |
//! | `paste` | the text saved as `content.txt` |
//!
//! The pipeline, not the normalizer, removes the tree when the job ends.

use anyhow::{anyhow, Context};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config::PathsConfig;
use crate::connector_git::strip_vcs_metadata;
use crate::error::{PackError, PackResult};
use crate::models::{SourceDescriptor, SourceKind};
use crate::traits::{Cloner, Fetcher};

pub const WEBSITE_DOCUMENT: &str = "index.html";
pub const PASTE_DOCUMENT: &str = "content.txt";

/// A validated source, ready to be materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    UploadArchive(PathBuf),
    UploadDirectory(PathBuf),
    Website(String),
    GitRepo(String),
    Paste(String),
}

/// Validate a descriptor without touching the working directories.
pub fn resolve_source(descriptor: &SourceDescriptor) -> PackResult<Source> {
    let kind: SourceKind = descriptor.kind.parse()?;
    let value = descriptor
        .value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            PackError::InvalidInput(match kind {
                SourceKind::Upload => "File required for upload source".to_string(),
                SourceKind::Website => "URL required for website source".to_string(),
                SourceKind::GitRepo => "Repo URL required for git_repo source".to_string(),
                SourceKind::Paste => "Text content required for paste source".to_string(),
            })
        })?;

    match kind {
        SourceKind::Upload => {
            let path = PathBuf::from(value);
            if path.is_dir() {
                return Ok(Source::UploadDirectory(path));
            }
            if !path.is_file() {
                return Err(PackError::InvalidInput(format!(
                    "Upload archive not found: {}",
                    path.display()
                )));
            }
            let file = File::open(&path).map_err(|e| {
                PackError::InvalidInput(format!("Cannot open upload {}: {}", path.display(), e))
            })?;
            zip::ZipArchive::new(file).map_err(|e| {
                PackError::InvalidInput(format!(
                    "Upload {} is not a valid zip archive: {}",
                    path.display(),
                    e
                ))
            })?;
            Ok(Source::UploadArchive(path))
        }
        SourceKind::Website => Ok(Source::Website(value.to_string())),
        SourceKind::GitRepo => Ok(Source::GitRepo(value.to_string())),
        SourceKind::Paste => Ok(Source::Paste(value.to_string())),
    }
}

pub struct SourceNormalizer {
    paths: PathsConfig,
    fetcher: Arc<dyn Fetcher>,
    cloner: Arc<dyn Cloner>,
}

impl SourceNormalizer {
    pub fn new(paths: PathsConfig, fetcher: Arc<dyn Fetcher>, cloner: Arc<dyn Cloner>) -> Self {
        Self {
            paths,
            fetcher,
            cloner,
        }
    }

    /// Materialize the source for `job_id` and return the tree root.
    pub async fn normalize(
        &self,
        job_id: &str,
        descriptor: &SourceDescriptor,
    ) -> PackResult<PathBuf> {
        let source = resolve_source(descriptor)?;
        let dest = self.paths.ingest_dir(job_id);

        if dest.exists() {
            std::fs::remove_dir_all(&dest)
                .with_context(|| format!("Failed to clear {}", dest.display()))?;
        }

        tracing::info!(job_id, kind = %descriptor.kind, dest = %dest.display(), "normalizing source");

        match source {
            Source::UploadArchive(archive) => {
                create_dir(&dest)?;
                let target = dest.clone();
                tokio::task::spawn_blocking(move || extract_archive(&archive, &target))
                    .await
                    .map_err(|e| anyhow!("extraction task failed: {}", e))??;
            }
            Source::UploadDirectory(dir) => {
                let target = dest.clone();
                tokio::task::spawn_blocking(move || copy_tree(&dir, &target))
                    .await
                    .map_err(|e| anyhow!("copy task failed: {}", e))??;
            }
            Source::Website(url) => {
                create_dir(&dest)?;
                let body = self
                    .fetcher
                    .fetch(&url)
                    .await
                    .map_err(|e| PackError::Upstream(format!("{:#}", e)))?;
                write_document(&dest.join(WEBSITE_DOCUMENT), &body)?;
            }
            Source::GitRepo(url) => {
                self.cloner
                    .shallow_clone(&url, &dest)
                    .await
                    .map_err(|e| PackError::Upstream(format!("{:#}", e)))?;
                strip_vcs_metadata(&dest)?;
            }
            Source::Paste(text) => {
                create_dir(&dest)?;
                write_document(&dest.join(PASTE_DOCUMENT), &text)?;
            }
        }

        Ok(dest)
    }
}

fn create_dir(dir: &Path) -> PackResult<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(())
}

fn write_document(path: &Path, content: &str) -> PackResult<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Extract every entry of a zip archive. Entries escaping `dest` are rejected.
fn extract_archive(archive: &Path, dest: &Path) -> PackResult<()> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| PackError::InvalidInput(format!("Invalid zip archive: {}", e)))?;
    zip.extract(dest)
        .map_err(|e| PackError::InvalidInput(format!("Failed to extract upload: {}", e)))?;
    Ok(())
}

/// Recursively copy regular files and directories. Symlinks are not followed.
fn copy_tree(src: &Path, dest: &Path) -> PackResult<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.context("Failed to walk upload directory")?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            create_dir(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}
