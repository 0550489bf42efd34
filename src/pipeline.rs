//! Pack build orchestration.
//!
//! Drives one job through the full lifecycle, recording every step on the
//! job's event log:
//!
//! ```text
//! status{ingesting} → status{normalizing} → progress → signed [→ warning]
//!   → status{packaging} → done
//! ```
//!
//! Any failure ends the job with a single `error` event carrying
//! `status = "failed"`, the message, and its `error_kind`. Working trees are
//! removed on every path; the local archive survives only a storage failure.
//!
//! Walking, hashing, and zipping run on the blocking pool so that status
//! reads never wait on a build.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::connector_git::GitCli;
use crate::connector_http::HttpFetcher;
use crate::error::{PackError, PackResult};
use crate::joblog::JobLog;
use crate::manifest::build_manifest;
use crate::models::{PackMetadata, SourceDescriptor};
use crate::normalize::{resolve_source, SourceNormalizer};
use crate::package::{
    archive_file_name, archive_object_name, collect_documents, write_archive, write_pack_files,
    DOCS_DIR,
};
use crate::signing::{content_hash, sign_with, KeySource, ManifestSigner};
use crate::storage::store_from_config;
use crate::traits::{ArtifactStore, Cloner, Fetcher};

/// One build request for an existing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub job_id: String,
    pub pack_id: String,
    pub version: String,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub metadata: PackMetadata,
    /// Hex Ed25519 seed overriding the configured key.
    #[serde(default, skip_serializing)]
    pub signing_key: Option<String>,
}

pub struct PackBuildPipeline {
    config: Config,
    log: JobLog,
    normalizer: SourceNormalizer,
    signer: ManifestSigner,
    store: Arc<dyn ArtifactStore>,
}

impl PackBuildPipeline {
    pub fn new(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        cloner: Arc<dyn Cloner>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            log: JobLog::new(&config.paths.jobs_dir),
            normalizer: SourceNormalizer::new(config.paths.clone(), fetcher, cloner),
            signer: ManifestSigner::from_config(&config.signing),
            store,
            config,
        }
    }

    /// Wire the built-in HTTP, git, and storage collaborators.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
        let cloner = Arc::new(GitCli::new(&config.git));
        let store = store_from_config(&config.storage)?;
        Ok(Self::new(config, fetcher, cloner, store))
    }

    pub fn log(&self) -> &JobLog {
        &self.log
    }

    /// Allocate a new job in the `pending` state.
    pub fn create_job(&self) -> anyhow::Result<String> {
        self.log.create()
    }

    /// Run the build as an independent task.
    pub fn spawn(self: &Arc<Self>, request: BuildRequest) -> JoinHandle<PackResult<String>> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.build_pack(request).await })
    }

    /// Build, sign, package, and upload a pack. Returns the artifact location.
    ///
    /// Unknown and already finished jobs are refused without touching their
    /// log. Every other outcome ends with exactly one terminal event.
    pub async fn build_pack(&self, request: BuildRequest) -> PackResult<String> {
        let job_id = request.job_id.as_str();
        let job = self
            .log
            .load(job_id)?
            .ok_or_else(|| PackError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Err(PackError::JobFinished(job_id.to_string()));
        }

        tracing::info!(job_id, pack_id = %request.pack_id, version = %request.version, "build started");

        let result = self.run(&request).await;
        let keep_archive = matches!(result, Err(PackError::Storage { .. }));

        let terminal = match &result {
            Ok(location) => self.log.append(
                job_id,
                "done",
                json!({
                    "status": "done",
                    "pack_id": request.pack_id,
                    "version": request.version,
                    "artifact_url": location,
                }),
            ),
            Err(err) => {
                tracing::error!(job_id, kind = err.kind(), error = %err.message(), "build failed");
                let mut fields = json!({
                    "status": "failed",
                    "error": err.message(),
                    "error_kind": err.kind(),
                });
                if let PackError::Storage { archive, .. } = err {
                    fields["archive_path"] = json!(archive.display().to_string());
                }
                self.log.append(job_id, "error", fields)
            }
        };

        self.cleanup(job_id, keep_archive);
        terminal?;

        if let Ok(ref location) = result {
            tracing::info!(job_id, artifact_url = %location, "build finished");
        }
        result
    }

    async fn run(&self, request: &BuildRequest) -> PackResult<String> {
        let job_id = request.job_id.as_str();
        let paths = &self.config.paths;

        // Reject bad input before any working directory exists.
        check_path_component("pack_id", &request.pack_id)?;
        check_path_component("version", &request.version)?;
        resolve_source(&request.source)?;
        let (key, key_source) = self.signer.resolve_key(request.signing_key.as_deref())?;

        self.log.append(
            job_id,
            "status",
            json!({
                "status": "ingesting",
                "pack_id": request.pack_id,
                "version": request.version,
            }),
        )?;
        let source_dir = self.normalizer.normalize(job_id, &request.source).await?;

        // Walk, decode, chunk, hash
        self.log
            .append(job_id, "status", json!({"status": "normalizing"}))?;
        let build_dir = paths.build_dir(job_id);
        if build_dir.exists() {
            std::fs::remove_dir_all(&build_dir)
                .with_context(|| format!("Failed to clear {}", build_dir.display()))?;
        }
        let collected = {
            let docs_dir = build_dir.join(DOCS_DIR);
            let max_size = self.config.chunking.max_size;
            let excludes = self.config.walk.exclude_globs.clone();
            blocking(move || collect_documents(&source_dir, &docs_dir, max_size, &excludes)).await?
        };
        tracing::info!(
            job_id,
            files = collected.records.len(),
            chunks = collected.chunks.len(),
            skipped = collected.skipped.len(),
            "documents collected"
        );
        self.log.append(
            job_id,
            "progress",
            json!({
                "files": collected.records.len(),
                "chunks": collected.chunks.len(),
                "skipped": collected.skipped.len(),
                "skipped_files": collected.skipped,
            }),
        )?;

        // Sign and write the manifest
        let digest = content_hash(&collected.records);
        let signed = sign_with(&key, key_source, &digest)?;
        let manifest = build_manifest(
            &request.pack_id,
            &request.version,
            &request.metadata,
            &collected.records,
            collected.chunks.len(),
            &digest,
            &signed,
        );
        {
            let build_dir = build_dir.clone();
            let manifest = manifest.clone();
            let chunks = collected.chunks;
            blocking(move || write_pack_files(&build_dir, &manifest, &chunks)).await?;
        }
        self.log.append(
            job_id,
            "signed",
            json!({
                "key_source": signed.key_source,
                "content_hash": manifest.content_hash,
                "public_key": manifest.public_key,
            }),
        )?;
        if signed.key_source == KeySource::EphemeralGenerated {
            self.log.append(
                job_id,
                "warning",
                json!({
                    "message": "No signing key configured; the pack was signed with an ephemeral key and cannot be tied to a trusted identity.",
                }),
            )?;
        }

        // Archive
        self.log
            .append(job_id, "status", json!({"status": "packaging"}))?;
        let archive = paths
            .artifact_dir(job_id)
            .join(archive_file_name(&request.pack_id, &request.version));
        {
            let build_dir = build_dir.clone();
            let archive = archive.clone();
            blocking(move || write_archive(&build_dir, &archive)).await?;
        }

        // Upload
        let object_name = archive_object_name(&request.pack_id, &request.version);
        tracing::info!(job_id, store = self.store.name(), object = %object_name, "uploading archive");
        self.store
            .upload(&object_name, &archive)
            .await
            .map_err(|e| PackError::Storage {
                message: format!("{:#}", e),
                archive: archive.clone(),
            })
    }

    /// Remove the job's working trees, and its archive unless told to keep it.
    fn cleanup(&self, job_id: &str, keep_archive: bool) {
        let paths = &self.config.paths;
        remove_tree(&paths.ingest_dir(job_id));
        remove_tree(&paths.build_dir(job_id));
        if !keep_archive {
            remove_tree(&paths.artifact_dir(job_id));
        }
    }
}

/// `pack_id` and `version` name the archive file and its object key, so
/// they must stay a single path segment.
fn check_path_component(field: &str, value: &str) -> PackResult<()> {
    if value.trim().is_empty() {
        return Err(PackError::InvalidInput(format!("{} must not be empty", field)));
    }
    if value.contains(['/', '\\']) || value.contains("..") {
        return Err(PackError::InvalidInput(format!(
            "{} must not contain '/', '\\' or '..': {}",
            field, value
        )));
    }
    Ok(())
}

fn remove_tree(dir: &Path) {
    if !dir.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(dir) {
        tracing::warn!(path = %dir.display(), error = %e, "failed to remove working directory");
    }
}

async fn blocking<T, F>(f: F) -> PackResult<T>
where
    F: FnOnce() -> PackResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PackError::Internal(anyhow!("blocking task failed: {}", e)))?
}
