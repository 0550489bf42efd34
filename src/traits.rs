//! Ports for the external collaborators of the build pipeline.
//!
//! The pipeline never talks to the network, `git`, or object storage
//! directly. It goes through these narrow traits, so a deployment can swap
//! implementations and tests can inject fakes.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              PackBuildPipeline               │
//! │  ┌─────────┐   ┌─────────┐   ┌────────────┐  │
//! │  │ Fetcher │   │ Cloner  │   │ Artifact-  │  │
//! │  │ (HTTP)  │   │ (git)   │   │ Store      │  │
//! │  └─────────┘   └─────────┘   └────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Built-in implementations: [`HttpFetcher`](crate::connector_http::HttpFetcher),
//! [`GitCli`](crate::connector_git::GitCli),
//! [`LocalStore`](crate::storage::LocalStore), and
//! [`S3Store`](crate::storage_s3::S3Store).

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

// ═══════════════════════════════════════════════════════════════════════
// Ingestion ports
// ═══════════════════════════════════════════════════════════════════════

/// Fetches a single web page.
///
/// Implementations follow redirects and must bound the request with a
/// timeout. Any error is reported on the job as an upstream failure.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` and return the response body as text.
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Performs a shallow (depth-1) clone of a repository.
#[async_trait]
pub trait Cloner: Send + Sync {
    /// Clone `url` into `dest`. `dest` must not exist or be empty.
    async fn shallow_clone(&self, url: &str, dest: &Path) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════
// Storage port
// ═══════════════════════════════════════════════════════════════════════

/// Persists finished archives.
///
/// The store provisions its target container (bucket, directory) if it is
/// absent.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Short label for logs (e.g. `"local"`, `"s3"`).
    fn name(&self) -> &str;

    /// Upload the file at `local_path` as `object_name` and return an
    /// opaque artifact location.
    async fn upload(&self, object_name: &str, local_path: &Path) -> Result<String>;
}
