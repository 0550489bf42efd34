//! Core data models used throughout Packsmith.
//!
//! These types represent the jobs, events, sources, chunks, and manifests
//! that flow through the pack-build pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::PackError;

/// Lifecycle status of a build job.
///
/// Transitions are strictly forward along
/// `pending → ingesting → normalizing → packaging → done`, with `failed`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Ingesting,
    Normalizing,
    Packaging,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Ingesting => "ingesting",
            JobStatus::Normalizing => "normalizing",
            JobStatus::Packaging => "packaging",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "ingesting" => Ok(JobStatus::Ingesting),
            "normalizing" => Ok(JobStatus::Normalizing),
            "packaging" => Ok(JobStatus::Packaging),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: '{}'", other)),
        }
    }
}

/// One record of a job's event log.
///
/// Every record carries the `{timestamp, type}` envelope; any other keys
/// are kept verbatim in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    /// Returns a string-valued field, if present.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Snapshot of a job, folded from its event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pack_id: Option<String>,
    pub version: Option<String>,
    pub error: Option<String>,
    pub artifact_url: Option<String>,
    pub events: Vec<Event>,
}

/// The kinds of source a pack can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A local zip archive (or directory) handed over by the transport layer.
    Upload,
    /// A single web page.
    Website,
    /// A remote repository, cloned shallowly.
    GitRepo,
    /// Raw pasted text.
    Paste,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Upload => "upload",
            SourceKind::Website => "website",
            SourceKind::GitRepo => "git_repo",
            SourceKind::Paste => "paste",
        }
    }
}

impl FromStr for SourceKind {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(SourceKind::Upload),
            "website" => Ok(SourceKind::Website),
            "git_repo" => Ok(SourceKind::GitRepo),
            "paste" => Ok(SourceKind::Paste),
            other => Err(PackError::InvalidInput(format!(
                "Unknown source type: '{}'. Must be upload, website, git_repo, or paste.",
                other
            ))),
        }
    }
}

/// Raw source descriptor as received from a build request.
///
/// The kind is kept as a string so that an unsupported kind surfaces as an
/// `InvalidInput` failure on the job rather than a transport error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: String,
    pub value: Option<String>,
}

impl SourceDescriptor {
    pub fn new(kind: impl Into<String>, value: Option<String>) -> Self {
        Self {
            kind: kind.into(),
            value,
        }
    }

    pub fn paste(text: impl Into<String>) -> Self {
        Self::new("paste", Some(text.into()))
    }
}

/// A position-addressed segment of a normalized document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub offset: usize,
    pub text: String,
}

/// Fingerprint of one successfully decoded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub relative_path: String,
    pub hash: String,
}

/// Descriptive metadata supplied with a build request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub license: Option<String>,
}

pub const DEFAULT_PUBLISHER: &str = "Anonymous";
pub const DEFAULT_LICENSE: &str = "CC-BY-4.0";

impl PackMetadata {
    pub fn name_or(&self, pack_id: &str) -> String {
        non_empty(&self.name).unwrap_or(pack_id).to_string()
    }

    pub fn publisher(&self) -> String {
        non_empty(&self.publisher)
            .unwrap_or(DEFAULT_PUBLISHER)
            .to_string()
    }

    pub fn license(&self) -> String {
        non_empty(&self.license).unwrap_or(DEFAULT_LICENSE).to_string()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// The signed manifest stored as `pack.json` at the archive root.
///
/// The field set is fixed; `signature` covers `content_hash` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackManifest {
    pub pack_id: String,
    pub version: String,
    pub name: String,
    pub description: Option<String>,
    pub publisher: String,
    pub license: String,
    pub created_at: String,
    pub content_hash: String,
    pub chunk_count: usize,
    pub file_count: usize,
    pub signature: String,
    pub public_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Ingesting,
            JobStatus::Normalizing,
            JobStatus::Packaging,
            JobStatus::Done,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("chunking".parse::<JobStatus>().is_err());
    }

    #[test]
    fn only_done_and_failed_are_terminal() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Packaging.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn unknown_source_kind_is_invalid_input() {
        let err = "bogus".parse::<SourceKind>().unwrap_err();
        assert!(matches!(err, PackError::InvalidInput(_)));
        assert!(err.to_string().contains("bogus"));
        assert_eq!("git_repo".parse::<SourceKind>().unwrap(), SourceKind::GitRepo);
    }

    #[test]
    fn metadata_defaults() {
        let meta = PackMetadata {
            name: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(meta.name_or("pack-a"), "pack-a");
        assert_eq!(meta.publisher(), "Anonymous");
        assert_eq!(meta.license(), "CC-BY-4.0");
    }

    #[test]
    fn event_keeps_extra_fields() {
        let line = r#"{"timestamp":"2026-01-02T03:04:05Z","type":"progress","files":3,"chunks":9}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        assert_eq!(event.kind, "progress");
        assert_eq!(event.fields.get("files"), Some(&Value::from(3)));
        assert!(event.field_str("status").is_none());
    }
}
