//! Append-only per-job event log.
//!
//! Each job owns one NDJSON file under `paths.jobs_dir`. The file is the
//! only persisted representation of job state: [`JobLog::load`] replays it
//! through [`fold`], a pure function, so there is no separately stored
//! "current status" that could drift from the log.
//!
//! Only the pipeline that owns a job appends to it. Every record is written
//! as one complete line in a single `write_all` on an append-mode handle,
//! so readers may replay the file at any time and see a durable prefix.
//! A torn trailing line fails to parse and is skipped by the fold; the next
//! append starts a fresh line so the fragment never swallows a new record.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::{Event, Job, JobStatus};

const LOG_EXTENSION: &str = "ndjson";

#[derive(Debug, Clone)]
pub struct JobLog {
    dir: PathBuf,
}

impl JobLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", job_id, LOG_EXTENSION))
    }

    pub fn exists(&self, job_id: &str) -> bool {
        self.log_path(job_id).is_file()
    }

    /// Allocate a new job id, create its log, and append the `created` event.
    pub fn create(&self) -> Result<String> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create jobs directory: {}", self.dir.display()))?;

        let job_id = new_job_id();
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.log_path(&job_id))
            .with_context(|| format!("Failed to create log for {}", job_id))?;

        self.append(
            &job_id,
            "created",
            serde_json::json!({ "status": JobStatus::Pending }),
        )?;
        tracing::debug!(job_id = %job_id, "job created");
        Ok(job_id)
    }

    /// Append one `{timestamp, type, ...fields}` record.
    ///
    /// `fields` must be a JSON object (or null). Envelope keys inside
    /// `fields` are overridden by the envelope.
    pub fn append(&self, job_id: &str, event_type: &str, fields: Value) -> Result<Event> {
        let mut fields = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => anyhow::bail!("event fields must be a JSON object, got {}", other),
        };
        fields.remove("timestamp");
        fields.remove("type");

        let event = Event {
            timestamp: Utc::now(),
            kind: event_type.to_string(),
            fields,
        };

        let path = self.log_path(job_id);
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("No event log for job {}", job_id))?;

        let mut line = String::new();
        if ends_torn(&mut file)? {
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(&event)?);
        line.push('\n');

        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        file.sync_data()?;

        Ok(event)
    }

    /// Replay a job's log into a snapshot. `None` if no log exists.
    pub fn load(&self, job_id: &str) -> Result<Option<Job>> {
        let path = self.log_path(job_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        Ok(Some(fold(job_id, content.lines())))
    }

    /// Ids of all jobs with a log, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// True when the file is non-empty and its last byte is not a newline.
fn ends_torn(file: &mut File) -> Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// `job-<UTC timestamp>-<random suffix>`.
fn new_job_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "job-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        &suffix[..8]
    )
}

/// Fold raw log lines into a job snapshot.
///
/// Malformed records are skipped. A record with an unknown `status` value
/// counts as malformed.
pub fn fold<'a>(job_id: &str, lines: impl IntoIterator<Item = &'a str>) -> Job {
    let mut job = Job {
        job_id: job_id.to_string(),
        status: JobStatus::Pending,
        created_at: DateTime::<Utc>::UNIX_EPOCH,
        updated_at: DateTime::<Utc>::UNIX_EPOCH,
        pack_id: None,
        version: None,
        error: None,
        artifact_url: None,
        events: Vec::new(),
    };
    let mut seen_created = false;

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Event>(line) else {
            continue;
        };
        let status = match event.fields.get("status") {
            None => None,
            Some(value) => match value.as_str().map(str::parse::<JobStatus>) {
                Some(Ok(status)) => Some(status),
                _ => continue,
            },
        };

        if job.events.is_empty() {
            job.created_at = event.timestamp;
        }
        if event.kind == "created" && !seen_created {
            job.created_at = event.timestamp;
            seen_created = true;
        }
        if let Some(status) = status {
            job.status = status;
        }
        if let Some(v) = event.field_str("pack_id") {
            job.pack_id = Some(v.to_string());
        }
        if let Some(v) = event.field_str("version") {
            job.version = Some(v.to_string());
        }
        if let Some(v) = event.field_str("error") {
            job.error = Some(v.to_string());
        }
        if let Some(v) = event.field_str("artifact_url") {
            job.artifact_url = Some(v.to_string());
        }
        job.updated_at = event.timestamp;
        job.events.push(event);
    }

    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, JobLog) {
        let tmp = TempDir::new().unwrap();
        let log = JobLog::new(tmp.path().join("jobs"));
        (tmp, log)
    }

    #[test]
    fn create_starts_pending() {
        let (_tmp, log) = setup();
        let job_id = log.create().unwrap();
        assert!(job_id.starts_with("job-"));

        let job = log.load(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.events.len(), 1);
        assert_eq!(job.events[0].kind, "created");
        assert_eq!(job.created_at, job.events[0].timestamp);
    }

    #[test]
    fn create_allocates_unique_ids() {
        let (_tmp, log) = setup();
        let ids: std::collections::HashSet<String> =
            (0..20).map(|_| log.create().unwrap()).collect();
        assert_eq!(ids.len(), 20);
        assert_eq!(log.list().unwrap().len(), 20);
    }

    #[test]
    fn load_missing_job_is_none() {
        let (_tmp, log) = setup();
        assert!(log.load("job-does-not-exist").unwrap().is_none());
        assert!(log.list().unwrap().is_empty());
    }

    #[test]
    fn status_is_last_status_bearing_event() {
        let (_tmp, log) = setup();
        let job_id = log.create().unwrap();
        log.append(&job_id, "status", json!({"status": "ingesting", "pack_id": "p", "version": "1"}))
            .unwrap();
        log.append(&job_id, "progress", json!({"files": 2, "chunks": 5}))
            .unwrap();
        log.append(&job_id, "status", json!({"status": "packaging"}))
            .unwrap();
        log.append(&job_id, "warning", json!({"message": "ephemeral key"}))
            .unwrap();

        let job = log.load(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Packaging);
        assert_eq!(job.pack_id.as_deref(), Some("p"));
        assert_eq!(job.version.as_deref(), Some("1"));
        assert_eq!(job.events.len(), 5);
        assert_eq!(job.updated_at, job.events[4].timestamp);
    }

    #[test]
    fn malformed_records_are_skipped() {
        let lines = [
            r#"{"timestamp":"2026-01-01T00:00:00Z","type":"created","status":"pending"}"#,
            "not json at all",
            r#"{"type":"status","status":"done"}"#,
            r#"{"timestamp":"2026-01-01T00:00:01Z","type":"status","status":"exploded"}"#,
            "",
            r#"{"timestamp":"2026-01-01T00:00:02Z","type":"status","status":"ingesting"}"#,
            r#"{"timestamp":"2026-01-01T00:00:03Z","type":"status","sta"#,
        ];
        let job = fold("job-x", lines);
        assert_eq!(job.status, JobStatus::Ingesting);
        assert_eq!(job.events.len(), 2);
        assert_eq!(job.updated_at.to_rfc3339(), "2026-01-01T00:00:02+00:00");
    }

    #[test]
    fn append_after_torn_line_starts_fresh_record() {
        let (_tmp, log) = setup();
        let job_id = log.create().unwrap();
        let path = log.log_path(&job_id);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"timestamp":"2026-01-01T00:00:01Z","type":"status","sta"#)
            .unwrap();
        drop(file);

        log.append(&job_id, "error", json!({"status": "failed", "error": "boom"}))
            .unwrap();

        let job = log.load(&job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        let kinds: Vec<&str> = job.events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["created", "error"]);
    }

    #[test]
    fn fold_is_pure() {
        let lines = [
            r#"{"timestamp":"2026-01-01T00:00:00Z","type":"created","status":"pending"}"#,
            r#"{"timestamp":"2026-01-01T00:00:05Z","type":"error","status":"failed","error":"boom"}"#,
        ];
        let a = fold("job-x", lines);
        let b = fold("job-x", lines);
        assert_eq!(a, b);
        assert_eq!(a.status, JobStatus::Failed);
        assert_eq!(a.error.as_deref(), Some("boom"));
    }

    #[test]
    fn extra_fields_are_preserved_not_folded() {
        let (_tmp, log) = setup();
        let job_id = log.create().unwrap();
        log.append(&job_id, "signed", json!({"key_source": "provided", "type": "spoofed"}))
            .unwrap();
        let job = log.load(&job_id).unwrap().unwrap();
        let signed = &job.events[1];
        assert_eq!(signed.kind, "signed");
        assert_eq!(signed.field_str("key_source"), Some("provided"));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn append_rejects_non_object_fields() {
        let (_tmp, log) = setup();
        let job_id = log.create().unwrap();
        assert!(log.append(&job_id, "status", json!(["x"])).is_err());
    }

    #[test]
    fn append_to_unknown_job_fails() {
        let (_tmp, log) = setup();
        log.create().unwrap();
        assert!(log.append("job-nope", "status", json!({})).is_err());
    }
}
