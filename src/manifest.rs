//! Manifest assembly, canonical serialization, and pack verification.
//!
//! Canonical JSON here means compact output with object keys in
//! lexicographic order. Values are routed through [`serde_json::Value`],
//! whose map keeps keys sorted, before being written.
//!
//! Verification recomputes everything a consumer can check without
//! trusting the producer:
//!
//! - `content_hash` from the bytes under `docs/`
//! - the Ed25519 signature over that hash
//! - `file_count` and `chunk_count`
//! - every chunk id from its `(source, offset)` pair

use anyhow::{anyhow, bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

use crate::chunk::chunk_id;
use crate::models::{Chunk, FileRecord, PackManifest, PackMetadata};
use crate::package::{relative_path, CHUNKS_FILE, DOCS_DIR, MANIFEST_FILE};
use crate::signing::{content_hash, hash_content, verify_digest, SignedDigest};

/// Compact JSON with sorted object keys.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value).context("Failed to serialize value")?;
    serde_json::to_string(&value).context("Failed to encode canonical JSON")
}

/// Assemble the manifest for a signed set of documents.
pub fn build_manifest(
    pack_id: &str,
    version: &str,
    metadata: &PackMetadata,
    records: &[FileRecord],
    chunk_count: usize,
    digest: &str,
    signed: &SignedDigest,
) -> PackManifest {
    PackManifest {
        pack_id: pack_id.to_string(),
        version: version.to_string(),
        name: metadata.name_or(pack_id),
        description: metadata.description.clone(),
        publisher: metadata.publisher(),
        license: metadata.license(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        content_hash: digest.to_string(),
        chunk_count,
        file_count: records.len(),
        signature: signed.signature.clone(),
        public_key: signed.public_key.clone(),
    }
}

/// A pack that passed verification.
#[derive(Debug, Clone)]
pub struct VerifiedPack {
    pub manifest: PackManifest,
    pub files: usize,
    pub chunks: usize,
}

/// Verify an unpacked pack directory.
pub fn verify_pack(dir: &Path) -> Result<VerifiedPack> {
    let mut members = BTreeMap::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if entry.file_type().is_file() {
            let bytes = std::fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            members.insert(relative_path(dir, entry.path()), bytes);
        }
    }
    verify_members(&members)
}

/// Verify a pack archive without unpacking it to disk.
pub fn verify_archive(path: &Path) -> Result<VerifiedPack> {
    let file =
        std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| anyhow!("{} is not a zip archive: {}", path.display(), e))?;

    let mut members = BTreeMap::new();
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| anyhow!("Failed to read archive entry {}: {}", i, e))?;
        if entry.is_dir() {
            continue;
        }
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("Failed to read {}", entry.name()))?;
        members.insert(entry.name().to_string(), bytes);
    }
    verify_members(&members)
}

fn verify_members(members: &BTreeMap<String, Vec<u8>>) -> Result<VerifiedPack> {
    let raw_manifest = members
        .get(MANIFEST_FILE)
        .ok_or_else(|| anyhow!("pack has no {}", MANIFEST_FILE))?;
    let manifest: PackManifest =
        serde_json::from_slice(raw_manifest).context("pack.json is not a valid manifest")?;

    let docs_prefix = format!("{}/", DOCS_DIR);
    let records: Vec<FileRecord> = members
        .iter()
        .filter_map(|(name, bytes)| {
            name.strip_prefix(&docs_prefix).map(|rel| FileRecord {
                relative_path: rel.to_string(),
                hash: hash_content(bytes),
            })
        })
        .collect();

    let recomputed = content_hash(&records);
    if recomputed != manifest.content_hash {
        bail!(
            "content hash mismatch: manifest has {}, documents hash to {}",
            manifest.content_hash,
            recomputed
        );
    }
    verify_digest(
        &manifest.content_hash,
        &manifest.signature,
        &manifest.public_key,
    )?;

    if records.len() != manifest.file_count {
        bail!(
            "file count mismatch: manifest has {}, pack has {}",
            manifest.file_count,
            records.len()
        );
    }

    let chunks_raw = members
        .get(CHUNKS_FILE)
        .ok_or_else(|| anyhow!("pack has no {}", CHUNKS_FILE))?;
    let chunks_text =
        std::str::from_utf8(chunks_raw).context("chunks.ndjson is not valid UTF-8")?;
    let mut chunk_count = 0;
    for (n, line) in chunks_text.lines().enumerate() {
        let chunk: Chunk = serde_json::from_str(line)
            .with_context(|| format!("chunks.ndjson line {} is not a chunk", n + 1))?;
        if chunk.id != chunk_id(&chunk.source, chunk.offset) {
            bail!("chunk id mismatch on chunks.ndjson line {}", n + 1);
        }
        chunk_count += 1;
    }
    if chunk_count != manifest.chunk_count {
        bail!(
            "chunk count mismatch: manifest has {}, pack has {}",
            manifest.chunk_count,
            chunk_count
        );
    }

    Ok(VerifiedPack {
        files: records.len(),
        chunks: chunk_count,
        manifest,
    })
}
