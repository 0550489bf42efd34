//! Pack assembly: document walk, build tree, and canonical archive.
//!
//! The build tree for a job looks like the archive it becomes:
//!
//! ```text
//! <work_root>/build/<job_id>/
//! ├── pack.json        canonical manifest
//! ├── chunks.ndjson    one canonical chunk record per line
//! └── docs/<path>      verbatim decoded text of each input file
//! ```
//!
//! Files are visited in sorted order and archived in sorted order with a
//! fixed timestamp and mode, so the same inputs give the same archive
//! members byte for byte (only `created_at` in `pack.json` differs).

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::chunk::chunk_text;
use crate::error::{PackError, PackResult};
use crate::manifest::canonical_json;
use crate::models::{Chunk, FileRecord, PackManifest};
use crate::signing::hash_content;

pub const MANIFEST_FILE: &str = "pack.json";
pub const CHUNKS_FILE: &str = "chunks.ndjson";
pub const DOCS_DIR: &str = "docs";

/// Outcome of decoding one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Decoded(String),
    Skipped(String),
}

/// A file left out of the pack, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Everything gathered from one walk of a normalized tree.
#[derive(Debug, Default)]
pub struct CollectedDocs {
    pub records: Vec<FileRecord>,
    pub chunks: Vec<Chunk>,
    pub skipped: Vec<SkippedFile>,
}

/// Best-effort text decode.
///
/// Byte sequences that are not valid UTF-8 are dropped and the rest of the
/// file is kept. Files containing NUL bytes are treated as binary and
/// skipped.
pub fn decode_file(path: &Path) -> FileOutcome {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => return FileOutcome::Skipped(format!("read failed: {}", e)),
    };
    if bytes.contains(&0) {
        return FileOutcome::Skipped("binary content".to_string());
    }
    match String::from_utf8(bytes) {
        Ok(text) => FileOutcome::Decoded(text),
        Err(e) => FileOutcome::Decoded(strip_invalid_utf8(e.as_bytes())),
    }
}

fn strip_invalid_utf8(mut bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                text.push_str(valid);
                return text;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                // valid_up_to marks a boundary that is always valid UTF-8
                text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match e.error_len() {
                    Some(len) => bytes = &rest[len..],
                    None => return text,
                }
            }
        }
    }
}

/// Walk `source_dir`, copy decoded documents into `docs_dir`, chunk and
/// hash them.
///
/// Hidden entries (names starting with `.`) and paths matching
/// `exclude_globs` are not visited. A file that cannot be decoded is
/// recorded in `skipped` and never aborts the walk.
pub fn collect_documents(
    source_dir: &Path,
    docs_dir: &Path,
    max_size: usize,
    exclude_globs: &[String],
) -> PackResult<CollectedDocs> {
    let excludes = build_globset(exclude_globs)?;
    std::fs::create_dir_all(docs_dir)
        .with_context(|| format!("Failed to create {}", docs_dir.display()))?;

    let mut collected = CollectedDocs::default();

    let walker = WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.context("Failed to walk normalized tree")?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel_str = relative_path(source_dir, entry.path());
        if excludes.is_match(&rel_str) {
            continue;
        }

        let content = match decode_file(entry.path()) {
            FileOutcome::Decoded(content) => content,
            FileOutcome::Skipped(reason) => {
                tracing::warn!(path = %rel_str, %reason, "skipping file");
                collected.skipped.push(SkippedFile {
                    path: rel_str,
                    reason,
                });
                continue;
            }
        };

        let dest = docs_dir.join(&rel_str);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&dest, &content)
            .with_context(|| format!("Failed to write {}", dest.display()))?;

        collected
            .chunks
            .extend(chunk_text(&content, &rel_str, max_size));
        collected.records.push(FileRecord {
            hash: hash_content(content.as_bytes()),
            relative_path: rel_str,
        });
    }

    Ok(collected)
}

/// Write `pack.json` and `chunks.ndjson` into the build tree.
pub fn write_pack_files(build_dir: &Path, manifest: &PackManifest, chunks: &[Chunk]) -> PackResult<()> {
    let manifest_path = build_dir.join(MANIFEST_FILE);
    std::fs::write(&manifest_path, canonical_json(manifest)?)
        .with_context(|| format!("Failed to write {}", manifest_path.display()))?;

    let chunks_path = build_dir.join(CHUNKS_FILE);
    let mut out = std::io::BufWriter::new(
        File::create(&chunks_path)
            .with_context(|| format!("Failed to create {}", chunks_path.display()))?,
    );
    for chunk in chunks {
        out.write_all(canonical_json(chunk)?.as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Zip every file under `build_dir` into `archive_path`, in sorted order.
pub fn write_archive(build_dir: &Path, archive_path: &Path) -> PackResult<usize> {
    let mut members: Vec<(String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(build_dir) {
        let entry = entry.context("Failed to walk build tree")?;
        if entry.file_type().is_file() {
            members.push((
                relative_path(build_dir, entry.path()),
                entry.path().to_path_buf(),
            ));
        }
    }
    members.sort_by(|a, b| a.0.cmp(&b.0));

    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create {}", archive_path.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    for (name, path) in &members {
        zip.start_file(name.as_str(), options)
            .map_err(|e| PackError::Internal(anyhow::anyhow!("zip entry {}: {}", name, e)))?;
        let mut input =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        std::io::copy(&mut input, &mut zip)?;
    }
    zip.finish()
        .map_err(|e| PackError::Internal(anyhow::anyhow!("Failed to finish archive: {}", e)))?;

    Ok(members.len())
}

/// Object name under which a pack version is stored.
pub fn archive_object_name(pack_id: &str, version: &str) -> String {
    format!("packs/{}/{}/pack.zip", pack_id, version)
}

/// Local file name of a finished archive.
pub fn archive_file_name(pack_id: &str, version: &str) -> String {
    format!("{}-{}.zip", pack_id, version)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Path of `path` under `root`, always with forward slashes.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> PackResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern).with_context(|| format!("Invalid exclude glob: {}", pattern))?,
        );
    }
    Ok(builder.build().context("Failed to build exclude globs")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn default_excludes() -> Vec<String> {
        crate::config::WalkConfig::default().exclude_globs
    }

    fn sample_tree(root: &Path) {
        std::fs::create_dir_all(root.join("guide")).unwrap();
        std::fs::create_dir_all(root.join(".hidden")).unwrap();
        std::fs::create_dir_all(root.join("__pycache__")).unwrap();
        std::fs::write(root.join("README.md"), "# Readme\n\nTop level.").unwrap();
        std::fs::write(root.join("guide/intro.md"), "Intro text.").unwrap();
        std::fs::write(root.join(".env"), "SECRET=1").unwrap();
        std::fs::write(root.join(".hidden/notes.md"), "hidden").unwrap();
        std::fs::write(root.join("__pycache__/mod.pyc"), "cache").unwrap();
        std::fs::write(root.join("logo.png"), [0x89u8, b'P', b'N', b'G', 0, 0, 0xff]).unwrap();
    }

    #[test]
    fn decode_outcomes() {
        let tmp = TempDir::new().unwrap();
        let text = tmp.path().join("a.txt");
        std::fs::write(&text, "plain").unwrap();
        assert_eq!(decode_file(&text), FileOutcome::Decoded("plain".to_string()));

        let latin1 = tmp.path().join("b.txt");
        std::fs::write(&latin1, [b'c', b'a', b'f', 0xe9, b'!', b' ', 0xc3, 0xa9]).unwrap();
        assert_eq!(decode_file(&latin1), FileOutcome::Decoded("caf! é".to_string()));

        let truncated = tmp.path().join("c.txt");
        std::fs::write(&truncated, [b'o', b'k', 0xe2, 0x82]).unwrap();
        assert_eq!(decode_file(&truncated), FileOutcome::Decoded("ok".to_string()));

        let binary = tmp.path().join("d.bin");
        std::fs::write(&binary, [b'x', 0, b'y']).unwrap();
        assert_eq!(
            decode_file(&binary),
            FileOutcome::Skipped("binary content".to_string())
        );

        assert!(matches!(
            decode_file(&tmp.path().join("missing.txt")),
            FileOutcome::Skipped(_)
        ));
    }

    #[test]
    fn collect_skips_hidden_cache_and_binary() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let docs = tmp.path().join("build/docs");
        sample_tree(&src);

        let collected = collect_documents(&src, &docs, 1000, &default_excludes()).unwrap();

        let paths: Vec<&str> = collected
            .records
            .iter()
            .map(|r| r.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["README.md", "guide/intro.md"]);
        assert_eq!(collected.skipped.len(), 1);
        assert_eq!(collected.skipped[0].path, "logo.png");
        assert_eq!(collected.chunks.len(), 2);
        assert_eq!(
            std::fs::read_to_string(docs.join("guide/intro.md")).unwrap(),
            "Intro text."
        );
        assert!(!docs.join(".env").exists());
        assert!(!docs.join("logo.png").exists());
        assert_eq!(collected.records[1].hash, hash_content(b"Intro text."));
    }

    #[test]
    fn chunk_sources_are_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        sample_tree(&src);
        let collected =
            collect_documents(&src, &tmp.path().join("docs"), 1000, &default_excludes()).unwrap();
        let sources: Vec<&str> = collected.chunks.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(sources, vec!["README.md", "guide/intro.md"]);
    }

    #[test]
    fn archive_contains_sorted_members() {
        let tmp = TempDir::new().unwrap();
        let build = tmp.path().join("build");
        std::fs::create_dir_all(build.join("docs/b")).unwrap();
        std::fs::write(build.join("pack.json"), "{}").unwrap();
        std::fs::write(build.join("chunks.ndjson"), "").unwrap();
        std::fs::write(build.join("docs/z.md"), "z").unwrap();
        std::fs::write(build.join("docs/b/a.md"), "a").unwrap();

        let archive = tmp.path().join("out/pack.zip");
        let count = write_archive(&build, &archive).unwrap();
        assert_eq!(count, 4);

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["chunks.ndjson", "docs/b/a.md", "docs/z.md", "pack.json"]
        );

        let mut body = String::new();
        zip.by_name("docs/z.md")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "z");
    }

    #[test]
    fn archive_is_reproducible() {
        let tmp = TempDir::new().unwrap();
        let build = tmp.path().join("build");
        std::fs::create_dir_all(build.join("docs")).unwrap();
        std::fs::write(build.join("pack.json"), "{\"a\":1}").unwrap();
        std::fs::write(build.join("docs/x.md"), "x").unwrap();

        let first = tmp.path().join("one.zip");
        let second = tmp.path().join("two.zip");
        write_archive(&build, &first).unwrap();
        write_archive(&build, &second).unwrap();
        assert_eq!(std::fs::read(first).unwrap(), std::fs::read(second).unwrap());
    }

    #[test]
    fn object_names() {
        assert_eq!(archive_object_name("docs", "1.0.0"), "packs/docs/1.0.0/pack.zip");
        assert_eq!(archive_file_name("docs", "1.0.0"), "docs-1.0.0.zip");
    }
}
