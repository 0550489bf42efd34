//! Paragraph-boundary text chunker.
//!
//! Splits normalized document text into [`Chunk`]s on blank-line
//! boundaries (`\n\n`). The separator stays attached to the paragraph
//! before it, so the chunks of a document concatenate back to the exact
//! input and every `offset` is an exact byte offset into it.
//!
//! Each chunk id is the BLAKE3 hash of `"{source_id}:{offset}"`. Ids depend
//! on position, not content, so unchanged input regenerates identical ids
//! on every run.

use crate::models::Chunk;
use crate::signing::hash_content;

const PARAGRAPH_BREAK: &str = "\n\n";

/// Split text into chunks, flushing before the buffer would reach `max_size`.
///
/// `max_size` is advisory: a single paragraph at or above it is never
/// split further. Empty text yields no chunks.
///
/// Chunk text includes its trailing `\n\n` separator; only the last chunk
/// of a document can end without one.
pub fn chunk_text(text: &str, source_id: &str, max_size: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buf_start = 0usize;
    let mut buf_len = 0usize;
    let mut cursor = 0usize;

    for para in text.split_inclusive(PARAGRAPH_BREAK) {
        // Adding this paragraph would reach max: flush the current buffer first
        if buf_len > 0 && buf_len + para.len() >= max_size {
            chunks.push(make_chunk(
                source_id,
                buf_start,
                &text[buf_start..buf_start + buf_len],
            ));
            buf_start = cursor;
            buf_len = 0;
        }

        buf_len += para.len();
        cursor += para.len();
    }

    if buf_len > 0 {
        chunks.push(make_chunk(
            source_id,
            buf_start,
            &text[buf_start..buf_start + buf_len],
        ));
    }

    chunks
}

/// Deterministic chunk id for a position within a source.
pub fn chunk_id(source_id: &str, offset: usize) -> String {
    hash_content(format!("{}:{}", source_id, offset).as_bytes())
}

fn make_chunk(source_id: &str, offset: usize, text: &str) -> Chunk {
    Chunk {
        id: chunk_id(source_id, offset),
        source: source_id.to_string(),
        offset,
        text: text.to_string(),
    }
}
