//! Fixed-size chunking and exact chunk hashes.

use crate::models::ChunkSpan;
use sha2::{Digest, Sha256};

/// Splits `text` into windows of `chunk_size` characters advancing by
/// `chunk_size - overlap`.
///
/// Spans are byte ranges aligned to character boundaries. The last window may
/// be shorter. A zero `chunk_size` yields one span over the whole text.
#[must_use]
pub fn chunk_spans(text: &str, chunk_size: usize, overlap: usize) -> Vec<ChunkSpan> {
    if text.is_empty() {
        return Vec::new();
    }
    if chunk_size == 0 {
        return vec![ChunkSpan {
            index: 0,
            start: 0,
            end: text.len(),
        }];
    }
    let step = chunk_size - overlap.min(chunk_size - 1);
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;

    let mut spans = Vec::new();
    let mut start_char = 0;
    while start_char < char_count {
        let end_char = (start_char + chunk_size).min(char_count);
        spans.push(ChunkSpan {
            index: spans.len(),
            start: boundaries[start_char],
            end: boundaries[end_char],
        });
        if end_char == char_count {
            break;
        }
        start_char += step;
    }
    spans
}

/// Normalises a chunk before hashing: lower-case, whitespace runs collapsed.
#[must_use]
pub fn normalize_chunk(chunk: &str) -> String {
    chunk
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex SHA-256 of the normalised chunk, `None` for blank chunks.
#[must_use]
pub fn chunk_hash(chunk: &str) -> Option<String> {
    let normalized = normalize_chunk(chunk);
    if normalized.is_empty() {
        return None;
    }
    Some(hex::encode(Sha256::digest(normalized.as_bytes())))
}
