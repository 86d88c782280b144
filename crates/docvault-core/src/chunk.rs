//! Paragraph-boundary text chunker and token estimation.
//!
//! Both index backends store extracted text as [`TextChunk`]s. The chunker
//! accumulates `\n\n`-separated paragraphs until the next one would push the
//! buffer past `max_tokens`, and hard-splits oversized paragraphs at the
//! last newline or space that fits.
//!
//! Chunk ids are derived from the document id and chunk index, so
//! re-indexing a document overwrites its previous chunks in place.
//!
//! ```rust
//! use docvault_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-1", "Hello world.\n\nSecond paragraph.", 700);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "doc-1:0");
//! ```

use sha2::{Digest, Sha256};

use crate::models::TextChunk;

/// Approximate characters per token. Shared by the chunker and the context
/// budget allocator so both agree on sizes.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of `text` (characters / 4, rounded up).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Split text into chunks on paragraph boundaries, respecting `max_tokens`.
///
/// Empty or whitespace-only text yields no chunks. Indices are contiguous
/// from 0.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<TextChunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let joined_len = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };

        if joined_len > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if para.len() > max_chars {
            pieces.extend(split_oversized(para, max_chars));
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(document_id, i as i64, text))
        .collect()
}

/// Hard-split a single paragraph longer than `max_chars`, preferring the
/// last newline or space inside each window.
fn split_oversized(para: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = para;
    while !rest.is_empty() {
        if rest.len() <= max_chars {
            out.push(rest.trim().to_string());
            break;
        }
        let window_end = floor_char_boundary(rest, max_chars);
        let window_end = if window_end == 0 {
            rest.char_indices().nth(1).map(|(i, _)| i).unwrap_or(rest.len())
        } else {
            window_end
        };
        let cut = rest[..window_end]
            .rfind('\n')
            .or_else(|| rest[..window_end].rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(window_end);
        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        rest = &rest[cut..];
    }
    out.retain(|p| !p.is_empty());
    out
}

/// Largest char boundary `<= index`.
pub(crate) fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Hex SHA-256 of a chunk's text.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn make_chunk(document_id: &str, index: i64, text: String) -> TextChunk {
    let hash = content_hash(&text);
    TextChunk {
        id: format!("{}:{}", document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text,
        hash,
    }
}
