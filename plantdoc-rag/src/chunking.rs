//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`RecursiveChunker`] splits on a priority list of separators (paragraph,
//!   line, sentence, word) and falls back to character slicing
//! - [`FixedSizeChunker`] slices by character count only
//!
//! Both produce chunks that are exact substrings of the document text. Lengths
//! are counted in `char`s, so multi-byte text is never cut inside a character.
//! Every chunk after the first starts with the trailing `chunk_overlap`
//! characters of the chunk before it.

use std::ops::Range;

use crate::config::{DEFAULT_SEPARATORS, RagConfig, validate_chunking};
use crate::document::{Chunk, Document};
use crate::error::Result;

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has empty text.
    fn split(&self, document: &Document) -> Vec<Chunk>;
}

/// Splits text hierarchically using an ordered list of separators.
///
/// A span longer than the budget is split on the first separator (in priority
/// order) that occurs in it, with the separator kept at the end of the piece
/// before it. Pieces that are still too long are re-split with the separators
/// that follow; `""` (or running out of separators) means hard character
/// slicing. The pieces are then merged greedily into chunks of at most
/// `chunk_size` characters.
///
/// # Example
///
/// ```rust,ignore
/// use plantdoc_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(1000, 100)?;
/// let chunks = chunker.split(&document);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// Create a chunker with the default separators
    /// (`"\n\n"`, `"\n"`, `"."`, `" "`, `""`).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`](crate::RagError::Configuration) if
    /// `chunk_size == 0` or `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::with_separators(chunk_size, chunk_overlap, DEFAULT_SEPARATORS)
    }

    /// Create a chunker with a custom separator priority list.
    pub fn with_separators<I, S>(
        chunk_size: usize,
        chunk_overlap: usize,
        separators: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_chunking(chunk_size, chunk_overlap)?;
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: separators.into_iter().map(Into::into).collect(),
        })
    }

    /// Create a chunker from the pipeline configuration.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::with_separators(config.chunk_size, config.chunk_overlap, config.separators.clone())
    }

    /// Maximum chunk length in characters.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters shared by consecutive chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Byte ranges of the chunks of `text`, in order.
    fn chunk_ranges(&self, text: &str) -> Vec<Range<usize>> {
        let piece_limit = self.chunk_size - self.chunk_overlap;
        let mut pieces = Vec::new();
        segment(text, 0..text.len(), piece_limit, &self.separators, &mut pieces);
        merge(text, &pieces, self.chunk_size, self.chunk_overlap)
    }
}

impl Chunker for RecursiveChunker {
    fn split(&self, document: &Document) -> Vec<Chunk> {
        if document.text.is_empty() {
            return Vec::new();
        }
        build_chunks(document, self.chunk_ranges(&document.text))
    }
}

/// Splits text into windows of at most `chunk_size` characters, ignoring
/// any textual structure.
///
/// # Example
///
/// ```rust,ignore
/// use plantdoc_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(256, 32)?;
/// let chunks = chunker.split(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    inner: RecursiveChunker,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Ok(Self { inner: RecursiveChunker::with_separators(chunk_size, chunk_overlap, [""])? })
    }
}

impl Chunker for FixedSizeChunker {
    fn split(&self, document: &Document) -> Vec<Chunk> {
        self.inner.split(document)
    }
}

fn build_chunks(document: &Document, ranges: Vec<Range<usize>>) -> Vec<Chunk> {
    let text = &document.text;
    let mut chunks = Vec::with_capacity(ranges.len());
    // Chunk starts are strictly increasing, so char offsets can be counted incrementally.
    let mut counted_bytes = 0;
    let mut counted_chars = 0;

    for (chunk_index, range) in ranges.into_iter().enumerate() {
        counted_chars += char_len(&text[counted_bytes..range.start]);
        counted_bytes = range.start;
        let offset = counted_chars;

        let mut metadata = document.metadata.clone();
        metadata.insert("chunk_index".to_string(), chunk_index.to_string());
        metadata.insert("offset".to_string(), offset.to_string());

        chunks.push(Chunk {
            id: Chunk::identity(&document.id, offset),
            text: text[range].to_string(),
            document_id: document.id.clone(),
            offset,
            metadata,
        });
    }

    chunks
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split `text[range]` into contiguous ranges of at most `limit` characters.
fn segment(
    text: &str,
    range: Range<usize>,
    limit: usize,
    separators: &[String],
    out: &mut Vec<Range<usize>>,
) {
    let span = &text[range.clone()];
    if char_len(span) <= limit {
        out.push(range);
        return;
    }

    let mut remaining = separators;
    while let Some((separator, rest)) = remaining.split_first() {
        if separator.is_empty() {
            break;
        }
        if span.contains(separator.as_str()) {
            for piece in split_keeping_separator(span, separator) {
                let piece = range.start + piece.start..range.start + piece.end;
                segment(text, piece, limit, rest, out);
            }
            return;
        }
        remaining = rest;
    }

    slice_by_chars(text, range, limit, out);
}

/// Split at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<Range<usize>> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(start..end);
        start = end;
    }

    if start < text.len() {
        result.push(start..text.len());
    }

    result
}

/// Hard slicing into windows of `limit` characters.
fn slice_by_chars(text: &str, range: Range<usize>, limit: usize, out: &mut Vec<Range<usize>>) {
    let mut start = range.start;
    let mut count = 0;
    for (idx, _) in text[range.clone()].char_indices() {
        if count == limit {
            out.push(start..range.start + idx);
            start = range.start + idx;
            count = 0;
        }
        count += 1;
    }
    if start < range.end {
        out.push(start..range.end);
    }
}

/// Merge contiguous pieces into chunk ranges.
///
/// Each piece is at most `chunk_size - chunk_overlap` characters, so a piece
/// always fits after an overlap prefix.
fn merge(
    text: &str,
    pieces: &[Range<usize>],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Range<usize>> {
    let mut chunks: Vec<Range<usize>> = Vec::new();
    let Some(first) = pieces.first() else {
        return chunks;
    };

    let mut chunk_start = first.start;
    let mut body_end = first.start;
    let mut chunk_chars = 0;

    for piece in pieces {
        let piece_chars = char_len(&text[piece.clone()]);
        if body_end > chunk_start && chunk_chars + piece_chars > chunk_size {
            chunks.push(chunk_start..body_end);
            let prefix = chunk_overlap.min(chunk_chars);
            chunk_start = back_off_chars(text, body_end, prefix);
            chunk_chars = prefix;
        }
        body_end = piece.end;
        chunk_chars += piece_chars;
    }

    if body_end > chunk_start {
        chunks.push(chunk_start..body_end);
    }

    chunks
}

/// Byte index `n` characters before `end`.
fn back_off_chars(text: &str, end: usize, n: usize) -> usize {
    if n == 0 {
        return end;
    }
    text[..end].char_indices().rev().nth(n - 1).map_or(0, |(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new("doc", text).with_metadata("crop", "Tomato")
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let chunker = RecursiveChunker::new(100, 10).unwrap();
        assert!(chunker.split(&doc("")).is_empty());
    }

    #[test]
    fn short_document_yields_one_chunk() {
        let chunker = RecursiveChunker::new(100, 10).unwrap();
        let chunks = chunker.split(&doc("Tomato bacterial spot: small dark lesions."));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Tomato bacterial spot: small dark lesions.");
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[0].id, "doc:0");
        assert_eq!(chunks[0].metadata.get("crop").map(String::as_str), Some("Tomato"));
        assert_eq!(chunks[0].metadata.get("chunk_index").map(String::as_str), Some("0"));
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let text = format!("{}\n\n{}", "a".repeat(30), "b".repeat(30));
        let chunker = RecursiveChunker::new(40, 5).unwrap();
        let chunks = chunker.split(&doc(&text));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, format!("{}\n\n", "a".repeat(30)));
        // Overlap: the last five characters of the first chunk lead the second.
        assert_eq!(chunks[1].text, format!("aaa\n\n{}", "b".repeat(30)));
        assert_eq!(chunks[1].offset, 27);
    }

    #[test]
    fn falls_back_to_character_slicing() {
        let text = "x".repeat(25);
        let chunker = RecursiveChunker::new(10, 2).unwrap();
        let chunks = chunker.split(&doc(&text));
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 10));
        let covered: usize =
            chunks.iter().map(|c| c.text.len()).sum::<usize>() - 2 * (chunks.len() - 1);
        assert_eq!(covered, 25);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "Domates bitkisinde bakteriyel leke hastalığı görülür. Yapraklarda küçük lekeler oluşur.";
        let chunker = RecursiveChunker::new(30, 5).unwrap();
        let chunks = chunker.split(&doc(text));
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 30);
            let expected: String =
                text.chars().skip(chunk.offset).take(chunk.text.chars().count()).collect();
            assert_eq!(chunk.text, expected);
        }
    }

    #[test]
    fn fixed_size_chunker_windows() {
        let chunker = FixedSizeChunker::new(10, 0).unwrap();
        let chunks = chunker.split(&doc("abcdefghij klmnopqrst"));
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcdefghij", " klmnopqrs", "t"]);
    }

    #[test]
    fn rejects_invalid_overlap() {
        assert!(RecursiveChunker::new(10, 10).is_err());
        assert!(FixedSizeChunker::new(0, 0).is_err());
    }
}
