//! Stored entities and the transient query-side token representation.

use serde::{Deserialize, Serialize};

use crate::doc_id::DocumentId;

/// A half-open byte range `[start, end)`.
///
/// Serializes as a two-element array, matching the `offset` field of the
/// embedding service wire format.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// True when the span covers no bytes (`start >= end`).
    pub fn is_degenerate(&self) -> bool {
        self.start >= self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, other: &Span) -> bool {
        other.start >= self.start && other.end <= self.end
    }
}

impl From<(usize, usize)> for Span {
    fn from((start, end): (usize, usize)) -> Self {
        Self { start, end }
    }
}

impl From<Span> for (usize, usize) {
    fn from(span: Span) -> Self {
        (span.start, span.end)
    }
}

/// Descriptive fields attached to a document at insertion time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub year: String,
    /// Popularity counter (e.g. view count) supplied by the caller.
    #[serde(default)]
    pub views: u64,
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub indexed: bool,
    /// Microseconds since the Unix epoch; strictly increasing per store.
    pub created_at: u64,
}

/// A segment of a document produced by the splitter during indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub id: u64,
    pub document: DocumentId,
    pub span: Span,
}

/// A content-addressed token vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub id: u64,
    pub vector: Vec<f32>,
    pub hash: u64,
}

/// Connects a chunk to the embedding of one of its tokens.
///
/// `span` is in the document's coordinate space and always lies inside
/// the owning chunk's span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLink {
    pub id: u64,
    pub document: DocumentId,
    pub chunk: u64,
    pub embedding: u64,
    pub span: Span,
}

/// One token vector returned by the embedding service for a document
/// text, with its offsets relative to the submitted text.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenEmbedding {
    pub vector: Vec<f32>,
    pub span: Span,
}

/// One token of a tokenized query. `span` indexes the raw query string.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryToken {
    pub vector: Vec<f32>,
    pub span: Span,
}

/// A document token as seen by the reranker: vector plus its span in
/// document coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentToken {
    pub vector: Vec<f32>,
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_serializes_as_pair() {
        let span = Span::new(4, 7);
        assert_eq!(serde_json::to_string(&span).unwrap(), "[4,7]");
        let back: Span = serde_json::from_str("[4,7]").unwrap();
        assert_eq!(back, span);
    }

    #[test]
    fn degenerate_spans() {
        assert!(Span::new(3, 3).is_degenerate());
        assert!(Span::new(5, 2).is_degenerate());
        assert!(!Span::new(0, 1).is_degenerate());
        assert_eq!(Span::new(5, 2).len(), 0);
    }

    #[test]
    fn containment() {
        let chunk = Span::new(10, 20);
        assert!(chunk.contains(&Span::new(10, 20)));
        assert!(chunk.contains(&Span::new(12, 15)));
        assert!(!chunk.contains(&Span::new(9, 15)));
        assert!(!chunk.contains(&Span::new(15, 21)));
    }

    #[test]
    fn metadata_defaults_missing_fields() {
        let meta: DocumentMetadata =
            serde_json::from_str(r#"{"title":"Song"}"#).unwrap();
        assert_eq!(meta.title, "Song");
        assert_eq!(meta.author, "");
        assert_eq!(meta.views, 0);
    }
}
