//! Error types for the PDF object graph

use std::io;
use thiserror::Error;
use crate::pdf::ObjectId;

/// Broad classification of a [`PDFGraphError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Fatal inconsistency of the object graph or document lifecycle
    Structural,
    /// The source document holds data the core cannot interpret
    SourceData,
    /// Underlying reader/writer failure
    Io,
}

/// Main error type for object graph operations
#[derive(Error, Debug)]
pub enum PDFGraphError {
    /// The catalog was flushed before the document was closed
    #[error("Cannot close document: catalog {0} has already been flushed")]
    RootFlushed(ObjectId),

    /// Attempt to flush a free slot
    #[error("Cannot flush free object {0}")]
    FlushFreeObject(ObjectId),

    /// Attempt to free a slot that has already been written
    #[error("Cannot free flushed object {0}")]
    FreeFlushedObject(ObjectId),

    /// Any operation on a closed document
    #[error("Document is closed")]
    DocumentClosed,

    /// Mutation of a document opened for reading
    #[error("Document is opened read-only")]
    ReadOnlyDocument,

    /// Mutation of a slot flagged read-only
    #[error("Object {0} is read-only")]
    ReadOnlyObject(ObjectId),

    /// A copy context already holds a mapping it should not
    #[error("Copy context collision: source {source_id} already mapped to {existing}")]
    CopyContextCollision {
        source_id: ObjectId,
        existing: ObjectId,
    },

    /// A copy context was reused with a different destination document
    #[error("Copy context belongs to document {expected}, not {found}")]
    CopyContextMismatch {
        expected: u64,
        found: u64,
    },

    /// Number tree with a key that has no value
    #[error("Malformed number tree: {0}")]
    MalformedNumberTree(String),

    /// Copy root is free or cannot be loaded
    #[error("Copy root {0} is free or cannot be resolved")]
    UnresolvableCopyRoot(ObjectId),

    /// Object not found
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// Invalid object type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        expected: &'static str,
        found: &'static str,
    },

    /// Missing required dictionary entry
    #[error("Missing required dictionary entry: {0}")]
    MissingDictionaryEntry(String),

    /// Page number outside the document
    #[error("Page {page} out of range (document has {count} pages)")]
    PageOutOfRange {
        page: usize,
        count: usize,
    },

    /// Malformed PDF structure
    #[error("Malformed PDF structure: {0}")]
    MalformedPDF(String),

    /// Cross reference table error
    #[error("Cross reference table error: {0}")]
    XRefError(String),

    /// Compression error
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Result type for object graph operations
pub type PDFGraphResult<T> = Result<T, PDFGraphError>;

impl PDFGraphError {
    /// Create a new malformed PDF error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPDF(msg.into())
    }

    /// Create a new cross reference table error
    pub fn xref(msg: impl Into<String>) -> Self {
        Self::XRefError(msg.into())
    }

    /// Create a new invalid object type error
    pub fn invalid_type(expected: &'static str, found: &'static str) -> Self {
        Self::InvalidObjectType { expected, found }
    }

    /// Classify the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RootFlushed(_)
            | Self::FlushFreeObject(_)
            | Self::FreeFlushedObject(_)
            | Self::DocumentClosed
            | Self::ReadOnlyDocument
            | Self::ReadOnlyObject(_)
            | Self::CopyContextCollision { .. }
            | Self::CopyContextMismatch { .. }
            | Self::XRefError(_) => ErrorCategory::Structural,
            Self::MalformedNumberTree(_)
            | Self::UnresolvableCopyRoot(_)
            | Self::ObjectNotFound(_)
            | Self::InvalidObjectType { .. }
            | Self::MissingDictionaryEntry(_)
            | Self::PageOutOfRange { .. }
            | Self::MalformedPDF(_) => ErrorCategory::SourceData,
            Self::CompressionError(_) | Self::IoError(_) => ErrorCategory::Io,
        }
    }

    /// Check if error aborts the enclosing operation as a graph inconsistency
    pub fn is_structural_error(&self) -> bool {
        self.category() == ErrorCategory::Structural
    }

    /// Check if error comes from malformed source data
    pub fn is_source_data_error(&self) -> bool {
        self.category() == ErrorCategory::SourceData
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PDFGraphError::malformed("Invalid header");
        assert!(matches!(err, PDFGraphError::MalformedPDF(_)));

        let err = PDFGraphError::xref("bad free list");
        assert!(matches!(err, PDFGraphError::XRefError(_)));
    }

    #[test]
    fn test_error_categorization() {
        let err = PDFGraphError::RootFlushed(ObjectId::new(1, 0));
        assert!(err.is_structural_error());
        assert!(!err.is_source_data_error());

        let err = PDFGraphError::MalformedNumberTree("dangling key 3".to_string());
        assert!(err.is_source_data_error());

        let err = PDFGraphError::from(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(err.category(), ErrorCategory::Io);
    }

    #[test]
    fn test_error_display() {
        let err = PDFGraphError::FlushFreeObject(ObjectId::new(7, 1));
        assert_eq!(err.to_string(), "Cannot flush free object 7 1 R");

        let err = PDFGraphError::PageOutOfRange { page: 9, count: 5 };
        assert_eq!(err.to_string(), "Page 9 out of range (document has 5 pages)");
    }
}
