//! Caller-facing configuration: merge policy and writer properties

use std::collections::HashSet;
use crate::pdf::ObjectId;

/// Policy applied when objects are copied into, and flushed out of, a document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePolicy {
    /// Copy the root of a copy call again even if the context already maps it
    pub allow_duplicating: bool,
    /// On full writes, serialize objects unreachable from the catalog instead
    /// of freeing them
    pub flush_unused_objects: bool,
    /// Objects never serialized by an append-mode close
    pub forbidden_flush_set: HashSet<ObjectId>,
}

impl MergePolicy {
    pub fn with_allow_duplicating(mut self, allow: bool) -> Self {
        self.allow_duplicating = allow;
        self
    }

    pub fn with_flush_unused_objects(mut self, flush: bool) -> Self {
        self.flush_unused_objects = flush;
        self
    }

    pub fn forbid_flush(mut self, id: ObjectId) -> Self {
        self.forbidden_flush_set.insert(id);
        self
    }
}

/// Incremental-update strategy of a stamping session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampingMode {
    /// Keep the original bytes and append only the changes
    AppendMode,
    /// Load the original document and rewrite all of it
    FullRewrite,
}

/// Output settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterProperties {
    /// Write a cross-reference stream instead of a table; `None` follows the
    /// source document (or a table for new documents)
    pub full_compression: Option<bool>,
    /// Flate-compress unfiltered streams
    pub compress_streams: bool,
    /// Flate level, 0-9
    pub compression_level: u32,
    /// Value written to the Info dictionary's `/Producer`
    pub producer: String,
    /// Header version for new documents
    pub pdf_version: String,
}

impl Default for WriterProperties {
    fn default() -> Self {
        Self {
            full_compression: None,
            compress_streams: true,
            compression_level: 6,
            producer: format!("pdf-graph {}", env!("CARGO_PKG_VERSION")),
            pdf_version: "1.7".to_string(),
        }
    }
}

impl WriterProperties {
    pub fn with_full_compression(mut self, full: bool) -> Self {
        self.full_compression = Some(full);
        self
    }

    pub fn with_compress_streams(mut self, compress: bool) -> Self {
        self.compress_streams = compress;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }
}
