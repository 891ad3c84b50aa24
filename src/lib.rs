//! PDF object graph core
//!
//! Models a PDF document as a graph of typed objects joined by indirect
//! references and provides:
//!
//! * a cross-reference table that assigns, frees and reuses object numbers
//! * a document lifecycle (read, write, stamp in append or rewrite mode)
//!   whose `close` decides which objects are serialized, reused or freed
//! * a cycle-safe copy engine that moves subgraphs between documents with
//!   one destination identity per source object
//! * page-range copying that carries links, named destinations, outlines
//!   and optional-content groups along
//!
//! Byte-level parsing of existing files is left to an [`ObjectLoader`]
//! implementation; [`MemorySource`] is the in-memory one.

mod error;
mod config;
mod notice;
pub mod pdf;
pub mod copy;

#[cfg(test)]
mod testing;

pub use error::{ErrorCategory, PDFGraphError, PDFGraphResult};
pub use config::{MergePolicy, StampingMode, WriterProperties};
pub use notice::{NoticeKind, Notices};
pub use pdf::{
    Dictionary, DocumentId, LifecycleState, MemorySource, ObjectId, ObjectLoader, PDFDocument, PDFString, PDFValue,
    Stream, XRefBootstrap,
};
pub use copy::{copy_object, copy_pages, copy_value, CopyContext, CopyPagesOutcome};
