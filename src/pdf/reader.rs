//! Reader seam: how parsed source documents feed the object graph
//!
//! Tokenizing the byte stream is done elsewhere. The core only needs a way to
//! materialize one object on demand and the bootstrap data found in the
//! source's cross-reference section.

use std::collections::HashMap;
use log::trace;
use crate::error::{PDFGraphError, PDFGraphResult};
use super::{Dictionary, ObjectId, PDFValue};

/// Lazily materializes objects of a source document
pub trait ObjectLoader {
    /// Load the value stored under `id`
    fn load(&mut self, id: ObjectId) -> PDFGraphResult<PDFValue>;
}

/// Kind of a cross-reference entry found in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntryKind {
    /// Object present in the source
    InUse,
    /// Free entry pointing at the next free object number
    Free { next: u32 },
}

/// One cross-reference entry of the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XRefEntry {
    pub generation: u16,
    pub kind: XRefEntryKind,
}

impl XRefEntry {
    pub fn in_use(generation: u16) -> Self {
        Self {
            generation,
            kind: XRefEntryKind::InUse,
        }
    }

    pub fn free(next: u32, generation: u16) -> Self {
        Self {
            generation,
            kind: XRefEntryKind::Free { next },
        }
    }
}

/// Everything the reader learned from the source's xref section and trailer
#[derive(Debug, Clone, Default)]
pub struct XRefBootstrap {
    /// Trailer `/Size`
    pub size: u32,
    /// Entries indexed by object number; missing entries count as in use
    pub entries: Vec<XRefEntry>,
    /// Trailer dictionary (`/Root`, `/Info`, `/ID`, `/Encrypt`)
    pub trailer: Dictionary,
    /// Whether the source used a cross-reference stream
    pub uses_xref_stream: bool,
    /// Offset of the last cross-reference section in the source bytes
    pub startxref: u64,
}

/// In-memory source document
///
/// Holds already-parsed objects; useful when the bytes were tokenized up
/// front, and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    objects: HashMap<ObjectId, PDFValue>,
    trailer: Dictionary,
    uses_xref_stream: bool,
    startxref: u64,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object
    pub fn insert(&mut self, id: ObjectId, value: impl Into<PDFValue>) {
        self.objects.insert(id, value.into());
    }

    /// Register an object under the next free number with generation 0
    pub fn push(&mut self, value: impl Into<PDFValue>) -> ObjectId {
        let number = self.objects.keys().map(|id| id.number).max().unwrap_or(0) + 1;
        let id = ObjectId::new(number, 0);
        self.insert(id, value);
        id
    }

    /// Overwrite an object in place
    pub fn replace(&mut self, id: ObjectId, value: impl Into<PDFValue>) {
        self.insert(id, value);
    }

    /// Point the trailer at the catalog
    pub fn set_root(&mut self, id: ObjectId) {
        self.trailer.set_reference("Root", id);
    }

    pub fn set_uses_xref_stream(&mut self, uses_xref_stream: bool) {
        self.uses_xref_stream = uses_xref_stream;
    }

    pub fn set_startxref(&mut self, offset: u64) {
        self.startxref = offset;
    }

    /// Bootstrap data derived from the registered objects
    ///
    /// Numbers with no registered object become free entries chained in
    /// ascending order.
    pub fn bootstrap(&self) -> XRefBootstrap {
        let size = self.objects.keys().map(|id| id.number).max().unwrap_or(0) + 1;
        let mut entries = vec![XRefEntry::free(0, u16::MAX); size as usize];
        let mut generations = HashMap::new();
        for id in self.objects.keys() {
            generations.insert(id.number, id.generation);
        }

        let free: Vec<u32> = (1..size).filter(|n| !generations.contains_key(n)).collect();
        for number in 1..size {
            if let Some(&generation) = generations.get(&number) {
                entries[number as usize] = XRefEntry::in_use(generation);
            }
        }
        let mut previous = 0usize;
        for &number in &free {
            entries[previous] = XRefEntry::free(number, entries[previous].generation);
            entries[number as usize] = XRefEntry::free(0, 1);
            previous = number as usize;
        }

        let mut trailer = self.trailer.clone();
        trailer.set("Size", size as i64);
        XRefBootstrap {
            size,
            entries,
            trailer,
            uses_xref_stream: self.uses_xref_stream,
            startxref: self.startxref,
        }
    }
}

impl ObjectLoader for MemorySource {
    fn load(&mut self, id: ObjectId) -> PDFGraphResult<PDFValue> {
        trace!("MemorySource load {}", id);
        self.objects
            .get(&id)
            .cloned()
            .ok_or(PDFGraphError::ObjectNotFound(id))
    }
}
