//! Cross-document copy engine
//!
//! Copies the subgraph reachable from a value of one document into another.
//! Every source object reached through an indirect reference gets exactly
//! one destination identity per [`CopyContext`]; the identity is reserved
//! before the object's contents are copied, so cycles resolve to the
//! reserved id instead of recursing forever.

mod ocg;
mod outline;
mod pages;

pub use ocg::merge_optional_content;
pub use outline::copy_outlines;
pub use pages::{copy_pages, CopyPagesOutcome};

use std::collections::{HashMap, HashSet, VecDeque};
use log::{debug, trace};
use crate::error::{PDFGraphError, PDFGraphResult};
use crate::notice::{NoticeKind, Notices};
use crate::pdf::{Dictionary, DocumentId, ObjectId, PDFDocument, PDFValue, Stream};

/// Source-to-destination identity map shared by copy calls
///
/// Bound to the first destination document it is used with. Keep one alive
/// across calls to share objects between them; [`clear`](Self::clear) it to
/// force independent duplicates.
#[derive(Debug, Default)]
pub struct CopyContext {
    copied: HashMap<(DocumentId, ObjectId), ObjectId>,
    in_progress: HashSet<(DocumentId, ObjectId)>,
    destination: Option<DocumentId>,
    notices: Notices,
}

impl CopyContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destination id of a copied source object
    pub fn translate(&self, source: DocumentId, id: ObjectId) -> Option<ObjectId> {
        self.copied.get(&(source, id)).copied()
    }

    pub fn len(&self) -> usize {
        self.copied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copied.is_empty()
    }

    pub fn destination(&self) -> Option<DocumentId> {
        self.destination
    }

    /// Notices recorded since the context was created or cleared
    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    /// Forget every mapping and the destination binding
    pub fn clear(&mut self) {
        debug!("Clearing copy context with {} mappings", self.copied.len());
        self.copied.clear();
        self.in_progress.clear();
        self.destination = None;
        self.notices = Notices::new();
    }

    fn bind(&mut self, destination: DocumentId) -> PDFGraphResult<()> {
        match self.destination {
            Some(bound) if bound != destination => Err(PDFGraphError::CopyContextMismatch {
                expected: bound.value(),
                found: destination.value(),
            }),
            Some(_) => Ok(()),
            None => {
                self.destination = Some(destination);
                Ok(())
            }
        }
    }

    /// Record `source_id -> target` before the source contents are copied
    ///
    /// `replace` allows remapping an already copied object (duplicating
    /// copies); remapping an object whose copy is still in progress is
    /// always a collision.
    fn reserve(&mut self, source: DocumentId, source_id: ObjectId, target: ObjectId, replace: bool) -> PDFGraphResult<()> {
        let key = (source, source_id);
        if let Some(existing) = self.copied.get(&key) {
            if !replace || self.in_progress.contains(&key) {
                return Err(PDFGraphError::CopyContextCollision {
                    source_id,
                    existing: *existing,
                });
            }
        }
        self.copied.insert(key, target);
        self.in_progress.insert(key);
        Ok(())
    }

    fn complete(&mut self, source: DocumentId, source_id: ObjectId) {
        self.in_progress.remove(&(source, source_id));
    }
}

/// Copy `value` from `source` into `dest`
///
/// References are translated through `ctx`. With `allow_duplicating` a
/// reference passed as `value` is copied again even if `ctx` already maps
/// it; everything below it is still shared.
pub fn copy_value(
    value: &PDFValue,
    source: &mut PDFDocument,
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
    allow_duplicating: bool,
) -> PDFGraphResult<PDFValue> {
    let mut notices = Notices::new();
    let copied = copy_into(value, source, dest, ctx, allow_duplicating, &mut notices)?;
    notices.log_summary("copy");
    ctx.notices.merge(&notices);
    Ok(copied)
}

/// Copy a single indirect object using the destination's merge policy
///
/// Returns `None` when the object is a catalog, which is never copied.
pub fn copy_object(
    id: ObjectId,
    source: &mut PDFDocument,
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
) -> PDFGraphResult<Option<ObjectId>> {
    let allow_duplicating = dest.policy().allow_duplicating;
    let copied = copy_value(&PDFValue::Reference(id), source, dest, ctx, allow_duplicating)?;
    Ok(copied.as_reference())
}

/// Copy without logging; notices are added to `notices`
pub(crate) fn copy_into(
    value: &PDFValue,
    source: &mut PDFDocument,
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
    allow_duplicating: bool,
    notices: &mut Notices,
) -> PDFGraphResult<PDFValue> {
    ctx.bind(dest.id())?;
    let mut copier = Copier {
        source,
        dest,
        ctx,
        notices,
        queue: VecDeque::new(),
    };
    let copied = match value {
        PDFValue::Reference(id) => copier.copy_root(*id, allow_duplicating)?,
        other => copier.copy_direct(other, false)?,
    };
    copier.drain()?;
    Ok(copied)
}

/// Copy a source dictionary as a new destination object mapped to
/// `source_id`
///
/// The mapping is in place before the contents are copied, so references
/// back to `source_id` from inside the dictionary land on the new object.
/// `finish` runs on the copied dictionary before it is stored.
pub(crate) fn copy_detached(
    source_id: ObjectId,
    dict: Dictionary,
    source: &mut PDFDocument,
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
    notices: &mut Notices,
    finish: impl FnOnce(&mut Dictionary),
) -> PDFGraphResult<ObjectId> {
    ctx.bind(dest.id())?;
    let target = dest.allocate()?;
    ctx.reserve(source.id(), source_id, target, true)?;
    let copied = copy_into(&PDFValue::Dictionary(dict), source, dest, ctx, false, notices)?;
    let mut copied = match copied {
        PDFValue::Dictionary(dict) => dict,
        other => return Err(PDFGraphError::invalid_type("dictionary", other.type_name())),
    };
    finish(&mut copied);
    dest.set_object(target, copied)?;
    ctx.complete(source.id(), source_id);
    Ok(target)
}

fn is_catalog(value: &PDFValue) -> bool {
    value.as_dictionary().map_or(false, |dict| dict.has_type("Catalog"))
}

struct Copier<'a> {
    source: &'a mut PDFDocument,
    dest: &'a mut PDFDocument,
    ctx: &'a mut CopyContext,
    notices: &'a mut Notices,
    /// Reserved targets whose contents still have to be copied
    queue: VecDeque<(ObjectId, ObjectId, PDFValue)>,
}

impl Copier<'_> {
    fn copy_root(&mut self, id: ObjectId, allow_duplicating: bool) -> PDFGraphResult<PDFValue> {
        let source_doc = self.source.id();
        if !allow_duplicating {
            if let Some(target) = self.ctx.translate(source_doc, id) {
                trace!("{} already copied as {}", id, target);
                return Ok(PDFValue::Reference(target));
            }
        }
        let value = self
            .source
            .resolve_cloned(id)?
            .ok_or(PDFGraphError::UnresolvableCopyRoot(id))?;
        if is_catalog(&value) {
            self.notices.record(NoticeKind::CatalogCopySkipped);
            return Ok(PDFValue::Null);
        }
        self.reserve(id, value, allow_duplicating)
    }

    fn copy_reference(&mut self, id: ObjectId) -> PDFGraphResult<PDFValue> {
        if let Some(target) = self.ctx.translate(self.source.id(), id) {
            return Ok(PDFValue::Reference(target));
        }
        match self.source.resolve_cloned(id)? {
            None => {
                trace!("{} cannot be resolved, copying null", id);
                self.notices.record(NoticeKind::UnresolvedReference);
                Ok(PDFValue::Null)
            }
            Some(value) if is_catalog(&value) => {
                self.notices.record(NoticeKind::CatalogCopySkipped);
                Ok(PDFValue::Null)
            }
            Some(value) => self.reserve(id, value, false),
        }
    }

    fn reserve(&mut self, id: ObjectId, value: PDFValue, replace: bool) -> PDFGraphResult<PDFValue> {
        let target = self.dest.allocate()?;
        self.ctx.reserve(self.source.id(), id, target, replace)?;
        trace!("Reserved {} for {}", target, id);
        self.queue.push_back((id, target, value));
        Ok(PDFValue::Reference(target))
    }

    /// Copy a direct value; `top_level` is set for the value of an indirect
    /// object, where streams may stay as they are
    fn copy_direct(&mut self, value: &PDFValue, top_level: bool) -> PDFGraphResult<PDFValue> {
        match value {
            PDFValue::Reference(id) => self.copy_reference(*id),
            PDFValue::Array(items) => {
                let mut copied = Vec::with_capacity(items.len());
                for item in items {
                    copied.push(self.copy_direct(item, false)?);
                }
                Ok(PDFValue::Array(copied))
            }
            PDFValue::Dictionary(dict) => Ok(PDFValue::Dictionary(self.copy_dictionary(dict)?)),
            PDFValue::Stream(stream) => {
                let copied = Stream::new(self.copy_dictionary(stream.dictionary())?, stream.data().to_vec());
                if top_level {
                    return Ok(PDFValue::Stream(copied));
                }
                // Streams can only live in indirect objects
                let id = self.dest.add_object(copied)?;
                trace!("Hoisted inline stream into {}", id);
                Ok(PDFValue::Reference(id))
            }
            scalar => Ok(scalar.clone()),
        }
    }

    fn copy_dictionary(&mut self, dict: &Dictionary) -> PDFGraphResult<Dictionary> {
        let mut copied = Dictionary::new();
        for (key, value) in dict {
            copied.set(key, self.copy_direct(value, false)?);
        }
        Ok(copied)
    }

    fn drain(&mut self) -> PDFGraphResult<()> {
        let source_doc = self.source.id();
        while let Some((source_id, target, value)) = self.queue.pop_front() {
            let copied = self.copy_direct(&value, true)?;
            self.dest.set_object(target, copied)?;
            self.ctx.complete(source_doc, source_id);
            trace!("Copied {} into {}", source_id, target);
        }
        Ok(())
    }
}
