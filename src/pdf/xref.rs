//! PDF cross-reference table implementation
//!
//! The table owns one slot per object number. Slot 0 is never a live object:
//! its `next_free` field is the head of the free list, and every free slot
//! links to the next one the same way the `f` entries of a classic xref
//! section chain through their offset field.

use std::collections::HashSet;
use bitflags::bitflags;
use log::{trace, warn};
use crate::error::{PDFGraphError, PDFGraphResult};
use super::reader::{ObjectLoader, XRefBootstrap, XRefEntryKind};
use super::{ObjectId, PDFValue};

/// Highest generation number; a slot reaching it is retired for good
pub const MAX_GENERATION: u16 = 65535;

bitflags! {
    /// Lifecycle flags of an indirect slot
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SlotState: u8 {
        const FREE = 1;
        const MODIFIED = 1 << 1;
        /// Written to the output; never cleared once set
        const FLUSHED = 1 << 2;
        const READ_ONLY = 1 << 3;
        /// Keep the value in memory after flushing
        const FORBID_RELEASE = 1 << 4;
    }
}

/// One entry of the cross-reference table
#[derive(Debug, Clone)]
pub struct IndirectSlot {
    id: ObjectId,
    value: Option<PDFValue>,
    state: SlotState,
    offset: Option<u64>,
    next_free: u32,
    from_source: bool,
}

impl IndirectSlot {
    fn new(id: ObjectId) -> Self {
        Self {
            id,
            value: None,
            state: SlotState::empty(),
            offset: None,
            next_free: 0,
            from_source: false,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn value(&self) -> Option<&PDFValue> {
        self.value.as_ref()
    }

    /// Byte offset assigned when the object was written
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Next free object number (meaningful for free slots)
    pub fn next_free(&self) -> u32 {
        self.next_free
    }

    pub fn is_free(&self) -> bool {
        self.state.contains(SlotState::FREE)
    }

    pub fn is_flushed(&self) -> bool {
        self.state.contains(SlotState::FLUSHED)
    }

    pub fn is_modified(&self) -> bool {
        self.state.contains(SlotState::MODIFIED)
    }

    /// Whether the object exists in the source bytes
    pub fn is_from_source(&self) -> bool {
        self.from_source
    }
}

/// PDF cross-reference table
#[derive(Debug, Clone)]
pub struct XRefTable {
    slots: Vec<IndirectSlot>,
}

impl Default for XRefTable {
    fn default() -> Self {
        Self::new()
    }
}

impl XRefTable {
    /// Create new xref table holding only the reserved entry 0
    pub fn new() -> Self {
        let mut head = IndirectSlot::new(ObjectId::new(0, MAX_GENERATION));
        head.state = SlotState::FREE;
        Self { slots: vec![head] }
    }

    /// Build the table from the reader's bootstrap information
    pub fn from_bootstrap(bootstrap: &XRefBootstrap) -> PDFGraphResult<Self> {
        let mut table = Self::new();
        let size = bootstrap.size.max(1);
        let mut free_numbers = Vec::new();

        for number in 1..size {
            let entry = bootstrap.entries.get(number as usize);
            let generation = entry.map_or(0, |e| e.generation);
            let mut slot = IndirectSlot::new(ObjectId::new(number, generation));
            match entry.map(|e| e.kind) {
                Some(XRefEntryKind::Free { next }) => {
                    slot.state = SlotState::FREE;
                    slot.next_free = next;
                    free_numbers.push(number);
                }
                Some(XRefEntryKind::InUse) | None => slot.from_source = true,
            }
            table.slots.push(slot);
        }

        // Follow the chain as recorded, then append strays the chain missed.
        let recorded_head = bootstrap
            .entries
            .first()
            .and_then(|e| match e.kind {
                XRefEntryKind::Free { next } => Some(next),
                XRefEntryKind::InUse => None,
            })
            .unwrap_or(0);
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = recorded_head;
        while cursor != 0 {
            let valid = table
                .slots
                .get(cursor as usize)
                .map_or(false, |slot| slot.is_free());
            if !valid || !seen.insert(cursor) {
                warn!("Free list in source is broken at object {}, rebuilding", cursor);
                break;
            }
            chain.push(cursor);
            cursor = table.slots[cursor as usize].next_free;
        }
        chain.extend(free_numbers.into_iter().filter(|n| !seen.contains(n)));
        table.rebuild_free_list(&chain);

        trace!("Bootstrapped xref table with {} slots", table.slots.len());
        Ok(table)
    }

    fn rebuild_free_list(&mut self, order: &[u32]) {
        let reusable: Vec<u32> = order
            .iter()
            .copied()
            .filter(|&n| self.slots[n as usize].id.generation < MAX_GENERATION)
            .collect();
        let mut previous = 0usize;
        for &number in &reusable {
            self.slots[previous].next_free = number;
            previous = number as usize;
        }
        self.slots[previous].next_free = 0;
        for &number in order {
            if self.slots[number as usize].id.generation == MAX_GENERATION {
                self.slots[number as usize].next_free = 0;
            }
        }
    }

    /// Number of entries including the reserved entry 0
    pub fn size(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Head of the free list (0 when empty)
    pub fn free_list_head(&self) -> u32 {
        self.slots[0].next_free
    }

    /// Free object numbers in chain order
    pub fn free_list(&self) -> Vec<u32> {
        let mut numbers = Vec::new();
        let mut cursor = self.free_list_head();
        while cursor != 0 && numbers.len() < self.slots.len() {
            numbers.push(cursor);
            cursor = self.slots[cursor as usize].next_free;
        }
        numbers
    }

    /// Allocate a new identity, reusing the free list before growing
    pub fn allocate(&mut self) -> ObjectId {
        let head = self.slots[0].next_free;
        if head != 0 {
            let next = self.slots[head as usize].next_free;
            self.slots[0].next_free = next;
            let slot = &mut self.slots[head as usize];
            slot.state = SlotState::MODIFIED;
            slot.value = None;
            slot.offset = None;
            slot.next_free = 0;
            slot.from_source = false;
            trace!("Reused free slot {}", slot.id);
            return slot.id;
        }

        let id = ObjectId::new(self.slots.len() as u32, 0);
        let mut slot = IndirectSlot::new(id);
        slot.state = SlotState::MODIFIED;
        self.slots.push(slot);
        trace!("Allocated new slot {}", id);
        id
    }

    /// Release a slot and push it onto the free list
    ///
    /// The generation is bumped so the next user of the number gets a fresh
    /// identity. Freeing an already free slot is logged and ignored.
    pub fn free(&mut self, id: ObjectId) -> PDFGraphResult<()> {
        let head = self.slots[0].next_free;
        let slot = self.slot_mut(id)?;
        if slot.is_free() {
            warn!("Object {} is already free", id);
            return Ok(());
        }
        if slot.is_flushed() {
            return Err(PDFGraphError::FreeFlushedObject(id));
        }

        slot.value = None;
        slot.offset = None;
        slot.state = SlotState::FREE;
        if slot.id.generation >= MAX_GENERATION {
            slot.next_free = 0;
            trace!("Retired object number {}", id.number);
            return Ok(());
        }
        slot.id.generation += 1;
        slot.next_free = head;
        self.slots[0].next_free = id.number;
        trace!("Freed {}", id);
        Ok(())
    }

    /// Slot for a live or free id; generation must match
    pub fn slot(&self, id: ObjectId) -> Option<&IndirectSlot> {
        self.slots
            .get(id.number as usize)
            .filter(|slot| id.number != 0 && slot.id == id)
    }

    fn slot_mut(&mut self, id: ObjectId) -> PDFGraphResult<&mut IndirectSlot> {
        match self.slots.get_mut(id.number as usize) {
            Some(slot) if id.number != 0 && slot.id == id => Ok(slot),
            _ => Err(PDFGraphError::ObjectNotFound(id)),
        }
    }

    /// Materialized value without touching the loader
    pub fn get(&self, id: ObjectId) -> Option<&PDFValue> {
        self.slot(id)
            .filter(|slot| !slot.is_free())
            .and_then(|slot| slot.value.as_ref())
    }

    /// Materialized value, loading it lazily when a loader is supplied
    ///
    /// Returns `None` for free, unknown or stale ids, and for objects whose
    /// value was released after flushing.
    pub fn resolve(
        &mut self,
        id: ObjectId,
        loader: Option<&mut (dyn ObjectLoader + '_)>,
    ) -> PDFGraphResult<Option<&PDFValue>> {
        let index = id.number as usize;
        let needs_load = match self.slots.get(index) {
            Some(slot) if id.number != 0 && slot.id == id && !slot.is_free() => {
                slot.value.is_none() && slot.from_source && !slot.is_flushed()
            }
            _ => return Ok(None),
        };
        if needs_load {
            if let Some(loader) = loader {
                trace!("Loading {} from source", id);
                let value = loader.load(id)?;
                self.slots[index].value = Some(value);
            }
        }
        Ok(self.slots[index].value.as_ref())
    }

    /// Store a value into a live slot and mark it modified
    pub fn set_value(&mut self, id: ObjectId, value: PDFValue) -> PDFGraphResult<()> {
        let slot = self.slot_mut(id)?;
        if slot.is_free() {
            return Err(PDFGraphError::ObjectNotFound(id));
        }
        if slot.state.contains(SlotState::READ_ONLY) {
            return Err(PDFGraphError::ReadOnlyObject(id));
        }
        if slot.is_flushed() {
            return Err(PDFGraphError::xref(format!("object {} was already flushed", id)));
        }
        slot.value = Some(value);
        slot.state.insert(SlotState::MODIFIED);
        Ok(())
    }

    /// Mutable access to a materialized value; marks the slot modified
    pub fn value_mut(&mut self, id: ObjectId) -> PDFGraphResult<&mut PDFValue> {
        let slot = self.slot_mut(id)?;
        if slot.state.contains(SlotState::READ_ONLY) {
            return Err(PDFGraphError::ReadOnlyObject(id));
        }
        if slot.is_free() || slot.is_flushed() {
            return Err(PDFGraphError::ObjectNotFound(id));
        }
        slot.state.insert(SlotState::MODIFIED);
        slot.value.as_mut().ok_or(PDFGraphError::ObjectNotFound(id))
    }

    pub fn mark_modified(&mut self, id: ObjectId) -> PDFGraphResult<()> {
        let slot = self.slot_mut(id)?;
        slot.state.insert(SlotState::MODIFIED);
        Ok(())
    }

    pub fn mark_flushed(&mut self, id: ObjectId) -> PDFGraphResult<()> {
        let slot = self.slot_mut(id)?;
        if slot.is_free() {
            return Err(PDFGraphError::FlushFreeObject(id));
        }
        slot.state.insert(SlotState::FLUSHED);
        Ok(())
    }

    /// Set additional state flags (`READ_ONLY`, `FORBID_RELEASE`, ...)
    pub fn add_state(&mut self, id: ObjectId, flags: SlotState) -> PDFGraphResult<()> {
        let forbidden = SlotState::FREE | SlotState::FLUSHED;
        if flags.intersects(forbidden) {
            return Err(PDFGraphError::xref("FREE and FLUSHED are set through free() and mark_flushed()"));
        }
        self.slot_mut(id)?.state.insert(flags);
        Ok(())
    }

    /// Record the output offset of a flushed object and drop its value
    /// unless release is forbidden
    pub(crate) fn record_flush(&mut self, id: ObjectId, offset: Option<u64>) -> PDFGraphResult<()> {
        self.mark_flushed(id)?;
        let slot = self.slot_mut(id)?;
        if offset.is_some() {
            slot.offset = offset;
        }
        if !slot.state.contains(SlotState::FORBID_RELEASE) {
            slot.value = None;
        }
        Ok(())
    }

    /// Iterate over all slots except the reserved entry 0
    pub fn iter(&self) -> impl Iterator<Item = &IndirectSlot> {
        self.slots.iter().skip(1)
    }

    /// Entry 0
    pub fn head(&self) -> &IndirectSlot {
        &self.slots[0]
    }
}
