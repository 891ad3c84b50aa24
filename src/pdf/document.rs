//! Document lifecycle
//!
//! A `PDFDocument` owns one cross-reference table, the catalog and the
//! trailer. It is opened in one of three ways (reading, writing a new file,
//! or stamping an existing one) and ends in `Closed`, at which point the
//! output holds a complete file or incremental update.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use chrono::Utc;
use log::{debug, trace, warn};
use crate::config::{MergePolicy, StampingMode, WriterProperties};
use crate::error::{PDFGraphError, PDFGraphResult};
use super::reader::{ObjectLoader, XRefBootstrap};
use super::tree::{build_tree, flatten_tree};
use super::visitor::{walk, FollowAll, ObjectResolver, Visitor};
use super::writer::{Encryptor, ObjectSink, PDFWriter, XRefRow, XRefRowKind};
use super::{Dictionary, IndirectSlot, ObjectId, PDFString, PDFValue, SlotState, XRefTable};

/// Page attributes a page may inherit from its ancestors
pub const INHERITABLE_PAGE_ATTRIBUTES: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an open document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(u64);

impl DocumentId {
    fn next() -> Self {
        Self(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Where a document is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Reading,
    Writing,
    Stamping(StampingMode),
    Closed,
}

/// PDF document: object graph plus lifecycle
pub struct PDFDocument {
    id: DocumentId,
    xref: XRefTable,
    trailer: Dictionary,
    catalog: ObjectId,
    state: LifecycleState,
    loader: Option<Box<dyn ObjectLoader>>,
    writer: Option<PDFWriter<Box<dyn Write>>>,
    props: WriterProperties,
    policy: MergePolicy,
    source_uses_xref_stream: bool,
    source_startxref: u64,
    /// Referenced by objects flushed before close; their values are gone
    flushed_children: HashSet<ObjectId>,
    pages: Option<Vec<ObjectId>>,
    named_destinations: Option<BTreeMap<Vec<u8>, PDFValue>>,
    /// Destinations keyed by name object, kept in the catalog's `/Dests`
    name_keyed_destinations: HashSet<Vec<u8>>,
    named_destinations_dirty: bool,
    page_labels: Option<BTreeMap<i64, PDFValue>>,
    page_labels_dirty: bool,
}

impl fmt::Debug for PDFDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PDFDocument")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("catalog", &self.catalog)
            .field("size", &self.xref.size())
            .finish()
    }
}

impl PDFDocument {
    /// Start a new document written to `output`
    ///
    /// The catalog and an empty page tree are created right away and the
    /// header is written.
    pub fn new<W: Write + 'static>(output: W, props: WriterProperties) -> PDFGraphResult<Self> {
        let mut xref = XRefTable::new();
        let catalog = xref.allocate();
        let pages = xref.allocate();

        let mut catalog_dict = Dictionary::typed("Catalog");
        catalog_dict.set_reference("Pages", pages);
        xref.set_value(catalog, catalog_dict.into())?;

        let mut pages_dict = Dictionary::typed("Pages");
        pages_dict.set("Kids", Vec::<PDFValue>::new());
        pages_dict.set("Count", 0i64);
        xref.set_value(pages, pages_dict.into())?;

        let mut writer = PDFWriter::new(Box::new(output) as Box<dyn Write>, props.compression_level);
        writer.write_header(&props.pdf_version)?;

        let mut trailer = Dictionary::new();
        trailer.set_reference("Root", catalog);

        let document = Self::assemble(xref, trailer, catalog, LifecycleState::Writing, None, Some(writer), props);
        debug!("Created new document {}", document.id);
        Ok(document)
    }

    /// Open an existing document for reading
    pub fn open<L: ObjectLoader + 'static>(loader: L, bootstrap: &XRefBootstrap) -> PDFGraphResult<Self> {
        let xref = XRefTable::from_bootstrap(bootstrap)?;
        let catalog = root_of(&bootstrap.trailer)?;
        let mut document = Self::assemble(
            xref,
            bootstrap.trailer.clone(),
            catalog,
            LifecycleState::Reading,
            Some(Box::new(loader)),
            None,
            WriterProperties::default(),
        );
        document.source_uses_xref_stream = bootstrap.uses_xref_stream;
        document.source_startxref = bootstrap.startxref;
        debug!("Opened document {} for reading ({} objects)", document.id, document.xref.size());
        Ok(document)
    }

    /// Open an existing document for modification
    ///
    /// In append mode `original` is copied to the output unchanged and close
    /// appends an incremental update. In full-rewrite mode the original
    /// bytes are not used and the whole graph is written again.
    pub fn stamp<L, W>(
        loader: L,
        bootstrap: &XRefBootstrap,
        original: &[u8],
        output: W,
        mode: StampingMode,
        props: WriterProperties,
    ) -> PDFGraphResult<Self>
    where
        L: ObjectLoader + 'static,
        W: Write + 'static,
    {
        let xref = XRefTable::from_bootstrap(bootstrap)?;
        let catalog = root_of(&bootstrap.trailer)?;

        let mut writer = PDFWriter::new(Box::new(output) as Box<dyn Write>, props.compression_level);
        match mode {
            StampingMode::AppendMode => writer.write_raw(original)?,
            StampingMode::FullRewrite => writer.write_header(&props.pdf_version)?,
        }

        let mut document = Self::assemble(
            xref,
            bootstrap.trailer.clone(),
            catalog,
            LifecycleState::Stamping(mode),
            Some(Box::new(loader)),
            Some(writer),
            props,
        );
        document.source_uses_xref_stream = bootstrap.uses_xref_stream;
        document.source_startxref = bootstrap.startxref;
        debug!("Opened document {} for stamping in {:?}", document.id, mode);
        Ok(document)
    }

    fn assemble(
        xref: XRefTable,
        trailer: Dictionary,
        catalog: ObjectId,
        state: LifecycleState,
        loader: Option<Box<dyn ObjectLoader>>,
        writer: Option<PDFWriter<Box<dyn Write>>>,
        props: WriterProperties,
    ) -> Self {
        Self {
            id: DocumentId::next(),
            xref,
            trailer,
            catalog,
            state,
            loader,
            writer,
            props,
            policy: MergePolicy::default(),
            source_uses_xref_stream: false,
            source_startxref: 0,
            flushed_children: HashSet::new(),
            pages: None,
            named_destinations: None,
            name_keyed_destinations: HashSet::new(),
            named_destinations_dirty: false,
            page_labels: None,
            page_labels_dirty: false,
        }
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == LifecycleState::Closed
    }

    pub fn catalog_id(&self) -> ObjectId {
        self.catalog
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    pub fn xref(&self) -> &XRefTable {
        &self.xref
    }

    pub fn slot(&self, id: ObjectId) -> Option<&IndirectSlot> {
        self.xref.slot(id)
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    pub fn properties(&self) -> &WriterProperties {
        &self.props
    }

    /// Install the transform applied to strings and streams on output
    pub fn set_encryptor(&mut self, encryptor: Box<dyn Encryptor>) -> PDFGraphResult<()> {
        self.ensure_writable()?;
        let writer = self.writer.as_mut().ok_or(PDFGraphError::ReadOnlyDocument)?;
        writer.set_encryptor(encryptor);
        Ok(())
    }

    fn ensure_open(&self) -> PDFGraphResult<()> {
        if self.is_closed() {
            return Err(PDFGraphError::DocumentClosed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> PDFGraphResult<()> {
        match self.state {
            LifecycleState::Closed => Err(PDFGraphError::DocumentClosed),
            LifecycleState::Reading => Err(PDFGraphError::ReadOnlyDocument),
            _ => Ok(()),
        }
    }

    /// Value of an indirect object, loading it from the source if needed
    pub fn resolve(&mut self, id: ObjectId) -> PDFGraphResult<Option<&PDFValue>> {
        self.ensure_open()?;
        self.xref.resolve(id, self.loader.as_deref_mut())
    }

    pub fn resolve_cloned(&mut self, id: ObjectId) -> PDFGraphResult<Option<PDFValue>> {
        Ok(self.resolve(id)?.cloned())
    }

    /// Follow `value` if it is a reference
    pub fn dereference(&mut self, value: &PDFValue) -> PDFGraphResult<Option<PDFValue>> {
        match value {
            PDFValue::Reference(id) => self.resolve_cloned(*id),
            other => Ok(Some(other.clone())),
        }
    }

    /// Resolve `id` and require a dictionary (a stream's dictionary counts)
    pub fn dictionary(&mut self, id: ObjectId) -> PDFGraphResult<Dictionary> {
        match self.resolve(id)? {
            Some(value) => value
                .as_dictionary()
                .cloned()
                .ok_or_else(|| PDFGraphError::invalid_type("dictionary", value.type_name())),
            None => Err(PDFGraphError::ObjectNotFound(id)),
        }
    }

    pub fn catalog(&mut self) -> PDFGraphResult<Dictionary> {
        self.dictionary(self.catalog)
    }

    /// Reserve a new identity without a value
    pub fn allocate(&mut self) -> PDFGraphResult<ObjectId> {
        self.ensure_writable()?;
        Ok(self.xref.allocate())
    }

    /// Store `value` under a new identity
    pub fn add_object(&mut self, value: impl Into<PDFValue>) -> PDFGraphResult<ObjectId> {
        let id = self.allocate()?;
        self.xref.set_value(id, value.into())?;
        Ok(id)
    }

    /// Replace the value of a live object
    pub fn set_object(&mut self, id: ObjectId, value: impl Into<PDFValue>) -> PDFGraphResult<()> {
        self.ensure_writable()?;
        self.xref.set_value(id, value.into())
    }

    /// Edit an object in place; the slot is marked modified
    pub fn update<R>(&mut self, id: ObjectId, edit: impl FnOnce(&mut PDFValue) -> R) -> PDFGraphResult<R> {
        self.ensure_writable()?;
        self.xref.resolve(id, self.loader.as_deref_mut())?;
        let value = self.xref.value_mut(id)?;
        Ok(edit(value))
    }

    /// Edit a dictionary object in place
    pub fn update_dictionary<R>(&mut self, id: ObjectId, edit: impl FnOnce(&mut Dictionary) -> R) -> PDFGraphResult<R> {
        self.update(id, |value| {
            let found = value.type_name();
            value
                .as_dictionary_mut()
                .map(edit)
                .ok_or_else(|| PDFGraphError::invalid_type("dictionary", found))
        })?
    }

    pub fn mark_modified(&mut self, id: ObjectId) -> PDFGraphResult<()> {
        self.ensure_writable()?;
        self.xref.mark_modified(id)
    }

    /// Add lifecycle flags such as `FORBID_RELEASE`
    pub fn add_slot_state(&mut self, id: ObjectId, flags: SlotState) -> PDFGraphResult<()> {
        self.ensure_writable()?;
        self.xref.add_state(id, flags)
    }

    /// Release an object; its number goes back on the free list
    pub fn free_object(&mut self, id: ObjectId) -> PDFGraphResult<()> {
        self.ensure_writable()?;
        self.xref.free(id)?;
        if let Some(pages) = &mut self.pages {
            pages.retain(|page| *page != id);
        }
        Ok(())
    }

    /// Write one object now
    ///
    /// The value is released afterwards unless `FORBID_RELEASE` is set. In
    /// append mode an unchanged original object is only marked flushed; its
    /// bytes are already in the output.
    pub fn flush(&mut self, id: ObjectId) -> PDFGraphResult<()> {
        self.ensure_writable()?;
        if !self.flush_object(id)? {
            return Err(PDFGraphError::ObjectNotFound(id));
        }
        Ok(())
    }

    /// Returns `false` when the slot has no value to write
    fn flush_object(&mut self, id: ObjectId) -> PDFGraphResult<bool> {
        let (from_source, modified) = match self.xref.slot(id) {
            None => return Err(PDFGraphError::ObjectNotFound(id)),
            Some(slot) if slot.is_free() => return Err(PDFGraphError::FlushFreeObject(id)),
            Some(slot) if slot.is_flushed() => return Ok(true),
            Some(slot) => (slot.is_from_source(), slot.is_modified()),
        };
        if self.state == LifecycleState::Stamping(StampingMode::AppendMode) && from_source && !modified {
            trace!("{} is unchanged, keeping the original bytes", id);
            self.xref.record_flush(id, None)?;
            return Ok(true);
        }

        let compress = self.props.compress_streams;
        let encrypt = self.trailer.get_reference("Encrypt") != Some(id);
        let value = match self.xref.resolve(id, self.loader.as_deref_mut())? {
            Some(value) => value.clone(),
            None => return Ok(false),
        };
        let writer = self.writer.as_mut().ok_or(PDFGraphError::ReadOnlyDocument)?;
        let offset = writer.write_object(id, &value, compress, encrypt)?;
        self.xref.record_flush(id, Some(offset))?;

        let mut children = CollectReferences::default();
        walk(&mut self.xref, &value, &mut children)?;
        self.flushed_children.extend(children.0);
        Ok(true)
    }

    /// Ids reachable from the catalog, the Info and Encrypt dictionaries and
    /// from objects flushed earlier in the session
    ///
    /// Without `load` only values already in memory are traversed.
    fn reachable_ids(&mut self, load: bool) -> PDFGraphResult<Vec<ObjectId>> {
        let mut roots = vec![PDFValue::Reference(self.catalog)];
        for key in ["Info", "Encrypt"] {
            if let Some(id) = self.trailer.get_reference(key) {
                roots.push(PDFValue::Reference(id));
            }
        }
        let mut earlier: Vec<ObjectId> = self.flushed_children.iter().copied().collect();
        earlier.sort();
        roots.extend(earlier.into_iter().map(PDFValue::Reference));

        let start = PDFValue::Array(roots);
        if load {
            walk(self, &start, &mut FollowAll)
        } else {
            walk(&mut self.xref, &start, &mut FollowAll)
        }
    }

    // ----- page tree -----

    fn pages_root(&mut self) -> PDFGraphResult<ObjectId> {
        self.catalog()?
            .get_reference("Pages")
            .ok_or_else(|| PDFGraphError::MissingDictionaryEntry("Pages".to_string()))
    }

    /// Leaf page ids in document order
    pub fn page_ids(&mut self) -> PDFGraphResult<Vec<ObjectId>> {
        if let Some(pages) = &self.pages {
            return Ok(pages.clone());
        }
        let root = self.pages_root()?;
        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![root];

        while let Some(id) = pending.pop() {
            if !visited.insert(id) {
                warn!("Page tree node {} reached twice, skipping", id);
                continue;
            }
            let node = match self.resolve(id)?.and_then(PDFValue::as_dictionary) {
                Some(node) => node,
                None => {
                    warn!("Page tree node {} is missing", id);
                    continue;
                }
            };
            match node.get_array("Kids") {
                Some(kids) if !node.has_type("Page") => {
                    pending.extend(kids.iter().rev().filter_map(PDFValue::as_reference));
                }
                _ => pages.push(id),
            }
        }
        self.pages = Some(pages.clone());
        Ok(pages)
    }

    pub fn page_count(&mut self) -> PDFGraphResult<usize> {
        Ok(self.page_ids()?.len())
    }

    /// Id of page `number` (1-based)
    pub fn page_id(&mut self, number: usize) -> PDFGraphResult<ObjectId> {
        let pages = self.page_ids()?;
        match number.checked_sub(1).and_then(|index| pages.get(index)) {
            Some(id) => Ok(*id),
            None => Err(PDFGraphError::PageOutOfRange {
                page: number,
                count: pages.len(),
            }),
        }
    }

    /// Look up `key` on the page or the nearest ancestor that has it
    pub fn inherited_attribute(&mut self, page: ObjectId, key: &str) -> PDFGraphResult<Option<PDFValue>> {
        let mut visited = HashSet::new();
        let mut current = Some(page);
        while let Some(id) = current {
            if !visited.insert(id) {
                warn!("Parent chain of page {} loops at {}", page, id);
                break;
            }
            let node = match self.resolve(id)?.and_then(PDFValue::as_dictionary) {
                Some(node) => node,
                None => break,
            };
            if let Some(value) = node.get(key) {
                return Ok(Some(value.clone()));
            }
            current = node.get_reference("Parent");
        }
        Ok(None)
    }

    /// Add a page dictionary at the end of the document
    pub fn add_page(&mut self, mut page: Dictionary) -> PDFGraphResult<ObjectId> {
        page.set("Type", PDFValue::name("Page"));
        let root = self.pages_root()?;
        page.set_reference("Parent", root);
        let id = self.add_object(page)?;
        self.append_page_ref(id)?;
        Ok(id)
    }

    /// Attach an existing page object as the last kid of the page tree root
    pub fn append_page_ref(&mut self, page: ObjectId) -> PDFGraphResult<()> {
        let root = self.pages_root()?;
        self.update_dictionary(page, |dict| dict.set_reference("Parent", root))?;
        self.update_dictionary(root, |dict| {
            let mut kids = dict.get_array("Kids").cloned().unwrap_or_default();
            kids.push(PDFValue::Reference(page));
            let count = dict.get_integer("Count").unwrap_or(0) + 1;
            dict.set("Kids", kids);
            dict.set("Count", count);
        })?;
        if let Some(pages) = &mut self.pages {
            pages.push(page);
        }
        trace!("Appended page {} to {}", page, root);
        Ok(())
    }

    // ----- deferred document trees -----

    fn load_named_destinations(&mut self) -> PDFGraphResult<()> {
        if self.named_destinations.is_some() {
            return Ok(());
        }
        let catalog = self.catalog()?;
        let mut map = BTreeMap::new();

        // Old-style /Dests dictionary in the catalog
        if let Some(dests) = catalog.get("Dests") {
            if let Some(PDFValue::Dictionary(dests)) = self.dereference(dests)? {
                for (name, dest) in &dests {
                    map.insert(name.as_bytes().to_vec(), dest.clone());
                    self.name_keyed_destinations.insert(name.as_bytes().to_vec());
                }
            }
        }
        let names = match catalog.get("Names") {
            Some(names) => self.dereference(names)?,
            None => None,
        };
        if let Some(tree) = names.as_ref().and_then(PDFValue::as_dictionary).and_then(|n| n.get("Dests")) {
            let flattened: BTreeMap<Vec<u8>, PDFValue> = flatten_tree(self, tree)?;
            map.extend(flattened);
        }
        trace!("Loaded {} named destinations", map.len());
        self.named_destinations = Some(map);
        Ok(())
    }

    /// Named destinations from both the name tree and the catalog's `/Dests`
    pub fn named_destinations(&mut self) -> PDFGraphResult<&BTreeMap<Vec<u8>, PDFValue>> {
        self.ensure_open()?;
        self.load_named_destinations()?;
        self.named_destinations
            .as_ref()
            .ok_or_else(|| PDFGraphError::malformed("named destinations not loaded"))
    }

    pub fn named_destination(&mut self, name: &[u8]) -> PDFGraphResult<Option<PDFValue>> {
        Ok(self.named_destinations()?.get(name).cloned())
    }

    /// Register a named destination
    ///
    /// A name object key goes to the catalog's `/Dests` dictionary, a string
    /// key to the `/Names` tree, matching how each kind is looked up. Returns
    /// `false` and keeps the existing entry when the name is taken.
    pub fn add_named_destination(&mut self, key: &PDFValue, destination: PDFValue) -> PDFGraphResult<bool> {
        self.ensure_writable()?;
        let (name, name_keyed) = match key {
            PDFValue::Name(name) => (name.as_bytes().to_vec(), true),
            PDFValue::String(s) => (s.as_bytes().to_vec(), false),
            other => return Err(PDFGraphError::invalid_type("name or string", other.type_name())),
        };
        self.load_named_destinations()?;
        let map = self
            .named_destinations
            .as_mut()
            .ok_or_else(|| PDFGraphError::malformed("named destinations not loaded"))?;
        if map.contains_key(&name) {
            return Ok(false);
        }
        if name_keyed {
            self.name_keyed_destinations.insert(name.clone());
        }
        map.insert(name, destination);
        self.named_destinations_dirty = true;
        Ok(true)
    }

    /// Page labels keyed by 0-based page index
    pub fn page_labels(&mut self) -> PDFGraphResult<&BTreeMap<i64, PDFValue>> {
        self.ensure_open()?;
        if self.page_labels.is_none() {
            let labels = match self.catalog()?.get("PageLabels") {
                Some(root) => flatten_tree(self, root)?,
                None => BTreeMap::new(),
            };
            self.page_labels = Some(labels);
        }
        self.page_labels
            .as_ref()
            .ok_or_else(|| PDFGraphError::malformed("page labels not loaded"))
    }

    /// Set the label range starting at page `index` (0-based)
    pub fn set_page_label(&mut self, index: i64, label: Dictionary) -> PDFGraphResult<()> {
        self.ensure_writable()?;
        self.page_labels()?;
        if let Some(labels) = &mut self.page_labels {
            labels.insert(index, label.into());
            self.page_labels_dirty = true;
        }
        Ok(())
    }

    fn write_deferred_trees(&mut self) -> PDFGraphResult<()> {
        let catalog = self.catalog;
        if self.named_destinations_dirty {
            if let Some(map) = self.named_destinations.take() {
                let (by_name, by_string): (BTreeMap<_, _>, BTreeMap<_, _>) = map
                    .iter()
                    .map(|(key, dest)| (key.clone(), dest.clone()))
                    .partition(|(key, _)| self.name_keyed_destinations.contains(key));

                if by_name.is_empty() {
                    self.update_dictionary(catalog, |dict| dict.remove("Dests"))?;
                } else {
                    let mut dests = Dictionary::new();
                    for (key, dest) in &by_name {
                        dests.set(&String::from_utf8_lossy(key), dest.clone());
                    }
                    let dests = self.add_object(dests)?;
                    self.update_dictionary(catalog, |dict| dict.set_reference("Dests", dests))?;
                }
                if !by_string.is_empty() {
                    let root = build_tree(&by_string, |node| self.add_object(node))?;
                    let root = self.add_object(root)?;
                    self.attach_name_tree("Dests", root)?;
                }
                debug!(
                    "Rebuilt named destinations: {} by name, {} in the name tree",
                    by_name.len(),
                    by_string.len()
                );
                self.named_destinations = Some(map);
            }
            self.named_destinations_dirty = false;
        }
        if self.page_labels_dirty {
            if let Some(labels) = self.page_labels.take() {
                let root = build_tree(&labels, |node| self.add_object(node))?;
                let root = self.add_object(root)?;
                self.update_dictionary(catalog, |dict| dict.set_reference("PageLabels", root))?;
                self.page_labels = Some(labels);
            }
            self.page_labels_dirty = false;
        }
        Ok(())
    }

    fn attach_name_tree(&mut self, key: &str, root: ObjectId) -> PDFGraphResult<()> {
        match self.catalog()?.get("Names") {
            Some(PDFValue::Reference(names)) => {
                let names = *names;
                self.update_dictionary(names, |dict| dict.set_reference(key, root))
            }
            _ => self.update_dictionary(self.catalog, |catalog| {
                let mut names = catalog.get_dictionary("Names").cloned().unwrap_or_default();
                names.set_reference(key, root);
                catalog.set("Names", names);
            }),
        }
    }

    // ----- close -----

    fn update_info(&mut self) -> PDFGraphResult<()> {
        let now = PDFValue::string(&Utc::now().format("D:%Y%m%d%H%M%SZ").to_string());
        let producer = PDFValue::string(&self.props.producer);
        match self.trailer.get_reference("Info") {
            Some(info) => {
                let editable = self.xref.slot(info).map_or(false, |slot| !slot.is_free() && !slot.is_flushed());
                if editable {
                    self.update_dictionary(info, |dict| {
                        dict.set("Producer", producer);
                        dict.set("ModDate", now);
                    })?;
                } else {
                    warn!("Info dictionary {} can no longer be updated", info);
                }
            }
            None => {
                let mut info = Dictionary::new();
                info.set("Producer", producer);
                info.set("CreationDate", now.clone());
                info.set("ModDate", now);
                let id = self.add_object(info)?;
                self.trailer.set_reference("Info", id);
            }
        }
        Ok(())
    }

    /// Keep the original file identifier, regenerate the modified one
    fn update_file_id(&mut self) {
        let seed = format!(
            "{}-{}-{}",
            self.id,
            Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            self.xref.size()
        );
        let original = self
            .trailer
            .get_array("ID")
            .and_then(|ids| ids.first())
            .and_then(PDFValue::as_string)
            .cloned()
            .unwrap_or_else(|| PDFString::hex(md5::compute(seed.as_bytes()).0.to_vec()));
        let modified = PDFString::hex(md5::compute(format!("{}-modified", seed)).0.to_vec());
        self.trailer.set("ID", vec![PDFValue::String(original), PDFValue::String(modified)]);
    }

    fn flush_appended(&mut self) -> PDFGraphResult<()> {
        let forbidden = self.policy.forbidden_flush_set.clone();
        // A flushed original can bring new objects into reach through
        // flushed_children, so repeat until a pass writes nothing.
        loop {
            let mut progressed = false;
            for id in self.reachable_ids(false)? {
                let pending = self.xref.slot(id).map_or(false, awaits_append);
                if pending && !forbidden.contains(&id) {
                    progressed |= self.flush_object(id)?;
                }
            }

            // Edited originals stay part of the file even if nothing loaded
            // points at them any more.
            let originals: Vec<ObjectId> = self
                .xref
                .iter()
                .filter(|slot| awaits_append(slot) && slot.is_from_source())
                .map(IndirectSlot::id)
                .filter(|id| !forbidden.contains(id))
                .collect();
            for id in originals {
                progressed |= self.flush_object(id)?;
            }
            if !progressed {
                break;
            }
        }

        let leftovers: Vec<ObjectId> = self
            .xref
            .iter()
            .filter(|slot| awaits_append(slot))
            .map(IndirectSlot::id)
            .filter(|id| !forbidden.contains(id))
            .collect();
        for id in leftovers {
            trace!("{} never became part of the document, freeing it", id);
            self.xref.free(id)?;
        }
        Ok(())
    }

    fn flush_full(&mut self) -> PDFGraphResult<()> {
        let mut written = 0usize;
        for id in self.reachable_ids(true)? {
            let pending = self.xref.slot(id).map_or(false, |slot| !slot.is_free() && !slot.is_flushed());
            if pending && self.flush_object(id)? {
                written += 1;
            }
        }

        let flush_unused = self.policy.flush_unused_objects;
        let leftovers: Vec<ObjectId> = self
            .xref
            .iter()
            .filter(|slot| !slot.is_free() && !slot.is_flushed())
            .map(IndirectSlot::id)
            .collect();
        let mut freed = 0usize;
        for id in leftovers {
            if flush_unused && self.flush_object(id)? {
                written += 1;
                continue;
            }
            self.xref.free(id)?;
            freed += 1;
        }
        debug!("Wrote {} objects, freed {} unreachable", written, freed);
        Ok(())
    }

    fn use_xref_stream(&self) -> bool {
        match self.state {
            LifecycleState::Stamping(StampingMode::AppendMode) => {
                if let Some(preference) = self.props.full_compression {
                    if preference != self.source_uses_xref_stream {
                        warn!(
                            "Incremental update keeps the source's {} format, ignoring full compression = {}",
                            if self.source_uses_xref_stream { "xref stream" } else { "xref table" },
                            preference
                        );
                    }
                }
                self.source_uses_xref_stream
            }
            LifecycleState::Stamping(StampingMode::FullRewrite) => {
                self.props.full_compression.unwrap_or(self.source_uses_xref_stream)
            }
            _ => self.props.full_compression.unwrap_or(false),
        }
    }

    fn write_xref_section(&mut self) -> PDFGraphResult<()> {
        let append = self.state == LifecycleState::Stamping(StampingMode::AppendMode);
        let stream_id = if self.use_xref_stream() {
            Some(self.xref.allocate())
        } else {
            None
        };

        let head = self.xref.head();
        let mut rows = vec![XRefRow {
            number: 0,
            generation: head.id().generation,
            kind: XRefRowKind::Free { next: head.next_free() },
        }];
        for slot in self.xref.iter() {
            if Some(slot.id()) == stream_id {
                continue;
            }
            let kind = if slot.is_free() {
                XRefRowKind::Free { next: slot.next_free() }
            } else if let Some(offset) = slot.offset() {
                XRefRowKind::InUse { offset }
            } else {
                if !append {
                    warn!("{} was never written", slot.id());
                }
                continue;
            };
            rows.push(XRefRow {
                number: slot.id().number,
                generation: slot.id().generation,
                kind,
            });
        }

        let mut trailer = Dictionary::new();
        trailer.set("Size", self.xref.size() as i64);
        trailer.set_reference("Root", self.catalog);
        for key in ["Info", "Encrypt", "ID"] {
            if let Some(value) = self.trailer.get(key) {
                trailer.set(key, value.clone());
            }
        }
        if append {
            trailer.set("Prev", self.source_startxref as i64);
        }

        let writer = self.writer.as_mut().ok_or(PDFGraphError::ReadOnlyDocument)?;
        match stream_id {
            Some(id) => {
                let start = writer.write_xref_stream(id, &rows, &trailer)?;
                writer.flush()?;
                self.xref.record_flush(id, Some(start))?;
            }
            None => {
                writer.write_xref_table(&rows, &trailer)?;
                writer.flush()?;
            }
        }
        self.trailer = trailer;
        Ok(())
    }

    /// Finish the document
    ///
    /// Rebuilds the deferred trees, updates the Info dictionary and file
    /// identifier, writes every object the mode calls for and the final
    /// cross-reference section. Closing twice is a no-op.
    pub fn close(&mut self) -> PDFGraphResult<()> {
        match self.state {
            LifecycleState::Closed => return Ok(()),
            LifecycleState::Reading => {
                self.state = LifecycleState::Closed;
                self.loader = None;
                debug!("Closed document {} (read only)", self.id);
                return Ok(());
            }
            _ => {}
        }
        if self.xref.slot(self.catalog).map_or(false, IndirectSlot::is_flushed) {
            return Err(PDFGraphError::RootFlushed(self.catalog));
        }
        debug!("Closing document {} in {:?}", self.id, self.state);

        self.write_deferred_trees()?;
        self.update_info()?;
        self.update_file_id();
        match self.state {
            LifecycleState::Stamping(StampingMode::AppendMode) => self.flush_appended()?,
            _ => self.flush_full()?,
        }
        self.write_xref_section()?;

        self.state = LifecycleState::Closed;
        self.writer = None;
        self.loader = None;
        debug!("Closed document {}", self.id);
        Ok(())
    }
}

impl ObjectResolver for PDFDocument {
    fn resolve_object(&mut self, id: ObjectId) -> PDFGraphResult<Option<&PDFValue>> {
        self.resolve(id)
    }
}

/// Records direct references without following them
#[derive(Default)]
struct CollectReferences(Vec<ObjectId>);

impl Visitor for CollectReferences {
    fn follow(&mut self, _key: Option<&str>, target: ObjectId) -> bool {
        self.0.push(target);
        false
    }
}

/// Edited in this session and not yet written
fn awaits_append(slot: &IndirectSlot) -> bool {
    !slot.is_free() && slot.is_modified() && !slot.is_flushed()
}

fn root_of(trailer: &Dictionary) -> PDFGraphResult<ObjectId> {
    trailer
        .get_reference("Root")
        .ok_or_else(|| PDFGraphError::MissingDictionaryEntry("Root".to_string()))
}
