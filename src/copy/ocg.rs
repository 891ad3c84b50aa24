//! Optional-content merge
//!
//! Layers used by copied pages are registered in the destination's
//! `/OCProperties /OCGs` array and the default configuration (`/D`) is merged
//! so the copied layers keep their visibility state and their place in the
//! layer panel.

use std::collections::HashSet;
use log::{debug, trace};
use crate::error::PDFGraphResult;
use crate::notice::{NoticeKind, Notices};
use crate::pdf::{walk, Dictionary, DocumentId, ObjectId, PDFDocument, PDFString, PDFValue, Visitor, Walk};
use super::{copy_into, CopyContext};

/// Flat configuration lists
const STATE_LISTS: [&str; 3] = ["ON", "OFF", "Locked"];

/// Keys that lead away from the page being examined
const NOT_FOLLOWED: [&str; 10] = ["Parent", "P", "Popup", "Dest", "A", "Next", "Prev", "First", "Last", "IRT"];

/// Collects the layers reachable from a page
#[derive(Debug, Default)]
struct OcgCollector {
    found: Vec<ObjectId>,
}

impl Visitor for OcgCollector {
    fn on_dictionary(&mut self, owner: Option<ObjectId>, dict: &Dictionary) -> Walk {
        match owner {
            Some(id) if dict.has_type("OCG") => {
                self.found.push(id);
                Walk::Skip
            }
            _ => Walk::Descend,
        }
    }

    fn follow(&mut self, key: Option<&str>, _target: ObjectId) -> bool {
        !key.map_or(false, |key| NOT_FOLLOWED.contains(&key))
    }
}

/// Destination layer registry, written back once the merge is done
struct Registry {
    entries: Vec<PDFValue>,
    ids: HashSet<ObjectId>,
    names: HashSet<Vec<u8>>,
}

impl Registry {
    fn load(dest: &mut PDFDocument, properties: &Dictionary) -> PDFGraphResult<Self> {
        let entries = match properties.get("OCGs") {
            Some(ocgs) => dest.dereference(ocgs)?.and_then(|o| o.as_array().cloned()).unwrap_or_default(),
            None => Vec::new(),
        };
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for entry in &entries {
            if let Some(id) = entry.as_reference() {
                ids.insert(id);
                if let Some(name) = layer_name(dest, id)? {
                    names.insert(name);
                }
            }
        }
        Ok(Self { entries, ids, names })
    }

    /// Smallest `name_N` not taken yet, or `name` itself if it is free
    fn unique_name(&self, name: &[u8]) -> Option<Vec<u8>> {
        if !self.names.contains(name) {
            return None;
        }
        (0u32..)
            .map(|n| {
                let mut candidate = name.to_vec();
                candidate.extend_from_slice(format!("_{}", n).as_bytes());
                candidate
            })
            .find(|candidate| !self.names.contains(candidate))
    }
}

fn layer_name(document: &mut PDFDocument, id: ObjectId) -> PDFGraphResult<Option<Vec<u8>>> {
    Ok(document
        .resolve(id)?
        .and_then(PDFValue::as_dictionary)
        .and_then(|dict| dict.get("Name"))
        .and_then(PDFValue::as_string)
        .map(|name| name.as_bytes().to_vec()))
}

/// Dictionary behind `value` together with the object holding it, if any
fn load_dictionary(document: &mut PDFDocument, value: Option<&PDFValue>) -> PDFGraphResult<(Option<ObjectId>, Dictionary)> {
    let holder = value.and_then(PDFValue::as_reference);
    let dict = match value {
        Some(value) => document.dereference(value)?.and_then(|v| v.as_dictionary().cloned()).unwrap_or_default(),
        None => Dictionary::new(),
    };
    Ok((holder, dict))
}

/// Register the layers used by `pages` of `source` in `dest` and merge
/// the default configuration
///
/// Returns the destination ids of the layers registered by this call.
pub fn merge_optional_content(
    source: &mut PDFDocument,
    pages: &[ObjectId],
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
    notices: &mut Notices,
) -> PDFGraphResult<Vec<ObjectId>> {
    let discovered = discover(source, pages)?;

    let catalog = dest.catalog()?;
    let (properties_holder, mut properties) = load_dictionary(dest, catalog.get("OCProperties"))?;
    let mut registry = Registry::load(dest, &properties)?;

    let source_doc = source.id();
    let candidates: Vec<ObjectId> = discovered
        .into_iter()
        .filter(|ocg| {
            ctx.translate(source_doc, *ocg)
                .map_or(true, |target| !registry.ids.contains(&target))
        })
        .collect();
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let mut added = Vec::new();
    for ocg in candidates {
        if let Some(target) = register(ocg, source, dest, ctx, notices, &mut registry)? {
            added.push(target);
        }
    }

    let source_config = match source.catalog()?.get("OCProperties") {
        Some(value) => {
            let (_, source_properties) = load_dictionary(source, Some(value))?;
            Some(load_dictionary(source, source_properties.get("D"))?.1)
        }
        None => None,
    };
    let (config_holder, mut config) = load_dictionary(dest, properties.get("D"))?;
    let mut new: HashSet<ObjectId> = added.iter().copied().collect();
    if let Some(source_config) = source_config {
        let order = promote_parents(&source_config, source, dest, ctx, notices, &mut registry, &mut new)?;
        added.extend(order.promoted);
        merge_state_lists(&mut config, &source_config, source_doc, ctx, &new);
        merge_radio_groups(&mut config, &source_config, source_doc, ctx, &new);
        merge_order(&mut config, order.items, source_doc, ctx, &new, dest)?;
    }
    for key in STATE_LISTS.iter().chain(["RBGroups", "Order"].iter()) {
        if config.get_array(key).map_or(false, |items| items.is_empty()) {
            config.remove(key);
        }
    }

    match config_holder {
        Some(id) => dest.set_object(id, config)?,
        None => properties.set("D", config),
    }
    properties.set("OCGs", registry.entries);
    match properties_holder {
        Some(id) => dest.set_object(id, properties)?,
        None => {
            let catalog_id = dest.catalog_id();
            dest.update_dictionary(catalog_id, |catalog| catalog.set("OCProperties", properties))?;
        }
    }
    debug!("Registered {} optional content groups from {}", added.len(), source_doc);
    Ok(added)
}

fn discover(source: &mut PDFDocument, pages: &[ObjectId]) -> PDFGraphResult<Vec<ObjectId>> {
    let mut collector = OcgCollector::default();
    for &page in pages {
        let mut start = vec![PDFValue::Reference(page)];
        if let Some(resources) = source.inherited_attribute(page, "Resources")? {
            start.push(resources);
        }
        walk(source, &PDFValue::Array(start), &mut collector)?;
    }
    let mut seen = HashSet::new();
    collector.found.retain(|id| seen.insert(*id));
    trace!("Found {} optional content groups on {} pages", collector.found.len(), pages.len());
    Ok(collector.found)
}

/// Copy `ocg` into `dest` and append it to the registry, renaming it if its
/// name is already taken
fn register(
    ocg: ObjectId,
    source: &mut PDFDocument,
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
    notices: &mut Notices,
    registry: &mut Registry,
) -> PDFGraphResult<Option<ObjectId>> {
    let target = match copy_into(&PDFValue::Reference(ocg), source, dest, ctx, false, notices)?.as_reference() {
        Some(target) => target,
        None => return Ok(None),
    };
    if !registry.ids.insert(target) {
        return Ok(None);
    }
    if let Some(name) = layer_name(dest, target)? {
        let name = match registry.unique_name(&name) {
            Some(renamed) => {
                trace!(
                    "Renaming layer {:?} to {:?}",
                    String::from_utf8_lossy(&name),
                    String::from_utf8_lossy(&renamed)
                );
                notices.record(NoticeKind::OcgNameCollision);
                dest.update_dictionary(target, |dict| dict.set("Name", PDFString::new(renamed.clone())))?;
                renamed
            }
            None => name,
        };
        registry.names.insert(name);
    }
    registry.entries.push(PDFValue::Reference(target));
    Ok(Some(target))
}

/// Entry of an `/Order` array
#[derive(Debug, Clone, PartialEq)]
enum OrderItem {
    /// A layer, followed in the array by its children if it has any
    Node { ocg: ObjectId, children: Vec<OrderItem> },
    /// A nested array, optionally starting with a text label
    Group { label: Option<PDFValue>, items: Vec<OrderItem> },
    Other(PDFValue),
}

fn parse_order(values: &[PDFValue]) -> Vec<OrderItem> {
    let mut items = Vec::new();
    let mut iter = values.iter().peekable();
    while let Some(value) = iter.next() {
        match value {
            PDFValue::Reference(ocg) => {
                let children = match iter.peek() {
                    Some(PDFValue::Array(children)) if !matches!(children.first(), Some(PDFValue::String(_))) => {
                        iter.next();
                        parse_order(children)
                    }
                    _ => Vec::new(),
                };
                items.push(OrderItem::Node { ocg: *ocg, children });
            }
            PDFValue::Array(group) => {
                let (label, rest) = match group.split_first() {
                    Some((label @ PDFValue::String(_), rest)) => (Some(label.clone()), rest),
                    _ => (None, group.as_slice()),
                };
                items.push(OrderItem::Group {
                    label,
                    items: parse_order(rest),
                });
            }
            other => items.push(OrderItem::Other(other.clone())),
        }
    }
    items
}

fn write_order(items: &[OrderItem]) -> Vec<PDFValue> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        match item {
            OrderItem::Node { ocg, children } => {
                values.push(PDFValue::Reference(*ocg));
                if !children.is_empty() {
                    values.push(PDFValue::Array(write_order(children)));
                }
            }
            OrderItem::Group { label, items } => {
                let mut group = Vec::with_capacity(items.len() + 1);
                group.extend(label.iter().cloned());
                group.extend(write_order(items));
                values.push(PDFValue::Array(group));
            }
            OrderItem::Other(value) => values.push(value.clone()),
        }
    }
    values
}

/// Whether a branch holds a layer satisfying `is_new`
fn contains(item: &OrderItem, is_new: &impl Fn(ObjectId) -> bool) -> bool {
    match item {
        OrderItem::Node { ocg, children } => is_new(*ocg) || children.iter().any(|child| contains(child, is_new)),
        OrderItem::Group { items, .. } => items.iter().any(|child| contains(child, is_new)),
        OrderItem::Other(_) => false,
    }
}

/// Collect source parents whose subtree holds a new layer while they are
/// not registered themselves
fn parents_to_promote(items: &[OrderItem], is_new: &impl Fn(ObjectId) -> bool, out: &mut Vec<ObjectId>) {
    for item in items {
        match item {
            OrderItem::Node { ocg, children } => {
                if !is_new(*ocg) && children.iter().any(|child| contains(child, is_new)) {
                    out.push(*ocg);
                }
                parents_to_promote(children, is_new, out);
            }
            OrderItem::Group { items, .. } => parents_to_promote(items, is_new, out),
            OrderItem::Other(_) => {}
        }
    }
}

struct SourceOrder {
    items: Vec<OrderItem>,
    promoted: Vec<ObjectId>,
}

/// Parse the source `/Order` and register the parents of new layers
fn promote_parents(
    source_config: &Dictionary,
    source: &mut PDFDocument,
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
    notices: &mut Notices,
    registry: &mut Registry,
    new: &mut HashSet<ObjectId>,
) -> PDFGraphResult<SourceOrder> {
    let items = match source_config.get("Order") {
        Some(order) => source.dereference(order)?.and_then(|o| o.as_array().cloned()).unwrap_or_default(),
        None => Vec::new(),
    };
    let items = parse_order(&items);

    let source_doc = source.id();
    let mut parents = Vec::new();
    {
        let is_new = |ocg: ObjectId| ctx.translate(source_doc, ocg).map_or(false, |t| new.contains(&t));
        parents_to_promote(&items, &is_new, &mut parents);
    }
    let mut promoted = Vec::new();
    for parent in parents {
        let registered = ctx
            .translate(source_doc, parent)
            .map_or(false, |target| registry.ids.contains(&target));
        if registered {
            continue;
        }
        if let Some(target) = register(parent, source, dest, ctx, notices, registry)? {
            trace!("Promoted parent layer {} as {}", parent, target);
            new.insert(target);
            promoted.push(target);
        }
    }
    Ok(SourceOrder { items, promoted })
}

fn translate_ids(values: &[PDFValue], source: DocumentId, ctx: &CopyContext) -> Vec<ObjectId> {
    values
        .iter()
        .filter_map(PDFValue::as_reference)
        .filter_map(|id| ctx.translate(source, id))
        .collect()
}

/// `ON`, `OFF` and `Locked`: the source decides the state of new layers
fn merge_state_lists(
    config: &mut Dictionary,
    source_config: &Dictionary,
    source: DocumentId,
    ctx: &CopyContext,
    new: &HashSet<ObjectId>,
) {
    for key in STATE_LISTS {
        let mut list: Vec<PDFValue> = config
            .get_array(key)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.as_reference().map_or(true, |id| !new.contains(&id)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(items) = source_config.get_array(key) {
            for id in translate_ids(items, source, ctx) {
                let value = PDFValue::Reference(id);
                if new.contains(&id) && !list.contains(&value) {
                    list.push(value);
                }
            }
        }
        config.set(key, list);
    }
}

/// `RBGroups`: whole groups touching a new layer are replaced by the
/// source's
fn merge_radio_groups(
    config: &mut Dictionary,
    source_config: &Dictionary,
    source: DocumentId,
    ctx: &CopyContext,
    new: &HashSet<ObjectId>,
) {
    let touches_new = |group: &[ObjectId]| group.iter().any(|id| new.contains(id));
    let mut groups: Vec<PDFValue> = config
        .get_array("RBGroups")
        .map(|groups| {
            groups
                .iter()
                .filter(|group| {
                    let ids: Vec<ObjectId> = group
                        .as_array()
                        .map(|g| g.iter().filter_map(PDFValue::as_reference).collect())
                        .unwrap_or_default();
                    !touches_new(&ids)
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    for group in source_config.get_array("RBGroups").into_iter().flatten() {
        let translated = translate_ids(group.as_array().map(Vec::as_slice).unwrap_or_default(), source, ctx);
        if touches_new(&translated) {
            groups.push(PDFValue::Array(translated.into_iter().map(PDFValue::Reference).collect()));
        }
    }
    config.set("RBGroups", groups);
}

/// Drop destination branches rooted at a new layer; groups emptied by the
/// pruning go too
fn prune(items: Vec<OrderItem>, new: &HashSet<ObjectId>) -> Vec<OrderItem> {
    items
        .into_iter()
        .filter_map(|item| match item {
            OrderItem::Node { ocg, .. } if new.contains(&ocg) => None,
            OrderItem::Node { ocg, children } => Some(OrderItem::Node {
                ocg,
                children: prune(children, new),
            }),
            OrderItem::Group { label, items } => {
                let was_empty = items.is_empty();
                let items = prune(items, new);
                if items.is_empty() && !was_empty {
                    None
                } else {
                    Some(OrderItem::Group { label, items })
                }
            }
            other => Some(other),
        })
        .collect()
}

/// Source branch with every layer replaced by its copy; layers that were
/// not copied are dropped with their subtree
fn translate_branch(item: &OrderItem, source: DocumentId, ctx: &CopyContext) -> Option<OrderItem> {
    match item {
        OrderItem::Node { ocg, children } => Some(OrderItem::Node {
            ocg: ctx.translate(source, *ocg)?,
            children: children.iter().filter_map(|c| translate_branch(c, source, ctx)).collect(),
        }),
        OrderItem::Group { label, items } => {
            let items: Vec<_> = items.iter().filter_map(|c| translate_branch(c, source, ctx)).collect();
            if items.is_empty() {
                None
            } else {
                Some(OrderItem::Group {
                    label: label.clone(),
                    items,
                })
            }
        }
        OrderItem::Other(_) => None,
    }
}

/// Add `incoming` to `items`; a layer or labelled group already present at
/// the same level absorbs the incoming children instead of repeating
fn merge_into(items: &mut Vec<OrderItem>, incoming: Vec<OrderItem>) {
    for item in incoming {
        match item {
            OrderItem::Node { ocg, children } => {
                let existing = items.iter_mut().find_map(|existing| match existing {
                    OrderItem::Node { ocg: other, children } if *other == ocg => Some(children),
                    _ => None,
                });
                match existing {
                    Some(existing) => merge_into(existing, children),
                    None => items.push(OrderItem::Node { ocg, children }),
                }
            }
            OrderItem::Group { label: Some(label), items: group } => {
                let existing = items.iter_mut().find_map(|existing| match existing {
                    OrderItem::Group {
                        label: Some(other),
                        items,
                    } if *other == label => Some(items),
                    _ => None,
                });
                match existing {
                    Some(existing) => merge_into(existing, group),
                    None => items.push(OrderItem::Group {
                        label: Some(label),
                        items: group,
                    }),
                }
            }
            other => items.push(other),
        }
    }
}

fn merge_order(
    config: &mut Dictionary,
    source_items: Vec<OrderItem>,
    source: DocumentId,
    ctx: &CopyContext,
    new: &HashSet<ObjectId>,
    dest: &mut PDFDocument,
) -> PDFGraphResult<()> {
    let current = match config.get("Order") {
        Some(order) => dest.dereference(order)?.and_then(|o| o.as_array().cloned()).unwrap_or_default(),
        None => Vec::new(),
    };
    let mut items = prune(parse_order(&current), new);

    let is_new = |ocg: ObjectId| ctx.translate(source, ocg).map_or(false, |t| new.contains(&t));
    let incoming: Vec<OrderItem> = source_items
        .iter()
        .filter(|item| contains(item, &is_new))
        .filter_map(|item| translate_branch(item, source, ctx))
        .collect();
    merge_into(&mut items, incoming);
    config.set("Order", write_order(&items));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::copy_pages;
    use crate::pdf::MemorySource;
    use crate::testing::{new_document, open_source, source_page, source_with_pages};
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn layer(name: &str) -> Dictionary {
        let mut ocg = Dictionary::typed("OCG");
        ocg.set("Name", PDFValue::string(name));
        ocg
    }

    /// Give page `n` a resource dictionary naming `ocg`
    fn use_layer(source: &mut MemorySource, n: u32, ocg: ObjectId) {
        let mut properties = Dictionary::new();
        properties.set_reference("MC0", ocg);
        let mut resources = Dictionary::new();
        resources.set("Properties", properties);
        let mut page = Dictionary::typed("Page");
        page.set_reference("Parent", ObjectId::new(2, 0));
        page.set("Resources", resources);
        source.replace(source_page(n), page);
    }

    fn set_properties(source: &mut MemorySource, properties: Dictionary) {
        let mut catalog = Dictionary::typed("Catalog");
        catalog.set_reference("Pages", ObjectId::new(2, 0));
        catalog.set("OCProperties", properties);
        source.replace(ObjectId::new(1, 0), catalog);
    }

    fn refs(ids: &[ObjectId]) -> PDFValue {
        PDFValue::Array(ids.iter().map(|id| PDFValue::Reference(*id)).collect())
    }

    fn dest_config(dest: &mut PDFDocument) -> PDFGraphResult<Dictionary> {
        let properties = dest.catalog()?.get_dictionary("OCProperties").cloned().unwrap_or_default();
        Ok(properties.get_dictionary("D").cloned().unwrap_or_default())
    }

    fn single_layer_source(name: &str) -> PDFGraphResult<PDFDocument> {
        let mut source = source_with_pages(1);
        let ocg = source.push(layer(name));
        use_layer(&mut source, 1, ocg);
        open_source(source)
    }

    #[test]
    fn test_colliding_names_get_suffixes() -> PDFGraphResult<()> {
        let (mut dest, _buffer) = new_document()?;
        let existing = dest.add_object(layer("Layer1"))?;
        let mut properties = Dictionary::new();
        properties.set("OCGs", refs(&[existing]));
        let catalog = dest.catalog_id();
        dest.update_dictionary(catalog, |c| c.set("OCProperties", properties))?;
        let mut ctx = CopyContext::new();

        let mut first = single_layer_source("Layer1")?;
        let outcome = copy_pages(&mut first, &[1], &mut dest, &mut ctx)?;
        assert_eq!(outcome.notices.count(NoticeKind::OcgNameCollision), 1);
        assert_eq!(layer_name(&mut dest, outcome.ocgs[0])?, Some(b"Layer1_0".to_vec()));

        let mut second = single_layer_source("Layer1")?;
        let outcome = copy_pages(&mut second, &[1], &mut dest, &mut ctx)?;
        assert_eq!(layer_name(&mut dest, outcome.ocgs[0])?, Some(b"Layer1_1".to_vec()));

        let registry = dest.catalog()?.get_dictionary("OCProperties").cloned().unwrap_or_default();
        assert_eq!(registry.get_array("OCGs").map(Vec::len), Some(3));
        Ok(())
    }

    #[test]
    fn test_order_branch_merged_without_duplicates() -> PDFGraphResult<()> {
        let mut source = source_with_pages(2);
        let parent = source.push(layer("A"));
        let child = source.push(layer("B"));
        use_layer(&mut source, 1, parent);
        use_layer(&mut source, 2, child);
        let mut config = Dictionary::new();
        config.set("ON", refs(&[parent, child]));
        config.set(
            "Order",
            vec![PDFValue::Reference(parent), refs(&[child])],
        );
        let mut properties = Dictionary::new();
        properties.set("OCGs", refs(&[parent, child]));
        properties.set("D", config);
        set_properties(&mut source, properties);
        let mut source = open_source(source)?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let first = copy_pages(&mut source, &[1], &mut dest, &mut ctx)?;
        let a = first.ocgs[0];
        assert_eq!(dest_config(&mut dest)?.get("Order"), Some(&refs(&[a])));

        let second = copy_pages(&mut source, &[2], &mut dest, &mut ctx)?;
        let b = second.ocgs[0];
        assert_eq!(second.ocgs, vec![b]);
        let config = dest_config(&mut dest)?;
        assert_eq!(
            config.get("Order"),
            Some(&PDFValue::Array(vec![PDFValue::Reference(a), refs(&[b])]))
        );
        assert_eq!(config.get("ON"), Some(&refs(&[a, b])));
        Ok(())
    }

    #[test]
    fn test_parent_of_new_layer_is_promoted() -> PDFGraphResult<()> {
        let mut source = source_with_pages(1);
        let parent = source.push(layer("Parent"));
        let child = source.push(layer("Child"));
        use_layer(&mut source, 1, child);
        let mut config = Dictionary::new();
        config.set("Order", vec![PDFValue::Reference(parent), refs(&[child])]);
        let mut properties = Dictionary::new();
        properties.set("OCGs", refs(&[parent, child]));
        properties.set("D", config);
        set_properties(&mut source, properties);
        let mut source = open_source(source)?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let outcome = copy_pages(&mut source, &[1], &mut dest, &mut ctx)?;
        assert_eq!(outcome.ocgs.len(), 2);
        let copied_parent = ctx.translate(source.id(), parent).unwrap();
        let copied_child = ctx.translate(source.id(), child).unwrap();
        assert_eq!(
            dest_config(&mut dest)?.get("Order"),
            Some(&PDFValue::Array(vec![PDFValue::Reference(copied_parent), refs(&[copied_child])]))
        );
        Ok(())
    }

    /// Order `[A, [B, [C]]]` with page n using the n-th layer
    fn three_level_source() -> (MemorySource, [ObjectId; 3]) {
        let mut source = source_with_pages(3);
        let a = source.push(layer("A"));
        let b = source.push(layer("B"));
        let c = source.push(layer("C"));
        for (n, ocg) in [(1, a), (2, b), (3, c)] {
            use_layer(&mut source, n, ocg);
        }
        let mut config = Dictionary::new();
        config.set(
            "Order",
            vec![
                PDFValue::Reference(a),
                PDFValue::Array(vec![PDFValue::Reference(b), refs(&[c])]),
            ],
        );
        let mut properties = Dictionary::new();
        properties.set("OCGs", refs(&[a, b, c]));
        properties.set("D", config);
        set_properties(&mut source, properties);
        (source, [a, b, c])
    }

    #[test]
    fn test_deep_order_grows_level_by_level() -> PDFGraphResult<()> {
        let (source, _) = three_level_source();
        let mut source = open_source(source)?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let a = copy_pages(&mut source, &[1], &mut dest, &mut ctx)?.ocgs;
        let b = copy_pages(&mut source, &[2], &mut dest, &mut ctx)?.ocgs;
        let c = copy_pages(&mut source, &[3], &mut dest, &mut ctx)?.ocgs;
        assert_eq!((a.len(), b.len(), c.len()), (1, 1, 1));
        assert_eq!(
            dest_config(&mut dest)?.get("Order"),
            Some(&PDFValue::Array(vec![
                PDFValue::Reference(a[0]),
                PDFValue::Array(vec![PDFValue::Reference(b[0]), refs(&c)]),
            ]))
        );

        let registry = dest.catalog()?.get_dictionary("OCProperties").cloned().unwrap_or_default();
        assert_eq!(registry.get_array("OCGs").map(Vec::len), Some(3));
        Ok(())
    }

    #[test]
    fn test_every_ancestor_of_deep_layer_is_promoted() -> PDFGraphResult<()> {
        let (source, [a, b, c]) = three_level_source();
        let mut source = open_source(source)?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let outcome = copy_pages(&mut source, &[3], &mut dest, &mut ctx)?;
        let copy = |id| ctx.translate(source.id(), id).unwrap();
        let (a, b, c) = (copy(a), copy(b), copy(c));
        assert_eq!(outcome.ocgs, vec![c, a, b]);
        assert_eq!(
            dest_config(&mut dest)?.get("Order"),
            Some(&PDFValue::Array(vec![
                PDFValue::Reference(a),
                PDFValue::Array(vec![PDFValue::Reference(b), refs(&[c])]),
            ]))
        );
        Ok(())
    }

    #[test]
    fn test_nested_labelled_group_merged_in_place() -> PDFGraphResult<()> {
        let mut source = source_with_pages(2);
        let a = source.push(layer("A"));
        let b = source.push(layer("B"));
        let c = source.push(layer("C"));
        use_layer(&mut source, 1, b);
        use_layer(&mut source, 2, c);
        let tools = || PDFValue::string("Tools");
        let mut config = Dictionary::new();
        config.set(
            "Order",
            vec![
                PDFValue::Reference(a),
                PDFValue::Array(vec![
                    PDFValue::Array(vec![tools(), PDFValue::Reference(b)]),
                    PDFValue::Reference(c),
                ]),
            ],
        );
        let mut properties = Dictionary::new();
        properties.set("OCGs", refs(&[a, b, c]));
        properties.set("D", config);
        set_properties(&mut source, properties);
        let mut source = open_source(source)?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let first = copy_pages(&mut source, &[1], &mut dest, &mut ctx)?;
        assert_eq!(first.ocgs.len(), 2);
        let second = copy_pages(&mut source, &[2], &mut dest, &mut ctx)?;
        assert_eq!(second.ocgs.len(), 1);

        let copy = |id| PDFValue::Reference(ctx.translate(source.id(), id).unwrap());
        assert_eq!(
            dest_config(&mut dest)?.get("Order"),
            Some(&PDFValue::Array(vec![
                copy(a),
                PDFValue::Array(vec![PDFValue::Array(vec![tools(), copy(b)]), copy(c)]),
            ]))
        );
        Ok(())
    }

    #[test]
    fn test_locked_list_extended_with_new_layers() -> PDFGraphResult<()> {
        let mut source = source_with_pages(2);
        let shown = source.push(layer("Shown"));
        let hidden = source.push(layer("Hidden"));
        use_layer(&mut source, 1, shown);
        use_layer(&mut source, 2, hidden);
        let mut config = Dictionary::new();
        config.set("ON", refs(&[shown]));
        config.set("OFF", refs(&[hidden]));
        config.set("Locked", refs(&[shown]));
        let mut properties = Dictionary::new();
        properties.set("OCGs", refs(&[shown, hidden]));
        properties.set("D", config);
        set_properties(&mut source, properties);
        let mut source = open_source(source)?;

        let (mut dest, _buffer) = new_document()?;
        let existing = dest.add_object(layer("Existing"))?;
        let mut dest_locked = Dictionary::new();
        dest_locked.set("Locked", refs(&[existing]));
        let mut dest_properties = Dictionary::new();
        dest_properties.set("OCGs", refs(&[existing]));
        dest_properties.set("D", dest_locked);
        let catalog = dest.catalog_id();
        dest.update_dictionary(catalog, |c| c.set("OCProperties", dest_properties))?;
        let mut ctx = CopyContext::new();

        let outcome = copy_pages(&mut source, &[1, 2], &mut dest, &mut ctx)?;
        let (shown, hidden) = (outcome.ocgs[0], outcome.ocgs[1]);
        let config = dest_config(&mut dest)?;
        assert_eq!(config.get("Locked"), Some(&refs(&[existing, shown])));
        assert_eq!(config.get("ON"), Some(&refs(&[shown])));
        assert_eq!(config.get("OFF"), Some(&refs(&[hidden])));

        // copying the same pages again leaves the lists alone
        copy_pages(&mut source, &[1, 2], &mut dest, &mut ctx)?;
        assert_eq!(dest_config(&mut dest)?.get("Locked"), Some(&refs(&[existing, shown])));
        Ok(())
    }

    #[test]
    fn test_empty_configuration_lists_removed() -> PDFGraphResult<()> {
        let mut source = source_with_pages(1);
        let ocg = source.push(layer("Only"));
        use_layer(&mut source, 1, ocg);
        let mut config = Dictionary::new();
        config.set("ON", refs(&[ocg]));
        config.set("OFF", Vec::<PDFValue>::new());
        config.set("RBGroups", Vec::<PDFValue>::new());
        let mut properties = Dictionary::new();
        properties.set("OCGs", refs(&[ocg]));
        properties.set("D", config);
        set_properties(&mut source, properties);
        let mut source = open_source(source)?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let outcome = copy_pages(&mut source, &[1], &mut dest, &mut ctx)?;
        let config = dest_config(&mut dest)?;
        assert_eq!(config.get("ON"), Some(&refs(&outcome.ocgs)));
        for key in ["OFF", "Locked", "RBGroups"] {
            assert!(!config.contains_key(key), "{} should be gone", key);
        }
        Ok(())
    }

    #[test]
    fn test_radio_groups_replaced_for_new_layers() -> PDFGraphResult<()> {
        let mut source = source_with_pages(1);
        let left = source.push(layer("Left"));
        let right = source.push(layer("Right"));
        use_layer(&mut source, 1, left);
        let mut config = Dictionary::new();
        config.set("RBGroups", vec![refs(&[left, right])]);
        let mut properties = Dictionary::new();
        properties.set("OCGs", refs(&[left, right]));
        properties.set("D", config);
        set_properties(&mut source, properties);
        let mut source = open_source(source)?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let outcome = copy_pages(&mut source, &[1], &mut dest, &mut ctx)?;
        // the unused member has no copy and is left out of the group
        assert_eq!(
            dest_config(&mut dest)?.get("RBGroups"),
            Some(&PDFValue::Array(vec![refs(&outcome.ocgs)]))
        );
        Ok(())
    }

    #[test]
    fn test_order_parsing_keeps_labels() {
        let a = ObjectId::new(10, 0);
        let b = ObjectId::new(11, 0);
        let order = vec![
            PDFValue::Reference(a),
            refs(&[b]),
            PDFValue::Array(vec![PDFValue::string("Label"), PDFValue::Reference(b)]),
        ];
        let parsed = parse_order(&order);
        assert_eq!(parsed.len(), 2);
        assert!(matches!(&parsed[1], OrderItem::Group { label: Some(_), items } if items.len() == 1));
        assert_eq!(write_order(&parsed), order);
    }
}
