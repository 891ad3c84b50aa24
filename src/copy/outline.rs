//! Outline (bookmark) transplantation
//!
//! An outline item is copied when its destination lands on a copied page,
//! or when one of its descendants is copied; ancestors without a usable
//! destination of their own keep the tree shape. Items copied by an earlier
//! call with the same context are reused, so repeated page-range copies
//! grow one outline instead of repeating it.

use std::collections::{HashMap, HashSet};
use log::{debug, trace};
use crate::error::PDFGraphResult;
use crate::notice::{NoticeKind, Notices};
use crate::pdf::{Dictionary, ObjectId, PDFDocument, PDFValue};
use super::pages::{map_destination, MappedDestination};
use super::CopyContext;

/// Entries carried over verbatim
const COPIED_KEYS: [&str; 3] = ["Title", "C", "F"];

struct OutlineNode {
    source: ObjectId,
    dict: Dictionary,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Copy the outline items of `source` that lead to pages already copied
/// into `dest`
///
/// Returns the number of items added.
pub fn copy_outlines(
    source: &mut PDFDocument,
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
    notices: &mut Notices,
) -> PDFGraphResult<usize> {
    let first = match source.catalog()?.get("Outlines") {
        Some(outlines) => source
            .dereference(outlines)?
            .and_then(|o| o.as_dictionary().and_then(|d| d.get_reference("First"))),
        None => None,
    };
    let first = match first {
        Some(first) => first,
        None => return Ok(0),
    };
    let nodes = read_outline(source, first)?;
    let source_doc = source.id();

    // Children always come after their parent, so a reverse sweep sees
    // every descendant before its ancestors.
    let mut rewritten: Vec<Option<(&'static str, PDFValue)>> = Vec::with_capacity(nodes.len());
    for node in &nodes {
        if ctx.translate(source_doc, node.source).is_some() {
            // placed by an earlier call, its destination is already in dest
            rewritten.push(None);
            continue;
        }
        rewritten.push(rewrite_target(&node.dict, source, dest, ctx, notices)?);
    }
    let mut keep: Vec<bool> = rewritten.iter().map(Option::is_some).collect();
    for index in (0..nodes.len()).rev() {
        if keep[index] {
            if let Some(parent) = nodes[index].parent {
                keep[parent] = true;
            }
        }
    }
    if !keep.iter().any(|k| *k) {
        return Ok(0);
    }

    let mut targets: Vec<Option<ObjectId>> = vec![None; nodes.len()];
    let mut created = Vec::new();
    for (index, node) in nodes.iter().enumerate() {
        if !keep[index] {
            continue;
        }
        targets[index] = match ctx.translate(source_doc, node.source) {
            Some(existing) => Some(existing),
            None => {
                let target = dest.allocate()?;
                ctx.reserve(source_doc, node.source, target, false)?;
                created.push(index);
                Some(target)
            }
        };
    }
    let created_set: HashSet<usize> = created.iter().copied().collect();

    let root = outline_root(dest)?;
    let mut fresh: HashMap<ObjectId, Dictionary> = HashMap::new();
    for &index in &created {
        let node = &nodes[index];
        let mut item = Dictionary::new();
        for key in COPIED_KEYS {
            if let Some(value) = node.dict.get(key) {
                if let Some(value) = source.dereference(value)? {
                    item.set(key, value);
                }
            }
        }
        if let Some((key, value)) = &rewritten[index] {
            item.set(key, value.clone());
        }
        let parent = node.parent.and_then(|p| targets[p]).unwrap_or(root);
        item.set_reference("Parent", parent);
        if let Some(target) = targets[index] {
            fresh.insert(target, item);
        }
    }

    // New children grouped under their destination parent, in source order
    let mut groups: Vec<(ObjectId, Vec<ObjectId>, bool)> = Vec::new();
    let top_level: Vec<usize> = (0..nodes.len()).filter(|i| nodes[*i].parent.is_none()).collect();
    let mut parents: Vec<(ObjectId, &[usize], bool)> = vec![(root, top_level.as_slice(), false)];
    for (index, node) in nodes.iter().enumerate() {
        if let Some(target) = targets[index] {
            let closed = node.dict.get_integer("Count").map_or(false, |count| count < 0);
            parents.push((target, node.children.as_slice(), closed));
        }
    }
    for (parent, children, closed) in parents {
        let new_children: Vec<ObjectId> = children
            .iter()
            .filter(|child| created_set.contains(*child))
            .filter_map(|child| targets[*child])
            .collect();
        if !new_children.is_empty() {
            groups.push((parent, new_children, closed));
        }
    }

    for (parent, children, closed) in groups {
        let mut parent_dict = match fresh.remove(&parent) {
            Some(dict) => dict,
            None => dest.dictionary(parent)?,
        };
        let previous_last = parent_dict.get_reference("Last");
        if let Some(last) = previous_last {
            dest.update_dictionary(last, |d| d.set_reference("Next", children[0]))?;
        } else {
            parent_dict.set_reference("First", children[0]);
        }
        for (position, child) in children.iter().enumerate() {
            let item = fresh.entry(*child).or_default();
            let prev = if position == 0 { previous_last } else { Some(children[position - 1]) };
            if let Some(prev) = prev {
                item.set_reference("Prev", prev);
            }
            if let Some(next) = children.get(position + 1) {
                item.set_reference("Next", *next);
            }
        }
        parent_dict.set_reference("Last", children[children.len() - 1]);
        let added = children.len() as i64;
        let count = parent_dict.get_integer("Count").unwrap_or(0);
        let count = if closed || count < 0 { count - added } else { count + added };
        parent_dict.set("Count", count);
        if created_set.iter().any(|index| targets[*index] == Some(parent)) {
            fresh.insert(parent, parent_dict);
        } else {
            dest.set_object(parent, parent_dict)?;
        }
    }

    for &index in &created {
        if let Some(target) = targets[index] {
            let item = fresh.remove(&target).unwrap_or_default();
            dest.set_object(target, item)?;
            ctx.complete(source_doc, nodes[index].source);
        }
    }
    debug!("Copied {} outline items from {}", created.len(), source_doc);
    Ok(created.len())
}

/// Flatten the outline below `first` into parent-before-child order
///
/// Sibling chains that loop back on themselves are cut at the first repeat.
fn read_outline(source: &mut PDFDocument, first: ObjectId) -> PDFGraphResult<Vec<OutlineNode>> {
    let mut nodes: Vec<OutlineNode> = Vec::new();
    let mut visited = HashSet::new();
    let mut chains: Vec<(ObjectId, Option<usize>)> = vec![(first, None)];
    while let Some((start, parent)) = chains.pop() {
        let mut current = Some(start);
        while let Some(id) = current {
            if !visited.insert(id) {
                trace!("Outline item {} seen twice, stopping this chain", id);
                break;
            }
            let dict = match source.resolve(id)?.and_then(PDFValue::as_dictionary) {
                Some(dict) => dict.clone(),
                None => break,
            };
            let index = nodes.len();
            if let Some(parent) = parent {
                nodes[parent].children.push(index);
            }
            if let Some(child) = dict.get_reference("First") {
                chains.push((child, Some(index)));
            }
            current = dict.get_reference("Next");
            nodes.push(OutlineNode {
                source: id,
                dict,
                parent,
                children: Vec::new(),
            });
        }
    }
    Ok(nodes)
}

/// Destination entry of an item rewritten for `dest`; `None` when the item
/// does not lead to a copied page
fn rewrite_target(
    item: &Dictionary,
    source: &mut PDFDocument,
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
    notices: &mut Notices,
) -> PDFGraphResult<Option<(&'static str, PDFValue)>> {
    if let Some(target) = item.get("Dest") {
        return Ok(match map_destination(target, source, dest, ctx, notices)? {
            MappedDestination::Mapped(value) => Some(("Dest", value)),
            MappedDestination::Dangling => {
                notices.record(NoticeKind::DanglingDestinationDropped);
                None
            }
            MappedDestination::Absent => None,
        });
    }
    let action = match item.get("A") {
        Some(action) => source.dereference(action)?.and_then(|a| a.as_dictionary().cloned()),
        None => None,
    };
    let action = match action.filter(|a| a.get_name("S") == Some("GoTo")) {
        Some(action) => action,
        None => return Ok(None),
    };
    let target = action.get("D").cloned().unwrap_or(PDFValue::Null);
    Ok(match map_destination(&target, source, dest, ctx, notices)? {
        MappedDestination::Mapped(value) => {
            let mut rewritten = action.without(&["D", "Next"]);
            rewritten.set("D", value);
            Some(("A", rewritten.into()))
        }
        MappedDestination::Dangling => {
            notices.record(NoticeKind::DanglingDestinationDropped);
            None
        }
        MappedDestination::Absent => None,
    })
}

/// Outline dictionary of `dest`, created when missing
fn outline_root(dest: &mut PDFDocument) -> PDFGraphResult<ObjectId> {
    let catalog = dest.catalog()?;
    match catalog.get("Outlines") {
        Some(PDFValue::Reference(id)) => Ok(*id),
        Some(PDFValue::Dictionary(inline)) => {
            let id = dest.add_object(inline.clone())?;
            let catalog_id = dest.catalog_id();
            dest.update_dictionary(catalog_id, |c| c.set_reference("Outlines", id))?;
            Ok(id)
        }
        _ => {
            let id = dest.add_object(Dictionary::typed("Outlines"))?;
            let catalog_id = dest.catalog_id();
            dest.update_dictionary(catalog_id, |c| c.set_reference("Outlines", id))?;
            trace!("Created outline root {}", id);
            Ok(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::copy_pages;
    use crate::pdf::MemorySource;
    use crate::testing::{new_document, open_source, source_page, source_with_pages};
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn fit(page: ObjectId) -> PDFValue {
        PDFValue::Array(vec![PDFValue::Reference(page), PDFValue::name("Fit")])
    }

    fn item(title: &str, parent: ObjectId, dest: Option<ObjectId>) -> Dictionary {
        let mut item = Dictionary::new();
        item.set("Title", PDFValue::string(title));
        item.set_reference("Parent", parent);
        if let Some(page) = dest {
            item.set("Dest", fit(page));
        }
        item
    }

    fn with_outline(source: &mut MemorySource, root: Dictionary) {
        let root_id = ObjectId::new(20, 0);
        source.insert(root_id, root);
        let mut catalog = Dictionary::typed("Catalog");
        catalog.set_reference("Pages", ObjectId::new(2, 0));
        catalog.set_reference("Outlines", root_id);
        source.replace(ObjectId::new(1, 0), catalog);
    }

    /// Root 20 with "One" (21, page 1) holding "Deep" (23, page 3), then
    /// "Two" (22, page 2) and a web link "Web" (24)
    fn chaptered_source() -> MemorySource {
        let mut source = source_with_pages(3);
        let root = ObjectId::new(20, 0);
        let (one, two, deep, web) = (
            ObjectId::new(21, 0),
            ObjectId::new(22, 0),
            ObjectId::new(23, 0),
            ObjectId::new(24, 0),
        );
        let mut one_dict = item("One", root, Some(source_page(1)));
        one_dict.set_reference("Next", two);
        one_dict.set_reference("First", deep);
        one_dict.set_reference("Last", deep);
        one_dict.set("Count", 1i64);
        let mut two_dict = item("Two", root, Some(source_page(2)));
        two_dict.set_reference("Prev", one);
        two_dict.set_reference("Next", web);
        let mut web_dict = item("Web", root, None);
        let mut uri = Dictionary::new();
        uri.set("S", PDFValue::name("URI"));
        uri.set("URI", PDFValue::string("https://example.com"));
        web_dict.set("A", uri);
        web_dict.set_reference("Prev", two);

        source.insert(one, one_dict);
        source.insert(two, two_dict);
        source.insert(deep, item("Deep", one, Some(source_page(3))));
        source.insert(web, web_dict);
        let mut root_dict = Dictionary::typed("Outlines");
        root_dict.set_reference("First", one);
        root_dict.set_reference("Last", web);
        root_dict.set("Count", 4i64);
        with_outline(&mut source, root_dict);
        source
    }

    fn title(dest: &mut PDFDocument, id: ObjectId) -> PDFGraphResult<String> {
        let dict = dest.dictionary(id)?;
        Ok(dict.get("Title").and_then(PDFValue::as_string).map(|t| t.to_text()).unwrap_or_default())
    }

    #[test]
    fn test_ancestor_kept_for_copied_descendant() -> PDFGraphResult<()> {
        let mut source = open_source(chaptered_source())?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let outcome = copy_pages(&mut source, &[3], &mut dest, &mut ctx)?;
        assert_eq!(outcome.outline_items, 2);
        assert!(outcome.notices.contains(NoticeKind::DanglingDestinationDropped));

        let root = dest.catalog()?.get_reference("Outlines").unwrap();
        let root_dict = dest.dictionary(root)?;
        let one = root_dict.get_reference("First").unwrap();
        assert_eq!(root_dict.get_reference("Last"), Some(one));
        assert_eq!(title(&mut dest, one)?, "One");

        let one_dict = dest.dictionary(one)?;
        assert!(one_dict.get("Dest").is_none());
        let deep = one_dict.get_reference("First").unwrap();
        let deep_dict = dest.dictionary(deep)?;
        assert_eq!(deep_dict.get_reference("Parent"), Some(one));
        assert_eq!(deep_dict.get("Dest"), Some(&fit(outcome.pages[0])));
        Ok(())
    }

    #[test]
    fn test_repeated_copies_extend_one_outline() -> PDFGraphResult<()> {
        let mut source = open_source(chaptered_source())?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let first = copy_pages(&mut source, &[1], &mut dest, &mut ctx)?;
        assert_eq!(first.outline_items, 1);
        let second = copy_pages(&mut source, &[2], &mut dest, &mut ctx)?;
        assert_eq!(second.outline_items, 1);

        let root = dest.catalog()?.get_reference("Outlines").unwrap();
        let root_dict = dest.dictionary(root)?;
        let one = root_dict.get_reference("First").unwrap();
        let two = root_dict.get_reference("Last").unwrap();
        assert_eq!(title(&mut dest, one)?, "One");
        assert_eq!(title(&mut dest, two)?, "Two");
        assert_eq!(dest.dictionary(one)?.get_reference("Next"), Some(two));
        assert_eq!(dest.dictionary(two)?.get_reference("Prev"), Some(one));
        assert_eq!(root_dict.get_integer("Count"), Some(2));
        Ok(())
    }

    #[test]
    fn test_repeated_copy_leaves_earlier_items_alone() -> PDFGraphResult<()> {
        let mut source = source_with_pages(2);
        let root = ObjectId::new(20, 0);
        let (one, two) = (ObjectId::new(21, 0), ObjectId::new(22, 0));
        let mut one_dict = item("One", root, None);
        one_dict.set("Dest", PDFValue::name("chapter"));
        one_dict.set_reference("Next", two);
        let mut two_dict = item("Two", root, Some(source_page(2)));
        two_dict.set_reference("Prev", one);
        source.insert(one, one_dict);
        source.insert(two, two_dict);
        let mut root_dict = Dictionary::typed("Outlines");
        root_dict.set_reference("First", one);
        root_dict.set_reference("Last", two);
        with_outline(&mut source, root_dict);
        let mut dests = Dictionary::new();
        dests.set("chapter", fit(source_page(1)));
        let mut catalog = Dictionary::typed("Catalog");
        catalog.set_reference("Pages", ObjectId::new(2, 0));
        catalog.set_reference("Outlines", root);
        catalog.set("Dests", dests);
        source.replace(ObjectId::new(1, 0), catalog);

        let mut source = open_source(source)?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let first = copy_pages(&mut source, &[1], &mut dest, &mut ctx)?;
        assert_eq!(first.outline_items, 1);
        assert!(!first.notices.contains(NoticeKind::NamedDestinationShared));
        let second = copy_pages(&mut source, &[2], &mut dest, &mut ctx)?;
        assert_eq!(second.outline_items, 1);
        assert!(!second.notices.contains(NoticeKind::NamedDestinationShared));

        let root = dest.catalog()?.get_reference("Outlines").unwrap();
        let one = dest.dictionary(root)?.get_reference("First").unwrap();
        assert_eq!(dest.dictionary(one)?.get("Dest"), Some(&PDFValue::name("chapter")));
        Ok(())
    }

    #[test]
    fn test_looping_sibling_chain_terminates() -> PDFGraphResult<()> {
        let mut source = source_with_pages(1);
        let root = ObjectId::new(20, 0);
        let a = ObjectId::new(21, 0);
        let b = ObjectId::new(22, 0);
        let mut a_dict = item("A", root, Some(source_page(1)));
        a_dict.set_reference("Next", b);
        let mut b_dict = item("B", root, None);
        b_dict.set_reference("Next", a);
        source.insert(a, a_dict);
        source.insert(b, b_dict);
        let mut root_dict = Dictionary::typed("Outlines");
        root_dict.set_reference("First", a);
        with_outline(&mut source, root_dict);
        let mut source = open_source(source)?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let outcome = copy_pages(&mut source, &[1], &mut dest, &mut ctx)?;
        assert_eq!(outcome.outline_items, 1);
        Ok(())
    }

    #[test]
    fn test_no_outline_copies_nothing() -> PDFGraphResult<()> {
        let mut source = open_source(source_with_pages(1))?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let outcome = copy_pages(&mut source, &[1], &mut dest, &mut ctx)?;
        assert_eq!(outcome.outline_items, 0);
        assert!(dest.catalog()?.get("Outlines").is_none());
        Ok(())
    }
}
