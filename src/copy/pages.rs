//! Page-range transplantation
//!
//! Pages are copied first; link annotations are held back until every page
//! of the range has a destination id, because a link may point at a page
//! copied later in the same batch. Links whose target page stays behind are
//! dropped.

use std::collections::HashMap;
use log::{debug, trace};
use crate::error::PDFGraphResult;
use crate::notice::{NoticeKind, Notices};
use crate::pdf::document::INHERITABLE_PAGE_ATTRIBUTES;
use crate::pdf::{Dictionary, ObjectId, PDFDocument, PDFValue};
use super::{copy_detached, copy_into, copy_outlines, merge_optional_content, CopyContext};

/// Entries of a page dictionary that are rebuilt rather than copied
const EXCLUDED_PAGE_KEYS: [&str; 4] = ["Parent", "Annots", "B", "StructParents"];

/// Entries of an annotation that tie it to its old page
const EXCLUDED_ANNOTATION_KEYS: [&str; 2] = ["P", "Parent"];

/// Result of [`copy_pages`]
#[derive(Debug, Clone, Default)]
pub struct CopyPagesOutcome {
    /// New page ids in the order requested
    pub pages: Vec<ObjectId>,
    /// Optional-content groups registered in the destination
    pub ocgs: Vec<ObjectId>,
    /// Number of outline items copied
    pub outline_items: usize,
    pub notices: Notices,
}

struct StagedLink {
    source: Option<ObjectId>,
    dict: Dictionary,
    page: ObjectId,
}

/// Where a destination ends up in the target document
#[derive(Debug, Clone, PartialEq)]
pub(super) enum MappedDestination {
    /// Nothing to map
    Absent,
    /// Value to store in the copy
    Mapped(PDFValue),
    /// Target page was not copied
    Dangling,
}

/// Append pages `page_numbers` (1-based) of `source` to `dest`
///
/// Link annotations, named destinations, outlines and optional-content
/// groups that belong to the copied pages come along.
pub fn copy_pages(
    source: &mut PDFDocument,
    page_numbers: &[usize],
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
) -> PDFGraphResult<CopyPagesOutcome> {
    let mut notices = Notices::new();
    let source_pages = page_numbers
        .iter()
        .map(|number| source.page_id(*number))
        .collect::<PDFGraphResult<Vec<_>>>()?;

    let mut staged = Vec::new();
    let mut annotations: HashMap<ObjectId, Vec<PDFValue>> = HashMap::new();
    let mut pages = Vec::with_capacity(source_pages.len());

    for &page in &source_pages {
        let dict = source.dictionary(page)?;
        let mut base = dict.without(&EXCLUDED_PAGE_KEYS);
        for key in INHERITABLE_PAGE_ATTRIBUTES {
            if !base.contains_key(key) {
                if let Some(value) = source.inherited_attribute(page, key)? {
                    base.set(key, value);
                }
            }
        }
        let new_page = copy_detached(page, base, source, dest, ctx, &mut notices, |_| {})?;
        dest.append_page_ref(new_page)?;
        trace!("Copied page {} as {}", page, new_page);

        let page_annotations = match dict.get("Annots") {
            Some(annots) => source.dereference(annots)?.and_then(|a| a.as_array().cloned()).unwrap_or_default(),
            None => Vec::new(),
        };
        let mut copied = Vec::new();
        for annotation in page_annotations {
            let annotation_dict = match source.dereference(&annotation)?.and_then(|a| a.as_dictionary().cloned()) {
                Some(dict) => dict,
                None => continue,
            };
            if annotation_dict.get_name("Subtype") == Some("Link") {
                staged.push(StagedLink {
                    source: annotation.as_reference(),
                    dict: annotation_dict,
                    page: new_page,
                });
                continue;
            }
            let new_annotation = copy_annotation(
                annotation.as_reference(),
                annotation_dict,
                source,
                dest,
                ctx,
                &mut notices,
                |copy| copy.set_reference("P", new_page),
            )?;
            copied.push(PDFValue::Reference(new_annotation));
        }
        annotations.insert(new_page, copied);
        pages.push(new_page);
    }

    for link in staged {
        match rewrite_link(&link.dict, source, dest, ctx, &mut notices)? {
            Some((base, rewritten)) => {
                let page = link.page;
                let id = copy_annotation(link.source, base, source, dest, ctx, &mut notices, |copy| {
                    copy.set_reference("P", page);
                    if let Some((key, value)) = rewritten {
                        copy.set(key, value);
                    }
                })?;
                annotations.entry(link.page).or_default().push(PDFValue::Reference(id));
            }
            None => notices.record(NoticeKind::DanglingDestinationDropped),
        }
    }
    for (page, annots) in annotations {
        if !annots.is_empty() {
            dest.update_dictionary(page, |dict| dict.set("Annots", annots))?;
        }
    }

    let outline_items = copy_outlines(source, dest, ctx, &mut notices)?;
    let ocgs = merge_optional_content(source, &source_pages, dest, ctx, &mut notices)?;

    debug!(
        "Copied {} pages from {} into {} ({} outline items, {} layers)",
        pages.len(),
        source.id(),
        dest.id(),
        outline_items,
        ocgs.len()
    );
    notices.log_summary("copy_pages");
    ctx.notices.merge(&notices);
    Ok(CopyPagesOutcome {
        pages,
        ocgs,
        outline_items,
        notices,
    })
}

fn copy_annotation(
    source_id: Option<ObjectId>,
    dict: Dictionary,
    source: &mut PDFDocument,
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
    notices: &mut Notices,
    finish: impl FnOnce(&mut Dictionary),
) -> PDFGraphResult<ObjectId> {
    let base = dict.without(&EXCLUDED_ANNOTATION_KEYS);
    match source_id {
        Some(id) => copy_detached(id, base, source, dest, ctx, notices, finish),
        None => {
            let copied = copy_into(&PDFValue::Dictionary(base), source, dest, ctx, false, notices)?;
            let mut copied = copied.as_dictionary().cloned().unwrap_or_default();
            finish(&mut copied);
            dest.add_object(copied)
        }
    }
}

/// Split a link into the part copied as usual and its destination entry
/// already rewritten for `dest`; `None` drops the link
///
/// Actions other than `GoTo` stay in the copied part.
fn rewrite_link(
    link: &Dictionary,
    source: &mut PDFDocument,
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
    notices: &mut Notices,
) -> PDFGraphResult<Option<(Dictionary, Option<(&'static str, PDFValue)>)>> {
    if let Some(target) = link.get("Dest") {
        let base = link.without(&["Dest"]);
        return Ok(match map_destination(target, source, dest, ctx, notices)? {
            MappedDestination::Mapped(value) => Some((base, Some(("Dest", value)))),
            MappedDestination::Absent => Some((link.clone(), None)),
            MappedDestination::Dangling => None,
        });
    }

    let action = match link.get("A") {
        Some(action) => source.dereference(action)?.and_then(|a| a.as_dictionary().cloned()),
        None => None,
    };
    if let Some(action) = action.filter(|a| a.get_name("S") == Some("GoTo")) {
        let target = action.get("D").cloned().unwrap_or(PDFValue::Null);
        match map_destination(&target, source, dest, ctx, notices)? {
            MappedDestination::Mapped(value) => {
                let mut rewritten = action.without(&["D", "Next"]);
                rewritten.set("D", value);
                return Ok(Some((link.without(&["A"]), Some(("A", rewritten.into())))));
            }
            MappedDestination::Absent => {}
            MappedDestination::Dangling => return Ok(None),
        }
    }
    Ok(Some((link.clone(), None)))
}

/// Translate a destination of the source into one valid in `dest`
///
/// Explicit destinations get their page reference rewritten. Named
/// destinations keep their name; the resolved explicit destination is
/// registered under that name in `dest` unless the name is already taken.
pub(super) fn map_destination(
    target: &PDFValue,
    source: &mut PDFDocument,
    dest: &mut PDFDocument,
    ctx: &mut CopyContext,
    notices: &mut Notices,
) -> PDFGraphResult<MappedDestination> {
    let name = match target {
        PDFValue::Name(name) => Some(name.as_bytes().to_vec()),
        PDFValue::String(s) => Some(s.as_bytes().to_vec()),
        _ => None,
    };
    let explicit = match &name {
        Some(name) => match source.named_destination(name)? {
            Some(value) => explicit_destination(&value, source)?,
            None => None,
        },
        None => explicit_destination(target, source)?,
    };
    let explicit = match explicit {
        Some(explicit) => explicit,
        None if name.is_some() => return Ok(MappedDestination::Dangling),
        None => return Ok(MappedDestination::Absent),
    };

    let translated = match translate_explicit(&explicit, source, ctx) {
        Some(translated) => translated,
        None => return Ok(MappedDestination::Dangling),
    };
    match name {
        Some(name) => {
            if !dest.add_named_destination(target, translated)? {
                trace!("Named destination {:?} already exists", String::from_utf8_lossy(&name));
                notices.record(NoticeKind::NamedDestinationShared);
            }
            Ok(MappedDestination::Mapped(target.clone()))
        }
        None => Ok(MappedDestination::Mapped(translated)),
    }
}

/// Explicit destination array behind `value` (array, or dictionary with /D)
fn explicit_destination(value: &PDFValue, source: &mut PDFDocument) -> PDFGraphResult<Option<Vec<PDFValue>>> {
    let value = match source.dereference(value)? {
        Some(value) => value,
        None => return Ok(None),
    };
    match value {
        PDFValue::Array(items) => Ok(Some(items)),
        PDFValue::Dictionary(dict) => match dict.get("D") {
            Some(d) => Ok(source.dereference(d)?.and_then(|d| d.as_array().cloned())),
            None => Ok(None),
        },
        _ => Ok(None),
    }
}

/// Rewrite the page reference of an explicit destination; `None` if the
/// page was not copied
fn translate_explicit(explicit: &[PDFValue], source: &PDFDocument, ctx: &CopyContext) -> Option<PDFValue> {
    let (page, rest) = explicit.split_first()?;
    let page = match page {
        PDFValue::Reference(id) => PDFValue::Reference(ctx.translate(source.id(), *id)?),
        // page index destinations are only valid for remote targets
        other => other.clone(),
    };
    let mut translated = Vec::with_capacity(explicit.len());
    translated.push(page);
    translated.extend(rest.iter().cloned());
    Some(PDFValue::Array(translated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::MemorySource;
    use crate::testing::{new_document, open_source, source_page, source_with_pages};
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn link_to(dest: PDFValue) -> Dictionary {
        let mut link = Dictionary::typed("Annot");
        link.set("Subtype", PDFValue::name("Link"));
        link.set("Dest", dest);
        link
    }

    fn fit(page: ObjectId) -> PDFValue {
        PDFValue::Array(vec![PDFValue::Reference(page), PDFValue::name("Fit")])
    }

    /// Five pages; page 3 carries links to pages 3, 4 and 5 plus a text note
    fn linked_source() -> MemorySource {
        let mut source = source_with_pages(5);
        let self_link = source.push(link_to(fit(source_page(3))));
        let forward = source.push(link_to(fit(source_page(4))));
        let mut goto = Dictionary::new();
        goto.set("S", PDFValue::name("GoTo"));
        goto.set("D", fit(source_page(5)));
        let mut action_link = link_to(PDFValue::Null);
        action_link.remove("Dest");
        action_link.set("A", goto);
        let action_link = source.push(action_link);
        let mut note = Dictionary::typed("Annot");
        note.set("Subtype", PDFValue::name("Text"));
        note.set_reference("P", source_page(3));
        let note = source.push(note);

        let mut page = Dictionary::typed("Page");
        page.set_reference("Parent", ObjectId::new(2, 0));
        page.set(
            "Annots",
            vec![
                PDFValue::Reference(self_link),
                PDFValue::Reference(forward),
                PDFValue::Reference(action_link),
                PDFValue::Reference(note),
            ],
        );
        source.replace(source_page(3), page);
        source
    }

    #[test]
    fn test_links_outside_range_are_dropped() -> PDFGraphResult<()> {
        let mut source = open_source(linked_source())?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let outcome = copy_pages(&mut source, &[3], &mut dest, &mut ctx)?;
        assert_eq!(outcome.pages.len(), 1);
        let new_page = outcome.pages[0];
        assert_eq!(dest.page_ids()?, vec![new_page]);
        assert_eq!(outcome.notices.count(NoticeKind::DanglingDestinationDropped), 2);

        let annots = dest.dictionary(new_page)?.get_array("Annots").cloned().unwrap_or_default();
        assert_eq!(annots.len(), 2);
        let mut subtypes = Vec::new();
        for annot in &annots {
            let annot = dest.dictionary(annot.as_reference().unwrap())?;
            assert_eq!(annot.get_reference("P"), Some(new_page));
            if annot.get_name("Subtype") == Some("Link") {
                assert_eq!(annot.get("Dest"), Some(&fit(new_page)));
            }
            subtypes.push(annot.get_name("Subtype").unwrap_or_default().to_string());
        }
        subtypes.sort();
        assert_eq!(subtypes, vec!["Link", "Text"]);
        Ok(())
    }

    #[test]
    fn test_links_resolved_across_the_batch() -> PDFGraphResult<()> {
        let mut source = open_source(linked_source())?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let outcome = copy_pages(&mut source, &[3, 4, 5], &mut dest, &mut ctx)?;
        assert!(!outcome.notices.contains(NoticeKind::DanglingDestinationDropped));
        let annots = dest.dictionary(outcome.pages[0])?.get_array("Annots").cloned().unwrap_or_default();
        assert_eq!(annots.len(), 4);

        let mut goto_target = None;
        for annot in &annots {
            let annot = dest.dictionary(annot.as_reference().unwrap())?;
            if let Some(action) = annot.get_dictionary("A") {
                goto_target = action.get("D").cloned();
            }
        }
        assert_eq!(goto_target, Some(fit(outcome.pages[2])));
        Ok(())
    }

    #[test]
    fn test_page_attributes_inherited_and_parent_replaced() -> PDFGraphResult<()> {
        let mut source = open_source(source_with_pages(2))?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let outcome = copy_pages(&mut source, &[2], &mut dest, &mut ctx)?;
        let page = dest.dictionary(outcome.pages[0])?;
        assert!(page.get("MediaBox").is_some());
        assert_eq!(page.get_reference("Parent"), dest.catalog()?.get_reference("Pages"));
        assert_eq!(ctx.translate(source.id(), source_page(2)), Some(outcome.pages[0]));
        Ok(())
    }

    #[test]
    fn test_page_out_of_range() -> PDFGraphResult<()> {
        let mut source = open_source(source_with_pages(2))?;
        let (mut dest, _buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let err = copy_pages(&mut source, &[3], &mut dest, &mut ctx).unwrap_err();
        assert!(err.is_source_data_error());
        Ok(())
    }

    #[test]
    fn test_named_destinations_transferred_and_shared() -> PDFGraphResult<()> {
        let mut source = source_with_pages(2);
        let mut dests = Dictionary::new();
        dests.set("chapter", fit(source_page(1)));
        let dests = source.push(dests);
        let link = source.push(link_to(PDFValue::name("chapter")));
        let mut catalog = Dictionary::typed("Catalog");
        catalog.set_reference("Pages", ObjectId::new(2, 0));
        catalog.set_reference("Dests", dests);
        source.replace(ObjectId::new(1, 0), catalog);
        let mut page = Dictionary::typed("Page");
        page.set_reference("Parent", ObjectId::new(2, 0));
        page.set("Annots", vec![PDFValue::Reference(link)]);
        source.replace(source_page(1), page);

        let mut source = open_source(source)?;
        let (mut dest, buffer) = new_document()?;
        let mut ctx = CopyContext::new();

        let first = copy_pages(&mut source, &[1], &mut dest, &mut ctx)?;
        assert_eq!(dest.named_destination(b"chapter")?, Some(fit(first.pages[0])));
        let annots = dest.dictionary(first.pages[0])?.get_array("Annots").cloned().unwrap_or_default();
        let copied_link = dest.dictionary(annots[0].as_reference().unwrap())?;
        assert_eq!(copied_link.get("Dest"), Some(&PDFValue::name("chapter")));

        let second = copy_pages(&mut source, &[1], &mut dest, &mut ctx)?;
        assert!(second.notices.contains(NoticeKind::NamedDestinationShared));
        assert_eq!(dest.named_destination(b"chapter")?, Some(fit(first.pages[0])));

        // a name-typed /Dest is only looked up in the catalog's /Dests
        dest.close()?;
        let output = buffer.text();
        let page = first.pages[0];
        assert!(output.contains("/Dests "));
        assert!(output.contains(&format!("<</chapter [{} {} R /Fit]>>", page.number, page.generation)));
        assert!(!output.contains("(chapter)"));
        Ok(())
    }
}
