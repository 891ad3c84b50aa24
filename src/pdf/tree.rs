//! Name trees and number trees
//!
//! Both are flattened into ordered maps when a document needs to edit them
//! and rebuilt into canonical balanced form when the document is closed.

use std::collections::{BTreeMap, HashSet};
use log::warn;
use crate::error::{PDFGraphError, PDFGraphResult};
use super::visitor::ObjectResolver;
use super::{Dictionary, ObjectId, PDFString, PDFValue};

/// Maximum number of entries (or kids) stored in one tree node
pub const NODE_SIZE: usize = 40;

/// Key type of a tree: byte strings for name trees, integers for number trees
pub trait TreeKey: Ord + Clone {
    /// Array entry holding the key/value pairs (`Names` or `Nums`)
    const ENTRIES: &'static str;

    fn from_value(value: &PDFValue) -> Option<Self>;
    fn to_value(&self) -> PDFValue;

    /// Called when a key has no value after it
    fn dangling_key(key: &Self) -> PDFGraphResult<()>;
}

impl TreeKey for Vec<u8> {
    const ENTRIES: &'static str = "Names";

    fn from_value(value: &PDFValue) -> Option<Self> {
        match value {
            PDFValue::String(s) => Some(s.as_bytes().to_vec()),
            PDFValue::Name(name) => Some(name.as_bytes().to_vec()),
            _ => None,
        }
    }

    fn to_value(&self) -> PDFValue {
        PDFValue::String(PDFString::new(self.clone()))
    }

    fn dangling_key(key: &Self) -> PDFGraphResult<()> {
        warn!("Name tree key {:?} has no value, ignoring it", String::from_utf8_lossy(key));
        Ok(())
    }
}

impl TreeKey for i64 {
    const ENTRIES: &'static str = "Nums";

    fn from_value(value: &PDFValue) -> Option<Self> {
        value.as_integer()
    }

    fn to_value(&self) -> PDFValue {
        PDFValue::from(*self)
    }

    fn dangling_key(key: &Self) -> PDFGraphResult<()> {
        Err(PDFGraphError::MalformedNumberTree(format!("key {} has no value", key)))
    }
}

/// Flatten a name tree (`Vec<u8>` keys) or number tree (`i64` keys)
pub fn flatten_tree<K, R>(resolver: &mut R, root: &PDFValue) -> PDFGraphResult<BTreeMap<K, PDFValue>>
where
    K: TreeKey,
    R: ObjectResolver + ?Sized,
{
    let mut entries = BTreeMap::new();
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut pending = vec![root.clone()];

    while let Some(node) = pending.pop() {
        let dict = match node {
            PDFValue::Reference(id) => {
                if !visited.insert(id) {
                    warn!("Tree node {} visited twice, skipping", id);
                    continue;
                }
                match resolver.resolve_object(id)?.and_then(PDFValue::as_dictionary) {
                    Some(dict) => dict.clone(),
                    None => continue,
                }
            }
            PDFValue::Dictionary(dict) => dict,
            other => {
                warn!("Tree node is a {}, skipping", other.type_name());
                continue;
            }
        };

        if let Some(pairs) = dict.get_array(K::ENTRIES) {
            let mut iter = pairs.iter();
            while let Some(key_value) = iter.next() {
                let key = match K::from_value(key_value) {
                    Some(key) => key,
                    None => {
                        warn!("Unexpected {} tree key, skipping entry", key_value.type_name());
                        iter.next();
                        continue;
                    }
                };
                match iter.next() {
                    Some(value) => {
                        entries.insert(key, value.clone());
                    }
                    None => K::dangling_key(&key)?,
                }
            }
        }
        if let Some(kids) = dict.get_array("Kids") {
            pending.extend(kids.iter().rev().cloned());
        }
    }
    Ok(entries)
}

/// Build a balanced tree from `entries`
///
/// Non-root nodes are stored through `allocate`; the root dictionary is
/// returned so the caller decides where it lives.
pub fn build_tree<K, F>(entries: &BTreeMap<K, PDFValue>, mut allocate: F) -> PDFGraphResult<Dictionary>
where
    K: TreeKey,
    F: FnMut(Dictionary) -> PDFGraphResult<ObjectId>,
{
    let pairs: Vec<(&K, &PDFValue)> = entries.iter().collect();
    if pairs.len() <= NODE_SIZE {
        return Ok(leaf(&pairs, false));
    }

    // (first key, last key, node id)
    let mut level: Vec<(K, K, ObjectId)> = Vec::new();
    for chunk in pairs.chunks(NODE_SIZE) {
        let first = chunk[0].0.clone();
        let last = chunk[chunk.len() - 1].0.clone();
        level.push((first, last, allocate(leaf(chunk, true))?));
    }
    while level.len() > NODE_SIZE {
        let mut next = Vec::new();
        for chunk in level.chunks(NODE_SIZE) {
            let first = chunk[0].0.clone();
            let last = chunk[chunk.len() - 1].1.clone();
            next.push((first, last, allocate(intermediate(chunk, true))?));
        }
        level = next;
    }
    Ok(intermediate(&level, false))
}

fn leaf<K: TreeKey>(pairs: &[(&K, &PDFValue)], with_limits: bool) -> Dictionary {
    let mut items = Vec::with_capacity(pairs.len() * 2);
    for (key, value) in pairs {
        items.push(key.to_value());
        items.push((*value).clone());
    }
    let mut node = Dictionary::new();
    node.set(K::ENTRIES, items);
    if with_limits {
        if let (Some(first), Some(last)) = (pairs.first(), pairs.last()) {
            node.set("Limits", vec![first.0.to_value(), last.0.to_value()]);
        }
    }
    node
}

fn intermediate<K: TreeKey>(kids: &[(K, K, ObjectId)], with_limits: bool) -> Dictionary {
    let mut node = Dictionary::new();
    node.set("Kids", kids.iter().map(|(_, _, id)| PDFValue::Reference(*id)).collect::<Vec<_>>());
    if with_limits {
        if let (Some(first), Some(last)) = (kids.first(), kids.last()) {
            node.set("Limits", vec![first.0.to_value(), last.1.to_value()]);
        }
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::XRefTable;
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn store(table: &mut XRefTable, dict: Dictionary) -> PDFGraphResult<ObjectId> {
        let id = table.allocate();
        table.set_value(id, dict.into())?;
        Ok(id)
    }

    #[test]
    fn test_name_tree_roundtrip_across_levels() -> PDFGraphResult<()> {
        let mut table = XRefTable::new();
        let entries: BTreeMap<Vec<u8>, PDFValue> = (0..2000)
            .map(|i| (format!("dest{:05}", i).into_bytes(), PDFValue::from(i as i64)))
            .collect();

        let root = build_tree(&entries, |dict| store(&mut table, dict))?;
        assert!(root.get("Limits").is_none());
        assert!(root.get_array("Kids").map_or(0, Vec::len) <= NODE_SIZE);

        let flattened: BTreeMap<Vec<u8>, PDFValue> = flatten_tree(&mut table, &root.into())?;
        assert_eq!(flattened, entries);
        Ok(())
    }

    #[test]
    fn test_small_tree_is_single_leaf() -> PDFGraphResult<()> {
        let entries: BTreeMap<i64, PDFValue> = [(0, PDFValue::Null), (4, PDFValue::Null)].into_iter().collect();
        let root = build_tree(&entries, |_| Err(PDFGraphError::xref("no allocation expected")))?;
        assert_eq!(root.get_array("Nums").map(Vec::len), Some(4));
        Ok(())
    }

    #[test]
    fn test_number_tree_dangling_key_is_error() {
        let mut table = XRefTable::new();
        let mut node = Dictionary::new();
        node.set("Nums", vec![PDFValue::from(0i64), PDFValue::Null, PDFValue::from(3i64)]);
        let result: PDFGraphResult<BTreeMap<i64, PDFValue>> = flatten_tree(&mut table, &node.into());
        assert!(matches!(result, Err(PDFGraphError::MalformedNumberTree(_))));
    }

    #[test]
    fn test_name_tree_dangling_key_is_ignored() -> PDFGraphResult<()> {
        let mut table = XRefTable::new();
        let mut node = Dictionary::new();
        node.set("Names", vec![PDFValue::string("a"), PDFValue::Null, PDFValue::string("b")]);
        let flattened: BTreeMap<Vec<u8>, PDFValue> = flatten_tree(&mut table, &node.into())?;
        assert_eq!(flattened.len(), 1);
        Ok(())
    }

    #[test]
    fn test_cyclic_kids_terminate() -> PDFGraphResult<()> {
        let mut table = XRefTable::new();
        let id = table.allocate();
        let mut node = Dictionary::new();
        node.set("Kids", vec![PDFValue::Reference(id)]);
        node.set("Names", vec![PDFValue::string("x"), PDFValue::from(1i64)]);
        table.set_value(id, node.into())?;

        let flattened: BTreeMap<Vec<u8>, PDFValue> = flatten_tree(&mut table, &PDFValue::Reference(id))?;
        assert_eq!(flattened.len(), 1);
        Ok(())
    }
}
