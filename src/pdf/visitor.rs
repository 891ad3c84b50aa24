//! Generic traversal of the object graph
//!
//! `walk` visits every value reachable from a starting value, following
//! indirect references at most once each. Callers plug behavior in through
//! the hooks of [`Visitor`] instead of writing their own recursion.

use std::collections::HashSet;
use crate::error::PDFGraphResult;
use super::{Dictionary, ObjectId, PDFValue, Stream, XRefTable};

/// Anything that can hand out the value stored under an id
pub trait ObjectResolver {
    fn resolve_object(&mut self, id: ObjectId) -> PDFGraphResult<Option<&PDFValue>>;
}

impl ObjectResolver for XRefTable {
    fn resolve_object(&mut self, id: ObjectId) -> PDFGraphResult<Option<&PDFValue>> {
        Ok(self.get(id))
    }
}

/// Whether to look inside a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Descend,
    Skip,
}

/// Hook points of a graph traversal
///
/// `owner` is the id of the indirect object whose top-level value is being
/// visited, or `None` for values nested inside another container.
pub trait Visitor {
    fn on_dictionary(&mut self, _owner: Option<ObjectId>, _dict: &Dictionary) -> Walk {
        Walk::Descend
    }

    fn on_array(&mut self, _owner: Option<ObjectId>, _array: &[PDFValue]) -> Walk {
        Walk::Descend
    }

    fn on_stream(&mut self, _owner: Option<ObjectId>, _stream: &Stream) -> Walk {
        Walk::Descend
    }

    /// Decide whether to follow a reference found under dictionary key `key`
    fn follow(&mut self, _key: Option<&str>, _target: ObjectId) -> bool {
        true
    }
}

/// Visit everything reachable from `start`
///
/// Returns the ids of the indirect objects visited, in visiting order.
/// References that cannot be resolved are still reported as visited.
pub fn walk<R, V>(resolver: &mut R, start: &PDFValue, visitor: &mut V) -> PDFGraphResult<Vec<ObjectId>>
where
    R: ObjectResolver + ?Sized,
    V: Visitor + ?Sized,
{
    let mut pending = Vec::new();
    let mut visited = HashSet::new();
    let mut order = Vec::new();

    scan(None, None, start, visitor, &mut pending);
    pending.reverse();

    while let Some(id) = pending.pop() {
        if !visited.insert(id) {
            continue;
        }
        order.push(id);
        let mut found = Vec::new();
        if let Some(value) = resolver.resolve_object(id)? {
            scan(Some(id), None, value, visitor, &mut found);
        }
        // Keep depth-first, document order.
        pending.extend(found.into_iter().rev());
    }
    Ok(order)
}

fn scan<V: Visitor + ?Sized>(
    owner: Option<ObjectId>,
    key: Option<&str>,
    value: &PDFValue,
    visitor: &mut V,
    out: &mut Vec<ObjectId>,
) {
    match value {
        PDFValue::Reference(id) => {
            if visitor.follow(key, *id) {
                out.push(*id);
            }
        }
        PDFValue::Array(items) => {
            if visitor.on_array(owner, items) == Walk::Descend {
                for item in items {
                    scan(None, key, item, visitor, out);
                }
            }
        }
        PDFValue::Dictionary(dict) => {
            if visitor.on_dictionary(owner, dict) == Walk::Descend {
                scan_entries(dict, visitor, out);
            }
        }
        PDFValue::Stream(stream) => {
            if visitor.on_stream(owner, stream) == Walk::Descend {
                scan_entries(stream.dictionary(), visitor, out);
            }
        }
        _ => {}
    }
}

fn scan_entries<V: Visitor + ?Sized>(dict: &Dictionary, visitor: &mut V, out: &mut Vec<ObjectId>) {
    for (key, value) in dict {
        scan(None, Some(key.as_str()), value, visitor, out);
    }
}

/// Visitor that follows every reference
#[derive(Debug, Default)]
pub struct FollowAll;

impl Visitor for FollowAll {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cyclic_table() -> (XRefTable, ObjectId, ObjectId) {
        let mut table = XRefTable::new();
        let a = table.allocate();
        let b = table.allocate();
        let mut dict_a = Dictionary::typed("Node");
        dict_a.set_reference("Next", b);
        let mut dict_b = Dictionary::typed("Node");
        dict_b.set_reference("Next", a);
        dict_b.set_reference("Parent", a);
        table.set_value(a, dict_a.into()).unwrap();
        table.set_value(b, dict_b.into()).unwrap();
        (table, a, b)
    }

    #[test]
    fn test_walk_terminates_on_cycles() -> PDFGraphResult<()> {
        let (mut table, a, b) = cyclic_table();
        let order = walk(&mut table, &PDFValue::Reference(a), &mut FollowAll)?;
        assert_eq!(order, vec![a, b]);
        Ok(())
    }

    struct NoParents {
        owners: Vec<ObjectId>,
    }

    impl Visitor for NoParents {
        fn on_dictionary(&mut self, owner: Option<ObjectId>, _dict: &Dictionary) -> Walk {
            self.owners.extend(owner);
            Walk::Descend
        }

        fn follow(&mut self, key: Option<&str>, _target: ObjectId) -> bool {
            key != Some("Next")
        }
    }

    #[test]
    fn test_follow_hook_prunes_edges() -> PDFGraphResult<()> {
        let (mut table, a, b) = cyclic_table();
        let mut visitor = NoParents { owners: Vec::new() };
        let order = walk(&mut table, &PDFValue::Reference(b), &mut visitor)?;
        assert_eq!(order, vec![b, a]);
        assert_eq!(visitor.owners, vec![b, a]);
        Ok(())
    }

    #[test]
    fn test_unresolvable_reference_is_reported() -> PDFGraphResult<()> {
        let mut table = XRefTable::new();
        let start = PDFValue::Array(vec![PDFValue::Reference(ObjectId::new(40, 0))]);
        let order = walk(&mut table, &start, &mut FollowAll)?;
        assert_eq!(order, vec![ObjectId::new(40, 0)]);
        Ok(())
    }
}
