//! Recoverable inconsistencies
//!
//! Operations that continue past a degraded-but-valid situation record a
//! notice here. Notices are counted per kind and logged once per kind when
//! the operation finishes, so a merge of a thousand colliding layers produces
//! one warning, not a thousand.

use std::collections::BTreeMap;
use std::fmt;
use log::warn;

/// Kind of recoverable inconsistency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NoticeKind {
    /// An optional-content group was renamed because its name was taken
    OcgNameCollision,
    /// A named destination already existed in the destination document
    NamedDestinationShared,
    /// A copy reached a catalog dictionary, which is never duplicated
    CatalogCopySkipped,
    /// A reference inside a copied structure could not be resolved
    UnresolvedReference,
    /// A link annotation or outline item pointed at a page that was not copied
    DanglingDestinationDropped,
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NoticeKind::OcgNameCollision => "optional content group names collided and were renamed",
            NoticeKind::NamedDestinationShared => "named destinations with the same name were shared",
            NoticeKind::CatalogCopySkipped => "catalog dictionaries were replaced by null while copying",
            NoticeKind::UnresolvedReference => "unresolvable references were copied as null",
            NoticeKind::DanglingDestinationDropped => "links or outlines to pages outside the copied range were dropped",
        };
        f.write_str(text)
    }
}

/// Accumulated notices of one operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notices {
    counts: BTreeMap<NoticeKind, usize>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: NoticeKind) {
        *self.counts.entry(kind).or_insert(0) += 1;
    }

    pub fn count(&self, kind: NoticeKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn contains(&self, kind: NoticeKind) -> bool {
        self.count(kind) > 0
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn kinds(&self) -> impl Iterator<Item = NoticeKind> + '_ {
        self.counts.keys().copied()
    }

    pub fn merge(&mut self, other: &Notices) {
        for (kind, count) in &other.counts {
            *self.counts.entry(*kind).or_insert(0) += count;
        }
    }

    /// Emit one warning per kind. Dropped dangling destinations are expected
    /// with partial page ranges and are not logged.
    pub fn log_summary(&self, operation: &str) {
        for (kind, count) in &self.counts {
            if *kind == NoticeKind::DanglingDestinationDropped {
                continue;
            }
            warn!("{}: {} ({} occurrence(s))", operation, kind, count);
        }
    }
}
