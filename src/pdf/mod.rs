//! PDF object graph: values, cross-reference table, documents and output

mod object;
mod dict;
mod stream;
mod xref;
pub mod reader;
pub mod visitor;
pub mod tree;
pub mod document;
pub mod writer;

pub use object::{ObjectId, PDFString, PDFValue};
pub use dict::Dictionary;
pub use stream::Stream;
pub use xref::{IndirectSlot, SlotState, XRefTable, MAX_GENERATION};
pub use reader::{MemorySource, ObjectLoader, XRefBootstrap, XRefEntry, XRefEntryKind};
pub use visitor::{walk, FollowAll, ObjectResolver, Visitor, Walk};
pub use tree::{build_tree, flatten_tree, TreeKey};
pub use document::{DocumentId, LifecycleState, PDFDocument};
pub use writer::{Encryptor, ObjectSink, PDFWriter, XRefRow, XRefRowKind};
