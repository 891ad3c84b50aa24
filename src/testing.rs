//! Fixtures shared by the unit tests

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use crate::config::{StampingMode, WriterProperties};
use crate::error::PDFGraphResult;
use crate::pdf::{Dictionary, MemorySource, ObjectId, PDFDocument, PDFValue};

/// Original bytes handed to append-mode sessions
pub const ORIGINAL_BYTES: &[u8] = b"%PDF-1.7\n% original body\n";

/// Output sink whose contents stay readable after the document owns it
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Uncompressed writer settings so assertions can read the output
pub fn plain_properties() -> WriterProperties {
    WriterProperties::default().with_compress_streams(false)
}

/// Fresh document in writing mode
pub fn new_document() -> PDFGraphResult<(PDFDocument, SharedBuffer)> {
    let buffer = SharedBuffer::default();
    let document = PDFDocument::new(buffer.clone(), plain_properties())?;
    Ok((document, buffer))
}

/// Source with a catalog (1 0), a page tree root (2 0) and `count` pages
/// numbered from 3 upwards
pub fn source_with_pages(count: usize) -> MemorySource {
    let mut source = MemorySource::new();
    let catalog = ObjectId::new(1, 0);
    let root = ObjectId::new(2, 0);
    let kids: Vec<PDFValue> = (0..count)
        .map(|i| PDFValue::Reference(ObjectId::new(3 + i as u32, 0)))
        .collect();

    let mut catalog_dict = Dictionary::typed("Catalog");
    catalog_dict.set_reference("Pages", root);
    source.insert(catalog, catalog_dict);

    let mut pages = Dictionary::typed("Pages");
    pages.set("Kids", kids.clone());
    pages.set("Count", count as i64);
    pages.set("MediaBox", vec![0i64.into(), 0i64.into(), 612i64.into(), 792i64.into()]);
    source.insert(root, pages);

    for kid in kids {
        if let PDFValue::Reference(id) = kid {
            let mut page = Dictionary::typed("Page");
            page.set_reference("Parent", root);
            source.insert(id, page);
        }
    }
    source.set_root(catalog);
    source
}

/// Id of the `n`-th page (1-based) of [`source_with_pages`]
pub fn source_page(n: u32) -> ObjectId {
    ObjectId::new(2 + n, 0)
}

pub fn open_source(source: MemorySource) -> PDFGraphResult<PDFDocument> {
    let bootstrap = source.bootstrap();
    PDFDocument::open(source, &bootstrap)
}

pub fn stamp_source(source: MemorySource, mode: StampingMode) -> PDFGraphResult<(PDFDocument, SharedBuffer)> {
    let mut source = source;
    source.set_startxref(ORIGINAL_BYTES.len() as u64);
    let bootstrap = source.bootstrap();
    let buffer = SharedBuffer::default();
    let document = PDFDocument::stamp(source, &bootstrap, ORIGINAL_BYTES, buffer.clone(), mode, plain_properties())?;
    Ok((document, buffer))
}
