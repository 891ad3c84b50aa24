//! PDF stream object implementation
//!
//! Payloads are opaque: filters already applied are kept verbatim. The only
//! transform performed here is Flate compression of unfiltered payloads when
//! the writer asks for it.

use std::io::Write;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::trace;
use crate::error::{PDFGraphError, PDFGraphResult};
use super::{Dictionary, PDFValue};

/// PDF stream object
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    /// Stream dictionary
    dictionary: Dictionary,
    /// Raw (possibly filtered) stream data
    data: Vec<u8>,
}

impl Stream {
    /// Create new stream object
    pub fn new(dictionary: Dictionary, data: Vec<u8>) -> Self {
        let mut stream = Self { dictionary, data };
        stream.sync_length();
        stream
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn dictionary_mut(&mut self) -> &mut Dictionary {
        &mut self.dictionary
    }

    /// Raw stream bytes, as stored
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the raw bytes
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
        self.sync_length();
    }

    /// Names of the filters applied to the payload
    pub fn filters(&self) -> Vec<&str> {
        match self.dictionary.get("Filter") {
            Some(PDFValue::Name(name)) => vec![name.as_str()],
            Some(PDFValue::Array(items)) => items.iter().filter_map(PDFValue::as_name).collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_filtered(&self) -> bool {
        !self.filters().is_empty()
    }

    /// Flate-compress an unfiltered payload in place
    ///
    /// Returns `false` when the stream already carries a filter.
    pub fn compress(&mut self, level: u32) -> PDFGraphResult<bool> {
        if self.is_filtered() {
            return Ok(false);
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
        encoder
            .write_all(&self.data)
            .map_err(|e| PDFGraphError::CompressionError(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| PDFGraphError::CompressionError(e.to_string()))?;
        trace!("Compressed stream payload {} -> {} bytes", self.data.len(), compressed.len());
        self.dictionary.set("Filter", PDFValue::name("FlateDecode"));
        self.set_data(compressed);
        Ok(true)
    }

    fn sync_length(&mut self) {
        self.dictionary.set("Length", self.data.len() as i64);
    }

    /// Write stream to output
    pub fn write_to(&self, output: &mut Vec<u8>) {
        self.dictionary.write_to(output);
        output.extend_from_slice(b"\nstream\n");
        output.extend_from_slice(&self.data);
        output.extend_from_slice(b"\nendstream");
    }
}
