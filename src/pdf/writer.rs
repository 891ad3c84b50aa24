//! Serializer: turns flushed objects into bytes and writes the final
//! cross-reference section
//!
//! The document decides *what* gets flushed and in which order. This module
//! only knows how to lay bytes out: object framing, optional Flate
//! compression of unfiltered streams, the optional encryption seam, and the
//! xref table or xref stream plus trailer.

use std::io::{self, Write};
use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, trace};
use crate::error::{PDFGraphError, PDFGraphResult};
use super::{Dictionary, ObjectId, PDFString, PDFValue, Stream};

const BINARY_MARKER: &[u8] = b"%\xE2\xE3\xCF\xD3\n";

/// Receives objects as they are flushed
pub trait ObjectSink {
    /// Serialize one object and return the byte offset it starts at
    fn write_object(&mut self, id: ObjectId, value: &PDFValue, compress: bool, encrypt: bool) -> PDFGraphResult<u64>;
}

/// Per-object transform applied to strings and stream payloads
///
/// Key derivation and ciphers live outside the core; the writer only hands
/// over the object id and the bytes.
pub trait Encryptor {
    fn encrypt(&self, id: ObjectId, data: &[u8]) -> Vec<u8>;
}

/// One row of an xref section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XRefRow {
    pub number: u32,
    pub generation: u16,
    pub kind: XRefRowKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefRowKind {
    InUse { offset: u64 },
    Free { next: u32 },
}

struct CountingWriter<W> {
    inner: W,
    position: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Byte-level PDF writer
pub struct PDFWriter<W: Write> {
    out: CountingWriter<W>,
    compression_level: u32,
    encryptor: Option<Box<dyn Encryptor>>,
}

impl<W: Write> PDFWriter<W> {
    /// Create a writer positioned at offset 0
    pub fn new(inner: W, compression_level: u32) -> Self {
        Self {
            out: CountingWriter { inner, position: 0 },
            compression_level,
            encryptor: None,
        }
    }

    pub fn set_encryptor(&mut self, encryptor: Box<dyn Encryptor>) {
        self.encryptor = Some(encryptor);
    }

    /// Current byte offset
    pub fn position(&self) -> u64 {
        self.out.position
    }

    /// Write the file header
    pub fn write_header(&mut self, version: &str) -> PDFGraphResult<()> {
        write!(self.out, "%PDF-{}\n", version)?;
        self.out.write_all(BINARY_MARKER)?;
        Ok(())
    }

    /// Copy bytes through unchanged (the original file in append mode)
    pub fn write_raw(&mut self, bytes: &[u8]) -> PDFGraphResult<()> {
        self.out.write_all(bytes)?;
        if !bytes.is_empty() && !bytes.ends_with(b"\n") {
            self.out.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Write a classic cross-reference table, trailer and `startxref`
    pub fn write_xref_table(&mut self, rows: &[XRefRow], trailer: &Dictionary) -> PDFGraphResult<u64> {
        let start = self.position();
        debug!("Writing xref table with {} rows at {}", rows.len(), start);
        let mut buffer = Vec::new();
        buffer.extend_from_slice(b"xref\n");
        for section in subsections(rows) {
            buffer.extend_from_slice(format!("{} {}\n", section[0].number, section.len()).as_bytes());
            for row in section {
                let line = match row.kind {
                    XRefRowKind::InUse { offset } => format!("{:010} {:05} n \n", offset, row.generation),
                    XRefRowKind::Free { next } => format!("{:010} {:05} f \n", next, row.generation),
                };
                buffer.extend_from_slice(line.as_bytes());
            }
        }
        buffer.extend_from_slice(b"trailer\n");
        trailer.write_to(&mut buffer);
        buffer.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", start).as_bytes());
        self.out.write_all(&buffer)?;
        Ok(start)
    }

    /// Write a cross-reference stream object under `id`, then `startxref`
    ///
    /// The stream's own row is added here since its offset is only known now.
    pub fn write_xref_stream(&mut self, id: ObjectId, rows: &[XRefRow], trailer: &Dictionary) -> PDFGraphResult<u64> {
        let start = self.position();
        debug!("Writing xref stream {} with {} rows at {}", id, rows.len() + 1, start);

        let mut all_rows = rows.to_vec();
        all_rows.push(XRefRow {
            number: id.number,
            generation: id.generation,
            kind: XRefRowKind::InUse { offset: start },
        });
        all_rows.sort_by_key(|row| row.number);

        let mut data = Vec::with_capacity(all_rows.len() * 7);
        let mut index = Vec::new();
        for section in subsections(&all_rows) {
            index.push(PDFValue::from(section[0].number as i64));
            index.push(PDFValue::from(section.len() as i64));
            for row in section {
                match row.kind {
                    XRefRowKind::InUse { offset } => {
                        // the offset field is 4 bytes wide (/W [1 4 2])
                        let offset = u32::try_from(offset).map_err(|_| {
                            PDFGraphError::xref(format!("offset {} of {} does not fit an xref stream row", offset, row.number))
                        })?;
                        data.write_u8(1)?;
                        data.write_u32::<BigEndian>(offset)?;
                    }
                    XRefRowKind::Free { next } => {
                        data.write_u8(0)?;
                        data.write_u32::<BigEndian>(next)?;
                    }
                }
                data.write_u16::<BigEndian>(row.generation)?;
            }
        }

        let mut dict = trailer.clone();
        dict.set("Type", PDFValue::name("XRef"));
        dict.set("W", vec![PDFValue::from(1i64), PDFValue::from(4i64), PDFValue::from(2i64)]);
        dict.set("Index", index);
        let mut stream = Stream::new(dict, data);
        stream.compress(self.compression_level)?;

        let mut buffer = Vec::new();
        frame_object(&mut buffer, id, &PDFValue::Stream(stream));
        buffer.extend_from_slice(format!("startxref\n{}\n%%EOF\n", start).as_bytes());
        self.out.write_all(&buffer)?;
        Ok(start)
    }

    pub fn flush(&mut self) -> PDFGraphResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> ObjectSink for PDFWriter<W> {
    fn write_object(&mut self, id: ObjectId, value: &PDFValue, compress: bool, encrypt: bool) -> PDFGraphResult<u64> {
        let offset = self.position();
        let mut prepared = None;
        if compress {
            if let PDFValue::Stream(stream) = value {
                if !stream.is_filtered() {
                    let mut stream = stream.clone();
                    stream.compress(self.compression_level)?;
                    prepared = Some(PDFValue::Stream(stream));
                }
            }
        }
        if encrypt {
            if let Some(encryptor) = &self.encryptor {
                let source = prepared.as_ref().unwrap_or(value);
                prepared = Some(encrypt_value(source, id, encryptor.as_ref()));
            }
        }

        let mut buffer = Vec::new();
        frame_object(&mut buffer, id, prepared.as_ref().unwrap_or(value));
        self.out.write_all(&buffer)?;
        trace!("Wrote {} at offset {}", id, offset);
        Ok(offset)
    }
}

fn frame_object(buffer: &mut Vec<u8>, id: ObjectId, value: &PDFValue) {
    buffer.extend_from_slice(format!("{} {} obj\n", id.number, id.generation).as_bytes());
    value.write_to(buffer);
    buffer.extend_from_slice(b"\nendobj\n");
}

fn encrypt_value(value: &PDFValue, id: ObjectId, encryptor: &dyn Encryptor) -> PDFValue {
    match value {
        PDFValue::String(s) => {
            let encrypted = PDFString::hex(encryptor.encrypt(id, s.as_bytes()));
            PDFValue::String(encrypted)
        }
        PDFValue::Array(items) => PDFValue::Array(items.iter().map(|v| encrypt_value(v, id, encryptor)).collect()),
        PDFValue::Dictionary(dict) => PDFValue::Dictionary(encrypt_dictionary(dict, id, encryptor)),
        PDFValue::Stream(stream) => {
            let dict = encrypt_dictionary(stream.dictionary(), id, encryptor);
            PDFValue::Stream(Stream::new(dict, encryptor.encrypt(id, stream.data())))
        }
        other => other.clone(),
    }
}

fn encrypt_dictionary(dict: &Dictionary, id: ObjectId, encryptor: &dyn Encryptor) -> Dictionary {
    dict.iter()
        .map(|(key, value)| (key.clone(), encrypt_value(value, id, encryptor)))
        .collect()
}

/// Split sorted rows into runs of consecutive object numbers
fn subsections(rows: &[XRefRow]) -> Vec<&[XRefRow]> {
    let mut sections = Vec::new();
    let mut start = 0;
    for i in 1..=rows.len() {
        if i == rows.len() || rows[i].number != rows[i - 1].number + 1 {
            if start < i {
                sections.push(&rows[start..i]);
            }
            start = i;
        }
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use flate2::read::ZlibDecoder;
    use crate::testing::SharedBuffer;
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn buffered() -> (PDFWriter<SharedBuffer>, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (PDFWriter::new(buffer.clone(), 6), buffer)
    }

    #[test]
    fn test_object_framing_and_offsets() -> PDFGraphResult<()> {
        let (mut writer, buffer) = buffered();
        writer.write_header("1.7")?;
        let header_len = writer.position();

        let offset = writer.write_object(ObjectId::new(1, 0), &Dictionary::typed("Catalog").into(), true, false)?;
        assert_eq!(offset, header_len);

        let output = buffer.text();
        assert!(output.starts_with("%PDF-1.7\n"));
        assert!(output.ends_with("1 0 obj\n<</Type /Catalog>>\nendobj\n"));
        Ok(())
    }

    #[test]
    fn test_xref_table_layout() -> PDFGraphResult<()> {
        let (mut writer, buffer) = buffered();
        let rows = [
            XRefRow { number: 0, generation: 65535, kind: XRefRowKind::Free { next: 3 } },
            XRefRow { number: 1, generation: 0, kind: XRefRowKind::InUse { offset: 15 } },
            XRefRow { number: 3, generation: 1, kind: XRefRowKind::Free { next: 0 } },
        ];
        let mut trailer = Dictionary::new();
        trailer.set("Size", 4i64);
        writer.write_xref_table(&rows, &trailer)?;

        let expected = "xref\n0 2\n0000000003 65535 f \n0000000015 00000 n \n3 1\n0000000000 00001 f \n\
                        trailer\n<</Size 4>>\nstartxref\n0\n%%EOF\n";
        assert_eq!(buffer.text(), expected);
        Ok(())
    }

    #[test]
    fn test_xref_stream_rows() -> PDFGraphResult<()> {
        let (mut writer, buffer) = buffered();
        writer.write_raw(b"%PDF-1.5\n")?;
        let rows = [XRefRow { number: 1, generation: 0, kind: XRefRowKind::InUse { offset: 9 } }];
        let start = writer.write_xref_stream(ObjectId::new(2, 0), &rows, &Dictionary::new())?;
        assert_eq!(start, 9);

        let output = buffer.bytes();
        let body = buffer.text();
        assert!(body.contains("/Index [1 2]"));
        assert!(body.contains("/Type /XRef"));

        let begin = output.windows(7).position(|w| w == b"stream\n").map(|i| i + 7).unwrap();
        let end = output.windows(10).position(|w| w == b"\nendstream").unwrap();
        let mut decoded = Vec::new();
        ZlibDecoder::new(&output[begin..end]).read_to_end(&mut decoded)?;
        assert_eq!(decoded, vec![1, 0, 0, 0, 9, 0, 0, 1, 0, 0, 0, 9, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_xref_stream_rejects_offsets_past_four_gib() {
        let (mut writer, buffer) = buffered();
        let rows = [XRefRow { number: 1, generation: 0, kind: XRefRowKind::InUse { offset: 1 << 32 } }];
        let err = writer.write_xref_stream(ObjectId::new(2, 0), &rows, &Dictionary::new()).unwrap_err();
        assert!(matches!(err, PDFGraphError::XRefError(_)));
        assert!(buffer.bytes().is_empty());
    }

    struct Xor;

    impl Encryptor for Xor {
        fn encrypt(&self, id: ObjectId, data: &[u8]) -> Vec<u8> {
            data.iter().map(|b| b ^ id.number as u8).collect()
        }
    }

    #[test]
    fn test_encryption_seam_transforms_strings() -> PDFGraphResult<()> {
        let (mut writer, buffer) = buffered();
        writer.set_encryptor(Box::new(Xor));
        let mut dict = Dictionary::new();
        dict.set("T", PDFValue::string("A"));
        writer.write_object(ObjectId::new(1, 0), &dict.clone().into(), false, true)?;
        writer.write_object(ObjectId::new(2, 0), &dict.into(), false, false)?;

        let output = buffer.text();
        assert!(output.contains("1 0 obj\n<</T <40>>>"));
        assert!(output.contains("2 0 obj\n<</T (A)>>"));
        Ok(())
    }
}
