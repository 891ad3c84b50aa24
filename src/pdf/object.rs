//! PDF value types and their serialized form

use std::fmt;
use super::{Dictionary, Stream};

/// Identity of an indirect object: object number plus generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    /// Object number
    pub number: u32,
    /// Generation number
    pub generation: u16,
}

impl ObjectId {
    /// Create a new object id
    pub const fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

impl From<(u32, u16)> for ObjectId {
    fn from((number, generation): (u32, u16)) -> Self {
        Self::new(number, generation)
    }
}

/// PDF string object
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PDFString {
    bytes: Vec<u8>,
    encoding: Option<String>,
    hex: bool,
}

impl PDFString {
    /// Create a literal string from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            encoding: None,
            hex: false,
        }
    }

    /// Create a string written in hexadecimal form
    pub fn hex(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            encoding: None,
            hex: true,
        }
    }

    /// Attach an encoding label (e.g. `PDFDocEncoding`, `UTF-16BE`)
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoding label, if one was recorded
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// Lossy text view of the bytes
    pub fn to_text(&self) -> String {
        if self.bytes.starts_with(&[0xFE, 0xFF]) {
            let units: Vec<u16> = self.bytes[2..]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            return String::from_utf16_lossy(&units);
        }
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    fn write_to(&self, output: &mut Vec<u8>) {
        if self.hex {
            output.push(b'<');
            output.extend_from_slice(hex::encode_upper(&self.bytes).as_bytes());
            output.push(b'>');
            return;
        }
        output.push(b'(');
        for &byte in &self.bytes {
            match byte {
                b'(' | b')' | b'\\' => {
                    output.push(b'\\');
                    output.push(byte);
                }
                b'\r' => output.extend_from_slice(b"\\r"),
                _ => output.push(byte),
            }
        }
        output.push(b')');
    }
}

impl From<&str> for PDFString {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes())
    }
}

/// PDF value: the tagged union every node of the object graph is made of
#[derive(Debug, Clone, PartialEq)]
pub enum PDFValue {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Numeric value
    Number(f64),
    /// Name object
    Name(String),
    /// String value (literal or hexadecimal)
    String(PDFString),
    /// Array object
    Array(Vec<PDFValue>),
    /// Dictionary object
    Dictionary(Dictionary),
    /// Stream object
    Stream(Stream),
    /// Indirect reference
    Reference(ObjectId),
}

impl PDFValue {
    /// Create a name value
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Create a literal string value from text
    pub fn string(text: &str) -> Self {
        Self::String(PDFString::from(text))
    }

    /// Short type label used in errors and logs
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::Name(_) => "name",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Dictionary(_) => "dictionary",
            Self::Stream(_) => "stream",
            Self::Reference(_) => "reference",
        }
    }

    pub fn as_reference(&self) -> Option<ObjectId> {
        match self {
            Self::Reference(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        self.as_number().map(|n| n as i64)
    }

    pub fn as_string(&self) -> Option<&PDFString> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<PDFValue>> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Dictionary view of a dictionary or of a stream's dictionary
    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            Self::Dictionary(dict) => Some(dict),
            Self::Stream(stream) => Some(stream.dictionary()),
            _ => None,
        }
    }

    /// Mutable dictionary view of a dictionary or of a stream's dictionary
    pub fn as_dictionary_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Self::Dictionary(dict) => Some(dict),
            Self::Stream(stream) => Some(stream.dictionary_mut()),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&Stream> {
        match self {
            Self::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    /// Serialize the value in PDF syntax
    pub fn write_to(&self, output: &mut Vec<u8>) {
        match self {
            Self::Null => output.extend_from_slice(b"null"),
            Self::Boolean(b) => output.extend_from_slice(if *b { b"true" } else { b"false" }),
            Self::Number(n) => output.extend_from_slice(format_number(*n).as_bytes()),
            Self::Name(name) => write_name(output, name),
            Self::String(s) => s.write_to(output),
            Self::Array(items) => {
                output.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        output.push(b' ');
                    }
                    item.write_to(output);
                }
                output.push(b']');
            }
            Self::Dictionary(dict) => dict.write_to(output),
            Self::Stream(stream) => stream.write_to(output),
            Self::Reference(id) => output.extend_from_slice(id.to_string().as_bytes()),
        }
    }
}

impl From<bool> for PDFValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for PDFValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<f64> for PDFValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<ObjectId> for PDFValue {
    fn from(id: ObjectId) -> Self {
        Self::Reference(id)
    }
}

impl From<PDFString> for PDFValue {
    fn from(value: PDFString) -> Self {
        Self::String(value)
    }
}

impl From<Dictionary> for PDFValue {
    fn from(dict: Dictionary) -> Self {
        Self::Dictionary(dict)
    }
}

impl From<Stream> for PDFValue {
    fn from(stream: Stream) -> Self {
        Self::Stream(stream)
    }
}

impl From<Vec<PDFValue>> for PDFValue {
    fn from(items: Vec<PDFValue>) -> Self {
        Self::Array(items)
    }
}

/// Format a number the way PDF writers conventionally do
pub(crate) fn format_number(n: f64) -> String {
    if !n.is_finite() {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }
    let mut text = format!("{:.6}", n);
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    if text == "-0" {
        text = "0".to_string();
    }
    text
}

/// Write a name with `#xx` escapes for delimiters and irregular bytes
pub(crate) fn write_name(output: &mut Vec<u8>, name: &str) {
    output.push(b'/');
    for &byte in name.as_bytes() {
        let delimiter = matches!(
            byte,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' | b'#'
        );
        if delimiter || !(0x21..=0x7e).contains(&byte) {
            output.extend_from_slice(format!("#{:02X}", byte).as_bytes());
        } else {
            output.push(byte);
        }
    }
}
