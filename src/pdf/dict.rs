//! PDF dictionary implementation

use std::collections::btree_map::{self, BTreeMap};
use super::object::write_name;
use super::{ObjectId, PDFValue};

/// PDF dictionary object
///
/// Keys are stored without the leading slash. Iteration order is the key
/// order, which keeps serialized output stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    entries: BTreeMap<String, PDFValue>,
}

impl Dictionary {
    /// Create new dictionary
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Create a dictionary with a `/Type` entry
    pub fn typed(type_name: &str) -> Self {
        let mut dict = Self::new();
        dict.set("Type", PDFValue::name(type_name));
        dict
    }

    /// Get value by key
    pub fn get(&self, key: &str) -> Option<&PDFValue> {
        self.entries.get(key)
    }

    /// Get mutable value by key
    pub fn get_mut(&mut self, key: &str) -> Option<&mut PDFValue> {
        self.entries.get_mut(key)
    }

    /// Get integer value
    pub fn get_integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(PDFValue::as_integer)
    }

    /// Get name value
    pub fn get_name(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PDFValue::as_name)
    }

    /// Get reference value
    pub fn get_reference(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(PDFValue::as_reference)
    }

    /// Get inline array value
    pub fn get_array(&self, key: &str) -> Option<&Vec<PDFValue>> {
        self.get(key).and_then(PDFValue::as_array)
    }

    /// Get inline dictionary value
    pub fn get_dictionary(&self, key: &str) -> Option<&Dictionary> {
        match self.get(key) {
            Some(PDFValue::Dictionary(dict)) => Some(dict),
            _ => None,
        }
    }

    /// Value of `/Type`
    pub fn type_name(&self) -> Option<&str> {
        self.get_name("Type")
    }

    /// Whether `/Type` equals `type_name`
    pub fn has_type(&self, type_name: &str) -> bool {
        self.type_name() == Some(type_name)
    }

    /// Set value
    pub fn set(&mut self, key: &str, value: impl Into<PDFValue>) {
        self.entries.insert(key.to_string(), value.into());
    }

    /// Set reference value
    pub fn set_reference(&mut self, key: &str, id: ObjectId) {
        self.set(key, PDFValue::Reference(id));
    }

    /// Remove value
    pub fn remove(&mut self, key: &str) -> Option<PDFValue> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, PDFValue> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, String, PDFValue> {
        self.entries.iter_mut()
    }

    /// Clone of the dictionary without the listed keys
    pub fn without(&self, excluded: &[&str]) -> Dictionary {
        let entries = self
            .entries
            .iter()
            .filter(|(key, _)| !excluded.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Dictionary { entries }
    }

    /// Write dictionary to output
    pub fn write_to(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(b"<<");
        for (key, value) in &self.entries {
            write_name(output, key);
            output.push(b' ');
            value.write_to(output);
        }
        output.extend_from_slice(b">>");
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a String, &'a PDFValue);
    type IntoIter = btree_map::Iter<'a, String, PDFValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<(String, PDFValue)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (String, PDFValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_typed_getters() {
        let mut dict = Dictionary::typed("Page");
        dict.set("Rotate", 90i64);
        dict.set_reference("Parent", ObjectId::new(2, 0));
        dict.set("Kids", vec![PDFValue::Reference(ObjectId::new(5, 0))]);

        assert!(dict.has_type("Page"));
        assert_eq!(dict.get_integer("Rotate"), Some(90));
        assert_eq!(dict.get_reference("Parent"), Some(ObjectId::new(2, 0)));
        assert_eq!(dict.get_array("Kids").map(Vec::len), Some(1));
        assert_eq!(dict.get_name("Missing"), None);
    }

    #[test]
    fn test_without() {
        let mut dict = Dictionary::typed("Page");
        dict.set_reference("Parent", ObjectId::new(2, 0));
        dict.set("Annots", PDFValue::Array(Vec::new()));

        let filtered = dict.without(&["Parent", "Annots"]);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.has_type("Page"));
    }

    #[test]
    fn test_serialization_is_sorted() {
        let mut dict = Dictionary::new();
        dict.set("Size", 3i64);
        dict.set_reference("Root", ObjectId::new(1, 0));
        let mut out = Vec::new();
        dict.write_to(&mut out);
        assert_eq!(String::from_utf8_lossy(&out), "<</Root 1 0 R/Size 3>>");
    }
}
