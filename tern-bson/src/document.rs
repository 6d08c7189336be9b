//! Ordered BSON documents.

use std::fmt;

use crate::error::{Result, ValueAccessError};
use crate::oid::ObjectId;
use crate::value::Value;

/// An ordered list of key/value elements.
///
/// Insertion order is preserved. Duplicate keys are tolerated because they
/// can appear on the wire; lookups return the first match.
#[derive(Clone, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, Value)>,
}

type AccessResult<T> = std::result::Result<T, ValueAccessError>;

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty document with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Set `key`, replacing the first existing value in place or appending.
    ///
    /// Returns the replaced value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Append an element even if the key already exists.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Remove the first element under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.entries.iter(),
        }
    }

    /// Key of the first element, if any.
    pub fn first_key(&self) -> Option<&str> {
        self.entries.first().map(|(k, _)| k.as_str())
    }

    /// Int32 value under `key`, or `fallback` when missing or of another type.
    pub fn find_as_int32(&self, key: &str, fallback: i32) -> i32 {
        self.get(key).and_then(Value::as_i32).unwrap_or(fallback)
    }

    /// Boolean value under `key`, or `fallback` when missing or of another type.
    pub fn find_as_bool(&self, key: &str, fallback: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(fallback)
    }

    fn typed<'a, T>(
        &'a self,
        key: &str,
        expected: &'static str,
        f: impl FnOnce(&'a Value) -> Option<T>,
    ) -> AccessResult<T> {
        let value = self
            .get(key)
            .ok_or_else(|| ValueAccessError::NotPresent(key.to_string()))?;
        f(value).ok_or_else(|| ValueAccessError::UnexpectedType {
            key: key.to_string(),
            expected,
        })
    }

    pub fn get_str(&self, key: &str) -> AccessResult<&str> {
        self.typed(key, "a string", Value::as_str)
    }

    pub fn get_i32(&self, key: &str) -> AccessResult<i32> {
        self.typed(key, "an i32", Value::as_i32)
    }

    pub fn get_i64(&self, key: &str) -> AccessResult<i64> {
        self.typed(key, "an i64", Value::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> AccessResult<f64> {
        self.typed(key, "a double", Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> AccessResult<bool> {
        self.typed(key, "a boolean", Value::as_bool)
    }

    pub fn get_document(&self, key: &str) -> AccessResult<&Document> {
        self.typed(key, "a document", Value::as_document)
    }

    pub fn get_array(&self, key: &str) -> AccessResult<&[Value]> {
        self.typed(key, "an array", Value::as_array)
    }

    pub fn get_object_id(&self, key: &str) -> AccessResult<ObjectId> {
        self.typed(key, "an ObjectId", Value::as_object_id)
    }

    /// Encode to BSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        crate::encode::encode_document(self)
    }

    /// Decode a complete BSON document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        crate::decode::decode_document(bytes)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

/// Borrowing iterator over a document's elements.
pub struct Iter<'a> {
    inner: std::slice::Iter<'a, (String, Value)>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| (k.as_str(), v))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a str, &'a Value);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = Document::new();
        doc.extend(iter);
        doc
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for Document {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.append(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_insert_replaces_first() {
        let mut d = Document::new();
        d.append("a", 1);
        d.append("b", 2);
        d.append("a", 3);

        let old = d.insert("a", 10);
        assert_eq!(old, Some(Value::Int32(1)));
        assert_eq!(d.keys().collect::<Vec<_>>(), vec!["a", "b", "a"]);
        assert_eq!(d.get("a"), Some(&Value::Int32(10)));
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut d = doc! { "x" => 1, "y" => 2, "z" => 3 };
        assert_eq!(d.remove("y"), Some(Value::Int32(2)));
        assert_eq!(d.keys().collect::<Vec<_>>(), vec!["x", "z"]);
        assert_eq!(d.remove("missing"), None);
    }

    #[test]
    fn test_find_as_helpers() {
        let d = doc! { "limit" => 5, "big" => 5i64, "tailable" => true, "flag" => 1 };
        assert_eq!(d.find_as_int32("limit", 0), 5);
        assert_eq!(d.find_as_int32("big", 7), 7);
        assert_eq!(d.find_as_int32("missing", -1), -1);
        assert!(d.find_as_bool("tailable", false));
        assert!(!d.find_as_bool("flag", false));
    }

    #[test]
    fn test_typed_accessors() {
        let d = doc! { "name" => "tern", "n" => 3 };
        assert_eq!(d.get_str("name").unwrap(), "tern");
        assert_eq!(
            d.get_str("n").unwrap_err(),
            ValueAccessError::UnexpectedType {
                key: "n".into(),
                expected: "a string"
            }
        );
        assert_eq!(
            d.get_i32("nope").unwrap_err(),
            ValueAccessError::NotPresent("nope".into())
        );
    }

    #[test]
    fn test_from_iterator() {
        let d: Document = vec![("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(d.len(), 2);
        assert_eq!(d.first_key(), Some("a"));
    }
}
