//! Ordered, case-insensitive header storage.
//!
//! HTTP field names compare case-insensitively, but intermediaries are
//! expected to forward the casing they received. [`Headers`] therefore keys
//! every entry on the lowercased name while remembering the spelling from
//! the wire, and it keeps distinct names in insertion order. Repeated
//! occurrences of a name collapse into one entry whose value list grows in
//! wire order.
//!
//! The same type backs both the request header block and chunked trailers.

use std::fmt;
use std::slice;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    /// Lowercased name, the lookup key.
    lower: String,
    /// Name as it appeared on the wire.
    name: String,
    values: Vec<String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a field with this name exists, compared case-insensitively.
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Returns the first value of the named field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.find(name).and_then(|e| e.values.first()).map(String::as_str)
    }

    /// Returns every value of the named field, in wire order.
    ///
    /// An absent field yields an empty slice.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.find(name).map(|e| e.values.as_slice()).unwrap_or(&[])
    }

    /// Appends a value, creating the entry if the name is new.
    ///
    /// The stored spelling is the one from the first occurrence.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let lower = name.to_ascii_lowercase();
        match self.entries.iter_mut().find(|e| e.lower == lower) {
            Some(entry) => entry.values.push(value.into()),
            None => self.entries.push(Entry { lower, name, values: vec![value.into()] }),
        }
    }

    /// Replaces the named field with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.put(name, vec![value.into()]);
    }

    /// Replaces the named field with the given value list.
    pub fn put(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        let lower = name.to_ascii_lowercase();
        match self.entries.iter_mut().find(|e| e.lower == lower) {
            Some(entry) => {
                entry.name = name;
                entry.values = values;
            }
            None => self.entries.push(Entry { lower, name, values }),
        }
    }

    /// Number of distinct field names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(wire-case name, values)` in insertion order of distinct names.
    pub fn iter(&self) -> Iter<'_> {
        Iter { inner: self.entries.iter() }
    }

    fn find(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.lower.eq_ignore_ascii_case(name))
    }
}

pub struct Iter<'a> {
    inner: slice::Iter<'a, Entry>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a [String]);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|e| (e.name.as_str(), e.values.as_slice()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for entry in &self.entries {
            for value in &entry.values {
                if !first {
                    f.write_str(", ")?;
                }
                write!(f, "{}: {}", entry.name, value)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");

        assert!(headers.contains("content-type"));
        assert!(headers.contains("CONTENT-TYPE"));
        assert_eq!(headers.get("cOnTeNt-TyPe"), Some("text/plain"));
        assert_eq!(headers.get("content-length"), None);
    }

    #[test]
    fn repeated_names_share_one_entry() {
        let mut headers = Headers::new();
        headers.add("Via", "1.1 a");
        headers.add("Host", "example.org");
        headers.add("via", "1.1 b");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("VIA"), Some("1.1 a"));
        assert_eq!(headers.get_all("via"), &["1.1 a".to_string(), "1.1 b".to_string()]);
    }

    #[test]
    fn iteration_preserves_insertion_order_and_wire_case() {
        let mut headers = Headers::new();
        headers.add("B-Header", "2");
        headers.add("a-header", "1");
        headers.add("B-HEADER", "3");

        let collected: Vec<(&str, usize)> = headers.iter().map(|(name, values)| (name, values.len())).collect();
        assert_eq!(collected, vec![("B-Header", 2), ("a-header", 1)]);
    }

    #[test]
    fn set_replaces_all_values() {
        let mut headers = Headers::new();
        headers.add("X-Id", "1");
        headers.add("X-Id", "2");
        headers.set("x-id", "3");

        assert_eq!(headers.get_all("X-ID"), &["3".to_string()]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn get_all_on_missing_name_is_empty() {
        let headers = Headers::new();
        assert!(headers.get_all("anything").is_empty());
        assert!(headers.is_empty());
    }
}
