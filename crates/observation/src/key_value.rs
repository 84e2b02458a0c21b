//! Classification key/value pairs
//!
//! [`KeyValues`] is an ordered, key-unique set. Merging is last-write-wins
//! per key, which is the combination rule for tags coming from several
//! providers.

use std::collections::BTreeMap;
use std::fmt;

/// A single classification pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyValue {
    key: String,
    value: String,
}

impl KeyValue {
    /// Create a new pair
    pub fn of(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }

    /// Tag key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Tag value
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}='{}'", self.key, self.value)
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for KeyValue {
    fn from((key, value): (K, V)) -> Self {
        Self::of(key, value)
    }
}

/// Key-unique set of [`KeyValue`]s, iterated in key order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues {
    entries: BTreeMap<String, String>,
}

impl KeyValues {
    /// Empty set
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from pairs; a repeated key keeps the last value
    pub fn of<I, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<KeyValue>,
    {
        let mut values = Self::empty();
        for pair in pairs {
            values.insert(pair.into());
        }
        values
    }

    /// Insert or replace a pair, returning the replaced value
    pub fn insert(&mut self, key_value: KeyValue) -> Option<String> {
        self.entries.insert(key_value.key, key_value.value)
    }

    /// Merge `other` into `self`; keys present in both take `other`'s value
    pub fn merge(&mut self, other: KeyValues) {
        self.entries.extend(other.entries);
    }

    /// Consuming variant of [`KeyValues::merge`]
    #[must_use]
    pub fn and(mut self, other: KeyValues) -> Self {
        self.merge(other);
        self
    }

    /// Value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Whether a tag with `key` exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no tags
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Owned pairs in key order
    pub fn to_vec(&self) -> Vec<KeyValue> {
        self.iter().map(|(k, v)| KeyValue::of(k, v)).collect()
    }
}

impl fmt::Display for KeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (index, (key, value)) in self.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}='{value}'")?;
        }
        write!(f, "]")
    }
}

impl<T: Into<KeyValue>> FromIterator<T> for KeyValues {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::of(iter)
    }
}

impl<T: Into<KeyValue>> Extend<T> for KeyValues {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for pair in iter {
            self.insert(pair.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_value_wins_for_repeated_key() {
        let values = KeyValues::of([("type", "INCOME_TAX"), ("type", "VAT")]);
        assert_eq!(values.len(), 1);
        assert_eq!(values.get("type"), Some("VAT"));
    }

    #[test]
    fn and_overrides_and_extends() {
        let defaults = KeyValues::of([("type", "INCOME_TAX"), ("region", "eu")]);
        let custom = KeyValues::of([("region", "us"), ("extra", "value")]);

        let combined = defaults.and(custom);

        assert_eq!(
            combined.to_vec(),
            vec![
                KeyValue::of("extra", "value"),
                KeyValue::of("region", "us"),
                KeyValue::of("type", "INCOME_TAX"),
            ]
        );
    }

    #[test]
    fn display_lists_pairs_in_key_order() {
        let values: KeyValues = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(values.to_string(), "[a='1', b='2']");
        assert_eq!(KeyValue::of("a", "1").to_string(), "a='1'");
    }
}
