//! Label sets and their stable fingerprints.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AlertingError;

/// Label carrying the rule title on every instance.
pub const ALERTNAME: &str = "alertname";

/// Label carrying the owning rule UID on every instance.
pub const RULE_UID: &str = "__alert_rule_uid__";

/// An ordered set of label pairs.
///
/// Ordering is by key so iteration, serialization and hashing are all
/// independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// Creates an empty label set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts a label, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Adds a label and returns the set, for chained construction.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns the value of a label.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if the label is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Removes a label.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no labels are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the labels in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merges `other` into this set; keys in `other` win.
    pub fn merge(&mut self, other: &Self) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Computes the fingerprint of this label set.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        for (k, v) in &self.0 {
            hasher.update(k.as_bytes());
            hasher.update(&[0xff]);
            hasher.update(v.as_bytes());
            hasher.update(&[0xff]);
        }
        let hash = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        Fingerprint(u64::from_be_bytes(prefix))
    }

    /// Returns the underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v:?}")?;
        }
        write!(f, "}}")
    }
}

/// A deterministic 64-bit hash of a label set.
///
/// Stable across restarts and platforms; rendered as 16 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = AlertingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| AlertingError::Serialization(format!("invalid fingerprint {s:?}: {e}")))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fingerprint_ignores_insertion_order() {
        let a: Labels = [("job", "api"), ("instance", "a:9090")].into_iter().collect();
        let mut b = Labels::new();
        b.insert("instance", "a:9090");
        b.insert("job", "api");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_separates_key_and_value() {
        let a = Labels::new().with("ab", "c");
        let b = Labels::new().with("a", "bc");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_renders_sixteen_hex_digits() {
        let fp = Labels::new().fingerprint();
        let rendered = fp.to_string();
        assert_eq!(rendered.len(), 16);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rendered.parse::<Fingerprint>().ok(), Some(fp));
    }

    #[test]
    fn fingerprint_serializes_as_string() {
        let fp = Fingerprint(0xab);
        let json = serde_json::to_string(&fp).expect("serialize");
        assert_eq!(json, "\"00000000000000ab\"");
    }

    #[test]
    fn merge_overrides() {
        let mut base = Labels::new().with("team", "a").with("env", "prod");
        base.merge(&Labels::new().with("team", "b"));
        assert_eq!(base.get("team"), Some("b"));
        assert_eq!(base.get("env"), Some("prod"));
    }

    #[test]
    fn display_is_sorted() {
        let labels = Labels::new().with("z", "1").with("a", "2");
        assert_eq!(labels.to_string(), r#"{a="2", z="1"}"#);
    }

    proptest! {
        #[test]
        fn fingerprint_is_order_independent(pairs in proptest::collection::vec(("[a-z]{1,6}", "[a-z0-9]{0,6}"), 0..8)) {
            let forward: Labels = pairs.iter().cloned().collect();
            let backward: Labels = pairs.iter().rev().cloned().collect();
            // Reversal changes which duplicate key wins, so only compare distinct-key sets.
            if forward == backward {
                prop_assert_eq!(forward.fingerprint(), backward.fingerprint());
            }
        }
    }
}
