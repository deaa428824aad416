//! Core data model: identifiers, private sets and intersection results.
//!
//! An [`Identifier`] is an opaque token owned by exactly one participant. A
//! [`PrivateSet`] never crosses the protocol boundary in cleartext; only
//! masked values derived from it are transmitted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use zeroize::Zeroize;

/// One set element (patient ID, customer key, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Zeroize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Name of a participant in the federation (e.g. `site-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Session (job) key shared by all participants of one PSI run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a random session id.
    pub fn random() -> Self {
        Self(format!("psi-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The local participant's items, deduplicated.
///
/// Elements are zeroized when the set is dropped.
#[derive(Debug, Default)]
pub struct PrivateSet {
    items: HashSet<Identifier>,
}

impl PrivateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.items.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identifier> {
        self.items.iter()
    }
}

impl FromIterator<Identifier> for PrivateSet {
    fn from_iter<T: IntoIterator<Item = Identifier>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl Drop for PrivateSet {
    fn drop(&mut self) {
        for mut id in self.items.drain() {
            id.zeroize();
        }
    }
}

/// Identifiers common to every participant of a session.
///
/// Kept sorted so the persisted layout is stable. An empty result is a
/// successful outcome, not a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntersectionResult {
    items: BTreeSet<Identifier>,
}

impl IntersectionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.items.contains(id)
    }

    pub fn insert(&mut self, id: Identifier) -> bool {
        self.items.insert(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identifier> {
        self.items.iter()
    }

    /// Items in ascending order.
    pub fn to_vec(&self) -> Vec<Identifier> {
        self.items.iter().cloned().collect()
    }

    /// Keep only the items also present in `other`.
    pub fn retain_common(&mut self, other: &IntersectionResult) {
        self.items.retain(|id| other.items.contains(id));
    }

    pub fn is_subset_of(&self, set: &PrivateSet) -> bool {
        self.items.iter().all(|id| set.contains(id))
    }
}

impl FromIterator<Identifier> for IntersectionResult {
    fn from_iter<T: IntoIterator<Item = Identifier>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl From<&PrivateSet> for IntersectionResult {
    fn from(set: &PrivateSet) -> Self {
        set.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<Identifier> {
        values.iter().map(|v| Identifier::from(*v)).collect()
    }

    #[test]
    fn test_private_set_deduplicates() {
        let set: PrivateSet = ids(&["a1", "a2", "a1"]).into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&Identifier::from("a1")));
    }

    #[test]
    fn test_intersection_is_sorted() {
        let result: IntersectionResult = ids(&["c", "a", "b"]).into_iter().collect();
        assert_eq!(result.to_vec(), ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_retain_common() {
        let mut left: IntersectionResult = ids(&["a", "b", "c"]).into_iter().collect();
        let right: IntersectionResult = ids(&["b", "c", "d"]).into_iter().collect();
        left.retain_common(&right);
        assert_eq!(left.to_vec(), ids(&["b", "c"]));
    }

    #[test]
    fn test_subset_check() {
        let set: PrivateSet = ids(&["a", "b"]).into_iter().collect();
        let inside: IntersectionResult = ids(&["a"]).into_iter().collect();
        let outside: IntersectionResult = ids(&["z"]).into_iter().collect();
        assert!(inside.is_subset_of(&set));
        assert!(!outside.is_subset_of(&set));
    }

    #[test]
    fn test_intersection_serializes_as_list() {
        let result: IntersectionResult = ids(&["b", "a"]).into_iter().collect();
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
    }

    #[test]
    fn test_session_id_random_is_unique() {
        assert_ne!(SessionId::random(), SessionId::random());
    }
}
