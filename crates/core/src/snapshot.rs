use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::field_value::FieldValue;

/// A field-mapping capturing an entity's full state at a point in time.
/// Ordered so serialized snapshots are byte-stable for a given state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot(BTreeMap<String, FieldValue>);

impl Snapshot {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: FieldValue) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field names whose values differ between `self` and `other`, including
    /// fields present in only one of the two. This is the set of fields a
    /// change record is considered to have touched.
    pub fn changed_keys(&self, other: &Snapshot) -> Vec<String> {
        let keys: BTreeSet<&String> = self.0.keys().chain(other.0.keys()).collect();
        keys.into_iter()
            .filter(|k| self.0.get(*k) != other.0.get(*k))
            .cloned()
            .collect()
    }

    /// Copy of `self` with `patch`'s fields written over it.
    pub fn overlaid(&self, patch: &Snapshot) -> Snapshot {
        let mut merged = self.clone();
        for (key, value) in patch.fields() {
            merged.set(key, value.clone());
        }
        merged
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

impl FromIterator<(String, FieldValue)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, FieldValue); N]> for Snapshot {
    fn from(fields: [(&str, FieldValue); N]) -> Self {
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_keys_covers_both_directions() {
        let a = Snapshot::from([
            ("status", FieldValue::Text("todo".into())),
            ("priority", FieldValue::Integer(3)),
            ("only_a", FieldValue::Boolean(true)),
        ]);
        let b = Snapshot::from([
            ("status", FieldValue::Text("done".into())),
            ("priority", FieldValue::Integer(3)),
            ("only_b", FieldValue::Null),
        ]);

        let changed = a.changed_keys(&b);
        assert_eq!(changed, vec!["only_a", "only_b", "status"]);
    }

    #[test]
    fn changed_keys_empty_for_equal_snapshots() {
        let a = Snapshot::from([("title", FieldValue::Text("Fix bug".into()))]);
        assert!(a.changed_keys(&a.clone()).is_empty());
    }

    #[test]
    fn overlaid_prefers_patch_values() {
        let base = Snapshot::from([
            ("status", FieldValue::Text("todo".into())),
            ("priority", FieldValue::Integer(3)),
        ]);
        let patch = Snapshot::from([("status", FieldValue::Text("done".into()))]);

        let merged = base.overlaid(&patch);
        assert_eq!(merged.get("status"), Some(&FieldValue::Text("done".into())));
        assert_eq!(merged.get("priority"), Some(&FieldValue::Integer(3)));
    }

    #[test]
    fn msgpack_roundtrip() {
        let snap = Snapshot::from([
            ("title", FieldValue::Text("Fix bug".into())),
            ("estimate", FieldValue::Float(1.5)),
            ("due", FieldValue::Timestamp(1_700_000_000_000)),
        ]);
        let bytes = snap.to_msgpack().unwrap();
        assert_eq!(Snapshot::from_msgpack(&bytes).unwrap(), snap);
    }
}
