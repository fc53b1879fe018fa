// Per-state data payloads, decoded into a case-insensitive lookup
use std::collections::{BTreeMap, HashMap};

use serde::{Serialize, Serializer};

type Result<T, E = crate::Error> = anyhow::Result<T, E>;

/// String to string mapping attached to a state transition.
/// Keys are normalized to lowercase on the way in; the original spelling
/// is kept for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateData {
    entries: BTreeMap<String, (String, String)>,
}

impl StateData {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Yields the keys as they were written
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.entries.insert(key.to_lowercase(), (key, value.into()));
    }
}

impl<K, V> FromIterator<(K, V)> for StateData
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut data = Self::default();
        for (key, value) in iter {
            data.insert(key, value);
        }
        data
    }
}

impl Serialize for StateData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// Decodes a serialized state data blob.
/// `None` for a missing or empty blob, which is not the same as an empty mapping.
/// Null values are dropped, so they read the same as missing keys.
pub fn decode_state_data(blob: Option<&str>) -> Result<Option<StateData>> {
    let Some(blob) = blob.filter(|blob| !blob.trim().is_empty()) else {
        return Ok(None);
    };
    let raw: HashMap<String, Option<String>> = serde_json::from_str(blob)?;
    Ok(Some(
        raw.into_iter()
            .filter_map(|(key, value)| value.map(|value| (key, value)))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_empty_blobs_decode_to_none() {
        assert_eq!(decode_state_data(None).unwrap(), None);
        assert_eq!(decode_state_data(Some("")).unwrap(), None);
        assert_eq!(decode_state_data(Some("   ")).unwrap(), None);
    }

    #[test]
    fn empty_object_is_an_empty_mapping() {
        let data = decode_state_data(Some("{}")).unwrap().unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn lookups_ignore_case() {
        let data = decode_state_data(Some(r#"{"EnqueuedAt":"1000","Queue":"default"}"#))
            .unwrap()
            .unwrap();
        assert_eq!(data.get("enqueuedat"), Some("1000"));
        assert_eq!(data.get("ENQUEUEDAT"), Some("1000"));
        assert_eq!(data.get("queue"), Some("default"));
        assert!(data.contains_key("QUEUE"));
        assert!(!data.contains_key("Reason"));
    }

    #[test]
    fn null_values_are_dropped() {
        let data = decode_state_data(Some(r#"{"Result":null,"Latency":"3"}"#))
            .unwrap()
            .unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("Result"), None);
    }

    #[test]
    fn malformed_blob_is_an_error() {
        assert!(decode_state_data(Some("{not json")).is_err());
        assert!(decode_state_data(Some(r#"{"Latency":3}"#)).is_err());
    }

    #[test]
    fn serializes_with_original_keys() {
        let data: StateData = [("StartedAt", "5"), ("ServerId", "web-1")]
            .into_iter()
            .collect();
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"StartedAt": "5", "ServerId": "web-1"})
        );
    }
}
