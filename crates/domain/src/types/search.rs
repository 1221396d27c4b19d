//! FHIR search parameters

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ordered list of search parameters.
///
/// FHIR allows a parameter to repeat (`date=ge2024&date=le2025`), so this is
/// a list of pairs rather than a map. [`SearchParams::canonical`] gives an
/// order-independent rendering for cache keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchParams(Vec<(String, String)>);

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// `_count` page size
    pub fn count(self, count: u32) -> Self {
        self.with("_count", count.to_string())
    }

    /// `_sort` expression, e.g. `-date`
    pub fn sort(self, expression: impl Into<String>) -> Self {
        self.with("_sort", expression)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    /// Deterministic JSON rendering with keys sorted and repeated values
    /// sorted, so equal queries produce equal strings
    pub fn canonical(&self) -> String {
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (key, value) in &self.0 {
            grouped.entry(key.as_str()).or_default().push(value.as_str());
        }
        for values in grouped.values_mut() {
            values.sort_unstable();
        }
        serde_json::to_string(&grouped).unwrap_or_default()
    }
}

impl<K, V> FromIterator<(K, V)> for SearchParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
