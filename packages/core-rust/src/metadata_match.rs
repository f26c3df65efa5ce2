//! Endpoint metadata criteria passed to the load balancer.

use std::collections::BTreeMap;

use serde_json::Value;

/// Key/value constraints on upstream endpoint metadata, sorted by key.
///
/// The router never interprets these; they are handed opaquely to the load
/// balancer when a connection pool is requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataMatchCriteria {
    criteria: BTreeMap<String, Value>,
}

impl MetadataMatchCriteria {
    #[must_use]
    pub fn new(criteria: BTreeMap<String, Value>) -> Self {
        Self { criteria }
    }

    /// Returns a new set containing `self` with `overrides` applied on top.
    /// Keys present in both take the value from `overrides`.
    #[must_use]
    pub fn merge(&self, overrides: &BTreeMap<String, Value>) -> Self {
        let mut criteria = self.criteria.clone();
        criteria.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { criteria }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.criteria.get(key)
    }

    /// Iterates criteria in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.criteria.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}
