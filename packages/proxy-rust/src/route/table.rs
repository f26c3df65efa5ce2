//! Ordered route table evaluated per call.

use rpcgate_core::MessageMetadata;
use tracing::debug;

use super::rule::RouteRule;
use super::{ResolvedRoute, RouteConfigError};
use crate::config::RouteConfiguration;

/// Immutable, ordered list of route rules. The first rule that matches and
/// resolves a cluster wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    name: String,
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Builds the table, validating every rule.
    ///
    /// # Errors
    ///
    /// Returns the first `RouteConfigError`, tagged with the failing rule's
    /// index. No partially built table is returned.
    pub fn from_config(config: &RouteConfiguration) -> Result<Self, RouteConfigError> {
        let rules = config
            .routes
            .iter()
            .enumerate()
            .map(|(index, route)| {
                RouteRule::from_config(route).map_err(|source| RouteConfigError::InvalidRule {
                    index,
                    source: Box::new(source),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(name = %config.name, rules = rules.len(), "route table built");
        Ok(Self {
            name: config.name.clone(),
            rules,
        })
    }

    #[must_use]
    pub fn from_rules(name: impl Into<String>, rules: Vec<RouteRule>) -> Self {
        Self {
            name: name.into(),
            rules,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the route of the first rule, in configuration order, that
    /// matches the call and resolves a cluster.
    #[must_use]
    pub fn route(&self, metadata: &MessageMetadata, random_value: u64) -> Option<ResolvedRoute> {
        self.rules
            .iter()
            .find_map(|rule| rule.resolve(metadata, random_value))
    }
}
