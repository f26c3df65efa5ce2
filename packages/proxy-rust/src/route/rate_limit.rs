//! Rate-limit policy attached to a route rule.
//!
//! The router does not enforce limits itself. A rate-limit filter running in
//! front of it reads the policy from the resolved route and turns each entry
//! into a descriptor for the external rate-limit service.

use rpcgate_core::HeaderMap;

use crate::config::{RateLimitActionConfig, RateLimitConfig};

/// One descriptor key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorEntry {
    pub key: String,
    pub value: String,
}

impl DescriptorEntry {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitAction {
    SourceCluster,
    DestinationCluster,
    RequestHeaders {
        header_name: String,
        descriptor_key: String,
    },
    GenericKey {
        descriptor_value: String,
    },
}

impl From<&RateLimitActionConfig> for RateLimitAction {
    fn from(config: &RateLimitActionConfig) -> Self {
        match config {
            RateLimitActionConfig::SourceCluster => Self::SourceCluster,
            RateLimitActionConfig::DestinationCluster => Self::DestinationCluster,
            RateLimitActionConfig::RequestHeaders {
                header_name,
                descriptor_key,
            } => Self::RequestHeaders {
                header_name: header_name.clone(),
                descriptor_key: descriptor_key.clone(),
            },
            RateLimitActionConfig::GenericKey { descriptor_value } => Self::GenericKey {
                descriptor_value: descriptor_value.clone(),
            },
        }
    }
}

impl RateLimitAction {
    fn populate(
        &self,
        route_cluster: &str,
        local_cluster: &str,
        headers: &HeaderMap,
    ) -> Option<DescriptorEntry> {
        match self {
            Self::SourceCluster => Some(DescriptorEntry::new("source_cluster", local_cluster)),
            Self::DestinationCluster => {
                Some(DescriptorEntry::new("destination_cluster", route_cluster))
            }
            Self::RequestHeaders {
                header_name,
                descriptor_key,
            } => headers
                .first(header_name)
                .map(|value| DescriptorEntry::new(descriptor_key.as_str(), value)),
            Self::GenericKey { descriptor_value } => {
                Some(DescriptorEntry::new("generic_key", descriptor_value.as_str()))
            }
        }
    }
}

/// A staged list of actions producing one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicyEntry {
    pub stage: u32,
    pub actions: Vec<RateLimitAction>,
}

impl RateLimitPolicyEntry {
    /// Builds the descriptor for this entry. Returns `None` if any action
    /// cannot produce its pair (e.g. a referenced header is missing), in
    /// which case the entry is skipped for this call.
    #[must_use]
    pub fn populate_descriptor(
        &self,
        route_cluster: &str,
        local_cluster: &str,
        headers: &HeaderMap,
    ) -> Option<Vec<DescriptorEntry>> {
        self.actions
            .iter()
            .map(|action| action.populate(route_cluster, local_cluster, headers))
            .collect()
    }
}

/// All rate-limit entries of a route rule, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitPolicy {
    entries: Vec<RateLimitPolicyEntry>,
}

impl RateLimitPolicy {
    #[must_use]
    pub fn from_config(configs: &[RateLimitConfig]) -> Self {
        let entries = configs
            .iter()
            .map(|c| RateLimitPolicyEntry {
                stage: c.stage,
                actions: c.actions.iter().map(RateLimitAction::from).collect(),
            })
            .collect();
        Self { entries }
    }

    /// Entries configured for the given stage.
    pub fn entries_for_stage(&self, stage: u32) -> impl Iterator<Item = &RateLimitPolicyEntry> {
        self.entries.iter().filter(move |e| e.stage == stage)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
