//! Cluster selection for a matched route rule.
//!
//! A rule names its destination in one of three ways, fixed at configuration
//! time: a static cluster, a weighted list of clusters, or a header carrying
//! the cluster name.

use std::sync::Arc;

use rpcgate_core::{HeaderMap, MetadataMatchCriteria};

use super::RouteConfigError;
use crate::config::ClusterWeightConfig;

// ---------------------------------------------------------------------------
// Weighted clusters
// ---------------------------------------------------------------------------

/// One member of a weighted cluster list.
#[derive(Debug, Clone)]
pub struct WeightedClusterEntry {
    cluster_name: String,
    weight: u32,
    /// Parent criteria with this entry's overrides already merged in.
    metadata_match: Option<Arc<MetadataMatchCriteria>>,
}

impl WeightedClusterEntry {
    fn from_config(
        config: &ClusterWeightConfig,
        parent: Option<&Arc<MetadataMatchCriteria>>,
    ) -> Result<Self, RouteConfigError> {
        if config.name.is_empty() {
            return Err(RouteConfigError::EmptyClusterName);
        }
        if config.weight == 0 {
            return Err(RouteConfigError::ZeroWeight {
                cluster: config.name.clone(),
            });
        }

        let metadata_match = match (&config.metadata_match, parent) {
            (Some(own), Some(parent)) => Some(Arc::new(parent.merge(own))),
            (Some(own), None) => Some(Arc::new(MetadataMatchCriteria::new(own.clone()))),
            (None, parent) => parent.cloned(),
        };

        Ok(Self {
            cluster_name: config.name.clone(),
            weight: config.weight,
            metadata_match,
        })
    }

    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    #[must_use]
    pub fn weight(&self) -> u32 {
        self.weight
    }

    #[must_use]
    pub fn metadata_match(&self) -> Option<&Arc<MetadataMatchCriteria>> {
        self.metadata_match.as_ref()
    }
}

/// Ordered weighted cluster list with its precomputed total weight.
#[derive(Debug, Clone)]
pub struct WeightedClusters {
    entries: Vec<WeightedClusterEntry>,
    total_weight: u64,
}

impl WeightedClusters {
    /// Builds the list, merging each entry's metadata criteria over `parent`.
    ///
    /// # Errors
    ///
    /// Returns `RouteConfigError` if the list is empty, or an entry has an
    /// empty name or a zero weight.
    pub fn from_config(
        configs: &[ClusterWeightConfig],
        parent: Option<&Arc<MetadataMatchCriteria>>,
    ) -> Result<Self, RouteConfigError> {
        if configs.is_empty() {
            return Err(RouteConfigError::EmptyWeightedClusters);
        }

        let entries = configs
            .iter()
            .map(|c| WeightedClusterEntry::from_config(c, parent))
            .collect::<Result<Vec<_>, _>>()?;
        let total_weight = entries.iter().map(|e| u64::from(e.weight)).sum();

        Ok(Self {
            entries,
            total_weight,
        })
    }

    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    #[must_use]
    pub fn entries(&self) -> &[WeightedClusterEntry] {
        &self.entries
    }

    /// Picks the entry whose cumulative weight interval contains
    /// `random_value % total_weight`.
    #[must_use]
    pub fn pick(&self, random_value: u64) -> Option<&WeightedClusterEntry> {
        if self.total_weight == 0 {
            return None;
        }

        let selected = random_value % self.total_weight;
        let mut upper = 0u64;
        self.entries.iter().find(|entry| {
            upper += u64::from(entry.weight);
            selected < upper
        })
    }
}

// ---------------------------------------------------------------------------
// ClusterSelector
// ---------------------------------------------------------------------------

/// The cluster chosen for one call, with the criteria for the load balancer.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a> {
    pub cluster_name: &'a str,
    pub metadata_match: Option<&'a Arc<MetadataMatchCriteria>>,
}

#[derive(Debug, Clone)]
pub enum ClusterSelector {
    Static(String),
    Weighted(WeightedClusters),
    /// Cluster name taken from the named request header.
    Header(String),
}

impl ClusterSelector {
    /// Resolves the destination cluster for a call.
    ///
    /// `rule_criteria` are the matched rule's own metadata criteria; weighted
    /// entries carry their merged criteria instead. Returns `None` when a
    /// header-derived cluster cannot be resolved.
    #[must_use]
    pub fn select<'a>(
        &'a self,
        headers: &'a HeaderMap,
        random_value: u64,
        rule_criteria: Option<&'a Arc<MetadataMatchCriteria>>,
    ) -> Option<Selection<'a>> {
        match self {
            Self::Static(name) => Some(Selection {
                cluster_name: name,
                metadata_match: rule_criteria,
            }),
            Self::Weighted(clusters) => clusters.pick(random_value).map(|entry| Selection {
                cluster_name: entry.cluster_name(),
                metadata_match: entry.metadata_match(),
            }),
            Self::Header(header) => {
                // Header values are untrusted: only the first value counts.
                let value = headers.first(header)?;
                if value.is_empty() {
                    return None;
                }
                Some(Selection {
                    cluster_name: value,
                    metadata_match: rule_criteria,
                })
            }
        }
    }
}
