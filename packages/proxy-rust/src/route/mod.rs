//! Route evaluation: rules, cluster selection, and rate-limit policy.
//!
//! 1. **Table** (`table`): ordered rules, first match wins
//! 2. **Rules** (`rule`): method-name and service-name predicates behind a header gate
//! 3. **Selectors** (`selector`): static, weighted, or header-derived cluster
//! 4. **Rate limits** (`rate_limit`): descriptor policy carried on the route

pub mod rate_limit;
pub mod rule;
pub mod selector;
pub mod table;

use std::sync::Arc;

use rpcgate_core::{HeaderMatcherError, MetadataMatchCriteria};

pub use rate_limit::{DescriptorEntry, RateLimitAction, RateLimitPolicy, RateLimitPolicyEntry};
pub use rule::{RouteRule, RuleMatcher};
pub use selector::{ClusterSelector, Selection, WeightedClusterEntry, WeightedClusters};
pub use table::RouteTable;

// ---------------------------------------------------------------------------
// ResolvedRoute
// ---------------------------------------------------------------------------

/// The outcome of routing one call: where it goes and how.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRoute {
    pub(crate) cluster_name: String,
    pub(crate) metadata_match: Option<Arc<MetadataMatchCriteria>>,
    pub(crate) rate_limit_policy: Arc<RateLimitPolicy>,
    pub(crate) strip_service_name: bool,
}

impl ResolvedRoute {
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Criteria handed to the load balancer when requesting a pool.
    #[must_use]
    pub fn metadata_match(&self) -> Option<&MetadataMatchCriteria> {
        self.metadata_match.as_deref()
    }

    #[must_use]
    pub fn rate_limit_policy(&self) -> &RateLimitPolicy {
        &self.rate_limit_policy
    }

    #[must_use]
    pub fn strip_service_name(&self) -> bool {
        self.strip_service_name
    }
}

// ---------------------------------------------------------------------------
// RouteConfigError
// ---------------------------------------------------------------------------

/// Errors detected while building a route table. A table with any invalid
/// rule never becomes active.
#[derive(Debug, thiserror::Error)]
pub enum RouteConfigError {
    #[error("route {index}: {source}")]
    InvalidRule {
        index: usize,
        #[source]
        source: Box<RouteConfigError>,
    },
    #[error("cannot have an empty method name with inversion enabled")]
    EmptyInvertedMethodName,
    #[error("cannot have an empty service name with inversion enabled")]
    EmptyInvertedServiceName,
    #[error("route match must set one of method_name or service_name")]
    MissingMatchSpecifier,
    #[error("route match sets both method_name and service_name")]
    ConflictingMatchSpecifiers,
    #[error("route action must set one of cluster, weighted_clusters or cluster_header")]
    MissingClusterSpecifier,
    #[error("route action sets more than one of cluster, weighted_clusters or cluster_header")]
    ConflictingClusterSpecifiers,
    #[error("cluster name must not be empty")]
    EmptyClusterName,
    #[error("cluster_header must not be empty")]
    EmptyClusterHeader,
    #[error("weighted_clusters must contain at least one cluster")]
    EmptyWeightedClusters,
    #[error("weighted cluster '{cluster}' must have a weight greater than zero")]
    ZeroWeight { cluster: String },
    #[error(transparent)]
    InvalidHeaderMatcher(#[from] HeaderMatcherError),
}
