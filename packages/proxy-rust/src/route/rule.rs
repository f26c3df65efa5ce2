//! Route rules: a match predicate plus a routing action.

use std::sync::Arc;

use rpcgate_core::{match_all, HeaderMatcher, MessageMetadata, MetadataMatchCriteria};

use super::rate_limit::RateLimitPolicy;
use super::selector::{ClusterSelector, WeightedClusters};
use super::{ResolvedRoute, RouteConfigError};
use crate::config::{RouteActionConfig, RouteConfig, RouteMatchConfig};

// ---------------------------------------------------------------------------
// RuleMatcher
// ---------------------------------------------------------------------------

/// Rule-variant specific predicate on the method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatcher {
    /// Exact method name; empty matches every call.
    MethodName { name: String, invert: bool },
    /// `service:` prefix of the method name; empty matches every call. The
    /// stored prefix always ends with `:` unless it is empty.
    ServiceName { prefix: String, invert: bool },
}

impl RuleMatcher {
    /// # Errors
    ///
    /// Returns `RouteConfigError` if neither or both specifiers are set, or if
    /// an empty pattern is combined with `invert`.
    pub fn from_config(config: &RouteMatchConfig) -> Result<Self, RouteConfigError> {
        match (&config.method_name, &config.service_name) {
            (Some(name), None) => {
                if name.is_empty() && config.invert {
                    return Err(RouteConfigError::EmptyInvertedMethodName);
                }
                Ok(Self::MethodName {
                    name: name.clone(),
                    invert: config.invert,
                })
            }
            (None, Some(service)) => {
                if service.is_empty() && config.invert {
                    return Err(RouteConfigError::EmptyInvertedServiceName);
                }
                let prefix = if service.is_empty() || service.ends_with(':') {
                    service.clone()
                } else {
                    format!("{service}:")
                };
                Ok(Self::ServiceName {
                    prefix,
                    invert: config.invert,
                })
            }
            (None, None) => Err(RouteConfigError::MissingMatchSpecifier),
            (Some(_), Some(_)) => Err(RouteConfigError::ConflictingMatchSpecifiers),
        }
    }

    #[must_use]
    pub fn matches(&self, metadata: &MessageMetadata) -> bool {
        match self {
            Self::MethodName { name, invert } => {
                let matched = name.is_empty()
                    || (metadata.has_method_name() && metadata.method_name() == name);
                matched != *invert
            }
            Self::ServiceName { prefix, invert } => {
                let matched = prefix.is_empty()
                    || (metadata.has_method_name()
                        && metadata.method_name().starts_with(prefix.as_str()));
                matched != *invert
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RouteRule
// ---------------------------------------------------------------------------

/// An immutable route rule built from configuration.
#[derive(Debug, Clone)]
pub struct RouteRule {
    matcher: RuleMatcher,
    headers: Vec<HeaderMatcher>,
    selector: ClusterSelector,
    metadata_match: Option<Arc<MetadataMatchCriteria>>,
    rate_limit_policy: Arc<RateLimitPolicy>,
    strip_service_name: bool,
}

impl RouteRule {
    /// # Errors
    ///
    /// Returns `RouteConfigError` for any invalid match predicate, header
    /// matcher, or cluster specifier.
    pub fn from_config(config: &RouteConfig) -> Result<Self, RouteConfigError> {
        let matcher = RuleMatcher::from_config(&config.route_match)?;
        let headers = config
            .route_match
            .headers
            .iter()
            .map(HeaderMatcher::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        let action = &config.route;
        let metadata_match = action
            .metadata_match
            .as_ref()
            .map(|criteria| Arc::new(MetadataMatchCriteria::new(criteria.clone())));
        let selector = build_selector(action, metadata_match.as_ref())?;

        Ok(Self {
            matcher,
            headers,
            selector,
            metadata_match,
            rate_limit_policy: Arc::new(RateLimitPolicy::from_config(&action.rate_limits)),
            strip_service_name: action.strip_service_name,
        })
    }

    #[must_use]
    pub fn matcher(&self) -> &RuleMatcher {
        &self.matcher
    }

    #[must_use]
    pub fn selector(&self) -> &ClusterSelector {
        &self.selector
    }

    /// Whether the header gate and the variant predicate both accept the call.
    #[must_use]
    pub fn matches(&self, metadata: &MessageMetadata) -> bool {
        match_all(&metadata.headers, &self.headers) && self.matcher.matches(metadata)
    }

    /// Matches the call and resolves its cluster. Returns `None` if the rule
    /// does not match or a header-derived cluster cannot be resolved.
    #[must_use]
    pub fn resolve(&self, metadata: &MessageMetadata, random_value: u64) -> Option<ResolvedRoute> {
        if !self.matches(metadata) {
            return None;
        }

        let selection = self.selector.select(
            &metadata.headers,
            random_value,
            self.metadata_match.as_ref(),
        )?;

        Some(ResolvedRoute {
            cluster_name: selection.cluster_name.to_string(),
            metadata_match: selection.metadata_match.cloned(),
            rate_limit_policy: Arc::clone(&self.rate_limit_policy),
            strip_service_name: self.strip_service_name,
        })
    }
}

fn build_selector(
    action: &RouteActionConfig,
    metadata_match: Option<&Arc<MetadataMatchCriteria>>,
) -> Result<ClusterSelector, RouteConfigError> {
    match (&action.cluster, &action.weighted_clusters, &action.cluster_header) {
        (Some(cluster), None, None) => {
            if cluster.is_empty() {
                return Err(RouteConfigError::EmptyClusterName);
            }
            Ok(ClusterSelector::Static(cluster.clone()))
        }
        (None, Some(weighted), None) => Ok(ClusterSelector::Weighted(
            WeightedClusters::from_config(&weighted.clusters, metadata_match)?,
        )),
        (None, None, Some(header)) => {
            if header.is_empty() {
                return Err(RouteConfigError::EmptyClusterHeader);
            }
            Ok(ClusterSelector::Header(header.clone()))
        }
        (None, None, None) => Err(RouteConfigError::MissingClusterSpecifier),
        _ => Err(RouteConfigError::ConflictingClusterSpecifiers),
    }
}
