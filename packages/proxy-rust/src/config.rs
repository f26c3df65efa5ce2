//! Router configuration types.
//!
//! These mirror the JSON route configuration accepted by the proxy. They are
//! plain data; validation happens when a `RouteTable` is built from them.
//! Cluster protocol options are the exception and reject `auto` on parse.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use rpcgate_core::{HeaderMatcherConfig, ProtocolType, TransportType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level configuration for one router instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// Prefix applied to every emitted metric name.
    pub stat_prefix: String,
    /// The ordered route rules.
    pub route_config: RouteConfiguration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            stat_prefix: "rpcgate".to_string(),
            route_config: RouteConfiguration::default(),
        }
    }
}

impl RouterConfig {
    /// Parses a router configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or has unknown fields.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid router configuration")
    }

    /// Reads and parses a router configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json_str(&raw)
    }
}

/// Named, ordered list of route rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteConfiguration {
    pub name: String,
    pub routes: Vec<RouteConfig>,
}

/// One route rule: a match predicate and the action to take.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    #[serde(rename = "match")]
    pub route_match: RouteMatchConfig,
    pub route: RouteActionConfig,
}

/// Match predicate. Exactly one of `method_name` or `service_name` must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteMatchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub invert: bool,
    pub headers: Vec<HeaderMatcherConfig>,
}

/// Routing action. Exactly one of `cluster`, `weighted_clusters` or
/// `cluster_header` must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteActionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weighted_clusters: Option<WeightedClustersConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_header: Option<String>,
    /// Endpoint metadata criteria for the load balancer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_match: Option<BTreeMap<String, Value>>,
    pub rate_limits: Vec<RateLimitConfig>,
    pub strip_service_name: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightedClustersConfig {
    pub clusters: Vec<ClusterWeightConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterWeightConfig {
    pub name: String,
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_match: Option<BTreeMap<String, Value>>,
}

/// One rate-limit policy entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub stage: u32,
    pub actions: Vec<RateLimitActionConfig>,
}

/// Descriptor-producing action of a rate-limit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum RateLimitActionConfig {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolOptionsError {
    #[error("upstream transport cannot be auto")]
    AutoTransport,
    #[error("upstream protocol cannot be auto")]
    AutoProtocol,
}

/// Per-cluster override of the upstream transport and protocol.
///
/// An upstream leg has to be encoded with a concrete codec, so neither
/// field may be `auto`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawProtocolOptions")]
pub struct ProtocolOptionsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolType>,
}

#[derive(Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawProtocolOptions {
    transport: Option<TransportType>,
    protocol: Option<ProtocolType>,
}

impl TryFrom<RawProtocolOptions> for ProtocolOptionsConfig {
    type Error = ProtocolOptionsError;

    fn try_from(raw: RawProtocolOptions) -> Result<Self, Self::Error> {
        let options = Self {
            transport: raw.transport,
            protocol: raw.protocol,
        };
        options.validate()?;
        Ok(options)
    }
}

impl ProtocolOptionsConfig {
    /// Checks that no override is `auto`.
    ///
    /// # Errors
    ///
    /// Returns the first `auto` field found.
    pub fn validate(&self) -> Result<(), ProtocolOptionsError> {
        if self.transport == Some(TransportType::Auto) {
            return Err(ProtocolOptionsError::AutoTransport);
        }
        if self.protocol == Some(ProtocolType::Auto) {
            return Err(ProtocolOptionsError::AutoProtocol);
        }
        Ok(())
    }

    /// The upstream transport: the override if set, else `downstream`.
    #[must_use]
    pub fn transport(&self, downstream: TransportType) -> TransportType {
        self.transport.unwrap_or(downstream)
    }

    /// The upstream protocol: the override if set, else `downstream`.
    #[must_use]
    pub fn protocol(&self, downstream: ProtocolType) -> ProtocolType {
        self.protocol.unwrap_or(downstream)
    }
}
