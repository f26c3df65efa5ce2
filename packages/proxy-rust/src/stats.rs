//! Router statistics.
//!
//! The router reports through the `StatsSink` trait. `MetricsStatsSink`
//! forwards to the `metrics` facade; whichever recorder the process installs
//! (Prometheus exporter, statsd, ...) receives the values.

use metrics::{counter, histogram};

/// Counters emitted by the router. Cluster-scoped counters carry a
/// `cluster` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouterCounter {
    RouteMissing,
    UnknownCluster,
    MaintenanceMode,
    NoHealthyUpstream,
    UpstreamRqCall,
    UpstreamRqOneway,
    UpstreamRqInvalidType,
    UpstreamRespReply,
    UpstreamRespReplySuccess,
    UpstreamRespReplyError,
    UpstreamRespException,
    UpstreamRespInvalidType,
}

impl RouterCounter {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::RouteMissing => "route_missing",
            Self::UnknownCluster => "unknown_cluster",
            Self::MaintenanceMode => "upstream_rq_maintenance_mode",
            Self::NoHealthyUpstream => "no_healthy_upstream",
            Self::UpstreamRqCall => "upstream_rq_call",
            Self::UpstreamRqOneway => "upstream_rq_oneway",
            Self::UpstreamRqInvalidType => "upstream_rq_invalid_type",
            Self::UpstreamRespReply => "upstream_resp_reply",
            Self::UpstreamRespReplySuccess => "upstream_resp_success",
            Self::UpstreamRespReplyError => "upstream_resp_error",
            Self::UpstreamRespException => "upstream_resp_exception",
            Self::UpstreamRespInvalidType => "upstream_resp_invalid_type",
        }
    }
}

/// Histograms emitted by the router, all cluster-scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouterHistogram {
    /// Request size in bytes.
    UpstreamRqSize,
    /// Response size in bytes.
    UpstreamRespSize,
    /// Request-complete to response-complete, in milliseconds.
    UpstreamRqTime,
}

impl RouterHistogram {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::UpstreamRqSize => "upstream_rq_size",
            Self::UpstreamRespSize => "upstream_resp_size",
            Self::UpstreamRqTime => "upstream_rq_time",
        }
    }
}

pub trait StatsSink: Send + Sync {
    fn increment(&self, counter: RouterCounter, cluster: Option<&str>);

    fn record(&self, histogram: RouterHistogram, cluster: &str, value: u64);
}

/// `StatsSink` backed by the `metrics` facade. Names are
/// `<stat_prefix>.<stat>`.
#[derive(Debug, Clone)]
pub struct MetricsStatsSink {
    prefix: String,
}

impl MetricsStatsSink {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn key(&self, stat: &str) -> String {
        format!("{}.{stat}", self.prefix)
    }
}

impl StatsSink for MetricsStatsSink {
    fn increment(&self, which: RouterCounter, cluster: Option<&str>) {
        let name = self.key(which.name());
        match cluster {
            Some(cluster) => counter!(name, "cluster" => cluster.to_string()).increment(1),
            None => counter!(name).increment(1),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record(&self, which: RouterHistogram, cluster: &str, value: u64) {
        let name = self.key(which.name());
        histogram!(name, "cluster" => cluster.to_string()).record(value as f64);
    }
}
