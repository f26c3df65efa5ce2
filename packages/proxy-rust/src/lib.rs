//! `rpcgate` proxy: routes decoded binary-RPC calls to upstream clusters.
//!
//! A `RouterFactory` holds the shared, immutable pieces (route table,
//! cluster manager, codec factory, stats sink, connection-state table) and
//! creates one `CallRouter` per downstream connection. Each router drives at
//! most one `UpstreamCall` at a time.

pub mod config;
pub mod factory;
pub mod route;
pub mod router;
pub mod stats;
pub mod telemetry;
pub mod upstream;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ProtocolOptionsConfig, ProtocolOptionsError, RouteConfiguration, RouterConfig};
pub use factory::RouterFactory;
pub use route::{ResolvedRoute, RouteConfigError, RouteTable};
pub use router::{CallRouter, RandomSource, ThreadRandom};
pub use stats::{MetricsStatsSink, RouterCounter, RouterHistogram, StatsSink};
pub use worker::{RouterEvent, RouterWorker, WorkerError};
