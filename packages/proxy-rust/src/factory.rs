//! Shared state from which per-connection routers are created.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::config::{RouteConfiguration, RouterConfig};
use crate::route::{RouteConfigError, RouteTable};
use crate::router::{CallRouter, RandomSource, ThreadRandom};
use crate::stats::{MetricsStatsSink, StatsSink};
use crate::upstream::{ClusterManager, CodecFactory, ConnectionStateTable, DecoderCallbacks};

/// Builds `CallRouter`s that share one route table, cluster manager, codec
/// factory, stats sink and connection-state table.
///
/// The route table can be replaced at runtime. Routers already created keep
/// the table they started with.
pub struct RouterFactory {
    routes: RwLock<Arc<RouteTable>>,
    cluster_manager: Arc<dyn ClusterManager>,
    codecs: Arc<dyn CodecFactory>,
    stats: Arc<dyn StatsSink>,
    connection_states: Arc<ConnectionStateTable>,
    random: Arc<dyn RandomSource>,
}

impl RouterFactory {
    #[must_use]
    pub fn new(
        routes: RouteTable,
        cluster_manager: Arc<dyn ClusterManager>,
        codecs: Arc<dyn CodecFactory>,
        stats: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            routes: RwLock::new(Arc::new(routes)),
            cluster_manager,
            codecs,
            stats,
            connection_states: Arc::new(ConnectionStateTable::new()),
            random: Arc::new(ThreadRandom),
        }
    }

    /// Builds a factory from a router configuration, reporting stats through
    /// the `metrics` facade under the configured prefix.
    ///
    /// # Errors
    ///
    /// Returns `RouteConfigError` if any route rule is invalid.
    pub fn from_config(
        config: &RouterConfig,
        cluster_manager: Arc<dyn ClusterManager>,
        codecs: Arc<dyn CodecFactory>,
    ) -> Result<Self, RouteConfigError> {
        let routes = RouteTable::from_config(&config.route_config)?;
        Ok(Self::new(
            routes,
            cluster_manager,
            codecs,
            Arc::new(MetricsStatsSink::new(config.stat_prefix.clone())),
        ))
    }

    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    #[must_use]
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.read().clone()
    }

    #[must_use]
    pub fn connection_states(&self) -> &Arc<ConnectionStateTable> {
        &self.connection_states
    }

    /// Replaces the route table. An invalid configuration leaves the current
    /// table in place.
    ///
    /// # Errors
    ///
    /// Returns `RouteConfigError` if any route rule is invalid.
    pub fn update_routes(&self, config: &RouteConfiguration) -> Result<(), RouteConfigError> {
        let table = RouteTable::from_config(config)?;
        info!(name = table.name(), rules = table.len(), "route table updated");
        *self.routes.write() = Arc::new(table);
        Ok(())
    }

    /// Creates a router for one downstream connection.
    #[must_use]
    pub fn create_router(&self, callbacks: Box<dyn DecoderCallbacks>) -> CallRouter {
        CallRouter::new(
            self.routes(),
            Arc::clone(&self.cluster_manager),
            Arc::clone(&self.codecs),
            Arc::clone(&self.stats),
            Arc::clone(&self.connection_states),
            Arc::clone(&self.random),
            callbacks,
        )
    }
}
