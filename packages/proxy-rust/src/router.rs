//! Per-downstream-connection call router.
//!
//! `CallRouter` receives decode events for each downstream call, resolves a
//! route, picks a cluster and pool, and drives one `UpstreamCall` until the
//! response is relayed or the call fails. Every failure before an upstream
//! call exists is answered with a local exception reply.

use std::sync::Arc;

use bytes::BytesMut;
use rand::Rng;
use rpcgate_core::{passthrough_supported, AppException, MessageMetadata, MessageType};
use tracing::{debug, trace, warn};

use crate::config::ProtocolOptionsConfig;
use crate::route::{ResolvedRoute, RouteTable};
use crate::stats::{RouterCounter, StatsSink};
use crate::upstream::{
    CallContext, CallState, CloseType, ClusterManager, CodecFactory, ConnectionEvent, ConnectionId,
    ConnectionStateTable, DecoderCallbacks, FilterStatus, HostDescription, LoadBalancerContext,
    PoolFailureReason, ResourcePriority, UpstreamCall, UpstreamConnection,
};

// ---------------------------------------------------------------------------
// RandomSource
// ---------------------------------------------------------------------------

/// Source of the per-call random value used for weighted cluster selection.
pub trait RandomSource: Send + Sync {
    fn random(&self) -> u64;
}

/// `RandomSource` backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn random(&self) -> u64 {
        rand::rng().random()
    }
}

// ---------------------------------------------------------------------------
// CallRouter
// ---------------------------------------------------------------------------

/// Routes calls from one downstream connection. Owned by a single task.
pub struct CallRouter {
    routes: Arc<RouteTable>,
    cluster_manager: Arc<dyn ClusterManager>,
    codecs: Arc<dyn CodecFactory>,
    stats: Arc<dyn StatsSink>,
    connection_states: Arc<ConnectionStateTable>,
    random: Arc<dyn RandomSource>,
    callbacks: Box<dyn DecoderCallbacks>,

    route: Option<ResolvedRoute>,
    passthrough: bool,
    upstream: Option<UpstreamCall>,
}

impl std::fmt::Debug for CallRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRouter")
            .field("routes", &self.routes.name())
            .field("route", &self.route)
            .field("passthrough", &self.passthrough)
            .field("upstream", &self.upstream)
            .finish_non_exhaustive()
    }
}

impl CallRouter {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        routes: Arc<RouteTable>,
        cluster_manager: Arc<dyn ClusterManager>,
        codecs: Arc<dyn CodecFactory>,
        stats: Arc<dyn StatsSink>,
        connection_states: Arc<ConnectionStateTable>,
        random: Arc<dyn RandomSource>,
        callbacks: Box<dyn DecoderCallbacks>,
    ) -> Self {
        Self {
            routes,
            cluster_manager,
            codecs,
            stats,
            connection_states,
            random,
            callbacks,
            route: None,
            passthrough: false,
            upstream: None,
        }
    }

    /// The route resolved for the current call, if any.
    #[must_use]
    pub fn route(&self) -> Option<&ResolvedRoute> {
        self.route.as_ref()
    }

    /// Whether body bytes may be copied verbatim to the upstream.
    #[must_use]
    pub fn passthrough_enabled(&self) -> bool {
        self.passthrough
    }

    #[must_use]
    pub fn upstream_call(&self) -> Option<&UpstreamCall> {
        self.upstream.as_ref()
    }

    #[must_use]
    pub fn has_active_call(&self) -> bool {
        self.upstream.is_some()
    }

    #[must_use]
    pub fn upstream_connection_id(&self) -> Option<ConnectionId> {
        self.upstream.as_ref().and_then(UpstreamCall::connection_id)
    }

    /// True while the active call has no connection ready for request bytes.
    /// Further decode events must wait until `continue_decoding` fires.
    #[must_use]
    pub fn decoding_paused(&self) -> bool {
        self.upstream.as_ref().is_some_and(|call| {
            matches!(
                call.state(),
                CallState::AcquiringConnection | CallState::UpgradeNegotiating
            )
        })
    }

    // -----------------------------------------------------------------------
    // Downstream decode events
    // -----------------------------------------------------------------------

    pub fn on_transport_begin(&mut self) -> FilterStatus {
        FilterStatus::Continue
    }

    /// Routes a decoded call and starts its upstream leg.
    ///
    /// Returns `StopIteration` when the call was answered locally or is
    /// waiting for a connection.
    pub fn on_message_begin(&mut self, mut metadata: MessageMetadata) -> FilterStatus {
        if let Some(stale) = self.upstream.take() {
            warn!(call = ?stale, "new call while previous upstream call is active");
            self.discard(stale);
        }
        self.route = None;
        self.passthrough = false;

        let Some(route) = self.routes.route(&metadata, self.random.random()) else {
            debug!(method = metadata.method_name(), "no route match");
            self.stats.increment(RouterCounter::RouteMissing, None);
            self.callbacks.send_local_reply(
                AppException::unknown_method(format!(
                    "no route for method '{}'",
                    metadata.method_name()
                )),
                true,
            );
            return FilterStatus::StopIteration;
        };

        let cluster_name = route.cluster_name().to_string();
        let Some(cluster) = self.cluster_manager.get_cluster(&cluster_name) else {
            debug!(cluster = %cluster_name, "unknown cluster");
            self.stats.increment(RouterCounter::UnknownCluster, None);
            self.callbacks.send_local_reply(
                AppException::internal_error(format!("unknown cluster '{cluster_name}'")),
                true,
            );
            self.route = Some(route);
            return FilterStatus::StopIteration;
        };

        debug!(
            cluster = %cluster_name,
            method = metadata.method_name(),
            "cluster matched"
        );
        let kind = match metadata.message_type {
            Some(MessageType::Call) => RouterCounter::UpstreamRqCall,
            Some(MessageType::Oneway) => RouterCounter::UpstreamRqOneway,
            _ => RouterCounter::UpstreamRqInvalidType,
        };
        self.stats.increment(kind, Some(&cluster_name));

        if cluster.maintenance_mode() {
            self.stats.increment(RouterCounter::MaintenanceMode, None);
            self.callbacks.send_local_reply(
                AppException::internal_error(format!(
                    "maintenance mode for cluster '{cluster_name}'"
                )),
                true,
            );
            self.route = Some(route);
            return FilterStatus::StopIteration;
        }

        let downstream_transport = self.callbacks.downstream_transport();
        let downstream_protocol = self.callbacks.downstream_protocol();
        let mut options = cluster.protocol_options().unwrap_or_default();
        if let Err(e) = options.validate() {
            warn!(cluster = %cluster_name, error = %e, "ignoring cluster protocol options");
            options = ProtocolOptionsConfig::default();
        }
        let transport = options.transport(downstream_transport);
        let protocol = options.protocol(downstream_protocol);
        self.passthrough = passthrough_supported(
            downstream_transport,
            downstream_protocol,
            transport,
            protocol,
        );

        let pool = cluster.tcp_conn_pool(
            ResourcePriority::Default,
            &LoadBalancerContext {
                metadata_match: route.metadata_match(),
                headers: &metadata.headers,
            },
        );
        let Some(pool) = pool else {
            self.stats.increment(RouterCounter::NoHealthyUpstream, None);
            self.callbacks.send_local_reply(
                AppException::internal_error(format!("no healthy upstream for '{cluster_name}'")),
                true,
            );
            self.route = Some(route);
            return FilterStatus::StopIteration;
        };

        debug!(
            transport = transport.name(),
            protocol = protocol.name(),
            passthrough = self.passthrough,
            "router decoding request"
        );

        if route.strip_service_name() {
            metadata.strip_service_name();
        }
        self.route = Some(route);

        let codec = self.codecs.create(transport, protocol);
        let mut call = UpstreamCall::new(cluster_name, pool, codec, metadata);
        let status = call.start(&mut CallContext {
            callbacks: self.callbacks.as_mut(),
            stats: self.stats.as_ref(),
            connection_states: &self.connection_states,
        });
        self.upstream = Some(call);
        self.cleanup_if_finished();
        status
    }

    /// Appends one chunk of the request body.
    pub fn on_message_body(&mut self, body: &[u8]) -> FilterStatus {
        match self.upstream.as_mut() {
            Some(call) => {
                trace!(bytes = body.len(), "request body");
                call.write_body(body, self.passthrough);
            }
            None => warn!(bytes = body.len(), "request body without an upstream call"),
        }
        FilterStatus::Continue
    }

    /// Frames and writes the completed request upstream.
    pub fn on_message_end(&mut self) -> FilterStatus {
        let Some(call) = self.upstream.as_mut() else {
            warn!("message end without an upstream call");
            return FilterStatus::Continue;
        };
        call.on_message_end(&mut CallContext {
            callbacks: self.callbacks.as_mut(),
            stats: self.stats.as_ref(),
            connection_states: &self.connection_states,
        });
        FilterStatus::Continue
    }

    /// Completes a one-way call: no response will ever arrive.
    pub fn on_transport_end(&mut self) -> FilterStatus {
        if let Some(call) = self.upstream.as_mut() {
            if call.metadata().is_oneway() {
                call.complete_oneway(&mut CallContext {
                    callbacks: self.callbacks.as_mut(),
                    stats: self.stats.as_ref(),
                    connection_states: &self.connection_states,
                });
                self.cleanup();
            }
        }
        FilterStatus::Continue
    }

    // -----------------------------------------------------------------------
    // Pool and upstream events
    // -----------------------------------------------------------------------

    /// Hands a pending acquisition its connection.
    pub fn on_pool_ready(
        &mut self,
        mut connection: Box<dyn UpstreamConnection>,
        host: Arc<dyn HostDescription>,
    ) {
        let Some(call) = self.upstream.as_mut() else {
            warn!(connection = connection.id().0, "pool ready without an upstream call");
            connection.close(CloseType::NoFlush);
            self.connection_states.remove(connection.id());
            return;
        };
        call.on_pool_ready(
            connection,
            host,
            &mut CallContext {
                callbacks: self.callbacks.as_mut(),
                stats: self.stats.as_ref(),
                connection_states: &self.connection_states,
            },
        );
        self.cleanup_if_finished();
    }

    pub fn on_pool_failure(
        &mut self,
        reason: PoolFailureReason,
        host: Option<Arc<dyn HostDescription>>,
    ) {
        let Some(call) = self.upstream.as_mut() else {
            warn!(?reason, "pool failure without an upstream call");
            return;
        };
        call.on_pool_failure(
            reason,
            host,
            &mut CallContext {
                callbacks: self.callbacks.as_mut(),
                stats: self.stats.as_ref(),
                connection_states: &self.connection_states,
            },
        );
        self.cleanup_if_finished();
    }

    /// Relays upstream bytes to the downstream response decoder.
    pub fn on_upstream_data(&mut self, data: &mut BytesMut, end_stream: bool) {
        let Some(call) = self.upstream.as_mut() else {
            warn!(bytes = data.len(), "upstream data without an upstream call");
            return;
        };
        trace!(bytes = data.len(), end_stream, "upstream data");
        call.on_upstream_data(
            data,
            end_stream,
            &mut CallContext {
                callbacks: self.callbacks.as_mut(),
                stats: self.stats.as_ref(),
                connection_states: &self.connection_states,
            },
        );
        self.cleanup_if_finished();
    }

    pub fn on_event(&mut self, event: ConnectionEvent) {
        let Some(call) = self.upstream.as_mut() else {
            debug!(?event, "connection event without an upstream call");
            return;
        };
        debug!(?event, "upstream connection closed");
        call.on_connection_close(
            event == ConnectionEvent::RemoteClose,
            &mut CallContext {
                callbacks: self.callbacks.as_mut(),
                stats: self.stats.as_ref(),
                connection_states: &self.connection_states,
            },
        );
        self.cleanup_if_finished();
    }

    /// Tears down the router when the downstream connection goes away.
    pub fn on_destroy(&mut self) {
        if let Some(call) = self.upstream.take() {
            self.discard(call);
        }
        self.route = None;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn cleanup_if_finished(&mut self) {
        if self.upstream.as_ref().is_some_and(UpstreamCall::is_terminal) {
            self.cleanup();
        }
    }

    fn cleanup(&mut self) {
        self.upstream = None;
    }

    fn discard(&self, mut call: UpstreamCall) {
        if !call.is_terminal() {
            debug!(cluster = call.cluster_name(), "resetting upstream call");
        }
        call.reset_stream(&self.connection_states);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
