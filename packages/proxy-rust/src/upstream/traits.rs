//! Collaborator contracts consumed by the router.
//!
//! The router does not own clusters, pools, sockets or codecs. These traits
//! describe what it needs from each of them. Implementations live with the
//! host: the cluster manager, the TCP connection pool, the protocol codec and
//! the downstream connection manager.

use std::sync::Arc;

use bytes::BytesMut;
use rpcgate_core::{
    AppException, HeaderMap, MessageMetadata, MessageType, MetadataMatchCriteria, ProtocolType,
    TransportType,
};

use super::conn_state::ConnectionState;
use crate::config::ProtocolOptionsConfig;

// ---------------------------------------------------------------------------
// Shared enums
// ---------------------------------------------------------------------------

/// Identity of a physical upstream connection, assigned by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Whether the host should keep feeding the current message to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    Continue,
    StopIteration,
}

/// Why a connection could not be acquired or was lost mid-call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolFailureReason {
    /// The pool or cluster circuit breaker is exhausted.
    Overflow,
    /// The proxy closed the connection.
    LocalConnectionFailure,
    /// The upstream closed or refused the connection.
    RemoteConnectionFailure,
    /// Connecting took too long.
    Timeout,
}

/// Upstream connection lifecycle events delivered to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    RemoteClose,
    LocalClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseType {
    FlushWrite,
    NoFlush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourcePriority {
    #[default]
    Default,
    High,
}

/// Health signal fed to a host's outlier detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierResult {
    LocalOriginConnectSuccess,
    LocalOriginConnectFailed,
    LocalOriginTimeout,
    ExtOriginRequestSuccess,
    ExtOriginRequestFailed,
}

/// Progress of decoding an upstream response on the downstream side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    MoreData,
    Complete,
    /// The upstream sent bytes that cannot be decoded.
    Reset,
}

// ---------------------------------------------------------------------------
// Hosts and connections
// ---------------------------------------------------------------------------

pub trait OutlierDetector: Send + Sync {
    fn put_result(&self, result: OutlierResult);
}

/// The upstream host a connection was established to.
pub trait HostDescription: Send + Sync {
    fn address(&self) -> String;
    fn outlier_detector(&self) -> &dyn OutlierDetector;
}

/// Exclusive handle to a pooled upstream connection. Dropping the handle
/// returns the connection to its pool.
pub trait UpstreamConnection: Send {
    fn id(&self) -> ConnectionId;

    /// Queues all of `data` for writing, leaving it empty.
    fn write(&mut self, data: &mut BytesMut, end_stream: bool);

    fn close(&mut self, close_type: CloseType);
}

/// A pending pool acquisition.
pub trait Cancellable: Send {
    fn cancel(&mut self);
}

/// Result of asking a pool for a connection.
///
/// `Pending` acquisitions complete later through `CallRouter::on_pool_ready`
/// or `CallRouter::on_pool_failure`.
pub enum PoolAcquire {
    Ready {
        connection: Box<dyn UpstreamConnection>,
        host: Arc<dyn HostDescription>,
    },
    Failed {
        reason: PoolFailureReason,
        host: Option<Arc<dyn HostDescription>>,
    },
    Pending(Box<dyn Cancellable>),
}

impl std::fmt::Debug for PoolAcquire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready { connection, .. } => f
                .debug_struct("Ready")
                .field("connection", &connection.id())
                .finish_non_exhaustive(),
            Self::Failed { reason, .. } => f
                .debug_struct("Failed")
                .field("reason", reason)
                .finish_non_exhaustive(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

pub trait ConnectionPool: Send + Sync {
    fn new_connection(&self) -> PoolAcquire;
}

// ---------------------------------------------------------------------------
// Clusters
// ---------------------------------------------------------------------------

/// Inputs the load balancer may use when a pool is requested.
#[derive(Debug, Clone, Copy)]
pub struct LoadBalancerContext<'a> {
    pub metadata_match: Option<&'a MetadataMatchCriteria>,
    pub headers: &'a HeaderMap,
}

/// Thread-local view of one cluster.
pub trait ClusterView: Send + Sync {
    fn name(&self) -> &str;

    fn maintenance_mode(&self) -> bool;

    /// Upstream transport/protocol overrides configured on the cluster.
    fn protocol_options(&self) -> Option<ProtocolOptionsConfig>;

    /// Returns a pool for a healthy host, or `None` when no host is healthy.
    fn tcp_conn_pool(
        &self,
        priority: ResourcePriority,
        context: &LoadBalancerContext<'_>,
    ) -> Option<Arc<dyn ConnectionPool>>;
}

pub trait ClusterManager: Send + Sync {
    fn get_cluster(&self, name: &str) -> Option<Arc<dyn ClusterView>>;
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Consumes the upstream's reply to a connection upgrade request.
pub trait UpgradeResponse: Send {
    /// Feeds bytes; returns `true` once the full response has been read.
    fn on_data(&mut self, data: &mut BytesMut) -> bool;
}

/// Encoder for the upstream leg of one call.
pub trait UpstreamCodec: Send {
    fn transport(&self) -> TransportType;

    fn protocol(&self) -> ProtocolType;

    /// Writes an upgrade request into `buffer` if the connection still needs
    /// one, returning the responder that will consume the reply.
    fn attempt_upgrade(
        &mut self,
        state: &ConnectionState,
        buffer: &mut BytesMut,
    ) -> Option<Box<dyn UpgradeResponse>>;

    /// Applies a completed upgrade to the connection state.
    fn complete_upgrade(&mut self, state: &ConnectionState, response: &mut dyn UpgradeResponse);

    fn write_message_begin(&mut self, metadata: &MessageMetadata, buffer: &mut BytesMut);

    /// Re-encodes body bytes decoded from the downstream leg.
    fn write_body(&mut self, body: &[u8], buffer: &mut BytesMut);

    fn write_message_end(&mut self, buffer: &mut BytesMut);

    /// Frames the encoded `message` (leaving it empty) into `out`.
    fn encode_frame(
        &mut self,
        metadata: &MessageMetadata,
        message: &mut BytesMut,
        out: &mut BytesMut,
    );
}

pub trait CodecFactory: Send + Sync {
    fn create(&self, transport: TransportType, protocol: ProtocolType) -> Box<dyn UpstreamCodec>;
}

// ---------------------------------------------------------------------------
// Downstream
// ---------------------------------------------------------------------------

/// Downstream connection manager callbacks.
///
/// None of these may call back into the router synchronously; a host that
/// is told to continue decoding resumes after the current router callback
/// returns.
pub trait DecoderCallbacks: Send {
    fn downstream_transport(&self) -> TransportType;

    fn downstream_protocol(&self) -> ProtocolType;

    /// Sends a locally generated exception reply downstream.
    fn send_local_reply(&mut self, reply: AppException, end_stream: bool);

    fn reset_downstream_connection(&mut self);

    /// Resumes decoding that was paused by `FilterStatus::StopIteration`.
    fn continue_decoding(&mut self);

    /// Prepares the downstream side to decode a response encoded with the
    /// given upstream transport and protocol.
    fn start_upstream_response(&mut self, transport: TransportType, protocol: ProtocolType);

    /// Feeds upstream response bytes to the downstream response decoder.
    fn upstream_data(&mut self, data: &mut BytesMut) -> ResponseStatus;

    /// Message type of the response decoded so far.
    fn response_message_type(&self) -> Option<MessageType>;

    /// Whether the decoded reply carried a success result.
    fn response_success(&self) -> bool;
}
