//! Upstream side of a proxied call: collaborator contracts, shared
//! per-connection state, and the per-call state machine.

pub mod call;
pub mod conn_state;
pub mod traits;

pub(crate) use call::CallContext;
pub use call::{CallState, UpstreamCall};
pub use conn_state::{ConnectionState, ConnectionStateTable};
pub use traits::{
    Cancellable, CloseType, ClusterManager, ClusterView, CodecFactory, ConnectionEvent,
    ConnectionId, ConnectionPool, DecoderCallbacks, FilterStatus, HostDescription,
    LoadBalancerContext, OutlierDetector, OutlierResult, PoolAcquire, PoolFailureReason,
    ResourcePriority, ResponseStatus, UpgradeResponse, UpstreamCodec, UpstreamConnection,
};
