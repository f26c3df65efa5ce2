//! State machine for one upstream call.
//!
//! ```text
//! AcquiringConnection -> [UpgradeNegotiating] -> RequestInFlight
//!     -> ResponsePending -> Complete
//! any non-terminal state -> Reset
//! ```

use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use rpcgate_core::{AppException, MessageMetadata, MessageType, ProtocolType, TransportType};
use tracing::{debug, trace, warn};

use super::conn_state::{ConnectionState, ConnectionStateTable};
use super::traits::{
    Cancellable, CloseType, ConnectionId, ConnectionPool, DecoderCallbacks, FilterStatus,
    HostDescription, OutlierResult, PoolAcquire, PoolFailureReason, ResponseStatus,
    UpgradeResponse, UpstreamCodec, UpstreamConnection,
};
use crate::stats::{RouterCounter, RouterHistogram, StatsSink};

/// Lifecycle position of an `UpstreamCall`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    AcquiringConnection,
    UpgradeNegotiating,
    RequestInFlight,
    ResponsePending,
    Complete,
    Reset,
}

impl CallState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Reset)
    }
}

/// Borrowed router resources an `UpstreamCall` reports through.
pub(crate) struct CallContext<'a> {
    pub callbacks: &'a mut dyn DecoderCallbacks,
    pub stats: &'a dyn StatsSink,
    pub connection_states: &'a ConnectionStateTable,
}

/// One in-flight proxied call bound to at most one pooled connection.
pub struct UpstreamCall {
    state: CallState,
    cluster_name: String,
    pool: Arc<dyn ConnectionPool>,
    codec: Box<dyn UpstreamCodec>,
    metadata: MessageMetadata,

    pool_handle: Option<Box<dyn Cancellable>>,
    connection: Option<Box<dyn UpstreamConnection>>,
    connection_state: Option<Arc<ConnectionState>>,
    upgrade_response: Option<Box<dyn UpgradeResponse>>,
    host: Option<Arc<dyn HostDescription>>,

    buffer: BytesMut,
    request_size: u64,
    response_size: u64,
    request_completed_at: Option<Instant>,

    request_complete: bool,
    response_started: bool,
    response_complete: bool,
    timing_recorded: bool,
}

impl std::fmt::Debug for UpstreamCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamCall")
            .field("state", &self.state)
            .field("cluster", &self.cluster_name)
            .field("method", &self.metadata.method_name())
            .field("connection", &self.connection.as_ref().map(|c| c.id()))
            .field("request_size", &self.request_size)
            .field("response_size", &self.response_size)
            .finish_non_exhaustive()
    }
}

impl UpstreamCall {
    pub(crate) fn new(
        cluster_name: impl Into<String>,
        pool: Arc<dyn ConnectionPool>,
        codec: Box<dyn UpstreamCodec>,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            state: CallState::AcquiringConnection,
            cluster_name: cluster_name.into(),
            pool,
            codec,
            metadata,
            pool_handle: None,
            connection: None,
            connection_state: None,
            upgrade_response: None,
            host: None,
            buffer: BytesMut::new(),
            request_size: 0,
            response_size: 0,
            request_completed_at: None,
            request_complete: false,
            response_started: false,
            response_complete: false,
            timing_recorded: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        self.state
    }

    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Metadata as it will be (or was) sent upstream.
    #[must_use]
    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(|c| c.id())
    }

    #[must_use]
    pub fn upstream_transport(&self) -> TransportType {
        self.codec.transport()
    }

    #[must_use]
    pub fn upstream_protocol(&self) -> ProtocolType {
        self.codec.protocol()
    }

    #[must_use]
    pub fn request_size(&self) -> u64 {
        self.request_size
    }

    #[must_use]
    pub fn response_size(&self) -> u64 {
        self.response_size
    }

    #[must_use]
    pub fn response_complete(&self) -> bool {
        self.response_complete
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    // -----------------------------------------------------------------------
    // Connection acquisition
    // -----------------------------------------------------------------------

    /// Requests a connection from the pool.
    ///
    /// Returns `Continue` only when a connection was handed over immediately
    /// and the request is ready to be encoded.
    pub(crate) fn start(&mut self, ctx: &mut CallContext<'_>) -> FilterStatus {
        match self.pool.new_connection() {
            PoolAcquire::Pending(handle) => {
                trace!(cluster = %self.cluster_name, "waiting for upstream connection");
                self.pool_handle = Some(handle);
                FilterStatus::StopIteration
            }
            PoolAcquire::Ready { connection, host } => {
                self.on_pool_ready(connection, host, ctx);
                if self.state == CallState::RequestInFlight {
                    FilterStatus::Continue
                } else {
                    FilterStatus::StopIteration
                }
            }
            PoolAcquire::Failed { reason, host } => {
                self.on_pool_failure(reason, host, ctx);
                FilterStatus::StopIteration
            }
        }
    }

    pub(crate) fn on_pool_ready(
        &mut self,
        mut connection: Box<dyn UpstreamConnection>,
        host: Arc<dyn HostDescription>,
        ctx: &mut CallContext<'_>,
    ) {
        let continue_decoding = self.pool_handle.take().is_some();
        host.outlier_detector()
            .put_result(OutlierResult::LocalOriginConnectSuccess);
        self.host = Some(host);

        let state = ctx.connection_states.get_or_create(connection.id());
        debug!(
            cluster = %self.cluster_name,
            connection = connection.id().0,
            "upstream connection ready"
        );

        if self.codec.protocol().supports_upgrade() {
            if let Some(response) = self.codec.attempt_upgrade(&state, &mut self.buffer) {
                self.request_size += self.buffer.len() as u64;
                connection.write(&mut self.buffer, false);
                self.upgrade_response = Some(response);
                self.connection = Some(connection);
                self.connection_state = Some(state);
                self.state = CallState::UpgradeNegotiating;
                return;
            }
        }

        self.connection = Some(connection);
        self.connection_state = Some(state);
        self.on_request_start(continue_decoding, ctx);
    }

    pub(crate) fn on_pool_failure(
        &mut self,
        reason: PoolFailureReason,
        host: Option<Arc<dyn HostDescription>>,
        ctx: &mut CallContext<'_>,
    ) {
        self.pool_handle = None;
        if host.is_some() {
            self.host = host;
        }
        self.on_reset(reason, ctx);
    }

    fn on_request_start(&mut self, continue_decoding: bool, ctx: &mut CallContext<'_>) {
        if let Some(state) = &self.connection_state {
            self.metadata.sequence_id = state.next_sequence_id();
        }
        self.codec.write_message_begin(&self.metadata, &mut self.buffer);
        self.state = CallState::RequestInFlight;

        if continue_decoding {
            ctx.callbacks.continue_decoding();
        }
    }

    // -----------------------------------------------------------------------
    // Request
    // -----------------------------------------------------------------------

    /// Appends request body bytes. Passthrough bodies are copied untouched.
    pub(crate) fn write_body(&mut self, body: &[u8], passthrough: bool) {
        if passthrough {
            self.buffer.extend_from_slice(body);
        } else {
            self.codec.write_body(body, &mut self.buffer);
        }
    }

    /// Frames the encoded request and writes it to the connection.
    pub(crate) fn on_message_end(&mut self, ctx: &mut CallContext<'_>) {
        let Some(connection) = self.connection.as_mut() else {
            warn!(cluster = %self.cluster_name, "message end without an upstream connection");
            return;
        };

        self.codec.write_message_end(&mut self.buffer);
        let mut frame = BytesMut::with_capacity(self.buffer.len() + 4);
        self.codec
            .encode_frame(&self.metadata, &mut self.buffer, &mut frame);

        self.request_size += frame.len() as u64;
        ctx.stats.record(
            RouterHistogram::UpstreamRqSize,
            &self.cluster_name,
            self.request_size,
        );

        trace!(cluster = %self.cluster_name, bytes = frame.len(), "writing request upstream");
        connection.write(&mut frame, false);
        self.on_request_complete();
    }

    fn on_request_complete(&mut self) {
        self.request_completed_at = Some(Instant::now());
        self.request_complete = true;
        self.state = CallState::ResponsePending;
    }

    // -----------------------------------------------------------------------
    // Response
    // -----------------------------------------------------------------------

    pub(crate) fn on_upstream_data(
        &mut self,
        data: &mut BytesMut,
        end_stream: bool,
        ctx: &mut CallContext<'_>,
    ) {
        self.response_size += data.len() as u64;

        if let Some(mut response) = self.upgrade_response.take() {
            if !response.on_data(data) {
                self.upgrade_response = Some(response);
                return;
            }
            debug!(cluster = %self.cluster_name, "upgrade response complete");
            if let Some(state) = self.connection_state.clone() {
                self.codec.complete_upgrade(&state, response.as_mut());
            }
            self.on_request_start(true, ctx);
        } else {
            if !self.response_started {
                ctx.callbacks
                    .start_upstream_response(self.codec.transport(), self.codec.protocol());
                self.response_started = true;
            }

            match ctx.callbacks.upstream_data(data) {
                ResponseStatus::MoreData => {}
                ResponseStatus::Complete => {
                    ctx.stats.record(
                        RouterHistogram::UpstreamRespSize,
                        &self.cluster_name,
                        self.response_size,
                    );
                    let success = self.classify_response(ctx);
                    self.put_outlier(if success {
                        OutlierResult::ExtOriginRequestSuccess
                    } else {
                        OutlierResult::ExtOriginRequestFailed
                    });
                    self.on_response_complete(ctx);
                    return;
                }
                ResponseStatus::Reset => {
                    debug!(cluster = %self.cluster_name, "upstream response could not be decoded");
                    self.put_outlier(OutlierResult::ExtOriginRequestFailed);
                    self.reset_stream(ctx.connection_states);
                    // The close above is a local one; the downstream goes with it.
                    self.on_reset(PoolFailureReason::LocalConnectionFailure, ctx);
                    return;
                }
            }
        }

        if end_stream {
            debug!(cluster = %self.cluster_name, "upstream closed before response was complete");
            self.on_response_complete(ctx);
            self.on_reset(PoolFailureReason::RemoteConnectionFailure, ctx);
        }
    }

    /// Counts the response by type and reports whether it was a success.
    fn classify_response(&self, ctx: &CallContext<'_>) -> bool {
        let cluster = Some(self.cluster_name.as_str());
        match ctx.callbacks.response_message_type() {
            Some(MessageType::Reply) => {
                ctx.stats.increment(RouterCounter::UpstreamRespReply, cluster);
                if ctx.callbacks.response_success() {
                    ctx.stats
                        .increment(RouterCounter::UpstreamRespReplySuccess, cluster);
                    true
                } else {
                    ctx.stats
                        .increment(RouterCounter::UpstreamRespReplyError, cluster);
                    false
                }
            }
            Some(MessageType::Exception) => {
                ctx.stats
                    .increment(RouterCounter::UpstreamRespException, cluster);
                false
            }
            _ => {
                ctx.stats
                    .increment(RouterCounter::UpstreamRespInvalidType, cluster);
                false
            }
        }
    }

    fn on_response_complete(&mut self, ctx: &mut CallContext<'_>) {
        self.charge_response_timing(ctx);
        self.response_complete = true;
        self.connection_state = None;
        self.connection = None;
        self.state = CallState::Complete;
    }

    /// Records request-complete to response-complete latency once.
    fn charge_response_timing(&mut self, ctx: &CallContext<'_>) {
        if self.timing_recorded || !self.request_complete {
            return;
        }
        self.timing_recorded = true;

        if let Some(started) = self.request_completed_at {
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            ctx.stats
                .record(RouterHistogram::UpstreamRqTime, &self.cluster_name, elapsed);
        }
    }

    // -----------------------------------------------------------------------
    // One-way completion
    // -----------------------------------------------------------------------

    /// Finishes a one-way call once the request has been written.
    pub(crate) fn complete_oneway(&mut self, ctx: &mut CallContext<'_>) {
        self.on_response_complete(ctx);
    }

    // -----------------------------------------------------------------------
    // Failure and teardown
    // -----------------------------------------------------------------------

    /// Handles the upstream connection closing underneath the call.
    pub(crate) fn on_connection_close(&mut self, remote: bool, ctx: &mut CallContext<'_>) {
        let closed = self.connection_id();
        let reason = if remote {
            PoolFailureReason::RemoteConnectionFailure
        } else {
            PoolFailureReason::LocalConnectionFailure
        };
        self.on_reset(reason, ctx);

        if let Some(id) = closed {
            ctx.connection_states.remove(id);
        }
    }

    pub(crate) fn on_reset(&mut self, reason: PoolFailureReason, ctx: &mut CallContext<'_>) {
        debug!(cluster = %self.cluster_name, ?reason, "upstream call reset");
        self.state = CallState::Reset;

        if self.metadata.is_oneway() {
            ctx.callbacks.reset_downstream_connection();
            self.release_connection(false, ctx.connection_states);
            return;
        }

        self.charge_response_timing(ctx);

        match reason {
            PoolFailureReason::Overflow => {
                ctx.callbacks.send_local_reply(
                    AppException::internal_error("upstream request: too many connections"),
                    true,
                );
            }
            PoolFailureReason::LocalConnectionFailure => {
                self.put_outlier(OutlierResult::LocalOriginConnectFailed);
                ctx.callbacks.reset_downstream_connection();
            }
            PoolFailureReason::RemoteConnectionFailure | PoolFailureReason::Timeout => {
                self.put_outlier(if reason == PoolFailureReason::Timeout {
                    OutlierResult::LocalOriginTimeout
                } else {
                    OutlierResult::LocalOriginConnectFailed
                });

                if self.response_started {
                    ctx.callbacks.reset_downstream_connection();
                } else {
                    let target = self
                        .host
                        .as_ref()
                        .map_or_else(|| "to upstream".to_string(), |h| h.address());
                    ctx.callbacks.send_local_reply(
                        AppException::internal_error(format!("connection failure '{target}'")),
                        true,
                    );
                }
            }
        }

        self.release_connection(false, ctx.connection_states);
    }

    /// Abandons the call, closing its connection without flushing.
    pub(crate) fn reset_stream(&mut self, connection_states: &ConnectionStateTable) {
        self.release_connection(true, connection_states);
        if self.state != CallState::Complete {
            self.state = CallState::Reset;
        }
    }

    /// Drops the connection handle. A closed connection also loses its entry
    /// in the state table, so a reused id starts fresh.
    fn release_connection(&mut self, close: bool, connection_states: &ConnectionStateTable) {
        if let Some(mut handle) = self.pool_handle.take() {
            handle.cancel();
        }
        self.connection_state = None;
        self.upgrade_response = None;

        if let Some(mut connection) = self.connection.take() {
            if close {
                connection.close(CloseType::NoFlush);
                connection_states.remove(connection.id());
            }
        }
    }

    fn put_outlier(&self, result: OutlierResult) {
        if let Some(host) = &self.host {
            host.outlier_detector().put_result(result);
        }
    }
}
