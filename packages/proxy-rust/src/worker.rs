//! Event-driven owner of one `CallRouter`.
//!
//! The router is single-threaded. `RouterWorker` moves it onto a tokio task
//! and feeds it `RouterEvent`s from an mpsc channel in arrival order, so
//! downstream decode events, pool completions and upstream bytes for one
//! connection never race.
//!
//! Decode events that arrive while the router is waiting for a connection
//! are held back and replayed in order once it is ready for them.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rpcgate_core::MessageMetadata;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::router::CallRouter;
use crate::upstream::{ConnectionEvent, HostDescription, PoolFailureReason, UpstreamConnection};

// ---------------------------------------------------------------------------
// RouterEvent
// ---------------------------------------------------------------------------

/// Everything that can happen to a router.
pub enum RouterEvent {
    TransportBegin,
    MessageBegin(MessageMetadata),
    MessageBody(Bytes),
    MessageEnd,
    TransportEnd,
    PoolReady {
        connection: Box<dyn UpstreamConnection>,
        host: Arc<dyn HostDescription>,
    },
    PoolFailure {
        reason: PoolFailureReason,
        host: Option<Arc<dyn HostDescription>>,
    },
    UpstreamData {
        data: BytesMut,
        end_stream: bool,
    },
    Connection(ConnectionEvent),
}

impl std::fmt::Debug for RouterEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransportBegin => f.write_str("TransportBegin"),
            Self::MessageBegin(metadata) => f
                .debug_tuple("MessageBegin")
                .field(&metadata.method_name())
                .finish(),
            Self::MessageBody(body) => f.debug_tuple("MessageBody").field(&body.len()).finish(),
            Self::MessageEnd => f.write_str("MessageEnd"),
            Self::TransportEnd => f.write_str("TransportEnd"),
            Self::PoolReady { connection, .. } => f
                .debug_struct("PoolReady")
                .field("connection", &connection.id())
                .finish_non_exhaustive(),
            Self::PoolFailure { reason, .. } => f
                .debug_struct("PoolFailure")
                .field("reason", reason)
                .finish_non_exhaustive(),
            Self::UpstreamData { data, end_stream } => f
                .debug_struct("UpstreamData")
                .field("bytes", &data.len())
                .field("end_stream", end_stream)
                .finish(),
            Self::Connection(event) => f.debug_tuple("Connection").field(event).finish(),
        }
    }
}

impl RouterEvent {
    /// Whether the event comes from the downstream decoder.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::TransportBegin
                | Self::MessageBegin(_)
                | Self::MessageBody(_)
                | Self::MessageEnd
                | Self::TransportEnd
        )
    }
}

/// Applies `event`, or holds it when it is a decode event and the router has
/// paused decoding. Held events are replayed as soon as decoding resumes.
fn dispatch(router: &mut CallRouter, held: &mut VecDeque<RouterEvent>, event: RouterEvent) {
    if event.is_decode() && (router.decoding_paused() || !held.is_empty()) {
        trace!(?event, held = held.len(), "decoding paused, holding event");
        held.push_back(event);
        return;
    }

    apply(router, event);
    while !router.decoding_paused() {
        let Some(event) = held.pop_front() else {
            break;
        };
        apply(router, event);
    }
}

fn apply(router: &mut CallRouter, event: RouterEvent) {
    match event {
        RouterEvent::TransportBegin => {
            router.on_transport_begin();
        }
        RouterEvent::MessageBegin(metadata) => {
            router.on_message_begin(metadata);
        }
        RouterEvent::MessageBody(body) => {
            router.on_message_body(&body);
        }
        RouterEvent::MessageEnd => {
            router.on_message_end();
        }
        RouterEvent::TransportEnd => {
            router.on_transport_end();
        }
        RouterEvent::PoolReady { connection, host } => router.on_pool_ready(connection, host),
        RouterEvent::PoolFailure { reason, host } => router.on_pool_failure(reason, host),
        RouterEvent::UpstreamData {
            mut data,
            end_stream,
        } => router.on_upstream_data(&mut data, end_stream),
        RouterEvent::Connection(event) => router.on_event(event),
    }
}

// ---------------------------------------------------------------------------
// RouterWorker
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("router worker is stopped")]
    Stopped,
}

/// Handle to a router running on its own tokio task.
///
/// Queued events are always delivered before a stop takes effect. When the
/// worker stops, the router is destroyed: any active upstream call is reset
/// and decode events still held for it are dropped.
pub struct RouterWorker {
    tx: Option<mpsc::Sender<RouterEvent>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl RouterWorker {
    /// Spawns the worker task. `capacity` bounds the event queue.
    #[must_use]
    pub fn start(mut router: CallRouter, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<RouterEvent>(capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut held = VecDeque::new();
            loop {
                tokio::select! {
                    biased;
                    event = rx.recv() => {
                        match event {
                            Some(event) => dispatch(&mut router, &mut held, event),
                            None => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }

            debug!(dropped = held.len(), "router worker stopping");
            router.on_destroy();
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Queues an event for the router.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Stopped` once the worker has been stopped.
    pub async fn submit(&self, event: RouterEvent) -> Result<(), WorkerError> {
        match &self.tx {
            Some(tx) => tx.send(event).await.map_err(|_| WorkerError::Stopped),
            None => Err(WorkerError::Stopped),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the worker after it has applied every queued event.
    pub async fn stop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.shutdown_tx.take();
    }

    /// Stops the worker without applying events still in the queue.
    pub async fn abort(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
