//! Per-physical-connection protocol state.
//!
//! A pooled connection outlives the calls multiplexed over it. Its sequence
//! counter and upgrade status live in a side table keyed by `ConnectionId`
//! rather than on any single call; the pool still owns the connection.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::traits::ConnectionId;

/// Protocol conversation state of one upstream connection.
#[derive(Debug, Default)]
pub struct ConnectionState {
    next_sequence_id: AtomicI32,
    upgraded: AtomicBool,
}

impl ConnectionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next upstream sequence id. Ids wrap to 0 after `i32::MAX`.
    pub fn next_sequence_id(&self) -> i32 {
        let step = |id: i32| Some(if id == i32::MAX { 0 } else { id + 1 });
        match self
            .next_sequence_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, step)
        {
            Ok(previous) | Err(previous) => previous,
        }
    }

    #[must_use]
    pub fn is_upgraded(&self) -> bool {
        self.upgraded.load(Ordering::Acquire)
    }

    pub fn mark_upgraded(&self) {
        self.upgraded.store(true, Ordering::Release);
    }
}

/// Concurrent side table of connection states, shared by all workers.
#[derive(Debug, Default)]
pub struct ConnectionStateTable {
    states: DashMap<ConnectionId, Arc<ConnectionState>>,
}

impl ConnectionStateTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state for `id`, creating it on first use.
    pub fn get_or_create(&self, id: ConnectionId) -> Arc<ConnectionState> {
        Arc::clone(
            self.states
                .entry(id)
                .or_insert_with(|| Arc::new(ConnectionState::new()))
                .value(),
        )
    }

    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionState>> {
        self.states.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Drops the state of a connection the pool has closed.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionState>> {
        self.states.remove(&id).map(|(_, state)| state)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
