//! Pooled connection handles

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use normatic_core::{NormaticError, Result, TargetDescriptor, Transport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a pooled connection
///
/// `Idle ⇄ InUse → Destroyed`. `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    Idle,
    InUse,
    Destroyed,
}

struct HandleInner {
    id: u64,
    target: Arc<TargetDescriptor>,
    transport: Arc<dyn Transport>,
    created_at: Instant,
    last_used_at: Mutex<Instant>,
    state: Mutex<HandleState>,
}

/// A connection checked out of the pool
///
/// Cloning a handle is cheap; every clone refers to the same physical
/// connection. Each hand-out by the pool carries a fresh lease, so a handle
/// kept past its checkout (after the pool reclaimed it) cannot release the
/// connection out from under the next owner.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
    lease: u64,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: u64,
        target: Arc<TargetDescriptor>,
        transport: Arc<dyn Transport>,
        lease: u64,
    ) -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(HandleInner {
                id,
                target,
                transport,
                created_at: now,
                last_used_at: Mutex::new(now),
                state: Mutex::new(HandleState::InUse),
            }),
            lease,
        }
    }

    /// The same connection under a new lease
    pub(crate) fn with_lease(&self, lease: u64) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            lease,
        }
    }

    /// Identity of the physical connection
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Checkout generation this handle was issued under
    pub fn lease(&self) -> u64 {
        self.lease
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.inner.target
    }

    /// Logical database encoded in the target descriptor
    pub fn target_database_name(&self) -> &str {
        self.inner.target.database()
    }

    /// The raw transport for protocol-level use
    pub fn underlying(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    /// When the connection was last checked out or returned
    pub fn last_used_at(&self) -> Instant {
        *self.inner.last_used_at.lock()
    }

    /// Time since the connection was opened
    pub fn age(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    pub fn state(&self) -> HandleState {
        *self.inner.state.lock()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == HandleState::Destroyed
    }

    /// True iff the transport reports itself usable and the handle has not
    /// been destroyed
    pub fn is_alive(&self) -> bool {
        !self.is_destroyed() && self.inner.transport.is_healthy()
    }

    /// Whether both handles refer to the same physical connection
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn has_pending_data(&self) -> bool {
        self.inner.transport.has_pending_data()
    }

    /// Liveness check with the failure described
    pub(crate) fn check_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(NormaticError::TransportDead(format!(
                "connection {} was destroyed",
                self.id()
            )));
        }
        if !self.inner.transport.is_healthy() {
            return Err(NormaticError::TransportDead(format!(
                "connection {} to {} reports unhealthy",
                self.id(),
                self.inner.target
            )));
        }
        Ok(())
    }

    pub(crate) fn touch(&self, now: Instant) {
        *self.inner.last_used_at.lock() = now;
    }

    /// Move between `Idle` and `InUse`; a destroyed handle stays destroyed
    pub(crate) fn set_state(&self, next: HandleState) {
        let mut state = self.inner.state.lock();
        if *state != HandleState::Destroyed {
            *state = next;
        }
    }

    /// Transition to `Destroyed`; returns false if it already was
    pub(crate) fn mark_destroyed(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state == HandleState::Destroyed {
            return false;
        }
        *state = HandleState::Destroyed;
        true
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("lease", &self.lease)
            .field("target", &self.inner.target.to_string())
            .field("state", &self.state())
            .finish()
    }
}
