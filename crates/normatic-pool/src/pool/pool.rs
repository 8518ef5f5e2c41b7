//! Connection pool implementation

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use normatic_core::{ConnectionFactory, NormaticError, Result, TargetDescriptor, Transport};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::config::PoolConfig;
use super::handle::{ConnectionHandle, HandleState};
use super::stats::PoolStats;

/// What `release` did with a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// Returned to the top of the idle stack
    Idled,
    /// Found dead, or holding unread data, and destroyed
    Destroyed,
    /// Not checked out under this lease; nothing happened
    Ignored,
}

/// Result of one reclaim pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReclaimReport {
    /// Checked-out connections moved back to idle
    pub returned_to_idle: usize,
    /// Connections destroyed (dead, expired or over the idle ceiling)
    pub destroyed: usize,
}

impl ReclaimReport {
    fn merge(self, other: ReclaimReport) -> ReclaimReport {
        ReclaimReport {
            returned_to_idle: self.returned_to_idle + other.returned_to_idle,
            destroyed: self.destroyed + other.destroyed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestroyReason {
    Dead,
    UnreadData,
    IdleExpired,
    LifetimeExceeded,
    OverIdleCeiling,
    Requested,
    Shutdown,
}

type Doomed = Vec<(ConnectionHandle, DestroyReason)>;

struct IdleEntry {
    handle: ConnectionHandle,
    idle_since: Instant,
}

struct CheckedOut {
    handle: ConnectionHandle,
    checked_out_at: Instant,
}

enum CheckIn {
    Idled,
    Doomed(ConnectionHandle, DestroyReason),
    NotCheckedOut,
}

/// Why a connection may not be handed to the next caller, if it may not
///
/// Unread bytes belong to the previous owner's reply.
fn unusable(handle: &ConnectionHandle) -> Option<DestroyReason> {
    if handle.check_alive().is_err() {
        Some(DestroyReason::Dead)
    } else if handle.has_pending_data() {
        Some(DestroyReason::UnreadData)
    } else {
        None
    }
}

/// Idle and in-use containers for one target
///
/// A connection id is in at most one of `idle` and `in_use`.
struct TargetSlots {
    descriptor: Arc<TargetDescriptor>,
    /// Back is the most recently idled connection
    idle: VecDeque<IdleEntry>,
    in_use: HashMap<u64, CheckedOut>,
    created: u64,
    destroyed: u64,
}

impl TargetSlots {
    fn new(descriptor: TargetDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            idle: VecDeque::new(),
            in_use: HashMap::new(),
            created: 0,
            destroyed: 0,
        }
    }

    /// Move free checkouts back to idle, then expire and trim the idle stack
    fn reclaim(&mut self, config: &PoolConfig, now: Instant) -> (usize, Doomed) {
        let mut doomed = Doomed::new();

        let mut eligible: Vec<u64> = self
            .in_use
            .iter()
            .filter(|(_, entry)| {
                now.saturating_duration_since(entry.checked_out_at) > config.min_checkout_age()
                    && !entry.handle.has_pending_data()
            })
            .map(|(id, _)| *id)
            .collect();
        // Oldest checkout first, so the most recent one ends up on top of the stack
        eligible.sort_by_key(|id| self.in_use[id].checked_out_at);

        let mut returned = 0;
        for id in eligible {
            let Some(entry) = self.in_use.remove(&id) else {
                continue;
            };
            match entry.handle.check_alive() {
                Ok(()) => {
                    tracing::debug!(connection_id = id, "reclaimed checked-out connection");
                    self.push_idle(entry.handle, now);
                    returned += 1;
                }
                Err(e) => {
                    tracing::debug!(connection_id = id, error = %e, "checked-out connection is dead");
                    doomed.push((entry.handle, DestroyReason::Dead));
                }
            }
        }

        let max_idle_age = config.max_idle_age();
        let max_lifetime = config.max_lifetime();
        let mut kept = VecDeque::with_capacity(self.idle.len());
        for entry in self.idle.drain(..) {
            let reason = if now.saturating_duration_since(entry.idle_since) > max_idle_age {
                Some(DestroyReason::IdleExpired)
            } else if max_lifetime.is_some_and(|lifetime| {
                now.saturating_duration_since(entry.handle.created_at()) > lifetime
            }) {
                Some(DestroyReason::LifetimeExceeded)
            } else {
                unusable(&entry.handle)
            };

            match reason {
                Some(reason) => doomed.push((entry.handle, reason)),
                None => kept.push_back(entry),
            }
        }
        self.idle = kept;

        while self.idle.len() > config.max_free_connections() {
            let Some(entry) = self.idle.pop_front() else {
                break;
            };
            doomed.push((entry.handle, DestroyReason::OverIdleCeiling));
        }

        self.destroyed += doomed.len() as u64;
        (returned, doomed)
    }

    /// Pop the most recently idled usable connection, dooming the rest on the way
    fn pop_idle(&mut self, doomed: &mut Doomed) -> Option<ConnectionHandle> {
        while let Some(entry) = self.idle.pop_back() {
            match unusable(&entry.handle) {
                None => return Some(entry.handle),
                Some(reason) => {
                    tracing::debug!(connection_id = entry.handle.id(), reason = ?reason, "skipping idle connection");
                    self.destroyed += 1;
                    doomed.push((entry.handle, reason));
                }
            }
        }
        None
    }

    fn push_idle(&mut self, handle: ConnectionHandle, now: Instant) {
        handle.set_state(HandleState::Idle);
        handle.touch(now);
        self.idle.push_back(IdleEntry {
            handle,
            idle_since: now,
        });
    }

    fn check_out(&mut self, handle: ConnectionHandle, now: Instant) -> ConnectionHandle {
        handle.set_state(HandleState::InUse);
        handle.touch(now);
        self.in_use.insert(
            handle.id(),
            CheckedOut {
                handle: handle.clone(),
                checked_out_at: now,
            },
        );
        handle
    }

    /// Remove a checkout if `handle` holds its current lease
    fn take_checked_out(&mut self, handle: &ConnectionHandle) -> Option<ConnectionHandle> {
        let current = self
            .in_use
            .get(&handle.id())
            .is_some_and(|entry| entry.handle.lease() == handle.lease());
        if !current {
            return None;
        }
        self.in_use.remove(&handle.id()).map(|entry| entry.handle)
    }

    fn check_in(&mut self, handle: &ConnectionHandle, now: Instant) -> CheckIn {
        let Some(handle) = self.take_checked_out(handle) else {
            return CheckIn::NotCheckedOut;
        };
        match unusable(&handle) {
            None => {
                self.push_idle(handle, now);
                CheckIn::Idled
            }
            Some(reason) => {
                tracing::debug!(connection_id = handle.id(), reason = ?reason, "released connection cannot be reused");
                self.destroyed += 1;
                CheckIn::Doomed(handle, reason)
            }
        }
    }

    fn drain_idle(&mut self) -> Doomed {
        let doomed: Doomed = self
            .idle
            .drain(..)
            .map(|entry| (entry.handle, DestroyReason::Shutdown))
            .collect();
        self.destroyed += doomed.len() as u64;
        doomed
    }

    fn stats(&self) -> PoolStats {
        PoolStats::new(
            self.idle.len(),
            self.in_use.len(),
            self.created,
            self.destroyed,
        )
    }
}

/// A pool of document-store connections keyed by target descriptor
///
/// Idle connections are reused most-recent-first. When no idle connection is
/// available a new one is opened; the pool never waits and never caps the
/// number of checked-out connections. Idle retention is bounded by
/// [`PoolConfig::max_free_connections`] at every reclaim pass, and a reclaim
/// pass runs at the start of every [`acquire`](Self::acquire).
///
/// Each target has its own lock, created lazily, so unrelated targets never
/// contend. Sockets are opened and closed outside the locks.
pub struct ConnectionPool {
    /// Pool configuration
    config: PoolConfig,
    /// Connection factory
    factory: Arc<dyn ConnectionFactory>,
    /// Per-target containers, keyed by the trimmed descriptor string
    targets: RwLock<HashMap<String, Arc<Mutex<TargetSlots>>>>,
    next_id: AtomicU64,
    next_lease: AtomicU64,
}

impl ConnectionPool {
    /// Create a new connection pool with the given configuration and factory
    ///
    /// The configuration is taken as is; use [`try_new`](Self::try_new) to
    /// reject unusable settings such as a zero connect timeout.
    pub fn new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            targets: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            next_lease: AtomicU64::new(1),
        }
    }

    /// Create a new connection pool after validating the configuration
    pub fn try_new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config, factory))
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check out a connection for `target`
    ///
    /// This will:
    /// 1. Run a reclaim pass for the target
    /// 2. Reuse the most recently idled live connection, if any
    /// 3. Otherwise open a new connection through the factory, plus up to
    ///    `warm_batch - 1` more that go straight to idle
    ///
    /// Returns `InvalidTarget` for a malformed descriptor and
    /// `ConnectionUnavailable` if a new connection cannot be opened within
    /// the connect timeout. Failures are never retried here.
    #[tracing::instrument(skip_all, fields(descriptor = tracing::field::Empty))]
    pub async fn acquire(&self, target: &str) -> Result<ConnectionHandle> {
        let slots = self.slots_for(target)?;

        let (reused, doomed, descriptor) = {
            let now = Instant::now();
            let mut slots = slots.lock();
            let (_, mut doomed) = slots.reclaim(&self.config, now);
            let reused = slots
                .pop_idle(&mut doomed)
                .map(|handle| slots.check_out(handle.with_lease(self.next_lease()), now));
            (reused, doomed, Arc::clone(&slots.descriptor))
        };
        tracing::Span::current().record("descriptor", tracing::field::display(&descriptor));

        self.destroy_all(doomed).await;

        if let Some(handle) = reused {
            tracing::debug!(connection_id = handle.id(), "reusing idle connection");
            return Ok(handle);
        }

        let transport = self.open(&descriptor).await?;
        let id = self.next_id();
        let handle =
            ConnectionHandle::new(id, Arc::clone(&descriptor), transport, self.next_lease());

        let handle = {
            let mut slots = slots.lock();
            slots.created += 1;
            slots.check_out(handle, Instant::now())
        };
        tracing::debug!(connection_id = id, "opened new connection");

        let extra = self.config.warm_batch().saturating_sub(1);
        if extra > 0 {
            match self.fill_idle(&slots, &descriptor, extra).await {
                Ok(warmed) => tracing::debug!(warmed, "warmed idle connections"),
                Err(e) => tracing::debug!(error = %e, "warm-up skipped"),
            }
        }
        Ok(handle)
    }

    /// Open idle connections for `target` up to the idle ceiling
    ///
    /// Returns how many were opened. Fails only if not even one could be
    /// opened while idle was below the ceiling.
    #[tracing::instrument(skip_all, fields(descriptor = tracing::field::Empty))]
    pub async fn prewarm(&self, target: &str) -> Result<usize> {
        let slots = self.slots_for(target)?;
        let descriptor = Arc::clone(&slots.lock().descriptor);
        tracing::Span::current().record("descriptor", tracing::field::display(&descriptor));

        self.fill_idle(&slots, &descriptor, self.config.max_free_connections())
            .await
    }

    /// Return a checked-out connection
    ///
    /// Live, quiet connections go back on top of the idle stack. Dead ones,
    /// and ones released with an unread reply still buffered, are destroyed.
    /// Releasing a handle that is not checked out under its lease (double
    /// release, or a checkout already reclaimed by the pool) is a logged
    /// no-op.
    #[tracing::instrument(skip_all, fields(descriptor = %handle.target(), connection_id = handle.id()))]
    pub async fn release(&self, handle: &ConnectionHandle) -> ReleaseOutcome {
        let Some(slots) = self.existing_slots(handle.target().key()) else {
            tracing::warn!("release for a target this pool does not know");
            return ReleaseOutcome::Ignored;
        };

        let check_in = slots.lock().check_in(handle, Instant::now());
        match check_in {
            CheckIn::Idled => {
                tracing::debug!("connection returned to idle");
                ReleaseOutcome::Idled
            }
            CheckIn::Doomed(handle, reason) => {
                let _ = self.destroy_handle(&handle, reason).await;
                ReleaseOutcome::Destroyed
            }
            CheckIn::NotCheckedOut => {
                let err = NormaticError::InvalidHandle(format!(
                    "connection {} is not checked out under lease {}",
                    handle.id(),
                    handle.lease()
                ));
                tracing::debug!(error = %err, "ignoring release");
                ReleaseOutcome::Ignored
            }
        }
    }

    /// Destroy a checked-out connection the caller knows to be broken
    ///
    /// Returns `InvalidHandle` if the handle is not checked out under its
    /// lease, including when it has already been destroyed. The transport is
    /// closed at most once.
    #[tracing::instrument(skip_all, fields(descriptor = %handle.target(), connection_id = handle.id()))]
    pub async fn destroy(&self, handle: &ConnectionHandle) -> Result<()> {
        let taken = self.existing_slots(handle.target().key()).and_then(|slots| {
            let mut slots = slots.lock();
            let taken = slots.take_checked_out(handle);
            if taken.is_some() {
                slots.destroyed += 1;
            }
            taken
        });

        match taken {
            Some(handle) => self.destroy_handle(&handle, DestroyReason::Requested).await,
            None => {
                let err = NormaticError::InvalidHandle(format!(
                    "connection {} is not checked out under lease {}",
                    handle.id(),
                    handle.lease()
                ));
                tracing::warn!(error = %err, "refusing to destroy");
                Err(err)
            }
        }
    }

    /// Run a reclaim pass for one target
    ///
    /// Unknown targets report nothing reclaimed.
    pub async fn reclaim(&self, target: &str) -> ReclaimReport {
        let Some(slots) = self.existing_slots(target.trim()) else {
            return ReclaimReport::default();
        };
        self.reclaim_slots(&slots).await
    }

    /// Run a reclaim pass for every known target
    pub async fn reclaim_all(&self) -> ReclaimReport {
        let mut report = ReclaimReport::default();
        for slots in self.all_slots() {
            report = report.merge(self.reclaim_slots(&slots).await);
        }
        report
    }

    /// Destroy every idle connection of one target, returning how many were closed
    pub async fn close_idle(&self, target: &str) -> usize {
        let Some(slots) = self.existing_slots(target.trim()) else {
            return 0;
        };
        let doomed = slots.lock().drain_idle();
        let count = doomed.len();
        self.destroy_all(doomed).await;
        count
    }

    /// Destroy every idle connection of every target
    ///
    /// Checked-out connections stay with their owners and are destroyed when
    /// released dead or reclaimed by a later pass.
    pub async fn shutdown(&self) -> usize {
        let mut count = 0;
        for slots in self.all_slots() {
            let doomed = slots.lock().drain_idle();
            count += doomed.len();
            self.destroy_all(doomed).await;
        }
        tracing::info!(closed = count, "connection pool shut down");
        count
    }

    /// Statistics for one target, if the pool has seen it
    pub fn stats(&self, target: &str) -> Option<PoolStats> {
        self.existing_slots(target.trim())
            .map(|slots| slots.lock().stats())
    }

    /// Statistics summed over every target
    pub fn total_stats(&self) -> PoolStats {
        self.all_slots()
            .iter()
            .map(|slots| slots.lock().stats())
            .fold(PoolStats::default(), PoolStats::merge)
    }

    /// Known targets, with passwords redacted
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .all_slots()
            .iter()
            .map(|slots| slots.lock().descriptor.to_string())
            .collect();
        targets.sort();
        targets
    }

    /// Ids of the idle (bottom to top) and checked-out connections of a target
    #[cfg(test)]
    pub(crate) fn snapshot(&self, target: &str) -> (Vec<u64>, Vec<u64>) {
        self.existing_slots(target.trim())
            .map(|slots| {
                let slots = slots.lock();
                let idle = slots.idle.iter().map(|entry| entry.handle.id()).collect();
                let mut in_use: Vec<u64> = slots.in_use.keys().copied().collect();
                in_use.sort();
                (idle, in_use)
            })
            .unwrap_or_default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn next_lease(&self) -> u64 {
        self.next_lease.fetch_add(1, Ordering::SeqCst)
    }

    fn existing_slots(&self, key: &str) -> Option<Arc<Mutex<TargetSlots>>> {
        self.targets.read().get(key).cloned()
    }

    fn all_slots(&self) -> Vec<Arc<Mutex<TargetSlots>>> {
        self.targets.read().values().cloned().collect()
    }

    /// Find or lazily create the containers for a target
    fn slots_for(&self, target: &str) -> Result<Arc<Mutex<TargetSlots>>> {
        if let Some(slots) = self.existing_slots(target.trim()) {
            return Ok(slots);
        }

        let descriptor = TargetDescriptor::parse(target)?;
        let mut targets = self.targets.write();
        let slots = targets
            .entry(descriptor.key().to_string())
            .or_insert_with(|| {
                tracing::debug!(descriptor = %descriptor, "tracking new target");
                Arc::new(Mutex::new(TargetSlots::new(descriptor)))
            });
        Ok(Arc::clone(slots))
    }

    async fn reclaim_slots(&self, slots: &Mutex<TargetSlots>) -> ReclaimReport {
        let (returned, doomed) = slots.lock().reclaim(&self.config, Instant::now());
        let report = ReclaimReport {
            returned_to_idle: returned,
            destroyed: doomed.len(),
        };
        self.destroy_all(doomed).await;
        report
    }

    /// Open connections straight into idle until it holds `want`, capped by
    /// the idle ceiling
    async fn fill_idle(
        &self,
        slots: &Mutex<TargetSlots>,
        descriptor: &Arc<TargetDescriptor>,
        want: usize,
    ) -> Result<usize> {
        let want = want.min(self.config.max_free_connections());
        let mut opened = 0;

        while slots.lock().idle.len() < want {
            let transport = match self.open(descriptor).await {
                Ok(transport) => transport,
                Err(e) if opened == 0 => return Err(e),
                Err(_) => break,
            };
            let handle = ConnectionHandle::new(
                self.next_id(),
                Arc::clone(descriptor),
                transport,
                self.next_lease(),
            );

            let surplus = {
                let mut slots = slots.lock();
                slots.created += 1;
                if slots.idle.len() < want {
                    slots.push_idle(handle, Instant::now());
                    None
                } else {
                    slots.destroyed += 1;
                    Some(handle)
                }
            };

            match surplus {
                None => opened += 1,
                Some(handle) => {
                    // Another caller filled idle while this one was connecting
                    let _ = self
                        .destroy_handle(&handle, DestroyReason::OverIdleCeiling)
                        .await;
                    break;
                }
            }
        }
        Ok(opened)
    }

    async fn open(&self, descriptor: &TargetDescriptor) -> Result<Arc<dyn Transport>> {
        let timeout = self.config.connect_timeout();
        let result = tokio::time::timeout(timeout, self.factory.open(descriptor)).await;

        let err = match result {
            Ok(Ok(transport)) => return Ok(transport),
            Ok(Err(err @ NormaticError::ConnectionUnavailable { .. })) => err,
            Ok(Err(err)) => NormaticError::unavailable(descriptor.to_string(), err),
            Err(_) => NormaticError::unavailable(
                descriptor.to_string(),
                format!("connect timed out after {:?}", timeout),
            ),
        };
        tracing::warn!(error = %err, "failed to open connection");
        Err(err)
    }

    async fn destroy_all(&self, doomed: Doomed) {
        for (handle, reason) in doomed {
            let _ = self.destroy_handle(&handle, reason).await;
        }
    }

    /// Close the transport exactly once
    async fn destroy_handle(&self, handle: &ConnectionHandle, reason: DestroyReason) -> Result<()> {
        if !handle.mark_destroyed() {
            let err = NormaticError::InvalidHandle(format!(
                "connection {} was already destroyed",
                handle.id()
            ));
            tracing::warn!(error = %err, "double destroy prevented");
            return Err(err);
        }

        if let Err(e) = handle.underlying().close().await {
            tracing::warn!(connection_id = handle.id(), error = %e, "error closing transport");
        }
        tracing::debug!(connection_id = handle.id(), reason = ?reason, "destroyed connection");
        Ok(())
    }
}
