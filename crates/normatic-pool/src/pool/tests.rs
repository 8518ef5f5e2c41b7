//! Tests for connection pool functionality

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use normatic_core::{ConnectionFactory, NormaticError, Result, TargetDescriptor, Transport};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::PoolConfig;
use super::handle::{ConnectionHandle, HandleState};
use super::pool::{ConnectionPool, ReclaimReport, ReleaseOutcome};
use super::stats::PoolStats;

/// Mock transport whose health and pending data are set by the test
struct MockTransport {
    healthy: AtomicBool,
    pending: AtomicBool,
    closes: AtomicUsize,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            pending: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        }
    }

    fn kill(&self) {
        self.healthy.store(false, Ordering::SeqCst);
    }

    fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && self.closes.load(Ordering::SeqCst) == 0
    }

    fn has_pending_data(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Mock factory that counts opens and refuses hosts named "down"
struct MockConnectionFactory {
    counter: AtomicUsize,
    delay: Option<Duration>,
}

impl MockConnectionFactory {
    fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            delay: None,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            counter: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    fn count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn open(&self, target: &TargetDescriptor) -> Result<Arc<dyn Transport>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if target.hosts()[0].host == "down" {
            return Err(NormaticError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockTransport::new()))
    }
}

fn mock(handle: &ConnectionHandle) -> &MockTransport {
    handle
        .underlying()
        .as_any()
        .downcast_ref::<MockTransport>()
        .expect("mock transport")
}

fn assert_disjoint(pool: &ConnectionPool, target: &str) {
    let (idle, in_use) = pool.snapshot(target);
    let idle: HashSet<u64> = idle.into_iter().collect();
    let in_use: HashSet<u64> = in_use.into_iter().collect();
    assert!(
        idle.is_disjoint(&in_use),
        "idle {:?} and in-use {:?} overlap",
        idle,
        in_use
    );
}

const A: &str = "mongodb://localhost:27017/alpha";
const B: &str = "mongodb://localhost:27017/beta";

// =============================================================================
// PoolConfig tests
// =============================================================================

#[test]
fn test_pool_config_defaults() {
    let config = PoolConfig::default();
    assert_eq!(config.max_free_connections(), 3);
    assert_eq!(config.min_checkout_age(), Duration::from_millis(300));
    assert_eq!(config.max_idle_age(), Duration::from_secs(120));
    assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    assert!(config.max_lifetime().is_none());
    assert_eq!(config.warm_batch(), 1);
}

#[test]
fn test_pool_config_builders() {
    let config = PoolConfig::new(5)
        .with_min_checkout_age_ms(50)
        .with_max_idle_age_ms(30_000)
        .with_max_lifetime_ms(3_600_000)
        .with_connect_timeout_ms(2_000);

    assert_eq!(config.max_free_connections(), 5);
    assert_eq!(config.min_checkout_age(), Duration::from_millis(50));
    assert_eq!(config.max_idle_age(), Duration::from_millis(30_000));
    assert_eq!(config.max_lifetime(), Some(Duration::from_millis(3_600_000)));
    assert_eq!(config.connect_timeout(), Duration::from_millis(2_000));
}

#[test]
fn test_pool_config_from_toml_keeps_defaults_for_missing_keys() {
    let config = PoolConfig::from_toml_str(
        r#"
        max_free_connections = 8
        max_idle_age_ms = 45000
        "#,
    )
    .expect("parse config");

    assert_eq!(
        config,
        PoolConfig::default()
            .with_max_free_connections(8)
            .with_max_idle_age_ms(45_000)
    );
}

#[test]
fn test_pool_config_rejects_empty_warm_batch() {
    let err = PoolConfig::from_toml_str("warm_batch = 0").unwrap_err();
    assert!(matches!(err, NormaticError::Configuration(_)));
    assert_eq!(
        PoolConfig::from_toml_str("warm_batch = 4")
            .expect("parse config")
            .warm_batch(),
        4
    );
}

#[test]
fn test_pool_config_rejects_zero_connect_timeout() {
    let err = PoolConfig::from_toml_str("connect_timeout_ms = 0").unwrap_err();
    assert!(matches!(err, NormaticError::Configuration(_)));
}

#[test]
fn test_pool_config_rejects_unparseable_toml() {
    let err = PoolConfig::from_toml_str("max_free_connections = \"lots\"").unwrap_err();
    assert!(matches!(err, NormaticError::Configuration(_)));
}

#[test]
fn test_pool_config_load_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pool.toml");
    std::fs::write(&path, "min_checkout_age_ms = 150\nmax_lifetime_ms = 600000\n")
        .expect("write config");

    let config = PoolConfig::load(&path).expect("load config");
    assert_eq!(config.min_checkout_age(), Duration::from_millis(150));
    assert_eq!(config.max_lifetime(), Some(Duration::from_millis(600_000)));
}

#[test]
fn test_pool_config_serialization() {
    let config = PoolConfig::new(4).with_max_lifetime_ms(60_000);
    let json = serde_json::to_string(&config).expect("serialize");
    let deserialized: PoolConfig = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(deserialized, config);
}

// =============================================================================
// PoolStats tests
// =============================================================================

#[test]
fn test_pool_stats_utilization() {
    let stats = PoolStats::new(5, 5, 10, 0);
    assert_eq!(stats.total(), 10);
    assert!((stats.utilization() - 0.5).abs() < 0.001);

    let empty = PoolStats::default();
    assert!((empty.utilization() - 0.0).abs() < 0.001);
}

#[test]
fn test_pool_stats_is_full() {
    assert!(PoolStats::new(0, 4, 4, 0).is_full());
    assert!(!PoolStats::new(1, 4, 5, 0).is_full());
    assert!(!PoolStats::default().is_full());
}

#[test]
fn test_pool_stats_merge() {
    let merged = PoolStats::new(1, 2, 3, 4).merge(PoolStats::new(10, 20, 30, 40));
    assert_eq!(merged, PoolStats::new(11, 22, 33, 44));
}

// =============================================================================
// ConnectionPool tests
// =============================================================================

#[tokio::test]
async fn test_acquire_opens_new_connection() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::default(), factory.clone());

    let conn = pool.acquire(A).await.expect("acquire");
    assert!(conn.is_alive());
    assert_eq!(conn.state(), HandleState::InUse);
    assert_eq!(conn.target_database_name(), "alpha");
    assert_eq!(factory.count(), 1);

    let stats = pool.stats(A).expect("stats");
    assert_eq!(stats.in_use(), 1);
    assert_eq!(stats.idle(), 0);
    assert_eq!(stats.created(), 1);
}

#[tokio::test]
async fn test_concurrent_acquires_without_release_open_distinct_connections() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::new(3), factory.clone());

    let results = futures::future::join_all((0..5).map(|_| pool.acquire(A))).await;
    let handles: Vec<ConnectionHandle> = results
        .into_iter()
        .collect::<Result<_>>()
        .expect("all acquires succeed");

    let ids: HashSet<u64> = handles.iter().map(ConnectionHandle::id).collect();
    assert_eq!(ids.len(), 5);
    assert!(handles.iter().all(ConnectionHandle::is_alive));
    assert_eq!(factory.count(), 5);

    let stats = pool.stats(A).expect("stats");
    assert_eq!(stats.in_use(), 5);
    assert_eq!(stats.idle(), 0);
    assert_disjoint(&pool, A);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_acquire_from_many_tasks() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = Arc::new(ConnectionPool::new(PoolConfig::new(3), factory.clone()));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let conn = pool.acquire(A).await.expect("acquire");
                tokio::task::yield_now().await;
                pool.release(&conn).await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.expect("task"), ReleaseOutcome::Idled);
    }

    let stats = pool.stats(A).expect("stats");
    assert_eq!(stats.in_use(), 0);
    assert_eq!(stats.total() as u64, stats.created() - stats.destroyed());
    assert_disjoint(&pool, A);

    pool.reclaim(A).await;
    assert!(pool.stats(A).expect("stats").idle() <= 3);
}

#[tokio::test]
async fn test_release_then_acquire_reuses_same_connection() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::default(), factory.clone());

    let first = pool.acquire(B).await.expect("acquire");
    assert_eq!(pool.release(&first).await, ReleaseOutcome::Idled);
    assert_eq!(first.state(), HandleState::Idle);

    let second = pool.acquire(B).await.expect("acquire");
    assert!(second.same_connection(&first));
    assert_ne!(second.lease(), first.lease());
    assert_eq!(factory.count(), 1);
}

#[tokio::test]
async fn test_idle_connections_are_reused_last_in_first_out() {
    let pool = ConnectionPool::new(PoolConfig::new(5), MockConnectionFactory::new());

    let c1 = pool.acquire(A).await.expect("acquire");
    let c2 = pool.acquire(A).await.expect("acquire");
    let c3 = pool.acquire(A).await.expect("acquire");

    pool.release(&c2).await;
    pool.release(&c1).await;
    pool.release(&c3).await;

    let (idle, _) = pool.snapshot(A);
    assert_eq!(idle, vec![c2.id(), c1.id(), c3.id()]);

    assert_eq!(pool.acquire(A).await.expect("acquire").id(), c3.id());
    assert_eq!(pool.acquire(A).await.expect("acquire").id(), c1.id());
    assert_eq!(pool.acquire(A).await.expect("acquire").id(), c2.id());
}

#[tokio::test]
async fn test_double_release_is_ignored() {
    let pool = ConnectionPool::new(PoolConfig::default(), MockConnectionFactory::new());

    let conn = pool.acquire(A).await.expect("acquire");
    assert_eq!(pool.release(&conn).await, ReleaseOutcome::Idled);
    assert_eq!(pool.release(&conn).await, ReleaseOutcome::Ignored);

    let stats = pool.stats(A).expect("stats");
    assert_eq!(stats.idle(), 1);
    assert_eq!(stats.in_use(), 0);
    assert_disjoint(&pool, A);
}

#[tokio::test]
async fn test_release_of_dead_connection_destroys_it() {
    let pool = ConnectionPool::new(PoolConfig::default(), MockConnectionFactory::new());

    let conn = pool.acquire(A).await.expect("acquire");
    mock(&conn).kill();

    assert_eq!(pool.release(&conn).await, ReleaseOutcome::Destroyed);
    assert!(conn.is_destroyed());
    assert_eq!(mock(&conn).close_count(), 1);

    let stats = pool.stats(A).expect("stats");
    assert_eq!(stats.total(), 0);
    assert_eq!(stats.destroyed(), 1);
}

#[tokio::test]
async fn test_release_with_unread_reply_destroys_connection() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::default(), factory.clone());

    let first = pool.acquire(A).await.expect("acquire");
    mock(&first).set_pending(true);
    assert_eq!(pool.release(&first).await, ReleaseOutcome::Destroyed);
    assert!(first.is_destroyed());
    assert_eq!(mock(&first).close_count(), 1);

    let second = pool.acquire(A).await.expect("acquire");
    assert!(!second.same_connection(&first));
    assert!(!mock(&second).has_pending_data());
    assert_eq!(factory.count(), 2);
}

#[tokio::test]
async fn test_idle_connection_with_late_reply_is_not_handed_out() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::default(), factory.clone());

    let first = pool.acquire(A).await.expect("acquire");
    assert_eq!(pool.release(&first).await, ReleaseOutcome::Idled);
    mock(&first).set_pending(true);

    let second = pool.acquire(A).await.expect("acquire");
    assert!(!second.same_connection(&first));
    assert!(first.is_destroyed());
    assert_eq!(pool.snapshot(A), (vec![], vec![second.id()]));
}

#[tokio::test]
async fn test_release_for_unknown_target_is_ignored() {
    let pool_a = ConnectionPool::new(PoolConfig::default(), MockConnectionFactory::new());
    let pool_b = ConnectionPool::new(PoolConfig::default(), MockConnectionFactory::new());

    let conn = pool_a.acquire(A).await.expect("acquire");
    assert_eq!(pool_b.release(&conn).await, ReleaseOutcome::Ignored);
    assert_eq!(pool_a.stats(A).expect("stats").in_use(), 1);
}

#[tokio::test]
async fn test_reclaim_destroys_dead_checked_out_connection() {
    let config = PoolConfig::default().with_min_checkout_age_ms(0);
    let pool = ConnectionPool::new(config, MockConnectionFactory::new());

    let conn = pool.acquire(A).await.expect("acquire");
    mock(&conn).kill();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = pool.reclaim(A).await;
    assert_eq!(
        report,
        ReclaimReport {
            returned_to_idle: 0,
            destroyed: 1
        }
    );
    assert!(conn.is_destroyed());
    assert_eq!(mock(&conn).close_count(), 1);
    assert_eq!(pool.snapshot(A), (vec![], vec![]));
}

#[tokio::test]
async fn test_reclaim_destroys_dead_idle_connection() {
    let pool = ConnectionPool::new(PoolConfig::default(), MockConnectionFactory::new());

    let conn = pool.acquire(A).await.expect("acquire");
    pool.release(&conn).await;
    mock(&conn).kill();

    let report = pool.reclaim(A).await;
    assert_eq!(report.destroyed, 1);
    assert_eq!(pool.snapshot(A), (vec![], vec![]));
    assert_eq!(mock(&conn).close_count(), 1);
}

#[tokio::test]
async fn test_acquire_skips_dead_idle_connection() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::default(), factory.clone());

    let stale = pool.acquire(A).await.expect("acquire");
    pool.release(&stale).await;
    mock(&stale).kill();

    let fresh = pool.acquire(A).await.expect("acquire");
    assert!(!fresh.same_connection(&stale));
    assert!(fresh.is_alive());
    assert!(stale.is_destroyed());
    assert_eq!(factory.count(), 2);
}

#[tokio::test]
async fn test_reclaim_returns_quiet_checkouts_to_idle() {
    let config = PoolConfig::default().with_min_checkout_age_ms(0);
    let pool = ConnectionPool::new(config, MockConnectionFactory::new());

    let conn = pool.acquire(A).await.expect("acquire");
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = pool.reclaim(A).await;
    assert_eq!(report.returned_to_idle, 1);
    assert_eq!(conn.state(), HandleState::Idle);
    assert_eq!(pool.snapshot(A), (vec![conn.id()], vec![]));
}

#[tokio::test]
async fn test_reclaim_respects_checkout_grace_period() {
    let config = PoolConfig::default().with_min_checkout_age_ms(60_000);
    let pool = ConnectionPool::new(config, MockConnectionFactory::new());

    let conn = pool.acquire(A).await.expect("acquire");
    let report = pool.reclaim(A).await;

    assert_eq!(report, ReclaimReport::default());
    assert_eq!(pool.snapshot(A), (vec![], vec![conn.id()]));
}

#[tokio::test]
async fn test_reclaim_never_takes_connection_with_pending_data() {
    let config = PoolConfig::default().with_min_checkout_age_ms(0);
    let pool = ConnectionPool::new(config, MockConnectionFactory::new());

    let conn = pool.acquire(A).await.expect("acquire");
    mock(&conn).set_pending(true);
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(pool.reclaim(A).await.returned_to_idle, 0);
    let next = pool.acquire(A).await.expect("acquire");
    assert!(!next.same_connection(&conn));

    mock(&conn).set_pending(false);
    tokio::time::sleep(Duration::from_millis(5)).await;
    let report = pool.reclaim(A).await;
    assert_eq!(report.returned_to_idle, 2);
}

#[tokio::test]
async fn test_stale_lease_cannot_release_reissued_connection() {
    let config = PoolConfig::default().with_min_checkout_age_ms(0);
    let pool = ConnectionPool::new(config, MockConnectionFactory::new());

    let first = pool.acquire(A).await.expect("acquire");
    tokio::time::sleep(Duration::from_millis(5)).await;

    // The reclaim pass inside acquire hands the quiet connection out again
    let second = pool.acquire(A).await.expect("acquire");
    assert!(second.same_connection(&first));

    assert_eq!(pool.release(&first).await, ReleaseOutcome::Ignored);
    assert_eq!(pool.snapshot(A), (vec![], vec![second.id()]));

    assert_eq!(pool.release(&second).await, ReleaseOutcome::Idled);
}

#[tokio::test]
async fn test_idle_connection_expires_after_max_idle_age() {
    let config = PoolConfig::default().with_max_idle_age_ms(20);
    let pool = ConnectionPool::new(config, MockConnectionFactory::new());

    let conn = pool.acquire(A).await.expect("acquire");
    pool.release(&conn).await;
    tokio::time::sleep(Duration::from_millis(40)).await;

    let report = pool.reclaim(A).await;
    assert_eq!(report.destroyed, 1);
    assert!(conn.is_destroyed());
    assert_eq!(pool.stats(A).expect("stats").idle(), 0);
}

#[tokio::test]
async fn test_connection_retired_after_max_lifetime() {
    let config = PoolConfig::default().with_max_lifetime_ms(20);
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(config, factory.clone());

    let conn = pool.acquire(A).await.expect("acquire");
    tokio::time::sleep(Duration::from_millis(40)).await;
    pool.release(&conn).await;

    let next = pool.acquire(A).await.expect("acquire");
    assert!(!next.same_connection(&conn));
    assert!(conn.is_destroyed());
    assert_eq!(factory.count(), 2);
}

#[tokio::test]
async fn test_reclaim_trims_idle_to_ceiling_keeping_newest() {
    let pool = ConnectionPool::new(PoolConfig::new(2), MockConnectionFactory::new());

    let mut handles = Vec::new();
    for _ in 0..5 {
        handles.push(pool.acquire(A).await.expect("acquire"));
    }
    for handle in &handles {
        pool.release(handle).await;
    }
    assert_eq!(pool.stats(A).expect("stats").idle(), 5);

    let report = pool.reclaim(A).await;
    assert_eq!(report.destroyed, 3);
    assert_eq!(pool.snapshot(A).0, vec![handles[3].id(), handles[4].id()]);
    for handle in &handles[..3] {
        assert!(handle.is_destroyed());
        assert_eq!(mock(handle).close_count(), 1);
    }
}

#[tokio::test]
async fn test_destroy_closes_transport_exactly_once() {
    let pool = ConnectionPool::new(PoolConfig::default(), MockConnectionFactory::new());

    let conn = pool.acquire(A).await.expect("acquire");
    pool.destroy(&conn).await.expect("first destroy");

    let err = pool.destroy(&conn).await.unwrap_err();
    assert!(matches!(err, NormaticError::InvalidHandle(_)));
    assert_eq!(pool.release(&conn).await, ReleaseOutcome::Ignored);

    assert_eq!(mock(&conn).close_count(), 1);
    assert_eq!(conn.state(), HandleState::Destroyed);
    assert_eq!(pool.stats(A).expect("stats").destroyed(), 1);
}

#[tokio::test]
async fn test_destroy_of_idle_connection_is_rejected() {
    let pool = ConnectionPool::new(PoolConfig::default(), MockConnectionFactory::new());

    let conn = pool.acquire(A).await.expect("acquire");
    pool.release(&conn).await;

    assert!(pool.destroy(&conn).await.is_err());
    assert!(conn.is_alive());
    assert_eq!(pool.stats(A).expect("stats").idle(), 1);
}

#[tokio::test]
async fn test_factory_failure_surfaces_connection_unavailable() {
    let pool = ConnectionPool::new(PoolConfig::default(), MockConnectionFactory::new());

    let err = pool.acquire("mongodb://down:27017/app").await.unwrap_err();
    assert!(matches!(err, NormaticError::ConnectionUnavailable { .. }));

    // Other targets are unaffected
    let conn = pool.acquire(A).await.expect("acquire");
    assert!(conn.is_alive());
    assert_eq!(pool.stats("mongodb://down:27017/app").expect("stats").total(), 0);
}

#[tokio::test]
async fn test_try_new_rejects_invalid_config() {
    let config = PoolConfig::default().with_connect_timeout_ms(0);
    let result = ConnectionPool::try_new(config, MockConnectionFactory::new());
    assert!(matches!(result, Err(NormaticError::Configuration(_))));

    let pool = ConnectionPool::try_new(PoolConfig::new(2), MockConnectionFactory::new())
        .expect("valid config");
    assert_eq!(pool.config().max_free_connections(), 2);
}

#[tokio::test]
async fn test_connect_timeout_surfaces_connection_unavailable() {
    let config = PoolConfig::default().with_connect_timeout_ms(20);
    let pool = ConnectionPool::new(config, MockConnectionFactory::slow(Duration::from_secs(5)));

    let err = pool.acquire(A).await.unwrap_err();
    match err {
        NormaticError::ConnectionUnavailable { reason, .. } => {
            assert!(reason.contains("timed out"), "unexpected reason: {}", reason)
        }
        other => panic!("expected ConnectionUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_target_is_rejected() {
    let pool = ConnectionPool::new(PoolConfig::default(), MockConnectionFactory::new());

    let err = pool.acquire("   ").await.unwrap_err();
    assert!(matches!(err, NormaticError::InvalidTarget(_)));
    assert!(pool.targets().is_empty());
}

#[tokio::test]
async fn test_targets_are_isolated_and_redacted() {
    let pool = ConnectionPool::new(PoolConfig::default(), MockConnectionFactory::new());

    let a = pool.acquire("mongodb://u:secret@h1/one").await.expect("acquire");
    let b = pool.acquire("mongodb://u:other@h1/one").await.expect("acquire");
    assert!(!a.same_connection(&b));

    pool.release(&a).await;
    assert_eq!(pool.stats("mongodb://u:secret@h1/one").expect("stats").idle(), 1);
    assert_eq!(pool.stats("mongodb://u:other@h1/one").expect("stats").in_use(), 1);

    let targets = pool.targets();
    assert_eq!(targets.len(), 2);
    assert!(targets.iter().all(|t| !t.contains("secret") && !t.contains("other")));
}

#[tokio::test]
async fn test_close_idle_and_shutdown() {
    let pool = ConnectionPool::new(PoolConfig::new(5), MockConnectionFactory::new());

    let a1 = pool.acquire(A).await.expect("acquire");
    let a2 = pool.acquire(A).await.expect("acquire");
    let b1 = pool.acquire(B).await.expect("acquire");
    let b2 = pool.acquire(B).await.expect("acquire");
    pool.release(&a1).await;
    pool.release(&a2).await;
    pool.release(&b1).await;

    assert_eq!(pool.close_idle(A).await, 2);
    assert_eq!(pool.stats(A).expect("stats").idle(), 0);
    assert_eq!(pool.stats(B).expect("stats").idle(), 1);

    assert_eq!(pool.shutdown().await, 1);
    assert!(b1.is_destroyed());
    assert!(b2.is_alive());

    let total = pool.total_stats();
    assert_eq!(total.idle(), 0);
    assert_eq!(total.in_use(), 1);
    assert_eq!(total.created(), 4);
    assert_eq!(total.destroyed(), 3);
}

#[tokio::test]
async fn test_reclaim_unknown_target_reports_nothing() {
    let pool = ConnectionPool::new(PoolConfig::default(), MockConnectionFactory::new());
    assert_eq!(pool.reclaim(A).await, ReclaimReport::default());
    assert_eq!(pool.reclaim_all().await, ReclaimReport::default());
    assert!(pool.stats(A).is_none());
}

#[tokio::test]
async fn test_random_sequences_keep_containers_disjoint_and_bounded() {
    let config = PoolConfig::new(3).with_min_checkout_age_ms(0);
    let pool = ConnectionPool::new(config, MockConnectionFactory::new());
    let mut rng = StdRng::seed_from_u64(7);
    let mut held: Vec<ConnectionHandle> = Vec::new();

    for _ in 0..300 {
        match rng.gen_range(0..4) {
            0 | 1 => held.push(pool.acquire(A).await.expect("acquire")),
            2 if !held.is_empty() => {
                let handle = held.swap_remove(rng.gen_range(0..held.len()));
                if rng.gen_bool(0.1) {
                    mock(&handle).kill();
                }
                pool.release(&handle).await;
            }
            _ => {
                pool.reclaim(A).await;
                assert!(pool.stats(A).map_or(0, |s| s.idle()) <= 3);
            }
        }
        assert_disjoint(&pool, A);
    }

    let stats = pool.stats(A).expect("stats");
    assert_eq!(stats.total() as u64, stats.created() - stats.destroyed());
}

// =============================================================================
// Warm-up tests
// =============================================================================

#[tokio::test]
async fn test_acquire_opens_warm_batch_when_idle_is_empty() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::new(5).with_warm_batch(3), factory.clone());

    let first = pool.acquire(A).await.expect("acquire");
    assert_eq!(factory.count(), 3);
    let stats = pool.stats(A).expect("stats");
    assert_eq!((stats.idle(), stats.in_use(), stats.created()), (2, 1, 3));

    let second = pool.acquire(A).await.expect("acquire");
    assert!(!second.same_connection(&first));
    assert_eq!(factory.count(), 3);
    assert_disjoint(&pool, A);
}

#[tokio::test]
async fn test_warm_batch_respects_idle_ceiling() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::new(2).with_warm_batch(10), factory.clone());

    pool.acquire(A).await.expect("acquire");
    assert_eq!(factory.count(), 3);
    assert_eq!(pool.stats(A).expect("stats").idle(), 2);
}

#[tokio::test]
async fn test_default_warm_batch_opens_one_connection() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::default(), factory.clone());

    pool.acquire(A).await.expect("acquire");
    assert_eq!(factory.count(), 1);
    assert_eq!(pool.stats(A).expect("stats").idle(), 0);
}

#[tokio::test]
async fn test_prewarm_fills_idle_to_ceiling() {
    let factory = Arc::new(MockConnectionFactory::new());
    let pool = ConnectionPool::new(PoolConfig::new(3), factory.clone());

    assert_eq!(pool.prewarm(B).await.expect("prewarm"), 3);
    assert_eq!(pool.prewarm(B).await.expect("prewarm"), 0);
    assert_eq!(factory.count(), 3);

    let (idle, in_use) = pool.snapshot(B);
    assert_eq!(idle.len(), 3);
    assert!(in_use.is_empty());

    // Reuse takes the most recently opened one
    let conn = pool.acquire(B).await.expect("acquire");
    assert_eq!(conn.id(), idle[2]);
    assert_eq!(factory.count(), 3);
}

#[tokio::test]
async fn test_prewarm_unreachable_target_is_unavailable() {
    let pool = ConnectionPool::new(PoolConfig::default(), MockConnectionFactory::new());

    let err = pool.prewarm("mongodb://down:27017/app").await.unwrap_err();
    assert!(matches!(err, NormaticError::ConnectionUnavailable { .. }));
}
