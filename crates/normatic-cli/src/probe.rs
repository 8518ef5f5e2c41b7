//! The `probe` subcommand

use anyhow::Context;
use normatic_pool::{
    ConnectionHandle, ConnectionPool, PoolConfig, ReleaseOutcome, TargetDescriptor,
    acquire_with_retry,
};
use normatic_tcp::TcpConnectionFactory;

use crate::args::ProbeArgs;
use crate::output::{ConnectionRow, ProbeReport};

/// Check out connections to one target, optionally release them, then reclaim
#[tracing::instrument(skip_all, fields(connections = args.connections))]
pub async fn run(args: &ProbeArgs, config: PoolConfig) -> anyhow::Result<ProbeReport> {
    let descriptor = TargetDescriptor::parse(&args.target).context("invalid target")?;
    let pool = ConnectionPool::try_new(config, TcpConnectionFactory::new())
        .context("invalid pool configuration")?;
    let policy = args.retry_policy();

    let mut handles: Vec<ConnectionHandle> = Vec::with_capacity(args.connections);
    for index in 0..args.connections {
        let acquired = acquire_with_retry(&pool, &args.target, &policy).await;
        match acquired {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                release_all(&pool, &handles).await;
                pool.shutdown().await;
                return Err(e).with_context(|| {
                    format!("connection {} of {} to {}", index + 1, args.connections, descriptor)
                });
            }
        }
    }
    let acquired = handles.len();

    let mut released = 0;
    if args.release {
        released = release_all(&pool, &handles).await;
    }

    let reclaim = pool.reclaim(&args.target).await;
    let stats = pool.stats(&args.target).unwrap_or_default();
    let connections = handles.iter().map(row).collect();

    let report = ProbeReport {
        target: descriptor.to_string(),
        database: descriptor.database().to_string(),
        acquired,
        released,
        reclaim,
        stats,
        connections,
    };

    if !args.release {
        release_all(&pool, &handles).await;
    }
    let closed = pool.shutdown().await;
    tracing::debug!(closed, "probe finished");

    Ok(report)
}

/// Release every handle, returning how many went back to idle
async fn release_all(pool: &ConnectionPool, handles: &[ConnectionHandle]) -> usize {
    let mut idled = 0;
    for handle in handles {
        if pool.release(handle).await == ReleaseOutcome::Idled {
            idled += 1;
        }
    }
    idled
}

fn row(handle: &ConnectionHandle) -> ConnectionRow {
    ConnectionRow {
        id: handle.id(),
        lease: handle.lease(),
        state: handle.state(),
        alive: handle.is_alive(),
        age_ms: handle.age().as_millis() as u64,
    }
}
