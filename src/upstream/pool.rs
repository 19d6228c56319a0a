//! Upstream connection pool.
//!
//! # Responsibilities
//! - Park idle connections keyed by (scheme, host, port)
//! - Hand out an idle connection or nothing; never one that is closed or expired
//! - Count connection creation, reuse and discard for the admin API
//!
//! # Design Decisions
//! - LIFO per key: the most recently used connection is the least likely to
//!   have been closed by the upstream
//! - Checked-out connections return through `PooledConnection`'s drop, and
//!   only when the exchange left them in a reusable state
//! - Expired connections are evicted lazily on checkout and by a background
//!   reaper that stops once the pool is dropped

use axum::http::uri::Scheme;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::upstream::connection::UpstreamConnection;

/// Identity of an upstream endpoint; connections are only shared within a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl PoolKey {
    pub fn new(scheme: Scheme, host: &str, port: u16) -> Self {
        Self {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

/// Lifetime counters shared by every pool implementation.
#[derive(Debug, Default)]
pub struct PoolCounters {
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
    checked_out: AtomicU64,
}

impl PoolCounters {
    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("proxy_upstream_connections_total", "event" => "created").increment(1);
    }

    pub fn record_reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("proxy_upstream_connections_total", "event" => "reused").increment(1);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("proxy_upstream_connections_total", "event" => "discarded").increment(1);
    }

    fn checkout_started(&self) {
        self.checked_out.fetch_add(1, Ordering::Relaxed);
    }

    fn checkout_ended(&self) {
        self.checked_out.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Point-in-time pool figures, as served by the admin API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub checked_out: u64,
    pub created: u64,
    pub reused: u64,
    pub discarded: u64,
}

/// Storage for idle upstream connections.
pub trait ConnectionPool: Send + Sync + fmt::Debug {
    /// Take an idle connection for `key`, if a usable one exists.
    fn checkout(&self, key: &PoolKey) -> Option<UpstreamConnection>;

    /// Return a connection that finished its exchange cleanly.
    fn checkin(&self, key: PoolKey, conn: UpstreamConnection);

    /// Idle connections across all keys.
    fn idle_count(&self) -> usize;

    fn counters(&self) -> &PoolCounters;

    fn stats(&self) -> PoolStats {
        let counters = self.counters();
        PoolStats {
            idle: self.idle_count(),
            checked_out: counters.checked_out.load(Ordering::Relaxed),
            created: counters.created.load(Ordering::Relaxed),
            reused: counters.reused.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Keyed LIFO pool of idle keep-alive connections.
#[derive(Debug)]
pub struct UpstreamPool {
    idle: DashMap<PoolKey, Vec<UpstreamConnection>>,
    max_idle_per_upstream: usize,
    idle_timeout: Duration,
    counters: PoolCounters,
}

impl UpstreamPool {
    pub fn new(max_idle_per_upstream: usize, idle_timeout: Duration) -> Self {
        Self {
            idle: DashMap::new(),
            max_idle_per_upstream,
            idle_timeout,
            counters: PoolCounters::default(),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.max_idle_per_upstream, config.idle_timeout())
    }

    fn is_stale(&self, conn: &UpstreamConnection) -> bool {
        conn.is_closed() || conn.idle_for() >= self.idle_timeout
    }

    /// Drop every idle connection that is closed or past the idle timeout.
    /// Returns how many were evicted.
    pub fn evict_expired(&self) -> usize {
        let mut evicted = 0;
        for mut entry in self.idle.iter_mut() {
            let before = entry.len();
            entry.retain(|conn| !self.is_stale(conn));
            evicted += before - entry.len();
        }
        self.idle.retain(|_, conns| !conns.is_empty());

        for _ in 0..evicted {
            self.counters.record_discarded();
        }
        evicted
    }
}

impl ConnectionPool for UpstreamPool {
    fn checkout(&self, key: &PoolKey) -> Option<UpstreamConnection> {
        let mut conns = self.idle.get_mut(key)?;
        while let Some(conn) = conns.pop() {
            if self.is_stale(&conn) {
                tracing::debug!(connection_id = %conn.id(), upstream = %key, "Evicting stale pooled connection");
                self.counters.record_discarded();
                continue;
            }
            return Some(conn);
        }
        None
    }

    fn checkin(&self, key: PoolKey, conn: UpstreamConnection) {
        if conn.is_closed() {
            self.counters.record_discarded();
            return;
        }

        let mut conns = self.idle.entry(key).or_default();
        if conns.len() >= self.max_idle_per_upstream {
            tracing::debug!(connection_id = %conn.id(), "Pool full, closing connection");
            self.counters.record_discarded();
            return;
        }
        conns.push(conn);
    }

    fn idle_count(&self) -> usize {
        self.idle.iter().map(|entry| entry.len()).sum()
    }

    fn counters(&self) -> &PoolCounters {
        &self.counters
    }
}

/// Periodically evict expired connections until the pool is dropped.
pub fn spawn_reaper(pool: &Arc<UpstreamPool>, every: Duration) -> JoinHandle<()> {
    let pool: Weak<UpstreamPool> = Arc::downgrade(pool);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(pool) = pool.upgrade() else {
                break;
            };
            let evicted = pool.evict_expired();
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted expired upstream connections");
            }
        }
    })
}

/// A pool that never keeps anything: every connection is used once.
#[derive(Debug, Default)]
pub struct DisabledPool {
    counters: PoolCounters,
}

impl ConnectionPool for DisabledPool {
    fn checkout(&self, _key: &PoolKey) -> Option<UpstreamConnection> {
        None
    }

    fn checkin(&self, _key: PoolKey, _conn: UpstreamConnection) {
        self.counters.record_discarded();
    }

    fn idle_count(&self) -> usize {
        0
    }

    fn counters(&self) -> &PoolCounters {
        &self.counters
    }
}

/// Build the pool described by `config`.
pub fn from_config(config: &PoolConfig) -> Arc<dyn ConnectionPool> {
    if !config.enabled {
        return Arc::new(DisabledPool::default());
    }
    let pool = Arc::new(UpstreamPool::from_config(config));
    spawn_reaper(&pool, config.idle_timeout().max(Duration::from_secs(1)));
    pool
}

/// A connection on loan for one exchange.
///
/// Dropping it returns the connection to the pool if the exchange marked it
/// reusable, and closes it otherwise.
#[derive(Debug)]
pub struct PooledConnection {
    key: PoolKey,
    conn: Option<UpstreamConnection>,
    pool: Arc<dyn ConnectionPool>,
    reusable: bool,
}

impl PooledConnection {
    pub fn new(key: PoolKey, conn: UpstreamConnection, pool: Arc<dyn ConnectionPool>) -> Self {
        pool.counters().checkout_started();
        Self {
            key,
            conn: Some(conn),
            pool,
            reusable: false,
        }
    }

    /// The underlying connection; `None` once it has been released.
    pub fn connection_mut(&mut self) -> Option<&mut UpstreamConnection> {
        self.conn.as_mut()
    }

    /// Allow the connection back into the pool when this guard drops.
    pub fn mark_reusable(&mut self) {
        self.reusable = true;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.counters().checkout_ended();
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        if self.reusable && !conn.is_closed() {
            conn.touch();
            self.pool.checkin(self.key.clone(), conn);
        } else {
            tracing::debug!(connection_id = %conn.id(), upstream = %self.key, "Discarding upstream connection");
            self.pool.counters().record_discarded();
        }
    }
}
