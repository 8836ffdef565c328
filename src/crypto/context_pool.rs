//! Bounded pool of reusable crypto contexts.
//!
//! A context records which (hash, signature) pair an operation runs with and
//! how often it has been used. The pool is a fixed-capacity table guarded by
//! a mutex: a context is handed to at most one caller at a time, and the table
//! never grows past `max_pool_size`. When it is full, callers get an
//! ephemeral context that is dropped on release.

use super::algorithms::{HashAlgorithm, SignatureAlgorithm};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Pool limits and reuse policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextPoolConfig {
    /// Maximum number of pooled contexts
    pub max_pool_size: usize,
    /// Contexts older than this are not reused
    #[serde(with = "duration_secs")]
    pub max_context_age: Duration,
    /// Contexts idle longer than this are not reused
    #[serde(with = "duration_secs")]
    pub max_idle_time: Duration,
    /// Minimum spacing between automatic cleanups
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
    /// Hand out existing contexts; when false every call gets a fresh one
    pub enable_reuse: bool,
}

impl Default for ContextPoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 50,
            max_context_age: Duration::from_secs(3600),
            max_idle_time: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            enable_reuse: true,
        }
    }
}

/// Durations as whole seconds in config files.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Bookkeeping for one algorithm pair.
#[derive(Debug, Clone)]
pub struct CryptoContext {
    /// Unique id
    pub id: Uuid,
    /// Digest this context serves
    pub hash_algorithm: HashAlgorithm,
    /// Signature scheme this context serves
    pub signature_algorithm: SignatureAlgorithm,
    /// Creation time
    pub created_at: Instant,
    /// Last hand-out or release
    pub last_used: Instant,
    /// Number of hand-outs
    pub usage_count: u64,
    /// Currently leased
    pub in_use: bool,
}

impl CryptoContext {
    fn new(hash_algorithm: HashAlgorithm, signature_algorithm: SignatureAlgorithm) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            hash_algorithm,
            signature_algorithm,
            created_at: now,
            last_used: now,
            usage_count: 1,
            in_use: true,
        }
    }

    /// Older than `max_age`.
    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.created_at.elapsed() > max_age
    }

    /// Time since last use.
    pub fn idle_time(&self) -> Duration {
        self.last_used.elapsed()
    }

    fn serves(&self, hash: HashAlgorithm, sig: SignatureAlgorithm) -> bool {
        self.hash_algorithm == hash && self.signature_algorithm == sig
    }
}

/// Counters describing pool behaviour.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStatistics {
    /// Contexts created, pooled or not
    pub total_contexts_created: u64,
    /// Hand-outs served from the pool
    pub total_contexts_reused: u64,
    /// Contexts removed by cleanup
    pub total_contexts_expired: u64,
    /// Contexts in the table now
    pub current_pool_size: usize,
    /// Largest table size seen
    pub peak_pool_size: usize,
    /// Contexts currently leased from the table
    pub in_use: usize,
}

impl PoolStatistics {
    /// Fraction of hand-outs served by reuse.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_contexts_created + self.total_contexts_reused;
        if total == 0 {
            0.0
        } else {
            self.total_contexts_reused as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct PoolState {
    contexts: Vec<CryptoContext>,
    stats: PoolStatistics,
    last_cleanup: Instant,
}

/// Thread-safe context pool.
#[derive(Debug)]
pub struct ContextPool {
    config: ContextPoolConfig,
    state: Mutex<PoolState>,
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(ContextPoolConfig::default())
    }
}

impl ContextPool {
    /// Empty pool.
    pub fn new(config: ContextPoolConfig) -> Self {
        Self {
            state: Mutex::new(PoolState {
                contexts: Vec::with_capacity(config.max_pool_size),
                stats: PoolStatistics::default(),
                last_cleanup: Instant::now(),
            }),
            config,
        }
    }

    /// Pool configuration.
    pub fn config(&self) -> &ContextPoolConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state
            .lock()
            .map_err(|_| Error::Concurrency("context pool lock poisoned".to_string()))
    }

    /// Lease a context for `(hash, sig)`.
    ///
    /// The lease is returned to the pool when dropped.
    pub fn get_context(&self, hash: HashAlgorithm, sig: SignatureAlgorithm) -> Result<ContextLease<'_>> {
        let mut state = self.lock()?;

        if state.last_cleanup.elapsed() >= self.config.cleanup_interval {
            let evicted = Self::evict(&mut state, &self.config);
            if evicted > 0 {
                log::debug!("Context pool evicted {} stale contexts", evicted);
            }
        }

        if self.config.enable_reuse {
            let max_age = self.config.max_context_age;
            let max_idle = self.config.max_idle_time;
            if let Some(ctx) = state.contexts.iter_mut().find(|c| {
                c.serves(hash, sig)
                    && !c.in_use
                    && !c.is_expired(max_age)
                    && c.idle_time() <= max_idle
            }) {
                ctx.in_use = true;
                ctx.usage_count += 1;
                ctx.last_used = Instant::now();
                let context = ctx.clone();
                state.stats.total_contexts_reused += 1;
                return Ok(ContextLease {
                    pool: self,
                    context,
                    pooled: true,
                });
            }
        }

        let context = CryptoContext::new(hash, sig);
        state.stats.total_contexts_created += 1;
        let pooled = state.contexts.len() < self.config.max_pool_size;
        if pooled {
            state.contexts.push(context.clone());
            state.stats.peak_pool_size = state.stats.peak_pool_size.max(state.contexts.len());
        } else {
            log::debug!("Context pool full ({}), using ephemeral context", self.config.max_pool_size);
        }

        Ok(ContextLease {
            pool: self,
            context,
            pooled,
        })
    }

    /// Mark context `id` available again. Unknown ids are ignored.
    pub fn release_context(&self, id: Uuid) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(ctx) = state.contexts.iter_mut().find(|c| c.id == id) {
            ctx.in_use = false;
            ctx.last_used = Instant::now();
        }
        Ok(())
    }

    /// Remove expired or idle contexts that are not leased.
    ///
    /// Returns the number removed.
    pub fn cleanup(&self) -> Result<usize> {
        let mut state = self.lock()?;
        Ok(Self::evict(&mut state, &self.config))
    }

    fn evict(state: &mut PoolState, config: &ContextPoolConfig) -> usize {
        let before = state.contexts.len();
        state.contexts.retain(|c| {
            c.in_use || (!c.is_expired(config.max_context_age) && c.idle_time() <= config.max_idle_time)
        });
        let evicted = before - state.contexts.len();
        state.stats.total_contexts_expired += evicted as u64;
        state.last_cleanup = Instant::now();
        evicted
    }

    /// Snapshot of the counters.
    pub fn statistics(&self) -> Result<PoolStatistics> {
        let state = self.lock()?;
        let mut stats = state.stats.clone();
        stats.current_pool_size = state.contexts.len();
        stats.in_use = state.contexts.iter().filter(|c| c.in_use).count();
        Ok(stats)
    }

    /// Number of pooled contexts.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.contexts.len()).unwrap_or(0)
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every context that is not leased.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.contexts.retain(|c| c.in_use);
        Ok(())
    }
}

/// A leased context; released on drop.
#[derive(Debug)]
pub struct ContextLease<'a> {
    pool: &'a ContextPool,
    context: CryptoContext,
    pooled: bool,
}

impl ContextLease<'_> {
    /// The leased context.
    pub fn context(&self) -> &CryptoContext {
        &self.context
    }

    /// Whether the context lives in the pool table.
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }
}

impl Drop for ContextLease<'_> {
    fn drop(&mut self) {
        if self.pooled {
            if let Err(e) = self.pool.release_context(self.context.id) {
                log::warn!("Failed to release crypto context {}: {}", self.context.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const H: HashAlgorithm = HashAlgorithm::Sha256;
    const S: SignatureAlgorithm = SignatureAlgorithm::RsaPkcs1Sha256;

    fn pool(max: usize) -> ContextPool {
        ContextPool::new(ContextPoolConfig {
            max_pool_size: max,
            ..Default::default()
        })
    }

    #[test]
    fn test_default_config() {
        let config = ContextPoolConfig::default();
        assert_eq!(config.max_pool_size, 50);
        assert_eq!(config.max_context_age, Duration::from_secs(3600));
        assert_eq!(config.max_idle_time, Duration::from_secs(300));
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert!(config.enable_reuse);
    }

    #[test]
    fn test_reuse_after_release() {
        let pool = pool(4);
        let first_id = pool.get_context(H, S).unwrap().context().id;
        let lease = pool.get_context(H, S).unwrap();
        assert_eq!(lease.context().id, first_id);
        assert_eq!(lease.context().usage_count, 2);

        let stats = pool.statistics().unwrap();
        assert_eq!(stats.total_contexts_created, 1);
        assert_eq!(stats.total_contexts_reused, 1);
        assert_eq!(stats.in_use, 1);
    }

    #[test]
    fn test_in_use_context_not_shared() {
        let pool = pool(4);
        let a = pool.get_context(H, S).unwrap();
        let b = pool.get_context(H, S).unwrap();
        assert_ne!(a.context().id, b.context().id);
    }

    #[test]
    fn test_pairs_do_not_mix() {
        let pool = pool(4);
        let id = pool.get_context(H, S).unwrap().context().id;
        let other = pool
            .get_context(HashAlgorithm::Sha384, SignatureAlgorithm::RsaPkcs1Sha384)
            .unwrap();
        assert_ne!(other.context().id, id);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let pool = pool(2);
        let leases: Vec<_> = (0..5).map(|_| pool.get_context(H, S).unwrap()).collect();
        assert_eq!(pool.len(), 2);
        assert_eq!(leases.iter().filter(|l| l.is_pooled()).count(), 2);
        drop(leases);
        assert_eq!(pool.statistics().unwrap().in_use, 0);
    }

    #[test]
    fn test_exhausted_pool_hands_out_ephemeral_context() {
        let pool = pool(1);
        let held = pool.get_context(H, S).unwrap();
        let started = Instant::now();
        let extra = pool.get_context(H, S).unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!extra.is_pooled());
        let ephemeral_id = extra.context().id;
        drop(extra);
        drop(held);
        assert_eq!(pool.len(), 1);
        assert_ne!(pool.get_context(H, S).unwrap().context().id, ephemeral_id);
    }

    #[test]
    fn test_reuse_disabled() {
        let pool = ContextPool::new(ContextPoolConfig {
            enable_reuse: false,
            ..Default::default()
        });
        let a = pool.get_context(H, S).unwrap().context().id;
        let b = pool.get_context(H, S).unwrap().context().id;
        assert_ne!(a, b);
    }

    #[test]
    fn test_cleanup_evicts_idle() {
        let pool = ContextPool::new(ContextPoolConfig {
            max_idle_time: Duration::ZERO,
            ..Default::default()
        });
        let held = pool.get_context(H, S).unwrap();
        drop(pool.get_context(H, S).unwrap());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(pool.cleanup().unwrap(), 1);
        assert_eq!(pool.len(), 1, "leased context survives cleanup");
        drop(held);
    }

    #[test]
    fn test_release_unknown_id_is_ok() {
        assert!(pool(1).release_context(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_concurrent_leases_are_exclusive() {
        let pool = Arc::new(pool(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    let mut ids = Vec::new();
                    for _ in 0..50 {
                        let lease = pool.get_context(H, S).unwrap();
                        ids.push(lease.context().id);
                    }
                    ids
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = pool.statistics().unwrap();
        assert!(stats.current_pool_size <= 8);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.total_contexts_created + stats.total_contexts_reused, 400);
    }
}
