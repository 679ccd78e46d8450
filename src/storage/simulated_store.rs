//! Simulated Object Store with Fault Injection
//!
//! DST-compatible wrapper that injects faults using buggify.
//! Follows FoundationDB patterns for deterministic simulation testing.

use crate::buggify::faults::object_store as faults;
use crate::io::Rng;
use crate::storage::{ListResult, ObjectMeta, ObjectStore};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::Path;
use std::sync::Arc;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of PUT operation failure
    pub put_fail_prob: f64,
    /// Probability of GET operation failure
    pub get_fail_prob: f64,
    /// Probability of GET returning corrupted data
    pub get_corrupt_prob: f64,
    /// Probability of operation timeout
    pub timeout_prob: f64,
    /// Probability of DELETE failure
    pub delete_fail_prob: f64,
    /// Probability of COPY failure
    pub copy_fail_prob: f64,
    /// Probability of LIST silently dropping trailing results
    pub list_incomplete_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.01,        // 1%
            get_fail_prob: 0.01,        // 1%
            get_corrupt_prob: 0.0,
            timeout_prob: 0.005,        // 0.5%
            delete_fail_prob: 0.01,     // 1%
            copy_fail_prob: 0.01,       // 1%
            list_incomplete_prob: 0.02, // 2%
            latency_range_us: (0, 0),
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.05,
            get_fail_prob: 0.05,
            get_corrupt_prob: 0.01,
            timeout_prob: 0.02,
            delete_fail_prob: 0.05,
            copy_fail_prob: 0.05,
            list_incomplete_prob: 0.05,
            latency_range_us: (0, 200),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            put_fail_prob: 0.0,
            get_fail_prob: 0.0,
            get_corrupt_prob: 0.0,
            timeout_prob: 0.0,
            delete_fail_prob: 0.0,
            copy_fail_prob: 0.0,
            list_incomplete_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    pub put_attempts: u64,
    pub put_failures: u64,
    pub get_attempts: u64,
    pub get_failures: u64,
    pub get_corruptions: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
    pub copy_attempts: u64,
    pub copy_failures: u64,
    pub list_attempts: u64,
    pub list_incomplete: u64,
    pub timeouts: u64,
}

/// Inner state for the simulated store
struct SimulatedStoreInner<R: Rng> {
    rng: R,
    stats: SimulatedStoreStats,
}

/// Simulated object store that wraps another store and injects faults
pub struct SimulatedObjectStore<S: ObjectStore, R: Rng> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner<R>>>,
}

impl<S: ObjectStore, R: Rng> SimulatedObjectStore<S, R> {
    /// Create a new simulated store with the given RNG
    pub fn new(inner_store: S, rng: R, config: SimulatedStoreConfig) -> Self {
        SimulatedObjectStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng,
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStoreStats::default();
    }

    /// Access the wrapped store, bypassing fault injection
    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    /// Roll for a fault; the lock is released before returning
    fn roll(&self, fault_id: &str, probability: f64) -> bool {
        let mut s = self.state.lock();
        crate::buggify!(&mut s.rng, fault_id, probability)
    }

    fn check_timeout(&self) -> IoResult<()> {
        if self.roll(faults::TIMEOUT, self.config.timeout_prob) {
            self.state.lock().stats.timeouts += 1;
            return Err(IoError::new(ErrorKind::TimedOut, "simulated timeout"));
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        let (min, max) = self.config.latency_range_us;
        if min == 0 && max == 0 {
            return;
        }
        let latency_us = {
            let mut s = self.state.lock();
            if max > min {
                s.rng.gen_range(min, max)
            } else {
                min
            }
        };
        if latency_us > 0 {
            tokio::time::sleep(std::time::Duration::from_micros(latency_us)).await;
        }
    }
}

impl<S: ObjectStore, R: Rng> ObjectStore for SimulatedObjectStore<S, R> {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BoxFuture<'a, IoResult<()>> {
        Box::pin(async move {
            self.state.lock().stats.put_attempts += 1;
            self.check_timeout()?;

            if self.roll(faults::PUT_FAIL, self.config.put_fail_prob) {
                self.state.lock().stats.put_failures += 1;
                return Err(IoError::new(ErrorKind::Other, "simulated put failure"));
            }

            self.simulate_latency().await;
            self.inner_store.put(key, data).await
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<Vec<u8>>> {
        Box::pin(async move {
            self.state.lock().stats.get_attempts += 1;
            self.check_timeout()?;

            if self.roll(faults::GET_FAIL, self.config.get_fail_prob) {
                self.state.lock().stats.get_failures += 1;
                return Err(IoError::new(ErrorKind::Other, "simulated get failure"));
            }

            self.simulate_latency().await;
            let mut data = self.inner_store.get(key).await?;

            if !data.is_empty() && self.roll(faults::GET_CORRUPT, self.config.get_corrupt_prob) {
                let mut s = self.state.lock();
                s.stats.get_corruptions += 1;
                let idx = s.rng.gen_range(0, data.len() as u64) as usize;
                data[idx] ^= 0xFF;
            }

            Ok(data)
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<bool>> {
        self.inner_store.exists(key)
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<()>> {
        Box::pin(async move {
            self.state.lock().stats.delete_attempts += 1;

            if self.roll(faults::DELETE_FAIL, self.config.delete_fail_prob) {
                self.state.lock().stats.delete_failures += 1;
                return Err(IoError::new(ErrorKind::Other, "simulated delete failure"));
            }

            self.inner_store.delete(key).await
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> BoxFuture<'a, IoResult<ListResult>> {
        Box::pin(async move {
            self.state.lock().stats.list_attempts += 1;

            let result = self.inner_store.list(prefix, continuation_token).await?;

            // Eventually-consistent listing: trailing entries silently missing
            if result.objects.len() > 1
                && self.roll(faults::LIST_INCOMPLETE, self.config.list_incomplete_prob)
            {
                let truncate_at = {
                    let mut s = self.state.lock();
                    s.stats.list_incomplete += 1;
                    s.rng.gen_range(1, result.objects.len() as u64) as usize
                };
                return Ok(ListResult {
                    objects: result.objects.into_iter().take(truncate_at).collect(),
                    continuation_token: None,
                });
            }

            Ok(result)
        })
    }

    fn copy<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, IoResult<()>> {
        Box::pin(async move {
            self.state.lock().stats.copy_attempts += 1;
            self.check_timeout()?;

            if self.roll(faults::COPY_FAIL, self.config.copy_fail_prob) {
                self.state.lock().stats.copy_failures += 1;
                return Err(IoError::new(ErrorKind::Other, "simulated copy failure"));
            }

            self.inner_store.copy(from, to).await
        })
    }

    fn head<'a>(&'a self, key: &'a str) -> BoxFuture<'a, IoResult<ObjectMeta>> {
        self.inner_store.head(key)
    }

    fn put_file<'a>(&'a self, key: &'a str, path: &'a Path) -> BoxFuture<'a, IoResult<u64>> {
        Box::pin(async move {
            self.state.lock().stats.put_attempts += 1;
            self.check_timeout()?;

            if self.roll(faults::PUT_FAIL, self.config.put_fail_prob) {
                self.state.lock().stats.put_failures += 1;
                return Err(IoError::new(ErrorKind::Other, "simulated put failure"));
            }

            self.simulate_latency().await;
            self.inner_store.put_file(key, path).await
        })
    }
}

impl<S: ObjectStore + Clone, R: Rng> Clone for SimulatedObjectStore<S, R> {
    fn clone(&self) -> Self {
        SimulatedObjectStore {
            inner_store: self.inner_store.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SimulatedRng;
    use crate::storage::InMemoryObjectStore;

    #[tokio::test]
    async fn test_simulated_store_no_faults() {
        let inner = InMemoryObjectStore::new();
        let rng = SimulatedRng::new(42);
        let store = SimulatedObjectStore::new(inner, rng, SimulatedStoreConfig::no_faults());

        store.put("key1", b"value1").await.unwrap();
        let data = store.get("key1").await.unwrap();
        assert_eq!(data, b"value1");

        store.copy("key1", "key2").await.unwrap();
        store.delete("key1").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.put_attempts, 1);
        assert_eq!(stats.put_failures, 0);
        assert_eq!(stats.get_attempts, 1);
        assert_eq!(stats.copy_attempts, 1);
        assert_eq!(stats.delete_attempts, 1);
        assert_eq!(store.inner().keys(), vec!["key2".to_string()]);
    }

    #[tokio::test]
    async fn test_simulated_store_deterministic() {
        let seed = 12345u64;
        let config = SimulatedStoreConfig {
            put_fail_prob: 0.5,
            ..SimulatedStoreConfig::no_faults()
        };

        let store1 = SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            SimulatedRng::new(seed),
            config.clone(),
        );
        let store2 = SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            SimulatedRng::new(seed),
            config,
        );

        let mut results1 = Vec::new();
        let mut results2 = Vec::new();
        for i in 0..20 {
            results1.push(store1.put(&format!("key{}", i), b"data").await.is_ok());
            results2.push(store2.put(&format!("key{}", i), b"data").await.is_ok());
        }

        assert_eq!(
            results1, results2,
            "Deterministic stores should behave identically"
        );
    }

    #[tokio::test]
    async fn test_simulated_store_fault_injection() {
        let store = SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            SimulatedRng::new(999),
            SimulatedStoreConfig {
                put_fail_prob: 1.0,
                copy_fail_prob: 1.0,
                ..SimulatedStoreConfig::no_faults()
            },
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tar.gz");
        std::fs::write(&path, b"archive").unwrap();

        assert!(store.put("key", b"value").await.is_err());
        assert!(store.put_file("key", &path).await.is_err());
        assert!(store.copy("key", "other").await.is_err());

        let stats = store.stats();
        assert_eq!(stats.put_failures, 2);
        assert_eq!(stats.copy_failures, 1);
    }

    #[tokio::test]
    async fn test_simulated_store_corruption() {
        let store = SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            SimulatedRng::new(42),
            SimulatedStoreConfig {
                get_corrupt_prob: 1.0,
                ..SimulatedStoreConfig::no_faults()
            },
        );

        store.put("key", b"original data here").await.unwrap();
        let data = store.get("key").await.unwrap();

        assert_ne!(data, b"original data here");
        assert_eq!(store.stats().get_corruptions, 1);
    }

    #[tokio::test]
    async fn test_simulated_store_incomplete_list() {
        let store = SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            SimulatedRng::new(7),
            SimulatedStoreConfig {
                list_incomplete_prob: 1.0,
                ..SimulatedStoreConfig::no_faults()
            },
        );

        for i in 0..5 {
            store.put(&format!("p/{}", i), b"x").await.unwrap();
        }

        let listed = store.list("p/", None).await.unwrap();
        assert!(listed.objects.len() < 5);
        assert!(listed.continuation_token.is_none());
    }

    #[tokio::test]
    async fn test_simulated_store_high_chaos() {
        let store = SimulatedObjectStore::new(
            InMemoryObjectStore::new(),
            SimulatedRng::new(42),
            SimulatedStoreConfig::high_chaos(),
        );

        let mut successes = 0;
        let mut failures = 0;
        for i in 0..200 {
            match store.put(&format!("key{}", i), b"data").await {
                Ok(_) => successes += 1,
                Err(_) => failures += 1,
            }
        }

        assert!(failures > 0, "Expected some failures with high chaos config");
        assert!(successes > 0, "Expected some successes even with high chaos");
    }
}
