//! Request coordinator: cache, in-flight deduplication, rate governor
//!
//! Every outbound provider call goes through here. Concurrent callers with
//! the same cache key collapse into one upstream request (fan-in via a
//! shared future); successful responses populate a TTL cache; failures are
//! never cached. A sliding 60-second window throttles total upstream volume
//! and a per-action minimum interval suppresses keystroke bursts.
//!
//! The coordinator is an explicitly constructed, injectable object. Clones
//! share state, so one instance built in `main` serves every component.

use crate::config::CoordinatorConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const RATE_WINDOW: Duration = Duration::from_secs(60);
const SLOT_POLL_INTERVAL: Duration = Duration::from_secs(1);

type SharedFetch = Shared<BoxFuture<'static, Result<Value, Arc<EngineError>>>>;

struct CacheEntry {
    data: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

struct PendingFetch {
    future: SharedFetch,
    started_at: Instant,
}

struct Inner {
    cache: DashMap<String, CacheEntry>,
    pending: DashMap<String, PendingFetch>,
    window: Mutex<VecDeque<Instant>>,
    throttle: DashMap<String, Instant>,
    config: CoordinatorConfig,
}

/// Shared deduplicating cache in front of all upstream providers.
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

impl RequestCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache: DashMap::new(),
                pending: DashMap::new(),
                window: Mutex::new(VecDeque::new()),
                throttle: DashMap::new(),
                config,
            }),
        }
    }

    /// Cache-or-fetch with fan-in.
    ///
    /// A fresh cache entry resolves immediately. An in-flight request for
    /// the same key younger than the staleness ceiling is joined rather
    /// than duplicated. Otherwise the fetcher runs after a rate-limit slot
    /// is available; its result populates the cache on success and the
    /// pending slot is cleared either way.
    pub async fn dedupe<F, Fut>(&self, key: &str, ttl: Duration, fetcher: F) -> EngineResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<Value>> + Send + 'static,
    {
        if let Some(data) = self.get_from_cache(key) {
            metrics::record_cache_hit();
            return Ok(data);
        }
        metrics::record_cache_miss();

        let pending_max_age = Duration::from_secs(self.inner.config.pending_max_age_secs);

        if let Some(shared) = self.join_pending(key, pending_max_age) {
            metrics::record_dedupe_fanin();
            return shared.await.map_err(|e| shared_error(&e));
        }

        self.wait_for_slot().await;

        // Re-check under the entry lock: another caller may have dispatched
        // while we waited for a slot.
        let shared = match self.inner.pending.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().started_at.elapsed() < pending_max_age {
                    metrics::record_dedupe_fanin();
                    occupied.get().future.clone()
                } else {
                    let future = self.dispatch(key, ttl, fetcher);
                    occupied.insert(PendingFetch {
                        future: future.clone(),
                        started_at: Instant::now(),
                    });
                    future
                }
            }
            Entry::Vacant(vacant) => {
                let future = self.dispatch(key, ttl, fetcher);
                vacant.insert(PendingFetch {
                    future: future.clone(),
                    started_at: Instant::now(),
                });
                future
            }
        };

        shared.await.map_err(|e| shared_error(&e))
    }

    fn join_pending(&self, key: &str, max_age: Duration) -> Option<SharedFetch> {
        let pending = self.inner.pending.get(key)?;
        if pending.started_at.elapsed() < max_age {
            Some(pending.future.clone())
        } else {
            None
        }
    }

    fn dispatch<F, Fut>(&self, key: &str, ttl: Duration, fetcher: F) -> SharedFetch
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<Value>> + Send + 'static,
    {
        self.note_upstream();
        metrics::record_upstream_request();

        let this = self.clone();
        let key = key.to_string();
        let fut = fetcher();

        async move {
            let result = fut.await;
            this.inner.pending.remove(&key);
            match result {
                Ok(data) => {
                    this.set_cache(&key, data.clone(), ttl);
                    Ok(data)
                }
                Err(e) => {
                    debug!("Fetch failed for {}: {}", key, e);
                    Err(Arc::new(e))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Direct cache read; expired entries are lazily deleted.
    pub fn get_from_cache(&self, key: &str) -> Option<Value> {
        {
            let entry = self.inner.cache.get(key)?;
            if entry.is_fresh() {
                return Some(entry.data.clone());
            }
        }
        self.inner.cache.remove_if(key, |_, entry| !entry.is_fresh());
        None
    }

    /// Direct cache write for hydration and force-refresh paths.
    pub fn set_cache(&self, key: &str, data: Value, ttl: Duration) {
        self.inner.cache.insert(
            key.to_string(),
            CacheEntry {
                data,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// True once the sliding window exceeds the configured share of the
    /// ceiling (default 80% of 40 req/min).
    pub fn is_near_rate_limit(&self) -> bool {
        let mut window = self.inner.window.lock().expect("rate window poisoned");
        prune_window(&mut window);
        let threshold = self.inner.config.rate_limit_per_minute
            * self.inner.config.near_limit_percent
            / 100;
        window.len() as u32 >= threshold
    }

    /// Sleep in 1-second steps until the window has room. Never busy-spins.
    pub async fn wait_for_slot(&self) {
        while self.is_near_rate_limit() {
            metrics::record_rate_limit_wait();
            tokio::time::sleep(SLOT_POLL_INTERVAL).await;
        }
    }

    fn note_upstream(&self) {
        let mut window = self.inner.window.lock().expect("rate window poisoned");
        prune_window(&mut window);
        window.push_back(Instant::now());
    }

    /// Per-action minimum interval, independent of cache freshness.
    pub fn should_throttle(&self, action: &str) -> bool {
        let min_interval = Duration::from_millis(self.inner.config.action_min_interval_ms);
        self.inner
            .throttle
            .get(action)
            .map(|last| last.elapsed() < min_interval)
            .unwrap_or(false)
    }

    /// Stamp the action for the interval throttle.
    pub fn record_request(&self, action: &str) {
        self.inner.throttle.insert(action.to_string(), Instant::now());
    }

    /// Drop every cache entry whose key starts with the prefix. Used after
    /// slippage or wallet-address changes.
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.inner.cache.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }
}

fn prune_window(window: &mut VecDeque<Instant>) {
    while let Some(front) = window.front() {
        if front.elapsed() >= RATE_WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// A fanned-in caller gets the same failure the dispatcher saw. Variants
/// carrying non-clonable sources collapse to their message text.
fn shared_error(error: &EngineError) -> EngineError {
    match error {
        EngineError::RateLimited => EngineError::RateLimited,
        EngineError::NoRoute => EngineError::NoRoute,
        EngineError::AmountTooSmall => EngineError::AmountTooSmall,
        EngineError::Network(msg) => EngineError::Network(msg.clone()),
        EngineError::Provider(msg) => EngineError::Provider(msg.clone()),
        EngineError::Timeout { operation } => EngineError::Timeout {
            operation: operation.clone(),
        },
        other => EngineError::Internal(other.to_string()),
    }
}

/// Canonical cache keys. Every caller that wants fan-in must build keys
/// through these so identical requests collide.
pub mod keys {
    pub fn quote_key(
        chain_id: u64,
        from: &str,
        to: &str,
        amount_base: &str,
        slippage_bps: u32,
    ) -> String {
        format!("quote:{}:{}:{}:{}:{}", chain_id, from, to, amount_base, slippage_bps)
    }

    pub fn cross_chain_quote_key(
        from_chain: u64,
        to_chain: u64,
        from: &str,
        to: &str,
        amount_base: &str,
        slippage_bps: u32,
    ) -> String {
        format!(
            "xquote:{}:{}:{}:{}:{}:{}",
            from_chain, to_chain, from, to, amount_base, slippage_bps
        )
    }

    pub fn price_key(chain_id: u64, token_address: &str) -> String {
        format!("price:{}:{}", chain_id, token_address)
    }

    pub fn token_list_key(chain_id: u64) -> String {
        format!("tokens:{}", chain_id)
    }

    pub fn balance_key(chain_id: u64, wallet: &str) -> String {
        format!("balance:{}:{}", chain_id, wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator() -> RequestCoordinator {
        RequestCoordinator::new(CoordinatorConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn dedupe_fans_in_concurrent_callers() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .dedupe("k", Duration::from_secs(20), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!({"v": 42}))
                    })
                    .await
            }));
        }

        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value["v"], 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_respects_ttl_boundary() {
        let coordinator = coordinator();
        coordinator.set_cache("k", json!(1), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(coordinator.get_from_cache("k"), Some(json!(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(coordinator.get_from_cache("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_never_cached() {
        let coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let result = coordinator
                .dedupe("k", Duration::from_secs(20), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::Network("boom".into()))
                })
                .await;
            assert!(result.is_err());
        }

        // Second call re-invoked the fetcher: the failure left no entry
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.get_from_cache("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn fanned_in_callers_see_the_same_error_category() {
        let coordinator = coordinator();

        let a = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .dedupe("k", Duration::from_secs(20), || async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err(EngineError::RateLimited)
                    })
                    .await
            })
        };
        let b = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .dedupe("k", Duration::from_secs(20), || async {
                        Err(EngineError::Network("unused".into()))
                    })
                    .await
            })
        };

        assert!(matches!(a.await.unwrap(), Err(EngineError::RateLimited)));
        assert!(matches!(b.await.unwrap(), Err(EngineError::RateLimited)));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_window_trips_and_resets() {
        let coordinator = coordinator();

        // 32 of 40 requests is the 80% threshold
        for i in 0..32 {
            let key = format!("k{}", i);
            coordinator
                .dedupe(&key, Duration::from_secs(1), || async { Ok(json!(0)) })
                .await
                .unwrap();
        }
        assert!(coordinator.is_near_rate_limit());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!coordinator.is_near_rate_limit());
    }

    #[tokio::test(start_paused = true)]
    async fn action_throttle_has_minimum_interval() {
        let coordinator = coordinator();

        assert!(!coordinator.should_throttle("route-fetch"));
        coordinator.record_request("route-fetch");
        assert!(coordinator.should_throttle("route-fetch"));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!coordinator.should_throttle("route-fetch"));
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_prefix_is_selective() {
        let coordinator = coordinator();
        coordinator.set_cache("quote:1:a", json!(1), Duration::from_secs(60));
        coordinator.set_cache("quote:1:b", json!(2), Duration::from_secs(60));
        coordinator.set_cache("price:1:a", json!(3), Duration::from_secs(60));

        coordinator.invalidate_prefix("quote:");

        assert_eq!(coordinator.get_from_cache("quote:1:a"), None);
        assert_eq!(coordinator.get_from_cache("quote:1:b"), None);
        assert_eq!(coordinator.get_from_cache("price:1:a"), Some(json!(3)));
    }
}
