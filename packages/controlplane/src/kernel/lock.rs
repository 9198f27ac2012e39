//! Lease-based distributed lock.
//!
//! Every periodic reconciler and every autoscaler pass runs under one of
//! these, keyed by name, so multi-replica control planes never execute the
//! same write path twice. Acquisition is put-if-absent with a TTL; a renewal
//! task extends the lease at TTL/3 as long as the stored token is still
//! ours. When the KV store is unreachable the lock degrades to process-local
//! mutual exclusion, which is only safe single-instance; this is logged.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::common::{Error, Result};

use super::kv::KvStore;

const DEFAULT_TTL: Duration = Duration::from_secs(15);
const DEFAULT_MAX_HOLD: Duration = Duration::from_secs(120);
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates [`LeaseLock`]s sharing one KV store and one process-local
/// fallback registry.
#[derive(Clone)]
pub struct LockManager {
    kv: Arc<dyn KvStore>,
    local: Arc<StdMutex<HashSet<String>>>,
    instance: String,
}

impl LockManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            local: Arc::new(StdMutex::new(HashSet::new())),
            instance: Uuid::new_v4().to_string(),
        }
    }

    pub fn lease(&self, name: &str) -> LeaseLock {
        LeaseLock {
            name: name.to_string(),
            kv: Arc::clone(&self.kv),
            local: Arc::clone(&self.local),
            instance: self.instance.clone(),
            ttl: DEFAULT_TTL,
            max_hold: DEFAULT_MAX_HOLD,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            held: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(None),
        }
    }
}

struct Held {
    token: String,
    fallback: bool,
    renewal: CancellationToken,
}

pub struct LeaseLock {
    name: String,
    kv: Arc<dyn KvStore>,
    local: Arc<StdMutex<HashSet<String>>>,
    instance: String,
    ttl: Duration,
    max_hold: Duration,
    acquire_timeout: Duration,
    held: Arc<AtomicBool>,
    state: Mutex<Option<Held>>,
}

impl LeaseLock {
    #[cfg(test)]
    pub fn with_timing(mut self, ttl: Duration, max_hold: Duration) -> Self {
        self.ttl = ttl;
        self.max_hold = max_hold;
        self
    }

    /// Attempt acquisition. Returns false without blocking when another
    /// holder owns the key.
    pub async fn try_lock(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(true);
        }

        let token = format!("{}:{}", self.instance, Uuid::new_v4());
        let attempt = tokio::time::timeout(
            self.acquire_timeout,
            self.kv.put_if_absent(&self.name, &token, self.ttl),
        )
        .await;

        let acquired = match attempt {
            Ok(Ok(acquired)) => acquired,
            Ok(Err(Error::Unavailable(e))) => {
                tracing::warn!(
                    lock = %self.name,
                    error = %e,
                    "KV store unavailable, degrading to process-local lock"
                );
                return Ok(self.acquire_local(&mut state, &token));
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!(
                    lock = %self.name,
                    "KV store timed out, degrading to process-local lock"
                );
                return Ok(self.acquire_local(&mut state, &token));
            }
        };

        if !acquired {
            return Ok(false);
        }

        let renewal = self.spawn_renewal(token.clone());
        *state = Some(Held {
            token,
            fallback: false,
            renewal,
        });
        self.held.store(true, Ordering::SeqCst);
        Ok(true)
    }

    /// Release. Deletes the key only when the stored token is still ours, so
    /// an expired-and-reacquired lease is never clobbered.
    pub async fn unlock(&self) {
        let mut state = self.state.lock().await;
        let Some(held) = state.take() else {
            return;
        };
        held.renewal.cancel();
        self.held.store(false, Ordering::SeqCst);

        if held.fallback {
            self.local.lock().unwrap().remove(&self.name);
            return;
        }
        if let Err(e) = self.kv.delete_if_equals(&self.name, &held.token).await {
            tracing::warn!(lock = %self.name, error = %e, "failed to release lease");
        }
    }

    /// Whether this instance believes it still holds the lease. Flips false
    /// when renewal fails or the maximum hold is exceeded.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    fn acquire_local(&self, state: &mut Option<Held>, token: &str) -> bool {
        let inserted = self.local.lock().unwrap().insert(self.name.clone());
        if inserted {
            *state = Some(Held {
                token: token.to_string(),
                fallback: true,
                renewal: CancellationToken::new(),
            });
            self.held.store(true, Ordering::SeqCst);
        }
        inserted
    }

    fn spawn_renewal(&self, token: String) -> CancellationToken {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let kv = Arc::clone(&self.kv);
        let name = self.name.clone();
        let held = Arc::clone(&self.held);
        let ttl = self.ttl;
        let deadline = Instant::now() + self.max_hold;

        tokio::spawn(async move {
            let every = ttl / 3;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = tokio::time::sleep(every) => {
                        if Instant::now() >= deadline {
                            tracing::warn!(lock = %name, "maximum hold exceeded, releasing lease internally");
                            held.store(false, Ordering::SeqCst);
                            break;
                        }
                        match kv.extend_if_equals(&name, &token, ttl).await {
                            Ok(true) => {}
                            Ok(false) => {
                                tracing::warn!(lock = %name, "lease lost, stopping renewal");
                                held.store(false, Ordering::SeqCst);
                                break;
                            }
                            Err(e) => {
                                tracing::warn!(lock = %name, error = %e, "lease renewal failed");
                                held.store(false, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                }
            }
        });

        cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::kv::MemoryKv;

    fn manager() -> LockManager {
        LockManager::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn second_holder_is_refused_until_release() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let a = LockManager::new(Arc::clone(&kv));
        let b = LockManager::new(kv);

        let lock_a = a.lease("autoscaler:global-lock");
        let lock_b = b.lease("autoscaler:global-lock");

        assert!(lock_a.try_lock().await.unwrap());
        assert!(!lock_b.try_lock().await.unwrap());

        lock_a.unlock().await;
        assert!(lock_b.try_lock().await.unwrap());
        lock_b.unlock().await;
    }

    #[tokio::test]
    async fn try_lock_is_reentrant_for_the_holder() {
        let m = manager();
        let lock = m.lease("x");
        assert!(lock.try_lock().await.unwrap());
        assert!(lock.try_lock().await.unwrap());
        lock.unlock().await;
    }

    #[tokio::test]
    async fn renewal_keeps_lease_alive_past_ttl() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let a = LockManager::new(Arc::clone(&kv));
        let b = LockManager::new(kv);

        let lock_a = a
            .lease("k")
            .with_timing(Duration::from_millis(150), Duration::from_secs(60));
        assert!(lock_a.try_lock().await.unwrap());

        // Well past the original TTL, renewal should have extended it.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(lock_a.is_held());
        let lock_b = b.lease("k");
        assert!(!lock_b.try_lock().await.unwrap());
        lock_a.unlock().await;
    }

    #[tokio::test]
    async fn max_hold_flips_is_held() {
        let m = manager();
        let lock = m
            .lease("k")
            .with_timing(Duration::from_millis(30), Duration::from_millis(40));
        assert!(lock.try_lock().await.unwrap());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!lock.is_held());
        lock.unlock().await;
    }

    #[tokio::test]
    async fn stolen_token_is_not_renewed() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let m = LockManager::new(Arc::clone(&kv));
        let lock = m
            .lease("k")
            .with_timing(Duration::from_millis(45), Duration::from_secs(60));
        assert!(lock.try_lock().await.unwrap());

        // Simulate losing the key to another holder.
        kv.delete("k").await.unwrap();
        kv.put("k", "someone-else").await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!lock.is_held());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("someone-else"));
    }

    #[tokio::test]
    async fn release_is_observable_by_other_instances() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let a = LockManager::new(Arc::clone(&kv));
        let b = LockManager::new(kv);

        let lock_a = a.lease("k");
        let lock_b = b.lease("k");
        assert!(lock_a.try_lock().await.unwrap());
        lock_a.unlock().await;
        assert!(lock_b.try_lock().await.unwrap());
        lock_b.unlock().await;
    }
}
