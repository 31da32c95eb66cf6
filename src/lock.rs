//! Per-ref advisory locking built on conditional object-store writes.
//!
//! A push acquires `<prefix>/<ref>/LOCK#.lock` via a `put` with
//! [`PutMode::CreateOnly`] before touching any bundle state, so that two
//! concurrent pushes to the same ref are serialised by the store rather than
//! racing on the "is there already a bundle here" read.

use std::time::Duration;

use anyhow::{anyhow, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use log::{debug, warn};
use rand::Rng;

use crate::defaults;
use crate::store::{ObjectStore, PutMode, StoreError};

fn lock_key(prefix: &str, ref_name: &str) -> String {
    format!("{prefix}/{ref_name}/LOCK#.lock")
}

/// A held lock; dropping it does *not* release it. Because release is an
/// async object-store call, it cannot run from a synchronous `Drop` the way
/// the teacher's `defer!`-based cleanups do; callers must instead call
/// [`release`] explicitly from a guaranteed-release epilogue that covers
/// every exit path of the enclosing `async fn` (see [`crate::refengine::push`]).
pub struct Lock {
    pub key: String,
}

/// Attempts to acquire the lock for `ref_name`, retrying with exponential
/// backoff and jitter when contended, and reclaiming a stale lock whose
/// `LastModified` exceeds [`defaults::lock_ttl_secs`].
pub async fn acquire(store: &dyn ObjectStore, prefix: &str, ref_name: &str) -> Result<Lock> {
    let key = lock_key(prefix, ref_name);
    let ttl = Duration::from_secs(defaults::lock_ttl_secs());
    let max_attempts = defaults::lock_max_attempts();

    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(defaults::lock_initial_backoff_ms()))
        .with_max_elapsed_time(None)
        .build();

    for attempt in 1..=max_attempts {
        match store.put(&key, Vec::new(), PutMode::CreateOnly, None, None).await {
            Ok(()) => {
                debug!("acquired lock {key} on attempt {attempt}");
                return Ok(Lock { key });
            }
            Err(StoreError::PreconditionFailed(_)) => {
                if let Some(existing) = store.head(&key).await? {
                    let age = Utc::now().signed_duration_since(existing.last_modified);
                    if age.to_std().unwrap_or_default() > ttl {
                        warn!("reclaiming stale lock {key} (age {age})");
                        store.delete(&key).await?;
                        continue;
                    }
                }
                if attempt == max_attempts {
                    break;
                }
                let delay = backoff.next_backoff().unwrap_or(Duration::from_millis(
                    defaults::lock_initial_backoff_ms(),
                ));
                let jitter_ms = rand::rng().random_range(0..50);
                tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(anyhow!("failed to acquire lock for ref {ref_name} after {max_attempts} attempts"))
}

/// Releases a held lock. Failures are logged, not propagated: the TTL
/// guarantees eventual recovery even if this delete never lands.
pub async fn release(store: &dyn ObjectStore, lock: &Lock) {
    if let Err(e) = store.delete(&lock.key).await {
        warn!("failed to release lock {}: {e}", lock.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_acquire_then_release_allows_reacquire() {
        let store = InMemoryStore::new();
        let lock = acquire(&store, "prefix", "refs/heads/main").await.unwrap();
        assert!(store.contains(&lock.key));
        release(&store, &lock).await;
        assert!(!store.contains(&lock.key));

        let lock2 = acquire(&store, "prefix", "refs/heads/main").await.unwrap();
        release(&store, &lock2).await;
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_stale_lock_is_reclaimed() {
        std::env::set_var("GIT_REMOTE_S3_LOCK_TTL_SECS", "60");
        let store = InMemoryStore::new();
        let key = lock_key("prefix", "refs/heads/main");
        store
            .put(&key, Vec::new(), PutMode::CreateOnly, None, None)
            .await
            .unwrap();
        store.backdate(&key, chrono::Duration::seconds(120));

        let lock = acquire(&store, "prefix", "refs/heads/main").await.unwrap();
        assert_eq!(lock.key, key);
        std::env::remove_var("GIT_REMOTE_S3_LOCK_TTL_SECS");
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_fresh_contended_lock_exhausts_retries() {
        std::env::set_var("GIT_REMOTE_S3_LOCK_TTL_SECS", "3600");
        std::env::set_var("GIT_REMOTE_S3_LOCK_MAX_ATTEMPTS", "2");
        std::env::set_var("GIT_REMOTE_S3_LOCK_INITIAL_BACKOFF_MS", "1");

        let store = InMemoryStore::new();
        let key = lock_key("prefix", "refs/heads/main");
        store
            .put(&key, Vec::new(), PutMode::CreateOnly, None, None)
            .await
            .unwrap();

        let result = acquire(&store, "prefix", "refs/heads/main").await;
        assert!(result.is_err());

        std::env::remove_var("GIT_REMOTE_S3_LOCK_TTL_SECS");
        std::env::remove_var("GIT_REMOTE_S3_LOCK_MAX_ATTEMPTS");
        std::env::remove_var("GIT_REMOTE_S3_LOCK_INITIAL_BACKOFF_MS");
    }
}
