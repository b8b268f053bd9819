//! Cache layer that orchestrates caching logic with network fetching.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::error::Result;

use super::keys::{CacheKey, ListKey};
use super::policy::RevalidationTrigger;
use super::store::{CacheStore, InFlight};

/// Cache layer that decides when a key is served from the store and when it
/// goes to the network.
///
/// Reads are cache-first: once a key holds data it is served locally until a
/// write asks for revalidation or a caller explicitly refetches. Concurrent
/// reads of a key share one fetch.
#[derive(Clone, Default)]
pub struct CacheLayer {
  store: CacheStore,
}

impl CacheLayer {
  pub fn new(store: CacheStore) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Load a key with cache-first strategy.
  ///
  /// 1. Cached, not invalidated: return immediately. If the key's policy
  ///    revalidates stale data, a background refresh is started as well.
  /// 2. Fetch in flight: wait for it.
  /// 3. Otherwise fetch, retrying per the key's policy.
  ///
  /// A failed fetch leaves the previous data in the store and returns the
  /// error.
  pub async fn load<T, F, Fut>(&self, key: &CacheKey, fetcher: F) -> Result<Arc<T>>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let entry = self.store.snapshot::<T>(key)?;
    if let Some(data) = entry.data {
      if !entry.invalidated {
        if self.store.policy(key).allows(RevalidationTrigger::Stale) {
          let (fut, started) = self.join_or_start(key, fetcher)?;
          if started {
            debug!(key = %key, "Serving cached data while revalidating");
            tokio::spawn(fut.map(|_| ()));
          }
        } else {
          debug!(key = %key, "Cache hit");
        }
        return Ok(data);
      }
    }

    let (fut, started) = self.join_or_start(key, fetcher)?;
    if !started {
      debug!(key = %key, "Joining in-flight fetch");
    }
    fut.await
  }

  /// Fetch a key from the network even if cached data exists. Still shares an
  /// already in-flight fetch.
  pub async fn refetch<T, F, Fut>(&self, key: &CacheKey, fetcher: F) -> Result<Arc<T>>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let (fut, _) = self.join_or_start(key, fetcher)?;
    fut.await
  }

  /// Keys that should be reloaded after `trigger`. The default policy yields
  /// none; callers reload what is returned through their own fetchers.
  pub fn revalidate(&self, trigger: RevalidationTrigger) -> Vec<CacheKey> {
    let keys = self.store.keys_to_revalidate(trigger);
    for key in &keys {
      self.store.invalidate(key);
    }
    keys
  }

  fn join_or_start<T, F, Fut>(&self, key: &CacheKey, fetcher: F) -> Result<(InFlight<T>, bool)>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let policy = self.store.policy(key);
    let store = self.store.clone();
    let owned_key = key.clone();
    let hash = key.as_list().map(ListKey::filter_hash).unwrap_or_default();

    self.store.join_or_start(key, move || {
      async move {
        debug!(key = %owned_key, hash = %hash, "Cache miss, fetching");
        let mut attempt = 1;
        let result = loop {
          match fetcher().await {
            Ok(data) => break Ok(Arc::new(data)),
            Err(err) if err.is_network() && attempt < policy.max_attempts() => {
              warn!(
                key = %owned_key,
                hash = %hash,
                attempt,
                error = %err,
                "Fetch failed, retrying"
              );
              attempt += 1;
              tokio::time::sleep(policy.error_retry_interval).await;
            }
            Err(err) => break Err(err),
          }
        };
        if let Err(err) = &result {
          warn!(
            key = %owned_key,
            hash = %hash,
            error = %err,
            "Fetch failed, keeping previous data"
          );
        }
        store.complete_fetch(&owned_key, &result)?;
        result
      }
      .boxed()
      .shared()
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::keys::{QueryFamily, QueryFilter};
  use crate::cache::policy::RevalidationPolicy;
  use crate::cache::store::WriteOptions;
  use crate::error::Error;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  fn key() -> CacheKey {
    QueryFamily::new("/customer", "list")
      .list_key(QueryFilter::new())
      .into()
  }

  fn network_error() -> Error {
    Error::Network {
      url: "/customer/list".into(),
      message: "connection refused".into(),
    }
  }

  fn counting(counter: &Arc<AtomicU32>, value: u32) -> impl Fn() -> futures::future::Ready<Result<u32>> {
    let counter = counter.clone();
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
      futures::future::ready(Ok(value))
    }
  }

  #[tokio::test]
  async fn test_load_fetches_once_then_serves_cache() {
    let layer = CacheLayer::default();
    let calls = Arc::new(AtomicU32::new(0));

    assert_eq!(*layer.load(&key(), counting(&calls, 1)).await.unwrap(), 1);
    assert_eq!(*layer.load(&key(), counting(&calls, 2)).await.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let entry = layer.store().snapshot::<u32>(&key()).unwrap();
    assert!(entry.last_fetched_at.is_some());
    assert!(!entry.is_validating);
  }

  #[tokio::test]
  async fn test_concurrent_loads_share_one_fetch() {
    let layer = CacheLayer::default();
    let calls = Arc::new(AtomicU32::new(0));
    let slow = {
      let calls = calls.clone();
      move || {
        let calls = calls.clone();
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(20)).await;
          Ok::<_, Error>(5u32)
        }
      }
    };

    let key = key();
    let (a, b) = tokio::join!(layer.load(&key, slow.clone()), layer.load(&key, slow));
    assert_eq!(*a.unwrap(), 5);
    assert_eq!(*b.unwrap(), 5);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_revalidation_keeps_data() {
    let layer = CacheLayer::default();
    let calls = Arc::new(AtomicU32::new(0));
    layer.load(&key(), counting(&calls, 9)).await.unwrap();

    let failing = {
      let calls = calls.clone();
      move || {
        calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Err::<u32, _>(network_error()))
      }
    };
    let err = layer.refetch(&key(), failing).await.unwrap_err();
    assert!(err.is_network());
    // one initial fetch, then first attempt plus two retries
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let entry = layer.store().snapshot::<u32>(&key()).unwrap();
    assert_eq!(entry.data(), Some(&9));
    assert_eq!(entry.error, Some(network_error()));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_recovers_and_clears_error() {
    let layer = CacheLayer::default();
    let calls = Arc::new(AtomicU32::new(0));
    let flaky = {
      let calls = calls.clone();
      move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(if n == 0 { Err(network_error()) } else { Ok(3u32) })
      }
    };
    assert_eq!(*layer.load(&key(), flaky).await.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(layer.store().snapshot::<u32>(&key()).unwrap().error.is_none());
  }

  #[tokio::test]
  async fn test_validation_errors_are_not_retried() {
    let layer = CacheLayer::new(CacheStore::with_policy(
      RevalidationPolicy::default().with_retries(5, Duration::ZERO),
    ));
    let calls = Arc::new(AtomicU32::new(0));
    let rejecting = {
      let calls = calls.clone();
      move || {
        calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Err::<u32, _>(Error::validation("Invalid ID")))
      }
    };
    assert!(layer.load(&key(), rejecting).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_invalidated_entry_is_refetched() {
    let layer = CacheLayer::default();
    let calls = Arc::new(AtomicU32::new(0));
    layer.load(&key(), counting(&calls, 1)).await.unwrap();
    layer
      .store()
      .write::<u32, _>(
        &key(),
        |_| None,
        WriteOptions {
          revalidate: true,
          touch: false,
        },
      )
      .unwrap();

    assert_eq!(*layer.load(&key(), counting(&calls, 2)).await.unwrap(), 2);
    assert!(!layer.store().snapshot::<u32>(&key()).unwrap().invalidated);
  }

  #[tokio::test]
  async fn test_revalidate_respects_policy() {
    let layer = CacheLayer::default();
    let calls = Arc::new(AtomicU32::new(0));
    layer.load(&key(), counting(&calls, 1)).await.unwrap();
    assert!(layer.revalidate(RevalidationTrigger::Focus).is_empty());
    assert!(!layer.store().snapshot::<u32>(&key()).unwrap().invalidated);
  }
}
