//! Consumer-side query handle bound to one cache key.
//!
//! Inspired by TanStack Query: a `Query<T>` pairs a cache key with the fetcher
//! that fills it, and exposes loading, success and error states derived from
//! the shared cache entry. Any number of handles may observe the same key;
//! they all see the same data because the entry lives in the store, not in the
//! handle.
//!
//! # Example
//!
//! ```ignore
//! let mut prices = api.repo().query_list(QueryFilter::new().page(2))?;
//! prices.fetch();
//!
//! // On every redraw
//! if prices.poll() {
//!     match prices.state() {
//!         QueryState::Success(page) => table.set_rows(&page.content),
//!         QueryState::Error(err) => status_line.show(&err),
//!         QueryState::Loading | QueryState::Idle => table.set_placeholder(),
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::cache::{CacheEntry, CacheKey, CacheLayer};
use crate::error::{Error, Result};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// First fetch in progress, nothing to show yet
  Loading,
  /// Data is available. May be stale if the last revalidation failed.
  Success(Arc<T>),
  /// Fetch failed and no data was ever received
  Error(Error),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  fn from_entry(entry: &CacheEntry<T>) -> Self {
    match (&entry.data, &entry.error) {
      (Some(data), _) => QueryState::Success(Arc::clone(data)),
      (None, _) if entry.is_validating => QueryState::Loading,
      (None, Some(err)) => QueryState::Error(err.clone()),
      (None, None) => QueryState::Idle,
    }
  }
}

/// A boxed future that returns a Result<T>
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Handle observing one cache key.
///
/// Query<T> encapsulates:
/// - The key and the fetching logic (via a closure)
/// - A subscription to the key's cache entry
/// - Loading/success/error states derived from that entry
pub struct Query<T> {
  layer: CacheLayer,
  key: CacheKey,
  fetcher: FetcherFn<T>,
  receiver: watch::Receiver<CacheEntry<T>>,
}

impl<T: Send + Sync + 'static> Query<T> {
  /// Create a query for `key`, subscribing to its cache entry.
  ///
  /// The fetcher is a closure that returns a future. It is called whenever the
  /// layer decides the key has to go to the network.
  pub fn new<F, Fut>(layer: &CacheLayer, key: impl Into<CacheKey>, fetcher: F) -> Result<Self>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let key = key.into();
    let receiver = layer.store().subscribe::<T>(&key)?;
    Ok(Self {
      layer: layer.clone(),
      key,
      fetcher: Arc::new(move || -> BoxFuture<T> { Box::pin(fetcher()) }),
      receiver,
    })
  }

  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  /// Current cache entry of the key.
  pub fn entry(&self) -> CacheEntry<T> {
    self.receiver.borrow().clone()
  }

  pub fn state(&self) -> QueryState<T> {
    QueryState::from_entry(&self.receiver.borrow())
  }

  pub fn data(&self) -> Option<Arc<T>> {
    self.receiver.borrow().data.clone()
  }

  pub fn is_loading(&self) -> bool {
    self.state().is_loading()
  }

  /// Error of the latest fetch, even when stale data is still shown.
  pub fn error(&self) -> Option<Error> {
    self.receiver.borrow().error.clone()
  }

  /// Load the key in the background. Served from cache when possible, and a
  /// no-op if a fetch is already in flight.
  pub fn fetch(&self) {
    let layer = self.layer.clone();
    let key = self.key.clone();
    let fetcher = self.fetcher.clone();
    tokio::spawn(async move {
      if let Err(err) = layer.load(&key, move || fetcher()).await {
        debug!(key = %key, error = %err, "Query fetch failed");
      }
    });
  }

  /// Force a network fetch in the background.
  pub fn refetch(&self) {
    let layer = self.layer.clone();
    let key = self.key.clone();
    let fetcher = self.fetcher.clone();
    tokio::spawn(async move {
      if let Err(err) = layer.refetch(&key, move || fetcher()).await {
        debug!(key = %key, error = %err, "Query refetch failed");
      }
    });
  }

  /// Load the key and wait for the result.
  pub async fn resolve(&self) -> Result<Arc<T>> {
    let fetcher = self.fetcher.clone();
    self.layer.load(&self.key, move || fetcher()).await
  }

  /// Returns `true` if the entry changed since the last poll.
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    match self.receiver.has_changed() {
      Ok(true) => {
        self.receiver.mark_unchanged();
        true
      }
      _ => false,
    }
  }

  /// Wait until the entry changes. Returns `false` if the store was dropped.
  pub async fn changed(&mut self) -> bool {
    self.receiver.changed().await.is_ok()
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("entry", &*self.receiver.borrow())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{EntityKey, WriteOptions};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  fn key() -> EntityKey {
    EntityKey::new("/good", 1)
  }

  #[tokio::test]
  async fn test_query_success() {
    let layer = CacheLayer::default();
    let mut query = Query::new(&layer, key(), || async { Ok(vec![1, 2, 3]) }).unwrap();

    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.changed().await);
    while !query.state().is_success() {
      query.changed().await;
    }
    assert_eq!(query.data().as_deref(), Some(&vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_query_error() {
    let layer = CacheLayer::new(crate::cache::CacheStore::with_policy(
      crate::cache::RevalidationPolicy::default().with_retries(0, Duration::ZERO),
    ));
    let query: Query<i32> = Query::new(&layer, key(), || async {
      Err(Error::Network {
        url: "/good/1".into(),
        message: "Something went wrong".into(),
      })
    })
    .unwrap();

    assert!(query.resolve().await.is_err());
    assert!(query.state().is_error());
    assert!(query.error().unwrap().to_string().contains("Something went wrong"));
  }

  #[tokio::test]
  async fn test_handles_share_the_entry() {
    let layer = CacheLayer::default();
    let calls = Arc::new(AtomicU32::new(0));
    let make = |calls: Arc<AtomicU32>| {
      move || {
        let calls = calls.clone();
        async move { Ok(calls.fetch_add(1, Ordering::SeqCst)) }
      }
    };
    let first = Query::new(&layer, key(), make(calls.clone())).unwrap();
    let mut second = Query::new(&layer, key(), make(calls.clone())).unwrap();

    first.resolve().await.unwrap();
    assert!(second.poll());
    assert_eq!(second.data().as_deref(), Some(&0));
    second.resolve().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_local_write_is_visible_without_refetch() {
    let layer = CacheLayer::default();
    let mut query = Query::new(&layer, key(), || async { Ok(String::from("server")) }).unwrap();
    query.resolve().await.unwrap();
    query.poll();

    layer
      .store()
      .write::<String, _>(&key().into(), |_| Some("local".into()), WriteOptions::local())
      .unwrap();

    assert!(query.poll());
    assert_eq!(query.data().as_deref().map(String::as_str), Some("local"));
  }

  #[tokio::test]
  async fn test_refetch_replaces_data() {
    let layer = CacheLayer::default();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let mut query = Query::new(&layer, key(), move || {
      let counter = counter.clone();
      async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
    })
    .unwrap();

    query.resolve().await.unwrap();
    query.poll();
    query.refetch();
    while query.data().as_deref() != Some(&1) {
      query.changed().await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
