//! In-memory resource cache store.
//!
//! One slot per [`CacheKey`], each holding a `watch` channel of
//! [`CacheEntry<T>`] so every consumer of a key observes the same state. Slots
//! are type-erased; the value type is fixed by whoever touches the key first
//! and any later access with another type is an [`Error::TypeMismatch`].
//!
//! The map lock is only ever held for the duration of a map operation and
//! never across an `.await`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::keys::{CacheKey, ListKey, QueryFamily};
use super::lock::mutex_lock;
use super::policy::{RevalidationPolicy, RevalidationTrigger};
use super::traits::CacheEntry;

const SOURCE: &str = "cache::store";

/// A fetch shared by every reader of a key while it is in flight.
pub(crate) type InFlight<T> = Shared<BoxFuture<'static, Result<Arc<T>>>>;

/// Options of a local write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
  /// Mark the entry so the next load refetches it
  pub revalidate: bool,
  /// Stamp `last_updated_at` when the data changes
  pub touch: bool,
}

impl WriteOptions {
  /// Pure local replacement, the mode used by optimistic mutations.
  pub fn local() -> Self {
    Self {
      revalidate: false,
      touch: true,
    }
  }
}

struct TypedSlot<T> {
  tx: watch::Sender<CacheEntry<T>>,
  in_flight: Option<InFlight<T>>,
}

struct Slot {
  policy: RevalidationPolicy,
  typed: Box<dyn Any + Send + Sync>,
  mark_invalidated: fn(&mut Box<dyn Any + Send + Sync>),
}

impl Slot {
  fn new<T: Send + Sync + 'static>(policy: RevalidationPolicy) -> Self {
    let (tx, _rx) = watch::channel(CacheEntry::<T>::default());
    Self {
      policy,
      typed: Box::new(TypedSlot { tx, in_flight: None }),
      mark_invalidated: mark_invalidated::<T>,
    }
  }
}

fn mark_invalidated<T: Send + Sync + 'static>(typed: &mut Box<dyn Any + Send + Sync>) {
  if let Some(slot) = typed.downcast_mut::<TypedSlot<T>>() {
    slot.tx.send_modify(|entry| entry.invalidated = true);
  }
}

/// Session-lifetime store of cached query results.
///
/// Cloning yields another handle to the same store; pass it to every consumer
/// that must observe the same cache.
#[derive(Clone, Default)]
pub struct CacheStore {
  slots: Arc<Mutex<HashMap<CacheKey, Slot>>>,
  default_policy: RevalidationPolicy,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Create a store whose new keys start with `policy`.
  pub fn with_policy(policy: RevalidationPolicy) -> Self {
    Self {
      slots: Arc::default(),
      default_policy: policy,
    }
  }

  pub fn default_policy(&self) -> &RevalidationPolicy {
    &self.default_policy
  }

  /// Run `f` against the typed slot of `key` and its policy, creating an
  /// empty entry first if the key has never been seen.
  fn with_slot<T, R>(
    &self,
    key: &CacheKey,
    op: &'static str,
    f: impl FnOnce(&mut TypedSlot<T>, &mut RevalidationPolicy) -> R,
  ) -> Result<R>
  where
    T: Send + Sync + 'static,
  {
    let mut slots = mutex_lock(&self.slots, SOURCE, op);
    let Slot { policy, typed, .. } = slots
      .entry(key.clone())
      .or_insert_with(|| Slot::new::<T>(self.default_policy.clone()));
    match typed.as_mut().downcast_mut::<TypedSlot<T>>() {
      Some(typed) => Ok(f(typed, policy)),
      None => {
        warn!(key = %key, op, "Cache key accessed with a different value type");
        Err(Error::TypeMismatch {
          key: key.to_string(),
        })
      }
    }
  }

  /// Subscribe to a key. The receiver sees every subsequent change.
  pub fn subscribe<T>(&self, key: &CacheKey) -> Result<watch::Receiver<CacheEntry<T>>>
  where
    T: Send + Sync + 'static,
  {
    self.with_slot::<T, _>(key, "subscribe", |slot, _| slot.tx.subscribe())
  }

  /// Current state of a key.
  pub fn snapshot<T>(&self, key: &CacheKey) -> Result<CacheEntry<T>>
  where
    T: Send + Sync + 'static,
  {
    self.with_slot::<T, _>(key, "snapshot", |slot, _| slot.tx.borrow().clone())
  }

  pub fn contains(&self, key: &CacheKey) -> bool {
    mutex_lock(&self.slots, SOURCE, "contains").contains_key(key)
  }

  /// Replace the data of a key locally.
  ///
  /// `updater` receives the current data and returns the new value, or `None`
  /// to leave the data as it is. It runs while the store is locked and must
  /// not call back into the store. Subscribers are notified before this
  /// returns. Returns whether the data changed.
  pub fn write<T, F>(&self, key: &CacheKey, updater: F, opts: WriteOptions) -> Result<bool>
  where
    T: Send + Sync + 'static,
    F: FnOnce(Option<&Arc<T>>) -> Option<T>,
  {
    self.with_slot::<T, _>(key, "write", |slot, _| {
      let mut changed = false;
      slot.tx.send_modify(|entry| {
        if let Some(next) = updater(entry.data.as_ref()) {
          entry.data = Some(Arc::new(next));
          changed = true;
          if opts.touch {
            entry.last_updated_at = Some(Utc::now());
          }
        }
        if opts.revalidate {
          entry.invalidated = true;
        }
      });
      changed
    })
  }

  /// Store an already shared value, keeping its `Arc` identity.
  pub fn set_data<T>(&self, key: &CacheKey, data: Arc<T>, opts: WriteOptions) -> Result<()>
  where
    T: Send + Sync + 'static,
  {
    self.with_slot::<T, _>(key, "set_data", |slot, _| {
      slot.tx.send_modify(|entry| {
        entry.data = Some(data);
        if opts.touch {
          entry.last_updated_at = Some(Utc::now());
        }
        entry.invalidated = opts.revalidate;
      });
    })
  }

  /// Put back data captured earlier by [`snapshot`](Self::snapshot), but
  /// only while `when` holds for the current data. Fetch state
  /// (`is_validating`, `error`) is left alone. Returns whether the data was
  /// restored.
  pub fn restore<T, F>(
    &self,
    key: &CacheKey,
    data: Option<Arc<T>>,
    last_updated_at: Option<DateTime<Utc>>,
    when: F,
  ) -> Result<bool>
  where
    T: Send + Sync + 'static,
    F: FnOnce(Option<&Arc<T>>) -> bool,
  {
    self.with_slot::<T, _>(key, "restore", |slot, _| {
      let mut restored = false;
      slot.tx.send_if_modified(|entry| {
        if !when(entry.data.as_ref()) {
          return false;
        }
        entry.data = data;
        entry.last_updated_at = last_updated_at;
        restored = true;
        true
      });
      restored
    })
  }

  /// Drop the data of a key, e.g. after its record was deleted on the server.
  pub fn evict<T>(&self, key: &CacheKey) -> Result<()>
  where
    T: Send + Sync + 'static,
  {
    self.with_slot::<T, _>(key, "evict", |slot, _| {
      slot.tx.send_modify(|entry| {
        entry.data = None;
        entry.last_updated_at = Some(Utc::now());
      });
    })
  }

  /// Mark a key so that its next load goes to the server. Unknown keys are
  /// ignored.
  pub fn invalidate(&self, key: &CacheKey) {
    let mut slots = mutex_lock(&self.slots, SOURCE, "invalidate");
    if let Some(slot) = slots.get_mut(key) {
      debug!(key = %key, "Invalidating cache key");
      (slot.mark_invalidated)(&mut slot.typed);
    }
  }

  pub fn policy(&self, key: &CacheKey) -> RevalidationPolicy {
    mutex_lock(&self.slots, SOURCE, "policy")
      .get(key)
      .map(|slot| slot.policy.clone())
      .unwrap_or_else(|| self.default_policy.clone())
  }

  /// Override the revalidation policy of a single key.
  pub fn set_policy<T>(&self, key: &CacheKey, policy: RevalidationPolicy) -> Result<()>
  where
    T: Send + Sync + 'static,
  {
    self.with_slot::<T, _>(key, "set_policy", |_, current| *current = policy)
  }

  pub fn keys(&self) -> Vec<CacheKey> {
    mutex_lock(&self.slots, SOURCE, "keys").keys().cloned().collect()
  }

  /// List keys of every page of `family` the store has seen.
  pub fn family_keys(&self, family: &QueryFamily) -> Vec<ListKey> {
    mutex_lock(&self.slots, SOURCE, "family_keys")
      .keys()
      .filter(|key| family.contains(key))
      .filter_map(|key| key.as_list().cloned())
      .collect()
  }

  /// Keys whose policy allows a refetch on `trigger`.
  pub fn keys_to_revalidate(&self, trigger: RevalidationTrigger) -> Vec<CacheKey> {
    mutex_lock(&self.slots, SOURCE, "keys_to_revalidate")
      .iter()
      .filter(|(_, slot)| slot.policy.allows(trigger))
      .map(|(key, _)| key.clone())
      .collect()
  }

  /// The in-flight fetch of a key, or a new one built by `start`.
  ///
  /// Returns the shared future and whether it was newly started. Starting a
  /// fetch flags the entry as validating.
  pub(crate) fn join_or_start<T>(
    &self,
    key: &CacheKey,
    start: impl FnOnce() -> InFlight<T>,
  ) -> Result<(InFlight<T>, bool)>
  where
    T: Send + Sync + 'static,
  {
    self.with_slot::<T, _>(key, "join_or_start", |slot, _| {
      if let Some(fut) = &slot.in_flight {
        return (fut.clone(), false);
      }
      let fut = start();
      slot.in_flight = Some(fut.clone());
      slot.tx.send_modify(|entry| entry.is_validating = true);
      (fut, true)
    })
  }

  /// Record the outcome of a fetch. A failure keeps the previous data.
  pub(crate) fn complete_fetch<T>(&self, key: &CacheKey, result: &Result<Arc<T>>) -> Result<()>
  where
    T: Send + Sync + 'static,
  {
    self.with_slot::<T, _>(key, "complete_fetch", |slot, _| {
      slot.in_flight = None;
      slot.tx.send_modify(|entry| {
        entry.is_validating = false;
        match result {
          Ok(data) => {
            entry.data = Some(Arc::clone(data));
            entry.error = None;
            entry.invalidated = false;
            entry.last_fetched_at = Some(Utc::now());
          }
          Err(err) => entry.error = Some(err.clone()),
        }
      });
    })
  }

  /// Drop every entry. Only meant for session teardown.
  pub fn clear(&self) {
    mutex_lock(&self.slots, SOURCE, "clear").clear();
  }

  pub fn len(&self) -> usize {
    mutex_lock(&self.slots, SOURCE, "len").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::keys::{EntityKey, QueryFilter};

  fn list_key(page: u32) -> CacheKey {
    QueryFamily::new("/bank", "list")
      .list_key(QueryFilter::new().page(page))
      .into()
  }

  #[test]
  fn test_first_read_creates_empty_entry() {
    let store = CacheStore::new();
    let key = list_key(1);
    assert!(!store.contains(&key));

    let entry = store.snapshot::<Vec<i64>>(&key).unwrap();
    assert!(!entry.is_populated());
    assert!(!entry.is_validating);
    assert!(store.contains(&key));
  }

  #[test]
  fn test_write_notifies_subscribers() {
    let store = CacheStore::new();
    let key = list_key(1);
    let mut rx = store.subscribe::<Vec<i64>>(&key).unwrap();
    rx.mark_unchanged();

    let changed = store
      .write::<Vec<i64>, _>(&key, |_| Some(vec![1, 2]), WriteOptions::local())
      .unwrap();

    assert!(changed);
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().data(), Some(&vec![1, 2]));
    assert!(rx.borrow().last_updated_at.is_some());
  }

  #[test]
  fn test_write_returning_none_keeps_data() {
    let store = CacheStore::new();
    let key = list_key(1);
    store
      .write::<Vec<i64>, _>(&key, |_| Some(vec![7]), WriteOptions::default())
      .unwrap();
    let changed = store
      .write::<Vec<i64>, _>(&key, |_| None, WriteOptions::default())
      .unwrap();
    assert!(!changed);
    assert_eq!(store.snapshot::<Vec<i64>>(&key).unwrap().data(), Some(&vec![7]));
  }

  #[test]
  fn test_type_mismatch_is_reported() {
    let store = CacheStore::new();
    let key: CacheKey = EntityKey::new("/bank", 3).into();
    store.snapshot::<String>(&key).unwrap();
    let err = store.snapshot::<i64>(&key).unwrap_err();
    assert_eq!(
      err,
      Error::TypeMismatch {
        key: "/bank/3".to_string()
      }
    );
  }

  #[test]
  fn test_invalidate_and_revalidate_flag() {
    let store = CacheStore::new();
    let key = list_key(2);
    store
      .write::<Vec<i64>, _>(
        &key,
        |_| Some(vec![1]),
        WriteOptions {
          revalidate: true,
          touch: false,
        },
      )
      .unwrap();
    let entry = store.snapshot::<Vec<i64>>(&key).unwrap();
    assert!(entry.invalidated);
    assert!(entry.last_updated_at.is_none());

    let other = list_key(3);
    store.snapshot::<Vec<i64>>(&other).unwrap();
    store.invalidate(&other);
    assert!(store.snapshot::<Vec<i64>>(&other).unwrap().invalidated);
  }

  #[test]
  fn test_family_keys_exclude_entities_and_other_families() {
    let store = CacheStore::new();
    let family = QueryFamily::new("/bank", "list");
    store.snapshot::<Vec<i64>>(&list_key(1)).unwrap();
    store.snapshot::<Vec<i64>>(&list_key(2)).unwrap();
    store
      .snapshot::<i64>(&EntityKey::new("/bank", 1).into())
      .unwrap();
    store
      .snapshot::<Vec<i64>>(&QueryFamily::new("/good", "list").list_key(QueryFilter::new()).into())
      .unwrap();

    let mut keys = store.family_keys(&family);
    keys.sort_by_key(|k| k.to_string());
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k.family() == family));
  }

  #[test]
  fn test_policy_override_and_triggers() {
    let store = CacheStore::new();
    let quiet = list_key(1);
    let live = list_key(2);
    store.snapshot::<Vec<i64>>(&quiet).unwrap();
    store
      .set_policy::<Vec<i64>>(&live, RevalidationPolicy::live())
      .unwrap();

    assert_eq!(store.policy(&quiet), RevalidationPolicy::default());
    assert_eq!(
      store.keys_to_revalidate(RevalidationTrigger::Focus),
      vec![live]
    );
  }

  #[test]
  fn test_clear_drops_everything() {
    let store = CacheStore::new();
    let handle = store.clone();
    handle.snapshot::<Vec<i64>>(&list_key(1)).unwrap();
    assert_eq!(store.len(), 1);
    store.clear();
    assert!(handle.is_empty());
  }
}
