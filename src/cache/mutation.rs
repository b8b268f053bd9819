//! Optimistic mutations.
//!
//! After a successful write the server's canonical record is pushed into every
//! cached list page of the resource's family and into the record's own entity
//! key, without asking for revalidation. Callers awaiting the write observe the
//! updated cache as soon as it resolves.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;

use super::keys::{CacheKey, ListKey, QueryFamily};
use super::store::{CacheStore, WriteOptions};
use super::traits::{Cacheable, Page};

/// How a write changes the list pages of its family.
#[derive(Debug, Clone)]
pub enum ListTransform<T> {
  /// A record was created: append it at the end of each page it belongs on
  Append(T),
  /// A record was updated or changed status: replace it by id
  Replace(T),
  /// A record was deleted: drop it by id
  Remove(i64),
}

impl<T: Cacheable> ListTransform<T> {
  pub fn id(&self) -> i64 {
    match self {
      Self::Append(record) | Self::Replace(record) => record.cache_id(),
      Self::Remove(id) => *id,
    }
  }

  fn kind(&self) -> &'static str {
    match self {
      Self::Append(_) => "append",
      Self::Replace(_) => "replace",
      Self::Remove(_) => "remove",
    }
  }
}

/// What an applied mutation touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationReport {
  /// Populated pages whose content changed
  pub pages_updated: usize,
  /// Family keys with no data yet, left for their first fetch
  pub pages_skipped: usize,
  /// Filtered pages the record moved into without being on them; they are
  /// marked so the next load refetches them
  pub pages_invalidated: usize,
  /// Whether the entity key was written
  pub entity_written: bool,
}

enum PageChange<T> {
  Unchanged,
  Updated(Page<T>),
  /// The record now satisfies the page's filter but is not on it, so the page
  /// cannot be patched locally
  Stale,
}

fn transform_page<T: Cacheable>(
  key: &ListKey,
  page: &Page<T>,
  transform: &ListTransform<Arc<T>>,
  prior: Option<&Arc<T>>,
) -> PageChange<T> {
  let mut next = page.clone();
  let changed = match transform {
    ListTransform::Append(record) => {
      if !record.matches(key.filter()) {
        return PageChange::Unchanged;
      }
      next.append(Arc::clone(record));
      true
    }
    ListTransform::Replace(record) => {
      if !record.matches(key.filter()) {
        next.remove(record.cache_id())
      } else if next.replace(Arc::clone(record)) {
        true
      } else if prior.is_some_and(|prior| !prior.matches(key.filter())) {
        return PageChange::Stale;
      } else {
        false
      }
    }
    ListTransform::Remove(id) => next.remove(*id),
  };
  if changed {
    PageChange::Updated(next)
  } else {
    PageChange::Unchanged
  }
}

fn share<T: Cacheable>(transform: ListTransform<T>, now: DateTime<Utc>) -> ListTransform<Arc<T>> {
  match transform {
    ListTransform::Append(mut record) => {
      record.stamp_updated(now);
      ListTransform::Append(Arc::new(record))
    }
    ListTransform::Replace(mut record) => {
      record.stamp_updated(now);
      ListTransform::Replace(Arc::new(record))
    }
    ListTransform::Remove(id) => ListTransform::Remove(id),
  }
}

/// Last known version of `id`: its entity key first, then any family page.
fn known_record<T: Cacheable>(store: &CacheStore, family: &QueryFamily, id: i64) -> Option<Arc<T>> {
  if id <= 0 {
    return None;
  }
  let entity_key: CacheKey = family.entity_key(id).into();
  if let Some(record) = store.snapshot::<T>(&entity_key).ok().and_then(|entry| entry.data) {
    return Some(record);
  }
  store.family_keys(family).into_iter().find_map(|list_key| {
    let entry = store.snapshot::<Page<T>>(&CacheKey::List(list_key)).ok()?;
    entry.data?.get(id).cloned()
  })
}

/// Whether the cache still shows what `applied` wrote for its id.
fn still_applied<T: Cacheable>(current: Option<&Arc<T>>, applied: &ListTransform<Arc<T>>) -> bool {
  match (applied, current) {
    (ListTransform::Remove(_), current) => current.is_none(),
    (ListTransform::Append(record) | ListTransform::Replace(record), Some(current)) => {
      Arc::ptr_eq(record, current)
    }
    (_, None) => true,
  }
}

/// Apply a write's server result to the cache.
///
/// Every populated list page of `family` gets the transform; pages that were
/// never fetched are skipped. The entity key of the affected id receives the
/// record, stamped through [`Cacheable::stamp_updated`], or loses its data for
/// a removal.
///
/// A replaced record that moved into a filtered page's result set cannot be
/// placed locally, because only the server knows where it sorts. Such pages
/// are marked for revalidation; nothing else is.
pub fn apply_mutation<T: Cacheable>(
  store: &CacheStore,
  family: &QueryFamily,
  transform: ListTransform<T>,
) -> Result<MutationReport> {
  let kind = transform.kind();
  apply_shared(store, family, &share(transform, Utc::now()), kind)
}

fn apply_shared<T: Cacheable>(
  store: &CacheStore,
  family: &QueryFamily,
  shared: &ListTransform<Arc<T>>,
  kind: &'static str,
) -> Result<MutationReport> {
  let id = match shared {
    ListTransform::Append(record) | ListTransform::Replace(record) => record.cache_id(),
    ListTransform::Remove(id) => *id,
  };
  let prior = match shared {
    ListTransform::Replace(_) => known_record::<T>(store, family, id),
    _ => None,
  };

  let mut report = MutationReport::default();
  for list_key in store.family_keys(family) {
    let key = CacheKey::List(list_key.clone());
    let mut populated = false;
    let mut stale = false;
    let result = store.write::<Page<T>, _>(
      &key,
      |current| {
        let page = current?;
        populated = true;
        match transform_page(&list_key, page, shared, prior.as_ref()) {
          PageChange::Updated(next) => Some(next),
          PageChange::Stale => {
            stale = true;
            None
          }
          PageChange::Unchanged => None,
        }
      },
      WriteOptions::local(),
    );
    match result {
      Ok(true) => report.pages_updated += 1,
      Ok(false) if stale => {
        debug!(
          key = %key,
          hash = %list_key.filter_hash(),
          id,
          "Record entered filtered page, refetch needed"
        );
        store.invalidate(&key);
        report.pages_invalidated += 1;
      }
      Ok(false) if !populated => report.pages_skipped += 1,
      Ok(false) => {}
      Err(err) => warn!(
        key = %key,
        hash = %list_key.filter_hash(),
        error = %err,
        "Skipping family page during mutation"
      ),
    }
  }

  if id > 0 {
    let entity_key: CacheKey = family.entity_key(id).into();
    match shared {
      ListTransform::Append(record) | ListTransform::Replace(record) => {
        store.set_data(&entity_key, Arc::clone(record), WriteOptions::local())?;
      }
      ListTransform::Remove(_) => store.evict::<T>(&entity_key)?,
    }
    report.entity_written = true;
  }

  if report.pages_updated == 0 && report.pages_skipped == 0 && report.pages_invalidated == 0 {
    debug!(family = %family, id, kind, "No cached pages in family");
  }
  info!(
    family = %family,
    id,
    kind,
    pages_updated = report.pages_updated,
    pages_skipped = report.pages_skipped,
    pages_invalidated = report.pages_invalidated,
    "Applied optimistic mutation"
  );
  Ok(report)
}

struct PageSnapshot<T> {
  key: CacheKey,
  before: Arc<Page<T>>,
  updated_at: Option<DateTime<Utc>>,
  /// Position and value of the record on the page before the write
  prior: Option<(usize, Arc<T>)>,
  /// Page as left by the speculative write
  after: Option<Arc<Page<T>>>,
}

/// Pre-mutation state of one record across its family.
///
/// Rolling back only touches that record. Pages nobody else wrote to since
/// are put back whole, keeping their `Arc` identity; pages changed by another
/// write in the meantime only get the record itself restored, so that write's
/// result survives.
pub struct Snapshot<T> {
  id: i64,
  pages: Vec<PageSnapshot<T>>,
  entity: Option<(CacheKey, Option<Arc<T>>, Option<DateTime<Utc>>)>,
}

impl<T: Cacheable> Snapshot<T> {
  /// Capture the family's populated pages and, for a positive id, its entity
  /// key.
  pub fn capture(store: &CacheStore, family: &QueryFamily, id: i64) -> Result<Self> {
    let mut pages = Vec::new();
    for list_key in store.family_keys(family) {
      let key = CacheKey::List(list_key);
      match store.snapshot::<Page<T>>(&key) {
        Ok(entry) => {
          if let Some(before) = entry.data {
            let prior = before
              .position(id)
              .map(|index| (index, Arc::clone(&before.content[index])));
            pages.push(PageSnapshot {
              key,
              before,
              updated_at: entry.last_updated_at,
              prior,
              after: None,
            });
          }
        }
        Err(err) => warn!(key = %key, error = %err, "Not capturing foreign family page"),
      }
    }
    let entity = if id > 0 {
      let key: CacheKey = family.entity_key(id).into();
      let entry = store.snapshot::<T>(&key)?;
      Some((key, entry.data, entry.last_updated_at))
    } else {
      None
    };
    Ok(Self { id, pages, entity })
  }

  fn record_applied(&mut self, store: &CacheStore) {
    for page in &mut self.pages {
      page.after = store
        .snapshot::<Page<T>>(&page.key)
        .ok()
        .and_then(|entry| entry.data);
    }
  }

  /// Undo `applied`, the speculative write made after the capture, for this
  /// record only.
  pub fn restore(self, store: &CacheStore, applied: &ListTransform<Arc<T>>) -> Result<()> {
    let id = self.id;
    for page in self.pages {
      let untouched = page.after.clone();
      let whole = store.restore(&page.key, Some(page.before), page.updated_at, |current| {
        match (current, untouched.as_ref()) {
          (Some(current), Some(after)) => Arc::ptr_eq(current, after),
          _ => false,
        }
      })?;
      if whole {
        continue;
      }
      let prior = page.prior;
      store.write::<Page<T>, _>(
        &page.key,
        |current| {
          let current = current?;
          if !still_applied(current.get(id), applied) {
            return None;
          }
          let mut next = Page::clone(current);
          next.restore_item(id, prior).then_some(next)
        },
        WriteOptions::local(),
      )?;
    }
    if let Some((key, data, updated)) = self.entity {
      store.restore(&key, data, updated, |current| still_applied(current, applied))?;
    }
    Ok(())
  }
}

/// Show a speculative change immediately and settle it once the request
/// resolves.
///
/// The record's pre-mutation state is captured, `speculative` is applied, and
/// `request` is awaited. On success the speculative change is rolled back and
/// the transform built by `confirm` from the server's record is applied, so a
/// temporary id never survives. On failure the speculative change is rolled
/// back and the error returned. Only the written record is rolled back, so
/// writes to other records that resolve meanwhile are kept.
pub async fn optimistic<T, Fut, C>(
  store: &CacheStore,
  family: &QueryFamily,
  speculative: Option<ListTransform<T>>,
  request: Fut,
  confirm: C,
) -> Result<T>
where
  T: Cacheable,
  Fut: Future<Output = Result<T>>,
  C: FnOnce(T) -> ListTransform<T>,
{
  let pending = match speculative {
    Some(transform) => {
      let kind = transform.kind();
      let mut snapshot = Snapshot::<T>::capture(store, family, transform.id())?;
      let applied = share(transform, Utc::now());
      apply_shared(store, family, &applied, kind)?;
      snapshot.record_applied(store);
      Some((snapshot, applied))
    }
    None => None,
  };

  match request.await {
    Ok(record) => {
      if let Some((snapshot, applied)) = pending {
        snapshot.restore(store, &applied)?;
      }
      apply_mutation(store, family, confirm(record.clone()))?;
      Ok(record)
    }
    Err(err) => {
      if let Some((snapshot, applied)) = pending {
        debug!(family = %family, error = %err, "Request failed, rolling back speculative write");
        snapshot.restore(store, &applied)?;
      }
      Err(err)
    }
  }
}
