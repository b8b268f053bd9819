//! Core traits and types for the caching system.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Error;

use super::keys::QueryFilter;

/// Trait for server resources that can be cached.
///
/// Implementors name the endpoint they are served from and expose the numeric
/// id the server assigned them.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Endpoint the resource lives under (e.g. "/good-supplier")
  fn endpoint() -> &'static str;

  /// Path segment of the paginated list operation under the endpoint
  fn list_suffix() -> &'static str {
    "list"
  }

  /// Whether deleting the resource only switches it to INACTIVE on the
  /// server, keeping the record retrievable by id.
  fn soft_delete() -> bool {
    false
  }

  /// Server-assigned id
  fn cache_id(&self) -> i64;

  /// Record the time of an optimistic write on the value itself.
  /// Resources whose views show "last updated" override this.
  fn stamp_updated(&mut self, _at: DateTime<Utc>) {}

  /// Whether this record still belongs on a list page fetched with `filter`.
  fn matches(&self, _filter: &QueryFilter) -> bool {
    true
  }

  /// Decode one record from its wire representation.
  fn from_wire(value: serde_json::Value) -> serde_json::Result<Self> {
    serde_json::from_value(value)
  }
}

/// State of one cache key as observed by its subscribers.
#[derive(Debug)]
pub struct CacheEntry<T> {
  /// Last known value. Survives failed revalidations.
  pub data: Option<Arc<T>>,
  /// Error of the most recent fetch, cleared by the next success
  pub error: Option<Error>,
  /// A fetch for this key is in flight
  pub is_validating: bool,
  /// Marked by a write that asked for revalidation; the next load refetches
  pub invalidated: bool,
  /// When the data was last received from the server
  pub last_fetched_at: Option<DateTime<Utc>>,
  /// When the data was last replaced by an optimistic write
  pub last_updated_at: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn is_populated(&self) -> bool {
    self.data.is_some()
  }
}

impl<T> Default for CacheEntry<T> {
  fn default() -> Self {
    Self {
      data: None,
      error: None,
      is_validating: false,
      invalidated: false,
      last_fetched_at: None,
      last_updated_at: None,
    }
  }
}

impl<T> Clone for CacheEntry<T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      error: self.error.clone(),
      is_validating: self.is_validating,
      invalidated: self.invalidated,
      last_fetched_at: self.last_fetched_at,
      last_updated_at: self.last_updated_at,
    }
  }
}

/// One server-computed page of a list query.
///
/// Items are shared: an optimistic write that touches one record leaves every
/// other item's `Arc` untouched.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
  #[serde(default = "Vec::new")]
  pub content: Vec<Arc<T>>,
  #[serde(default)]
  pub total_elements: u64,
  #[serde(default)]
  pub page: u32,
  #[serde(default)]
  pub size: u32,
}

impl<T> Clone for Page<T> {
  fn clone(&self) -> Self {
    Self {
      content: self.content.clone(),
      total_elements: self.total_elements,
      page: self.page,
      size: self.size,
    }
  }
}

impl<T> Default for Page<T> {
  fn default() -> Self {
    Self {
      content: Vec::new(),
      total_elements: 0,
      page: 0,
      size: 0,
    }
  }
}

impl<T: Cacheable> Page<T> {
  pub fn position(&self, id: i64) -> Option<usize> {
    self.content.iter().position(|item| item.cache_id() == id)
  }

  pub fn get(&self, id: i64) -> Option<&Arc<T>> {
    self.content.iter().find(|item| item.cache_id() == id)
  }

  /// Append unless a record with the same id is already on the page, in which
  /// case it is replaced in place.
  pub fn append(&mut self, item: Arc<T>) {
    match self.position(item.cache_id()) {
      Some(index) => self.content[index] = item,
      None => {
        self.content.push(item);
        self.total_elements = self.total_elements.saturating_add(1);
      }
    }
  }

  /// Returns false when the id is not on this page.
  pub fn replace(&mut self, item: Arc<T>) -> bool {
    match self.position(item.cache_id()) {
      Some(index) => {
        self.content[index] = item;
        true
      }
      None => false,
    }
  }

  /// Returns false when the id is not on this page.
  pub fn remove(&mut self, id: i64) -> bool {
    match self.position(id) {
      Some(index) => {
        self.content.remove(index);
        self.total_elements = self.total_elements.saturating_sub(1);
        true
      }
      None => false,
    }
  }

  /// Drop whatever the page holds for `id` and put `prior` back at its old
  /// position. Returns whether the content changed.
  pub fn restore_item(&mut self, id: i64, prior: Option<(usize, Arc<T>)>) -> bool {
    let removed = self.remove(id);
    match prior {
      Some((index, item)) => {
        let index = index.min(self.content.len());
        self.content.insert(index, item);
        self.total_elements = self.total_elements.saturating_add(1);
        true
      }
      None => removed,
    }
  }
}
