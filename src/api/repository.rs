//! Cached repository over one backend resource.

use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::{
  apply_mutation, optimistic, CacheKey, CacheLayer, CacheStore, Cacheable, EntityKey,
  ListKey, ListTransform, Page, QueryFamily, QueryFilter,
};
use crate::error::{Error, Result};
use crate::query::Query;

use super::api_types::ApiPage;
use super::transport::{Method, Transport};
use super::types::{Bank, Customer, ExchangeRate, Good, HasStatus, ShippingUnit, Status};

pub type CustomerRepository<X = dyn Transport> = Repository<Customer, X>;
pub type BankRepository<X = dyn Transport> = Repository<Bank, X>;
pub type ExchangeRateRepository<X = dyn Transport> = Repository<ExchangeRate, X>;
pub type ShippingUnitRepository<X = dyn Transport> = Repository<ShippingUnit, X>;
pub type GoodRepository<X = dyn Transport> = Repository<Good, X>;

pub(crate) fn valid_id(id: i64) -> Result<i64> {
  if id <= 0 {
    Err(Error::validation("Invalid ID"))
  } else {
    Ok(id)
  }
}

fn to_body<D: Serialize + ?Sized>(draft: &D) -> Result<Value> {
  serde_json::to_value(draft).map_err(|e| Error::validation(format!("Invalid request body: {}", e)))
}

fn decode_record<R: Cacheable>(path: &str, value: Value) -> Result<R> {
  R::from_wire(value).map_err(|e| Error::decode(path, e))
}

async fn fetch_page<R: Cacheable, X: Transport + ?Sized>(
  transport: Arc<X>,
  key: ListKey,
) -> Result<Page<R>> {
  let value = transport.fetch(&key.path(), key.filter()).await?;
  let page: ApiPage = serde_json::from_value(value).map_err(|e| Error::decode(key.to_string(), e))?;
  page
    .into_page()
    .map_err(|e| Error::decode(key.to_string(), e))
}

async fn fetch_record<R: Cacheable, X: Transport + ?Sized>(
  transport: Arc<X>,
  key: EntityKey,
) -> Result<R> {
  let path = key.to_string();
  let value = transport.fetch(&path, &QueryFilter::new()).await?;
  decode_record(&path, value)
}

/// List, detail and write operations of one resource, served through the
/// shared cache.
///
/// Reads are cache-first. Writes go to the server and, once it answers, push
/// the canonical record into every cached page of the resource and into its
/// entity key, so callers see the cache updated as soon as the write resolves.
pub struct Repository<R, X: ?Sized = dyn Transport> {
  transport: Arc<X>,
  layer: CacheLayer,
  _resource: PhantomData<fn() -> R>,
}

impl<R, X: ?Sized> Clone for Repository<R, X> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      layer: self.layer.clone(),
      _resource: PhantomData,
    }
  }
}

impl<R: Cacheable, X: Transport + ?Sized> Repository<R, X> {
  pub fn new(transport: Arc<X>, layer: CacheLayer) -> Self {
    Self {
      transport,
      layer,
      _resource: PhantomData,
    }
  }

  pub fn layer(&self) -> &CacheLayer {
    &self.layer
  }

  pub fn store(&self) -> &CacheStore {
    self.layer.store()
  }

  pub fn transport(&self) -> &Arc<X> {
    &self.transport
  }

  /// Every list page of this resource.
  pub fn family() -> QueryFamily {
    QueryFamily::new(R::endpoint(), R::list_suffix())
  }

  pub fn list_key(filter: QueryFilter) -> ListKey {
    Self::family().list_key(filter)
  }

  pub fn entity_key(id: i64) -> Result<EntityKey> {
    Ok(Self::family().entity_key(valid_id(id)?))
  }

  fn list_fetcher(&self, key: &ListKey) -> impl Fn() -> BoxFuture<'static, Result<Page<R>>> + Send + Sync + 'static {
    let transport = Arc::clone(&self.transport);
    let key = key.clone();
    move || fetch_page::<R, X>(Arc::clone(&transport), key.clone()).boxed()
  }

  fn record_fetcher(&self, key: &EntityKey) -> impl Fn() -> BoxFuture<'static, Result<R>> + Send + Sync + 'static {
    let transport = Arc::clone(&self.transport);
    let key = key.clone();
    move || fetch_record::<R, X>(Arc::clone(&transport), key.clone()).boxed()
  }

  /// One page of the list, cache-first.
  pub async fn list(&self, filter: QueryFilter) -> Result<Arc<Page<R>>> {
    let key = Self::list_key(filter);
    self
      .layer
      .load(&CacheKey::List(key.clone()), self.list_fetcher(&key))
      .await
  }

  /// Reload one page from the server even if it is cached.
  pub async fn refetch_list(&self, filter: QueryFilter) -> Result<Arc<Page<R>>> {
    let key = Self::list_key(filter);
    self
      .layer
      .refetch(&CacheKey::List(key.clone()), self.list_fetcher(&key))
      .await
  }

  pub async fn get(&self, id: i64) -> Result<Arc<R>> {
    let key = Self::entity_key(id)?;
    self
      .layer
      .load(&CacheKey::Entity(key.clone()), self.record_fetcher(&key))
      .await
  }

  pub async fn refetch(&self, id: i64) -> Result<Arc<R>> {
    let key = Self::entity_key(id)?;
    self
      .layer
      .refetch(&CacheKey::Entity(key.clone()), self.record_fetcher(&key))
      .await
  }

  /// Handle observing one list page.
  pub fn query_list(&self, filter: QueryFilter) -> Result<Query<Page<R>>> {
    let key = Self::list_key(filter);
    let fetcher = self.list_fetcher(&key);
    Query::new(&self.layer, key, fetcher)
  }

  /// Handle observing one record.
  pub fn query(&self, id: i64) -> Result<Query<R>> {
    let key = Self::entity_key(id)?;
    let fetcher = self.record_fetcher(&key);
    Query::new(&self.layer, key, fetcher)
  }

  /// The record as currently cached, from its entity key or else from any
  /// cached page. Never touches the network.
  pub fn cached(&self, id: i64) -> Result<Option<Arc<R>>> {
    let key = CacheKey::Entity(Self::entity_key(id)?);
    if let Some(record) = self.store().snapshot::<R>(&key)?.data {
      return Ok(Some(record));
    }
    for list_key in self.store().family_keys(&Self::family()) {
      let entry = self.store().snapshot::<Page<R>>(&CacheKey::List(list_key))?;
      if let Some(record) = entry.data().and_then(|page| page.get(id)) {
        return Ok(Some(Arc::clone(record)));
      }
    }
    Ok(None)
  }

  /// Insert a record. The server assigns its id and code.
  pub async fn create<D: Serialize + ?Sized>(&self, draft: &D) -> Result<R> {
    let body = to_body(draft)?;
    let path = R::endpoint();
    let value = self.transport.request(Method::Post, path, Some(body)).await?;
    let record: R = decode_record(path, value)?;
    apply_mutation(self.store(), &Self::family(), ListTransform::Append(record.clone()))?;
    Ok(record)
  }

  pub async fn update<D: Serialize + ?Sized>(&self, id: i64, patch: &D) -> Result<R> {
    let path = Self::entity_key(id)?.to_string();
    let body = to_body(patch)?;
    let value = self.transport.request(Method::Put, &path, Some(body)).await?;
    let record: R = decode_record(&path, value)?;
    apply_mutation(self.store(), &Self::family(), ListTransform::Replace(record.clone()))?;
    Ok(record)
  }

  /// Like [`update`](Self::update), but shows `speculative` in the cache
  /// while the request is in flight and puts the previous state back if it
  /// fails.
  pub async fn update_optimistic<D: Serialize + ?Sized>(
    &self,
    id: i64,
    patch: &D,
    speculative: R,
  ) -> Result<R> {
    let path = Self::entity_key(id)?.to_string();
    let body = to_body(patch)?;
    let request = async {
      let value = self.transport.request(Method::Put, &path, Some(body)).await?;
      decode_record(&path, value)
    };
    optimistic(
      self.store(),
      &Self::family(),
      Some(ListTransform::Replace(speculative)),
      request,
      ListTransform::Replace,
    )
    .await
  }

  /// Delete a record. Resources with a status are only deactivated and stay
  /// retrievable by id; the others are removed from every cached page.
  pub async fn delete(&self, id: i64) -> Result<()> {
    if R::soft_delete() {
      self.transition(id, "deactivate", None).await?;
      return Ok(());
    }
    let key = Self::entity_key(id)?;
    self
      .transport
      .request(Method::Delete, &key.to_string(), None)
      .await?;
    apply_mutation::<R>(self.store(), &Self::family(), ListTransform::Remove(id))?;
    Ok(())
  }

  /// PATCH `{endpoint}/{id}/{action}` and replace the record with the
  /// server's answer everywhere it is cached.
  pub(crate) async fn transition(&self, id: i64, action: &str, speculative: Option<R>) -> Result<R> {
    let path = format!("{}/{}", Self::entity_key(id)?, action);
    debug!(path = %path, "Status transition");
    let request = async {
      let value = self.transport.request(Method::Patch, &path, None).await?;
      decode_record(&path, value)
    };
    optimistic(
      self.store(),
      &Self::family(),
      speculative.map(ListTransform::Replace),
      request,
      ListTransform::Replace,
    )
    .await
  }
}

impl<R: HasStatus, X: Transport + ?Sized> Repository<R, X> {
  /// INACTIVE → ACTIVE. Activating an active record leaves it active.
  pub async fn activate(&self, id: i64) -> Result<R> {
    self.switch(id, Status::Active).await
  }

  /// ACTIVE → INACTIVE. Deactivating an inactive record leaves it inactive.
  pub async fn deactivate(&self, id: i64) -> Result<R> {
    self.switch(id, Status::Inactive).await
  }

  async fn switch(&self, id: i64, status: Status) -> Result<R> {
    let speculative = self.cached(id)?.map(|current| {
      let mut next = R::clone(&current);
      next.set_status(status);
      next
    });
    let action = match status {
      Status::Active => "activate",
      Status::Inactive => "deactivate",
    };
    self.transition(id, action, speculative).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::mock::MockBackend;
  use serde_json::json;

  fn repo() -> (Arc<MockBackend>, BankRepository<MockBackend>) {
    let backend = Arc::new(MockBackend::default());
    backend
      .seed(
        "/bank",
        [
          json!({"id": 1, "name": "First", "status": "ACTIVE"}),
          json!({"id": 2, "name": "Second", "status": "ACTIVE"}),
        ],
      )
      .unwrap();
    let repo = Repository::new(Arc::clone(&backend), CacheLayer::default());
    (backend, repo)
  }

  #[tokio::test]
  async fn test_invalid_id_never_reaches_the_network() {
    let (backend, repo) = repo();
    for id in [0, -3] {
      assert_eq!(repo.get(id).await.unwrap_err(), Error::validation("Invalid ID"));
      assert!(repo.update(id, &json!({})).await.is_err());
      assert!(repo.deactivate(id).await.is_err());
    }
    assert_eq!(backend.fetch_count(), 0);
    assert!(backend.requests().is_empty());
    assert!(repo.store().is_empty());
  }

  #[tokio::test]
  async fn test_list_is_cached() {
    let (backend, repo) = repo();
    let first = repo.list(QueryFilter::new()).await.unwrap();
    let second = repo.list(QueryFilter::new()).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(backend.fetch_count(), 1);

    repo.refetch_list(QueryFilter::new()).await.unwrap();
    assert_eq!(backend.fetch_count(), 2);
  }

  #[tokio::test]
  async fn test_soft_delete_keeps_record_retrievable() {
    let (backend, repo) = repo();
    let active = QueryFilter::new().text("status", Some("ACTIVE"));
    repo.list(active.clone()).await.unwrap();

    repo.delete(1).await.unwrap();

    assert_eq!(backend.requests(), vec![(Method::Patch, "/bank/1/deactivate".to_string())]);
    let page = repo.list(active).await.unwrap();
    assert!(page.get(1).is_none());
    assert_eq!(repo.get(1).await.unwrap().status, Status::Inactive);
    assert_eq!(backend.fetch_count(), 1);
  }

  #[tokio::test]
  async fn test_hard_delete_for_resources_without_status() {
    let backend = Arc::new(MockBackend::default());
    backend
      .seed("/exchange-rate", [json!({"id": 5, "currencyCode": "USD", "rate": 25000.0})])
      .unwrap();
    let repo: ExchangeRateRepository<MockBackend> = Repository::new(Arc::clone(&backend), CacheLayer::default());
    repo.list(QueryFilter::new()).await.unwrap();

    repo.delete(5).await.unwrap();

    assert!(backend.record("/exchange-rate", 5).is_none());
    assert_eq!(repo.list(QueryFilter::new()).await.unwrap().total_elements, 0);
  }

  #[tokio::test]
  async fn test_dyn_transport() {
    let backend: Arc<dyn Transport> = Arc::new(MockBackend::default());
    let repo: CustomerRepository = Repository::new(backend, CacheLayer::default());
    let created = repo.create(&json!({"name": "Acme"})).await.unwrap();
    assert_eq!(created.status, Status::Active);
    assert_eq!(created.code.as_deref(), Some("C00001"));
  }
}
