//! Good-supplier prices.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::cache::{CacheLayer, Page, QueryFilter};
use crate::error::Result;
use crate::pricing::{overlapping_windows, resolve_price, window_error};

use super::repository::Repository;
use super::transport::Transport;
use super::types::{GoodSupplierDraft, GoodSupplierPrice, Status};

/// Page size used when walking every page of a good/supplier pair.
const RESOLVE_PAGE_SIZE: u32 = 100;

/// Filter of the price list screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceFilter {
  pub good_id: Option<i64>,
  pub supplier_id: Option<i64>,
  pub status: Option<Status>,
  pub search: Option<String>,
  pub page: u32,
  pub size: Option<u32>,
}

impl From<&PriceFilter> for QueryFilter {
  fn from(filter: &PriceFilter) -> Self {
    let filter_size = filter.size.map(i64::from);
    QueryFilter::new()
      .number("goodId", filter.good_id)
      .number("supplierId", filter.supplier_id)
      .value("status", filter.status)
      .text("search", filter.search.as_deref())
      .page(filter.page)
      .number("size", filter_size)
  }
}

fn warn_on_inverted_window(draft: &GoodSupplierDraft) {
  if let Err(err) = window_error(draft.start_date, draft.end_date) {
    warn!(
      good_id = draft.good_id,
      supplier_id = draft.supplier_id,
      error = %err,
      "Saving price with an inverted validity window"
    );
  }
}

pub struct GoodSupplierApi<X: ?Sized = dyn Transport> {
  repo: Repository<GoodSupplierPrice, X>,
}

impl<X: ?Sized> Clone for GoodSupplierApi<X> {
  fn clone(&self) -> Self {
    Self {
      repo: self.repo.clone(),
    }
  }
}

impl<X: Transport + ?Sized> GoodSupplierApi<X> {
  pub fn new(transport: Arc<X>, layer: CacheLayer) -> Self {
    Self {
      repo: Repository::new(transport, layer),
    }
  }

  pub fn repo(&self) -> &Repository<GoodSupplierPrice, X> {
    &self.repo
  }

  pub async fn list(&self, filter: &PriceFilter) -> Result<Arc<Page<GoodSupplierPrice>>> {
    self.repo.list(filter.into()).await
  }

  pub async fn get(&self, id: i64) -> Result<Arc<GoodSupplierPrice>> {
    self.repo.get(id).await
  }

  /// Create a price. Inverted windows are logged, not rejected; the server
  /// has the final word.
  pub async fn insert(&self, draft: &GoodSupplierDraft) -> Result<GoodSupplierPrice> {
    warn_on_inverted_window(draft);
    let created = self.repo.create(draft).await?;
    info!(id = created.id, code = ?created.code, "Price created");
    Ok(created)
  }

  pub async fn update(&self, id: i64, draft: &GoodSupplierDraft) -> Result<GoodSupplierPrice> {
    warn_on_inverted_window(draft);
    self.repo.update(id, draft).await
  }

  pub async fn activate(&self, id: i64) -> Result<GoodSupplierPrice> {
    self.repo.activate(id).await
  }

  pub async fn deactivate(&self, id: i64) -> Result<GoodSupplierPrice> {
    self.repo.deactivate(id).await
  }

  /// "Delete" switches the price to INACTIVE.
  pub async fn delete(&self, id: i64) -> Result<()> {
    self.repo.delete(id).await
  }

  /// Every ACTIVE price of a pair, walking all list pages through the cache.
  pub async fn prices_for(&self, good_id: i64, supplier_id: i64) -> Result<Vec<GoodSupplierPrice>> {
    let mut filter = PriceFilter {
      good_id: Some(good_id),
      supplier_id: Some(supplier_id),
      status: Some(Status::Active),
      size: Some(RESOLVE_PAGE_SIZE),
      ..PriceFilter::default()
    };

    let mut records = Vec::new();
    loop {
      let page = self.list(&filter).await?;
      records.extend(page.content.iter().map(|r| GoodSupplierPrice::clone(r)));
      let seen = u64::from(filter.page + 1) * u64::from(RESOLVE_PAGE_SIZE);
      if page.content.is_empty() || seen >= page.total_elements {
        break;
      }
      filter.page += 1;
    }
    Ok(records)
  }

  /// The price of `good_id` from `supplier_id` in effect on `as_of`.
  pub async fn current_price(
    &self,
    good_id: i64,
    supplier_id: i64,
    as_of: NaiveDate,
  ) -> Result<Option<GoodSupplierPrice>> {
    let records = self.prices_for(good_id, supplier_id).await?;
    overlapping_windows(&records);
    Ok(resolve_price(&records, good_id, supplier_id, as_of).cloned())
  }
}
