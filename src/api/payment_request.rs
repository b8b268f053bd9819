//! Payment requests and their approval workflow.

use std::sync::Arc;

use tracing::info;

use crate::cache::{CacheLayer, Page, QueryFilter};
use crate::error::Result;

use super::repository::{valid_id, Repository};
use super::transport::Transport;
use super::types::{PaymentAction, PaymentRequest, PaymentRequestDraft, PaymentStatus};

/// Filter of the payment request list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentFilter {
  pub status: Option<PaymentStatus>,
  pub supplier_id: Option<i64>,
  pub search: Option<String>,
  pub page: u32,
  pub size: Option<u32>,
}

impl From<&PaymentFilter> for QueryFilter {
  fn from(filter: &PaymentFilter) -> Self {
    QueryFilter::new()
      .value("status", filter.status.map(|s| s.code()))
      .number("supplierId", filter.supplier_id)
      .text("search", filter.search.as_deref())
      .page(filter.page)
      .number("size", filter.size.map(i64::from))
  }
}

pub struct PaymentRequestApi<X: ?Sized = dyn Transport> {
  repo: Repository<PaymentRequest, X>,
}

impl<X: ?Sized> Clone for PaymentRequestApi<X> {
  fn clone(&self) -> Self {
    Self {
      repo: self.repo.clone(),
    }
  }
}

impl<X: Transport + ?Sized> PaymentRequestApi<X> {
  pub fn new(transport: Arc<X>, layer: CacheLayer) -> Self {
    Self {
      repo: Repository::new(transport, layer),
    }
  }

  pub fn repo(&self) -> &Repository<PaymentRequest, X> {
    &self.repo
  }

  pub async fn list(&self, filter: &PaymentFilter) -> Result<Arc<Page<PaymentRequest>>> {
    self.repo.list(filter.into()).await
  }

  pub async fn get(&self, id: i64) -> Result<Arc<PaymentRequest>> {
    self.repo.get(id).await
  }

  pub async fn create(&self, draft: &PaymentRequestDraft) -> Result<PaymentRequest> {
    self.repo.create(draft).await
  }

  pub async fn update(&self, id: i64, draft: &PaymentRequestDraft) -> Result<PaymentRequest> {
    self.repo.update(id, draft).await
  }

  pub async fn delete(&self, id: i64) -> Result<()> {
    self.repo.delete(id).await
  }

  pub async fn approve(&self, id: i64) -> Result<PaymentRequest> {
    self.act(id, PaymentAction::Approve).await
  }

  pub async fn reject(&self, id: i64) -> Result<PaymentRequest> {
    self.act(id, PaymentAction::Reject).await
  }

  pub async fn mark_paid(&self, id: i64) -> Result<PaymentRequest> {
    self.act(id, PaymentAction::Pay).await
  }

  /// Check the move against the workflow before anything is sent. The
  /// current status comes from the cache when possible.
  async fn act(&self, id: i64, action: PaymentAction) -> Result<PaymentRequest> {
    let id = valid_id(id)?;
    let current = match self.repo.cached(id)? {
      Some(record) => record,
      None => self.repo.get(id).await?,
    };
    let next = current.status.apply(action)?;

    let mut speculative = PaymentRequest::clone(&current);
    speculative.status = next;
    let updated = self
      .repo
      .transition(id, action.as_str(), Some(speculative))
      .await?;
    info!(id, from = ?current.status, to = ?updated.status, "Payment request moved");
    Ok(updated)
  }
}
