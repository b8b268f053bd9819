//! Serde-deserializable types matching backend API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

use crate::cache::{Cacheable, Page};

use super::types::{PaymentRequest, PaymentStatus};

// ============================================================================
// Paginated list response
// ============================================================================

/// List envelope as sent by the server. Items are kept raw so each resource
/// can decode them through [`Cacheable::from_wire`].
#[derive(Debug, Deserialize)]
pub struct ApiPage {
  #[serde(default)]
  pub content: Vec<Value>,
  #[serde(rename = "totalElements", default)]
  pub total_elements: u64,
  #[serde(default)]
  pub page: u32,
  #[serde(default)]
  pub size: u32,
}

impl ApiPage {
  pub fn into_page<T: Cacheable>(self) -> serde_json::Result<Page<T>> {
    let content = self
      .content
      .into_iter()
      .map(|item| T::from_wire(item).map(std::sync::Arc::new))
      .collect::<serde_json::Result<Vec<_>>>()?;
    Ok(Page {
      content,
      total_elements: self.total_elements,
      page: self.page,
      size: self.size,
    })
  }
}

// ============================================================================
// Payment request
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiServiceProvider {
  #[serde(default)]
  pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPaymentRequest {
  pub id: i64,
  #[serde(default)]
  pub code: Option<String>,
  #[serde(default)]
  pub amount: Option<f64>,
  #[serde(default)]
  pub currency: Option<String>,
  /// Integer workflow code; absent means not yet reviewed
  #[serde(default)]
  pub status: Option<i64>,
  #[serde(default)]
  pub service_provider_name: Option<String>,
  #[serde(default)]
  pub service_provider: Option<ApiServiceProvider>,
  #[serde(default)]
  pub supplier_id: Option<i64>,
  #[serde(default)]
  pub supplier_name: Option<String>,
  #[serde(default)]
  pub shipping_unit_id: Option<i64>,
  #[serde(default)]
  pub shipping_unit_name: Option<String>,
  #[serde(default)]
  pub note: Option<String>,
  #[serde(default)]
  pub requested_at: Option<NaiveDate>,
}

fn non_blank(value: Option<String>) -> Option<String> {
  value.filter(|s| !s.trim().is_empty())
}

impl ApiPaymentRequest {
  /// Provider shown in the console: explicit name, then the nested provider,
  /// then the supplier, then the shipping unit.
  fn provider_name(&mut self) -> String {
    non_blank(self.service_provider_name.take())
      .or_else(|| non_blank(self.service_provider.take().and_then(|p| p.name)))
      .or_else(|| non_blank(self.supplier_name.take()))
      .or_else(|| non_blank(self.shipping_unit_name.take()))
      .unwrap_or_default()
  }
}

impl From<ApiPaymentRequest> for PaymentRequest {
  fn from(mut api: ApiPaymentRequest) -> Self {
    let service_provider_name = api.provider_name();
    PaymentRequest {
      id: api.id,
      code: api.code,
      amount: api.amount,
      currency: api.currency,
      status: PaymentStatus::from_code(api.status.unwrap_or_default()),
      service_provider_name,
      supplier_id: api.supplier_id,
      shipping_unit_id: api.shipping_unit_id,
      note: api.note,
      requested_at: api.requested_at,
      last_updated_at: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn map(value: Value) -> PaymentRequest {
    PaymentRequest::from_wire(value).unwrap()
  }

  #[test]
  fn test_unmapped_status_defaults_to_request_approval() {
    let request = map(json!({"id": 4, "status": 7}));
    assert_eq!(request.status, PaymentStatus::RequestApproval);
    assert_eq!(map(json!({"id": 4})).status, PaymentStatus::RequestApproval);
    assert_eq!(map(json!({"id": 4, "status": 3})).status, PaymentStatus::Paid);
  }

  #[test]
  fn test_provider_name_fallbacks() {
    let explicit = map(json!({
      "id": 1,
      "serviceProviderName": "Direct",
      "serviceProvider": {"name": "Nested"}
    }));
    assert_eq!(explicit.service_provider_name, "Direct");

    let nested = map(json!({
      "id": 1,
      "serviceProvider": {"name": "Nested"},
      "supplierName": "Supplier"
    }));
    assert_eq!(nested.service_provider_name, "Nested");

    let shipping = map(json!({"id": 1, "supplierName": " ", "shippingUnitName": "Ship Co"}));
    assert_eq!(shipping.service_provider_name, "Ship Co");

    assert_eq!(map(json!({"id": 1})).service_provider_name, "");
  }

  #[test]
  fn test_page_envelope_decodes_items_through_resource() {
    let api: ApiPage = serde_json::from_value(json!({
      "content": [{"id": 1, "status": 1}, {"id": 2, "status": 99}],
      "totalElements": 2,
      "page": 0,
      "size": 20
    }))
    .unwrap();
    let page: Page<PaymentRequest> = api.into_page().unwrap();
    assert_eq!(page.content[0].status, PaymentStatus::Approved);
    assert_eq!(page.content[1].status, PaymentStatus::RequestApproval);
    assert_eq!(page.total_elements, 2);
  }
}
