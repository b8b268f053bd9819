//! Domain types of the administration console.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{Cacheable, QueryFilter};
use crate::error::{Error, Result};

use super::api_types::ApiPaymentRequest;

/// On/off switch shared by most master data records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
  #[default]
  Active,
  Inactive,
}

impl Status {
  pub fn as_str(&self) -> &'static str {
    match self {
      Status::Active => "ACTIVE",
      Status::Inactive => "INACTIVE",
    }
  }

  pub fn is_active(&self) -> bool {
    matches!(self, Status::Active)
  }

  /// INACTIVE → ACTIVE. Always allowed; activating an active record is a no-op.
  pub fn activate(self) -> Self {
    Status::Active
  }

  /// ACTIVE → INACTIVE. Always allowed; deactivating an inactive record is a no-op.
  pub fn deactivate(self) -> Self {
    Status::Inactive
  }
}

impl std::fmt::Display for Status {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for Status {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_uppercase().as_str() {
      "ACTIVE" => Ok(Status::Active),
      "INACTIVE" => Ok(Status::Inactive),
      other => Err(Error::validation(format!("Unknown status: {}", other))),
    }
  }
}

/// Records with an explicit ACTIVE/INACTIVE switch and the two dedicated
/// transitions on the server.
pub trait HasStatus: Cacheable {
  fn status(&self) -> Status;
  fn set_status(&mut self, status: Status);
}

/// True unless `filter` pins a status the record does not have.
fn status_matches(status: Status, filter: &QueryFilter) -> bool {
  filter
    .get("status")
    .and_then(|s| s.parse::<Status>().ok())
    .map_or(true, |wanted| wanted == status)
}

fn id_matches(id: i64, filter: &QueryFilter, field: &str) -> bool {
  filter.get(field).map_or(true, |v| v == id.to_string())
}

macro_rules! impl_status {
  ($ty:ty) => {
    impl HasStatus for $ty {
      fn status(&self) -> Status {
        self.status
      }

      fn set_status(&mut self, status: Status) {
        self.status = status;
      }
    }
  };
}

// ============================================================================
// Good-supplier price
// ============================================================================

/// Price of a good from a supplier, valid over `[start_date, end_date]` while
/// ACTIVE. Good and supplier names are denormalized for display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoodSupplierPrice {
  pub id: i64,
  #[serde(default)]
  pub code: Option<String>,
  pub good_id: i64,
  #[serde(default)]
  pub good_name: Option<String>,
  pub supplier_id: i64,
  #[serde(default)]
  pub supplier_name: Option<String>,
  #[serde(default)]
  pub unit_price: Option<f64>,
  #[serde(default)]
  pub good_type: Option<String>,
  #[serde(default)]
  pub start_date: Option<NaiveDate>,
  #[serde(default)]
  pub end_date: Option<NaiveDate>,
  #[serde(default)]
  pub status: Status,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_updated_at: Option<DateTime<Utc>>,
}

impl Cacheable for GoodSupplierPrice {
  fn endpoint() -> &'static str {
    "/good-supplier"
  }

  fn soft_delete() -> bool {
    true
  }

  fn cache_id(&self) -> i64 {
    self.id
  }

  fn stamp_updated(&mut self, at: DateTime<Utc>) {
    self.last_updated_at = Some(at);
  }

  fn matches(&self, filter: &QueryFilter) -> bool {
    status_matches(self.status, filter)
      && id_matches(self.good_id, filter, "goodId")
      && id_matches(self.supplier_id, filter, "supplierId")
  }
}

impl_status!(GoodSupplierPrice);

/// Body of a good-supplier insert or update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoodSupplierDraft {
  pub good_id: i64,
  pub supplier_id: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unit_price: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub good_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_date: Option<NaiveDate>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_date: Option<NaiveDate>,
}

// ============================================================================
// Payment request
// ============================================================================

/// Display status of a payment request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
  #[default]
  RequestApproval,
  Approved,
  Rejected,
  Paid,
}

impl PaymentStatus {
  /// Map the server's integer code. Any code not listed here is treated as
  /// awaiting approval rather than as an error.
  pub fn from_code(code: i64) -> Self {
    match code {
      1 => PaymentStatus::Approved,
      2 => PaymentStatus::Rejected,
      3 => PaymentStatus::Paid,
      _ => PaymentStatus::RequestApproval,
    }
  }

  pub fn code(&self) -> i64 {
    match self {
      PaymentStatus::RequestApproval => 0,
      PaymentStatus::Approved => 1,
      PaymentStatus::Rejected => 2,
      PaymentStatus::Paid => 3,
    }
  }

  /// Apply a workflow action, rejecting moves the workflow does not allow.
  pub fn apply(self, action: PaymentAction) -> Result<Self> {
    match (self, action) {
      (PaymentStatus::RequestApproval, PaymentAction::Approve) => Ok(PaymentStatus::Approved),
      (PaymentStatus::RequestApproval, PaymentAction::Reject) => Ok(PaymentStatus::Rejected),
      (PaymentStatus::Approved, PaymentAction::Pay) => Ok(PaymentStatus::Paid),
      (from, action) => Err(Error::validation(format!(
        "Cannot {} a payment request in status {:?}",
        action.as_str(),
        from
      ))),
    }
  }
}

/// Workflow actions on a payment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentAction {
  Approve,
  Reject,
  Pay,
}

impl PaymentAction {
  /// Path segment of the action endpoint
  pub fn as_str(&self) -> &'static str {
    match self {
      PaymentAction::Approve => "approve",
      PaymentAction::Reject => "reject",
      PaymentAction::Pay => "pay",
    }
  }
}

/// Payment request as shown in the console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
  pub id: i64,
  pub code: Option<String>,
  pub amount: Option<f64>,
  pub currency: Option<String>,
  pub status: PaymentStatus,
  pub service_provider_name: String,
  pub supplier_id: Option<i64>,
  pub shipping_unit_id: Option<i64>,
  pub note: Option<String>,
  pub requested_at: Option<NaiveDate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_updated_at: Option<DateTime<Utc>>,
}

impl Cacheable for PaymentRequest {
  fn endpoint() -> &'static str {
    "/payment-request"
  }

  fn cache_id(&self) -> i64 {
    self.id
  }

  fn stamp_updated(&mut self, at: DateTime<Utc>) {
    self.last_updated_at = Some(at);
  }

  fn matches(&self, filter: &QueryFilter) -> bool {
    filter
      .get("status")
      .and_then(|s| s.parse::<i64>().ok())
      .map_or(true, |code| PaymentStatus::from_code(code) == self.status)
  }

  fn from_wire(value: serde_json::Value) -> serde_json::Result<Self> {
    serde_json::from_value::<ApiPaymentRequest>(value).map(PaymentRequest::from)
  }
}

/// Body of a payment request create or update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestDraft {
  pub amount: f64,
  pub currency: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub supplier_id: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub shipping_unit_id: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub note: Option<String>,
}

// ============================================================================
// Master data
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
  pub id: i64,
  #[serde(default)]
  pub code: Option<String>,
  pub name: String,
  #[serde(default)]
  pub tax_code: Option<String>,
  #[serde(default)]
  pub phone: Option<String>,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub address: Option<String>,
  #[serde(default)]
  pub status: Status,
}

impl Cacheable for Customer {
  fn endpoint() -> &'static str {
    "/customer"
  }

  fn soft_delete() -> bool {
    true
  }

  fn cache_id(&self) -> i64 {
    self.id
  }

  fn matches(&self, filter: &QueryFilter) -> bool {
    status_matches(self.status, filter)
  }
}

impl_status!(Customer);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bank {
  pub id: i64,
  #[serde(default)]
  pub code: Option<String>,
  pub name: String,
  #[serde(default)]
  pub short_name: Option<String>,
  #[serde(default)]
  pub status: Status,
}

impl Cacheable for Bank {
  fn endpoint() -> &'static str {
    "/bank"
  }

  fn soft_delete() -> bool {
    true
  }

  fn cache_id(&self) -> i64 {
    self.id
  }

  fn matches(&self, filter: &QueryFilter) -> bool {
    status_matches(self.status, filter)
  }
}

impl_status!(Bank);

/// Exchange rates are plain records: no status, deleted for real.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
  pub id: i64,
  pub currency_code: String,
  pub rate: f64,
  #[serde(default)]
  pub effective_date: Option<NaiveDate>,
}

impl Cacheable for ExchangeRate {
  fn endpoint() -> &'static str {
    "/exchange-rate"
  }

  fn cache_id(&self) -> i64 {
    self.id
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingUnit {
  pub id: i64,
  #[serde(default)]
  pub code: Option<String>,
  pub name: String,
  #[serde(default)]
  pub phone: Option<String>,
  #[serde(default)]
  pub status: Status,
}

impl Cacheable for ShippingUnit {
  fn endpoint() -> &'static str {
    "/shipping-unit"
  }

  fn soft_delete() -> bool {
    true
  }

  fn cache_id(&self) -> i64 {
    self.id
  }

  fn matches(&self, filter: &QueryFilter) -> bool {
    status_matches(self.status, filter)
  }
}

impl_status!(ShippingUnit);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Good {
  pub id: i64,
  #[serde(default)]
  pub code: Option<String>,
  pub name: String,
  #[serde(default)]
  pub unit: Option<String>,
  #[serde(default)]
  pub good_type: Option<String>,
  #[serde(default)]
  pub status: Status,
}

impl Cacheable for Good {
  fn endpoint() -> &'static str {
    "/good"
  }

  fn soft_delete() -> bool {
    true
  }

  fn cache_id(&self) -> i64 {
    self.id
  }

  fn matches(&self, filter: &QueryFilter) -> bool {
    status_matches(self.status, filter)
  }
}

impl_status!(Good);
