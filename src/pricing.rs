//! Good-supplier price validity.
//!
//! A price record applies on a date when it is ACTIVE and the date falls
//! inside its optional `[start_date, end_date]` window. Windows of the same
//! good/supplier pair may overlap; resolution then prefers the most recently
//! started record, and the highest id among records starting the same day.

use chrono::NaiveDate;
use tracing::warn;

use crate::api::types::{GoodSupplierPrice, Status};
use crate::error::{Error, Result};

/// Whether `record` is the effective price candidate on `as_of`.
pub fn is_applicable(record: &GoodSupplierPrice, as_of: NaiveDate) -> bool {
  record.status == Status::Active
    && record.start_date.map_or(true, |start| start <= as_of)
    && record.end_date.map_or(true, |end| as_of <= end)
}

/// Pick the price of `good_id` from `supplier_id` in effect on `as_of`.
pub fn resolve_price<'a, I>(
  records: I,
  good_id: i64,
  supplier_id: i64,
  as_of: NaiveDate,
) -> Option<&'a GoodSupplierPrice>
where
  I: IntoIterator<Item = &'a GoodSupplierPrice>,
{
  records
    .into_iter()
    .filter(|r| r.good_id == good_id && r.supplier_id == supplier_id)
    .filter(|r| is_applicable(r, as_of))
    // Option orders None below Some, so undated records lose to any dated one
    .max_by_key(|r| (r.start_date, r.id))
}

/// Rejects windows that end before they start.
pub fn validate_window(record: &GoodSupplierPrice) -> Result<()> {
  window_error(record.start_date, record.end_date)
}

pub(crate) fn window_error(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
  match (start, end) {
    (Some(start), Some(end)) if start > end => Err(Error::validation(format!(
      "Start date {} is after end date {}",
      start, end
    ))),
    _ => Ok(()),
  }
}

fn windows_overlap(a: &GoodSupplierPrice, b: &GoodSupplierPrice) -> bool {
  let starts_before_b_ends = match (a.start_date, b.end_date) {
    (Some(start), Some(end)) => start <= end,
    _ => true,
  };
  let b_starts_before_a_ends = match (b.start_date, a.end_date) {
    (Some(start), Some(end)) => start <= end,
    _ => true,
  };
  starts_before_b_ends && b_starts_before_a_ends
}

/// Pairs of ACTIVE records of the same good and supplier whose windows
/// overlap, as `(lower id, higher id)` sorted ascending. Each pair is logged.
pub fn overlapping_windows(records: &[GoodSupplierPrice]) -> Vec<(i64, i64)> {
  let active: Vec<&GoodSupplierPrice> = records
    .iter()
    .filter(|r| r.status == Status::Active)
    .collect();

  let mut pairs = Vec::new();
  for (i, a) in active.iter().enumerate() {
    for b in &active[i + 1..] {
      if a.good_id == b.good_id && a.supplier_id == b.supplier_id && windows_overlap(a, b) {
        warn!(
          good_id = a.good_id,
          supplier_id = a.supplier_id,
          first = a.id.min(b.id),
          second = a.id.max(b.id),
          "Overlapping price windows"
        );
        pairs.push((a.id.min(b.id), a.id.max(b.id)));
      }
    }
  }
  pairs.sort_unstable();
  pairs
}
