//! Cache key codec.
//!
//! List pages and single entities share an endpoint prefix, so the two shapes
//! are kept apart at the type level: a [`CacheKey`] is either a [`ListKey`]
//! (endpoint + list operation + canonical filter) or an [`EntityKey`]
//! (endpoint + numeric id). Family membership is a pattern match on that
//! distinction. The string form is still available for logging and for raw
//! keys, together with [`belongs_to_family`], the prefix check that excludes
//! trailing numeric ids.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// Filter, sort and pagination parameters of a list query.
///
/// Fields are stored already canonicalised (trimmed, stringified, empty values
/// dropped) in a sorted map, so two logically identical filters compare and
/// encode identically regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QueryFilter {
  fields: BTreeMap<String, String>,
}

impl QueryFilter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a text field. Blank values (after trimming) are omitted.
  pub fn text(mut self, name: &str, value: Option<&str>) -> Self {
    self.set(name, value);
    self
  }

  /// Add a numeric field (ids, page number, page size). Values `<= 0` carry
  /// no meaning for these parameters and are omitted.
  pub fn number(mut self, name: &str, value: Option<i64>) -> Self {
    match value {
      Some(v) if v > 0 => self.set(name, Some(&v.to_string())),
      _ => self.set(name, None),
    }
    self
  }

  pub fn flag(mut self, name: &str, value: Option<bool>) -> Self {
    self.set(name, value.map(|v| v.to_string()).as_deref());
    self
  }

  /// Add a date field, encoded as `YYYY-MM-DD`.
  pub fn date(mut self, name: &str, value: Option<NaiveDate>) -> Self {
    self.set(name, value.map(|d| d.format("%Y-%m-%d").to_string()).as_deref());
    self
  }

  /// Add any displayable value. Stringified, then treated like [`text`](Self::text).
  pub fn value<V: fmt::Display>(mut self, name: &str, value: Option<V>) -> Self {
    self.set(name, value.map(|v| v.to_string()).as_deref());
    self
  }

  pub fn page(self, page: u32) -> Self {
    self.number("page", Some(i64::from(page)))
  }

  pub fn size(self, size: u32) -> Self {
    self.number("size", Some(i64::from(size)))
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.fields.get(name).map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Canonical `application/x-www-form-urlencoded` form, keys sorted.
  pub fn encode(&self) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in &self.fields {
      serializer.append_pair(name, value);
    }
    serializer.finish()
  }

  /// Parse an encoded query string, applying the same omission rules.
  pub fn decode(query: &str) -> Self {
    url::form_urlencoded::parse(query.as_bytes()).fold(Self::new(), |filter, (name, value)| {
      filter.text(&name, Some(value.as_ref()))
    })
  }

  fn set(&mut self, name: &str, value: Option<&str>) {
    let name = name.trim();
    match value.map(str::trim) {
      Some(v) if !v.is_empty() && !name.is_empty() => {
        self.fields.insert(name.to_string(), v.to_string());
      }
      _ => {
        self.fields.remove(name);
      }
    }
  }
}

/// Normalise an endpoint to a leading slash and no trailing slash.
fn normalize_endpoint(endpoint: &str) -> String {
  let trimmed = endpoint.trim().trim_end_matches('/');
  if trimmed.starts_with('/') {
    trimmed.to_string()
  } else {
    format!("/{}", trimmed)
  }
}

/// Key of one cached list page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey {
  endpoint: String,
  suffix: String,
  filter: QueryFilter,
}

impl ListKey {
  pub fn new(endpoint: &str, suffix: &str, filter: QueryFilter) -> Self {
    Self {
      endpoint: normalize_endpoint(endpoint),
      suffix: suffix.trim().trim_matches('/').to_string(),
      filter,
    }
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  pub fn suffix(&self) -> &str {
    &self.suffix
  }

  pub fn filter(&self) -> &QueryFilter {
    &self.filter
  }

  pub fn family(&self) -> QueryFamily {
    QueryFamily {
      endpoint: self.endpoint.clone(),
      suffix: self.suffix.clone(),
    }
  }

  /// SHA256 hex of the canonical key, a stable fixed-length identifier.
  pub fn filter_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Request path for this list, without the query string.
  pub fn path(&self) -> String {
    if self.suffix.is_empty() {
      self.endpoint.clone()
    } else {
      format!("{}/{}", self.endpoint, self.suffix)
    }
  }
}

impl fmt::Display for ListKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.path())?;
    if !self.filter.is_empty() {
      write!(f, "?{}", self.filter.encode())?;
    }
    Ok(())
  }
}

/// Key of one cached entity, addressed by numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
  endpoint: String,
  id: i64,
}

impl EntityKey {
  pub fn new(endpoint: &str, id: i64) -> Self {
    Self {
      endpoint: normalize_endpoint(endpoint),
      id,
    }
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  pub fn id(&self) -> i64 {
    self.id
  }
}

impl fmt::Display for EntityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.endpoint, self.id)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
  List(ListKey),
  Entity(EntityKey),
}

impl CacheKey {
  pub fn endpoint(&self) -> &str {
    match self {
      Self::List(k) => k.endpoint(),
      Self::Entity(k) => k.endpoint(),
    }
  }

  pub fn as_list(&self) -> Option<&ListKey> {
    match self {
      Self::List(k) => Some(k),
      Self::Entity(_) => None,
    }
  }

  /// Parse the canonical string form back into a key.
  ///
  /// A path ending in `/<digits>` without a query string is an entity key;
  /// anything else is a list key whose last path segment is the list suffix.
  pub fn parse(raw: &str) -> Option<Self> {
    let raw = raw.trim();
    if raw.is_empty() {
      return None;
    }
    let (path, query) = match raw.split_once('?') {
      Some((path, query)) => (path, Some(query)),
      None => (raw, None),
    };
    let path = path.trim_end_matches('/');

    if query.is_none() {
      if let Some((endpoint, id)) = split_numeric_tail(path) {
        return Some(Self::Entity(EntityKey::new(endpoint, id)));
      }
    }

    let filter = query.map(QueryFilter::decode).unwrap_or_default();
    let trimmed = path.trim_start_matches('/');
    let key = match trimmed.rsplit_once('/') {
      Some((endpoint, suffix)) => ListKey::new(endpoint, suffix, filter),
      None => ListKey::new(trimmed, "", filter),
    };
    Some(Self::List(key))
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::List(k) => k.fmt(f),
      Self::Entity(k) => k.fmt(f),
    }
  }
}

impl From<ListKey> for CacheKey {
  fn from(key: ListKey) -> Self {
    Self::List(key)
  }
}

impl From<EntityKey> for CacheKey {
  fn from(key: EntityKey) -> Self {
    Self::Entity(key)
  }
}

/// All list pages of one endpoint and list operation, whatever their filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFamily {
  endpoint: String,
  suffix: String,
}

impl QueryFamily {
  pub fn new(endpoint: &str, suffix: &str) -> Self {
    ListKey::new(endpoint, suffix, QueryFilter::new()).family()
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  pub fn suffix(&self) -> &str {
    &self.suffix
  }

  /// List key of this family for the given filter.
  pub fn list_key(&self, filter: QueryFilter) -> ListKey {
    ListKey::new(&self.endpoint, &self.suffix, filter)
  }

  /// Entity key of a record served by this family's endpoint.
  pub fn entity_key(&self, id: i64) -> EntityKey {
    EntityKey::new(&self.endpoint, id)
  }

  /// Entity keys never belong to a family, even though they share its endpoint.
  pub fn contains(&self, key: &CacheKey) -> bool {
    match key {
      CacheKey::List(k) => k.endpoint == self.endpoint && k.suffix == self.suffix,
      CacheKey::Entity(_) => false,
    }
  }
}

impl fmt::Display for QueryFamily {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.suffix.is_empty() {
      write!(f, "{}", self.endpoint)
    } else {
      write!(f, "{}/{}", self.endpoint, self.suffix)
    }
  }
}

/// Encode a list key to its canonical string.
pub fn encode(endpoint: &str, suffix: &str, filter: &QueryFilter) -> String {
  ListKey::new(endpoint, suffix, filter.clone()).to_string()
}

/// String-level family check for raw keys: `key` starts with `prefix` and does
/// not end in a `/<digits>` entity segment.
pub fn belongs_to_family(key: &str, prefix: &str) -> bool {
  key.starts_with(prefix) && split_numeric_tail(key).is_none()
}

fn split_numeric_tail(path: &str) -> Option<(&str, i64)> {
  let (head, tail) = path.rsplit_once('/')?;
  if tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  tail.parse().ok().map(|id| (head, id))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_filter_is_order_independent() {
    let a = QueryFilter::new()
      .text("search", Some("bolt"))
      .number("goodId", Some(10));
    let b = QueryFilter::new()
      .number("goodId", Some(10))
      .text("search", Some("  bolt "));
    assert_eq!(
      encode("/good-supplier", "list", &a),
      encode("/good-supplier", "list", &b)
    );
  }

  #[test]
  fn test_empty_fields_are_omitted() {
    let filter = QueryFilter::new()
      .text("search", Some("   "))
      .text("code", None)
      .page(0)
      .number("size", Some(-5))
      .number("supplierId", Some(20));
    assert_eq!(filter.encode(), "supplierId=20");
    assert_eq!(
      encode("good-supplier/", "list", &QueryFilter::new()),
      "/good-supplier/list"
    );
  }

  #[test]
  fn test_value_stringifies() {
    let filter = QueryFilter::new().value("rate", Some(1.5)).flag("active", Some(true));
    assert_eq!(filter.get("rate"), Some("1.5"));
    assert_eq!(filter.get("active"), Some("true"));
  }

  #[test]
  fn test_entity_keys_never_belong_to_family() {
    let prefix = "/good-supplier";
    for id in [1, 42, 900_000] {
      let key = EntityKey::new(prefix, id).to_string();
      assert!(!belongs_to_family(&key, prefix), "{key}");
    }
    for suffix in ["/list", "/list?page=2", "/list?search=a%2F12", "?size=20"] {
      let key = format!("{prefix}{suffix}");
      assert!(belongs_to_family(&key, prefix), "{key}");
    }
  }

  #[test]
  fn test_typed_family_membership() {
    let family = QueryFamily::new("/good-supplier", "list");
    let page = family.list_key(QueryFilter::new().page(3));
    assert!(family.contains(&page.clone().into()));
    assert!(!family.contains(&family.entity_key(3).into()));
    assert!(!family.contains(&QueryFamily::new("/good", "list").list_key(QueryFilter::new()).into()));
    assert_eq!(page.family(), family);
  }

  #[test]
  fn test_parse_round_trips_canonical_form() {
    let list: CacheKey = ListKey::new(
      "/payment-request",
      "list",
      QueryFilter::new().text("search", Some("a b")).page(2),
    )
    .into();
    assert_eq!(CacheKey::parse(&list.to_string()), Some(list));

    let entity: CacheKey = EntityKey::new("/payment-request", 7).into();
    assert_eq!(CacheKey::parse("/payment-request/7"), Some(entity));
    assert_eq!(CacheKey::parse(""), None);
  }

  #[test]
  fn test_filter_hash_is_stable() {
    let a = ListKey::new("/bank", "list", QueryFilter::new().page(1));
    let b = ListKey::new("bank", "list", QueryFilter::new().page(1));
    assert_eq!(a.filter_hash(), b.filter_hash());
    assert_eq!(a.filter_hash().len(), 64);
  }
}
