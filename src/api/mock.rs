//! In-memory backend for offline use and tests.
//!
//! Mirrors the list/detail/write routes of the real backend over JSON tables,
//! one per endpoint, and waits a configurable delay before answering every
//! call.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::cache::lock::mutex_lock;
use crate::cache::QueryFilter;
use crate::error::{Error, Result};

use super::transport::{Method, Transport};

const SOURCE: &str = "api::mock";
const DEFAULT_PAGE_SIZE: usize = 20;

/// Initial status the server assigns on create.
fn initial_status(endpoint: &str) -> Option<Value> {
  match endpoint {
    "/payment-request" => Some(json!(0)),
    "/exchange-rate" => None,
    _ => Some(json!("ACTIVE")),
  }
}

fn action_status(action: &str) -> Option<Value> {
  match action {
    "activate" => Some(json!("ACTIVE")),
    "deactivate" => Some(json!("INACTIVE")),
    "approve" => Some(json!(1)),
    "reject" => Some(json!(2)),
    "pay" => Some(json!(3)),
    _ => None,
  }
}

fn code_prefix(endpoint: &str) -> String {
  endpoint
    .trim_start_matches('/')
    .split('-')
    .filter_map(|word| word.chars().next())
    .collect::<String>()
    .to_ascii_uppercase()
}

/// Route parsed from a request path.
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
  Collection(&'a str),
  List(&'a str),
  Record(&'a str, i64),
  Action(&'a str, i64, &'a str),
}

fn route(path: &str) -> Route<'_> {
  let path = path.trim_end_matches('/');
  let Some((head, last)) = path.rsplit_once('/') else {
    return Route::Collection(path);
  };
  if let Ok(id) = last.parse::<i64>() {
    return Route::Record(head, id);
  }
  if let Some((endpoint, id)) = head.rsplit_once('/') {
    if let Ok(id) = id.parse::<i64>() {
      return Route::Action(endpoint, id, last);
    }
  }
  if last == "list" {
    return Route::List(head);
  }
  Route::Collection(path)
}

fn text_of(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn row_matches(row: &Value, filter: &QueryFilter) -> bool {
  filter.iter().all(|(name, wanted)| match name {
    "page" | "size" => true,
    "search" => {
      let needle = wanted.to_lowercase();
      row
        .as_object()
        .map(|fields| {
          fields
            .values()
            .filter_map(Value::as_str)
            .any(|s| s.to_lowercase().contains(&needle))
        })
        .unwrap_or(false)
    }
    field => row.get(field).and_then(text_of).as_deref() == Some(wanted),
  })
}

#[derive(Default)]
struct MockState {
  tables: HashMap<String, BTreeMap<i64, Value>>,
  next_id: i64,
  fail_next: Option<Error>,
  fetches: usize,
  requests: Vec<(Method, String)>,
}

/// Backend simulated in memory.
pub struct MockBackend {
  state: Mutex<MockState>,
  latency: Duration,
}

impl Default for MockBackend {
  fn default() -> Self {
    Self::new(Duration::ZERO)
  }
}

impl MockBackend {
  pub fn new(latency: Duration) -> Self {
    Self {
      state: Mutex::new(MockState {
        next_id: 1,
        ..MockState::default()
      }),
      latency,
    }
  }

  /// Insert records as if they already existed on the server.
  pub fn seed<T: Serialize>(&self, endpoint: &str, records: impl IntoIterator<Item = T>) -> Result<()> {
    let mut state = mutex_lock(&self.state, SOURCE, "seed");
    for record in records {
      let value = serde_json::to_value(record).map_err(|e| Error::decode(endpoint, e))?;
      let id = value
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::validation("Seeded record has no id"))?;
      state.next_id = state.next_id.max(id + 1);
      state
        .tables
        .entry(endpoint.to_string())
        .or_default()
        .insert(id, value);
    }
    Ok(())
  }

  /// Make the next call fail with `err` instead of reaching the tables.
  pub fn fail_next(&self, err: Error) {
    mutex_lock(&self.state, SOURCE, "fail_next").fail_next = Some(err);
  }

  /// Number of GET calls served so far.
  pub fn fetch_count(&self) -> usize {
    mutex_lock(&self.state, SOURCE, "fetch_count").fetches
  }

  /// Writes received so far, in order.
  pub fn requests(&self) -> Vec<(Method, String)> {
    mutex_lock(&self.state, SOURCE, "requests").requests.clone()
  }

  /// Current server-side copy of a record.
  pub fn record(&self, endpoint: &str, id: i64) -> Option<Value> {
    mutex_lock(&self.state, SOURCE, "record")
      .tables
      .get(endpoint)
      .and_then(|table| table.get(&id))
      .cloned()
  }

  fn not_found(path: &str) -> Error {
    Error::Status {
      url: path.to_string(),
      status: 404,
      message: "Not Found".to_string(),
    }
  }

  fn list(state: &MockState, endpoint: &str, query: &QueryFilter) -> Value {
    let rows: Vec<&Value> = state
      .tables
      .get(endpoint)
      .map(|table| table.values().filter(|row| row_matches(row, query)).collect())
      .unwrap_or_default();
    let page = query.get("page").and_then(|p| p.parse::<usize>().ok()).unwrap_or(0);
    let size = query
      .get("size")
      .and_then(|s| s.parse::<usize>().ok())
      .unwrap_or(DEFAULT_PAGE_SIZE);
    let content: Vec<Value> = rows
      .iter()
      .skip(page.saturating_mul(size))
      .take(size)
      .map(|v| (*v).clone())
      .collect();
    json!({
      "content": content,
      "totalElements": rows.len(),
      "page": page,
      "size": size,
    })
  }

  fn write(state: &mut MockState, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
    match (method, route(path)) {
      (Method::Post, Route::Collection(endpoint)) => {
        let mut fields = match body {
          Some(Value::Object(fields)) => fields,
          _ => Map::new(),
        };
        let id = state.next_id;
        state.next_id += 1;
        fields.insert("id".into(), json!(id));
        fields.insert("code".into(), json!(format!("{}{:05}", code_prefix(endpoint), id)));
        if let Some(status) = initial_status(endpoint) {
          fields.entry("status").or_insert(status);
        }
        let record = Value::Object(fields);
        state
          .tables
          .entry(endpoint.to_string())
          .or_default()
          .insert(id, record.clone());
        Ok(record)
      }
      (Method::Put, Route::Record(endpoint, id)) => {
        let record = state
          .tables
          .get_mut(endpoint)
          .and_then(|table| table.get_mut(&id))
          .ok_or_else(|| Self::not_found(path))?;
        if let (Some(current), Some(Value::Object(patch))) = (record.as_object_mut(), body) {
          for (name, value) in patch {
            if name != "id" && name != "code" {
              current.insert(name, value);
            }
          }
        }
        Ok(record.clone())
      }
      (Method::Delete, Route::Record(endpoint, id)) => state
        .tables
        .get_mut(endpoint)
        .and_then(|table| table.remove(&id))
        .map(|_| Value::Null)
        .ok_or_else(|| Self::not_found(path)),
      (Method::Patch, Route::Action(endpoint, id, action)) => {
        let status = action_status(action).ok_or_else(|| Self::not_found(path))?;
        let record = state
          .tables
          .get_mut(endpoint)
          .and_then(|table| table.get_mut(&id))
          .ok_or_else(|| Self::not_found(path))?;
        if let Some(fields) = record.as_object_mut() {
          fields.insert("status".into(), status);
        }
        Ok(record.clone())
      }
      _ => Err(Error::Status {
        url: path.to_string(),
        status: 405,
        message: format!("{} not allowed", method),
      }),
    }
  }
}

#[async_trait]
impl Transport for MockBackend {
  async fn fetch(&self, path: &str, query: &QueryFilter) -> Result<Value> {
    tokio::time::sleep(self.latency).await;
    let mut state = mutex_lock(&self.state, SOURCE, "fetch");
    state.fetches += 1;
    if let Some(err) = state.fail_next.take() {
      return Err(err);
    }
    debug!(path, query = %query.encode(), "Mock GET");
    match route(path) {
      Route::List(endpoint) => Ok(Self::list(&state, endpoint, query)),
      Route::Record(endpoint, id) => state
        .tables
        .get(endpoint)
        .and_then(|table| table.get(&id))
        .cloned()
        .ok_or_else(|| Self::not_found(path)),
      _ => Err(Self::not_found(path)),
    }
  }

  async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
    tokio::time::sleep(self.latency).await;
    let mut state = mutex_lock(&self.state, SOURCE, "request");
    state.requests.push((method, path.to_string()));
    if let Some(err) = state.fail_next.take() {
      return Err(err);
    }
    debug!(path, method = %method, "Mock request");
    Self::write(&mut state, method, path, body)
  }
}
