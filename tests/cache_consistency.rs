use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::json;

use tradedesk::api::types::{Customer, GoodSupplierDraft, PaymentStatus, Status};
use tradedesk::api::{
  CustomerRepository, GoodSupplierApi, MockBackend, PaymentFilter, PaymentRequestApi, PriceFilter,
  Repository,
};
use tradedesk::cache::{CacheKey, CacheLayer, CacheStore, Cacheable, QueryFilter, RevalidationPolicy};
use tradedesk::Error;

fn date(s: &str) -> NaiveDate {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date")
}

fn seeded_backend() -> Arc<MockBackend> {
  let backend = Arc::new(MockBackend::default());
  backend
    .seed(
      "/good-supplier",
      (1..=4).map(|id| {
        json!({
          "id": id,
          "goodId": 10,
          "supplierId": 20 + id % 2,
          "unitPrice": 100 * id,
          "status": "ACTIVE"
        })
      }),
    )
    .expect("seed prices");
  backend
    .seed(
      "/customer",
      [
        json!({"id": 1, "name": "Acme", "status": "ACTIVE"}),
        json!({"id": 2, "name": "Globex", "status": "ACTIVE"}),
      ],
    )
    .expect("seed customers");
  backend
}

fn draft(supplier_id: i64) -> GoodSupplierDraft {
  GoodSupplierDraft {
    good_id: 10,
    supplier_id,
    unit_price: Some(999.0),
    start_date: Some(date("2024-01-01")),
    end_date: Some(date("2024-12-31")),
    ..GoodSupplierDraft::default()
  }
}

#[tokio::test]
async fn create_appends_once_to_every_populated_page() {
  let backend = seeded_backend();
  let api = GoodSupplierApi::new(backend.clone(), CacheLayer::default());
  let all = PriceFilter::default();
  let second_page = PriceFilter {
    page: 1,
    size: Some(2),
    ..PriceFilter::default()
  };
  api.list(&all).await.expect("first page");
  api.list(&second_page).await.expect("second page");
  let fetches = backend.fetch_count();

  let created = api.insert(&draft(20)).await.expect("insert price");

  for filter in [&all, &second_page] {
    let page = api.list(filter).await.expect("cached page");
    assert_eq!(page.content.iter().filter(|p| p.id == created.id).count(), 1);
    assert_eq!(page.content.last().map(|p| p.id), Some(created.id));
  }
  let entity = api.get(created.id).await.expect("created entity");
  assert_eq!(entity.code, created.code);
  assert_eq!(entity.unit_price, Some(999.0));
  assert!(entity.last_updated_at.is_some());
  assert_eq!(backend.fetch_count(), fetches);
}

#[tokio::test]
async fn update_replaces_record_and_keeps_others_shared() {
  let backend = seeded_backend();
  let api = GoodSupplierApi::new(backend.clone(), CacheLayer::default());
  let before = api.list(&PriceFilter::default()).await.expect("page");

  let updated = api.update(2, &draft(21)).await.expect("update price");
  assert_eq!(updated.unit_price, Some(999.0));

  let after = api.list(&PriceFilter::default()).await.expect("page");
  assert_eq!(after.content[1].unit_price, Some(999.0));
  for index in [0, 2, 3] {
    assert!(Arc::ptr_eq(&before.content[index], &after.content[index]));
  }
  assert_eq!(backend.fetch_count(), 1);
}

#[tokio::test]
async fn deactivate_hides_record_from_active_pages_only() {
  let backend = seeded_backend();
  let api = GoodSupplierApi::new(backend.clone(), CacheLayer::default());
  let active = PriceFilter {
    status: Some(Status::Active),
    ..PriceFilter::default()
  };
  api.list(&active).await.expect("active page");
  api.list(&PriceFilter::default()).await.expect("full page");

  api.delete(3).await.expect("soft delete");

  let active_page = api.list(&active).await.expect("active page");
  assert!(active_page.get(3).is_none());
  assert_eq!(active_page.total_elements, 3);
  let full_page = api.list(&PriceFilter::default()).await.expect("full page");
  assert_eq!(full_page.get(3).map(|p| p.status), Some(Status::Inactive));
  assert_eq!(api.get(3).await.expect("by id").status, Status::Inactive);
  assert_eq!(backend.record("/good-supplier", 3).expect("server copy")["status"], "INACTIVE");
}

#[tokio::test]
async fn activate_is_idempotent() {
  let backend = seeded_backend();
  let repo: CustomerRepository<MockBackend> = Repository::new(backend.clone(), CacheLayer::default());
  repo.deactivate(1).await.expect("deactivate");

  let once = repo.activate(1).await.expect("activate");
  let twice = repo.activate(1).await.expect("activate again");
  assert_eq!(once.status, Status::Active);
  assert_eq!(once, twice);
  assert_eq!(repo.get(1).await.expect("by id").status, Status::Active);
}

#[tokio::test]
async fn failed_write_leaves_cache_untouched() {
  let backend = seeded_backend();
  let repo: CustomerRepository<MockBackend> = Repository::new(backend.clone(), CacheLayer::default());
  let before = repo.list(QueryFilter::new()).await.expect("page");

  backend.fail_next(Error::Status {
    url: "/customer".into(),
    status: 400,
    message: "Name already taken".into(),
  });
  let err = repo
    .create(&json!({"name": "Acme"}))
    .await
    .expect_err("rejected create");
  assert!(err.to_string().contains("Name already taken"));

  let after = repo.list(QueryFilter::new()).await.expect("page");
  assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn optimistic_update_reverts_when_request_fails() {
  let backend = seeded_backend();
  let repo: CustomerRepository<MockBackend> = Repository::new(backend.clone(), CacheLayer::default());
  let before = repo.list(QueryFilter::new()).await.expect("page");
  let original = before.get(2).cloned().expect("customer 2");

  let mut speculative = Customer::clone(&original);
  speculative.name = "Globex Corp".into();
  backend.fail_next(Error::Network {
    url: "/customer/2".into(),
    message: "connection reset".into(),
  });
  repo
    .update_optimistic(2, &json!({"name": "Globex Corp"}), speculative.clone())
    .await
    .expect_err("failed update");

  let reverted = repo.list(QueryFilter::new()).await.expect("page");
  assert!(Arc::ptr_eq(&before, &reverted));

  let saved = repo
    .update_optimistic(2, &json!({"name": "Globex Corp"}), speculative)
    .await
    .expect("update");
  assert_eq!(saved.name, "Globex Corp");
  let page = repo.list(QueryFilter::new()).await.expect("page");
  assert_eq!(page.get(2).map(|c| c.name.as_str()), Some("Globex Corp"));
}

#[tokio::test]
async fn failed_revalidation_keeps_previous_data() {
  let backend = seeded_backend();
  let store = CacheStore::with_policy(RevalidationPolicy::default().with_retries(0, Duration::ZERO));
  let repo: CustomerRepository<MockBackend> = Repository::new(backend.clone(), CacheLayer::new(store));
  let before = repo.get(1).await.expect("customer");

  backend.fail_next(Error::Network {
    url: "/customer/1".into(),
    message: "timed out".into(),
  });
  assert!(repo.refetch(1).await.is_err());

  let key = CacheKey::Entity(CustomerRepository::<MockBackend>::entity_key(1).expect("key"));
  let entry = repo.store().snapshot::<Customer>(&key).expect("entry");
  assert!(Arc::ptr_eq(entry.data.as_ref().expect("kept data"), &before));
  assert!(entry.error.expect("error recorded").is_network());
  assert!(!entry.is_validating);
}

#[tokio::test]
async fn concurrent_reads_share_one_request() {
  let backend = Arc::new(MockBackend::new(Duration::from_millis(20)));
  backend
    .seed("/customer", [json!({"id": 1, "name": "Acme"})])
    .expect("seed");
  let repo: CustomerRepository<MockBackend> = Repository::new(backend.clone(), CacheLayer::default());

  let (a, b) = tokio::join!(repo.get(1), repo.get(1));
  assert!(Arc::ptr_eq(&a.expect("first"), &b.expect("second")));
  assert_eq!(backend.fetch_count(), 1);
}

#[tokio::test]
async fn query_handle_sees_mutations_and_unfetched_pages_stay_empty() {
  let backend = seeded_backend();
  let repo: CustomerRepository<MockBackend> = Repository::new(backend.clone(), CacheLayer::default());
  let mut fetched = repo.query_list(QueryFilter::new()).expect("query");
  let untouched = repo
    .query_list(QueryFilter::new().text("search", Some("acme")))
    .expect("query");
  fetched.resolve().await.expect("first load");
  fetched.poll();

  let created = repo.create(&json!({"name": "Initech"})).await.expect("create");

  assert!(fetched.poll());
  let page = fetched.data().expect("page");
  assert!(page.get(created.cache_id()).is_some());
  assert!(untouched.data().is_none());
  assert_eq!(backend.fetch_count(), 1);
}

#[tokio::test]
async fn price_resolution_follows_status_and_window() {
  let backend = Arc::new(MockBackend::default());
  backend
    .seed(
      "/good-supplier",
      [json!({
        "id": 1, "goodId": 10, "supplierId": 20, "unitPrice": 500,
        "startDate": "2024-01-01", "endDate": "2024-06-30", "status": "ACTIVE"
      })],
    )
    .expect("seed");
  let api = GoodSupplierApi::new(backend.clone(), CacheLayer::default());

  let resolved = api.current_price(10, 20, date("2024-03-15")).await.expect("resolve");
  assert_eq!(resolved.map(|p| p.id), Some(1));
  assert!(api.current_price(10, 20, date("2024-07-01")).await.expect("resolve").is_none());

  api.deactivate(1).await.expect("deactivate");
  assert!(api.current_price(10, 20, date("2024-03-15")).await.expect("resolve").is_none());

  api.activate(1).await.expect("activate");
  let resolved = api.current_price(10, 20, date("2024-03-15")).await.expect("resolve");
  assert_eq!(resolved.map(|p| p.id), Some(1));
  // Reactivation does not stretch the window
  assert!(api.current_price(10, 20, date("2024-07-01")).await.expect("resolve").is_none());
}

#[tokio::test]
async fn unmapped_payment_status_reads_as_request_approval() {
  let backend = Arc::new(MockBackend::default());
  backend
    .seed("/payment-request", [json!({"id": 9, "status": 7, "supplierName": "Acme"})])
    .expect("seed");
  let api = PaymentRequestApi::new(backend.clone(), CacheLayer::default());

  let request = api.get(9).await.expect("payment request");
  assert_eq!(request.status, PaymentStatus::RequestApproval);
  assert_eq!(request.service_provider_name, "Acme");

  let approved = api.approve(9).await.expect("approve");
  assert_eq!(approved.status, PaymentStatus::Approved);
  let listed = api
    .list(&PaymentFilter {
      status: Some(PaymentStatus::Approved),
      ..PaymentFilter::default()
    })
    .await
    .expect("list");
  assert_eq!(listed.content.len(), 1);
}
