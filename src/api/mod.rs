//! Backend resources: wire types, transport and cached repositories.

pub mod api_types;
pub mod good_supplier;
pub mod mock;
pub mod payment_request;
pub mod repository;
pub mod transport;
pub mod types;

pub use good_supplier::{GoodSupplierApi, PriceFilter};
pub use mock::MockBackend;
pub use payment_request::{PaymentFilter, PaymentRequestApi};
pub use repository::{
  BankRepository, CustomerRepository, ExchangeRateRepository, GoodRepository, Repository,
  ShippingUnitRepository,
};
pub use transport::{HttpTransport, Method, Transport};
