use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::json;

use tradedesk::api::types::{PaymentStatus, Status};
use tradedesk::api::{
  GoodSupplierApi, HttpTransport, MockBackend, PaymentFilter, PaymentRequestApi, PriceFilter,
  Transport,
};
use tradedesk::cache::{belongs_to_family, encode, CacheLayer, CacheStore, QueryFilter};
use tradedesk::config::{Config, LoggingConfig};
use tradedesk::logging;

const MOCK_LATENCY: Duration = Duration::from_millis(150);

#[derive(Parser, Debug)]
#[command(name = "tradedesk")]
#[command(about = "Cached access to the trade administration backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tradedesk/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Serve everything from an in-memory demo backend
  #[arg(long)]
  mock: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Good-supplier prices
  #[command(subcommand)]
  Prices(PricesCommand),
  /// Payment requests
  #[command(subcommand)]
  Payments(PaymentsCommand),
  /// Cache key utilities
  #[command(subcommand)]
  Key(KeyCommand),
}

#[derive(Subcommand, Debug)]
enum PricesCommand {
  List {
    #[arg(long)]
    good: Option<i64>,
    #[arg(long)]
    supplier: Option<i64>,
    #[arg(long)]
    status: Option<Status>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long, default_value_t = 0)]
    page: u32,
  },
  /// Price of a good from a supplier in effect on a date
  Resolve {
    #[arg(long)]
    good: i64,
    #[arg(long)]
    supplier: i64,
    /// YYYY-MM-DD, defaults to today
    #[arg(long)]
    as_of: Option<NaiveDate>,
  },
  Activate { id: i64 },
  Deactivate { id: i64 },
}

#[derive(Subcommand, Debug)]
enum PaymentsCommand {
  List {
    /// request_approval, approved, rejected or paid
    #[arg(long, value_parser = parse_payment_status)]
    status: Option<PaymentStatus>,
    #[arg(long, default_value_t = 0)]
    page: u32,
  },
  Show { id: i64 },
}

#[derive(Subcommand, Debug)]
enum KeyCommand {
  /// Print the cache key of a list query
  Encode {
    endpoint: String,
    #[arg(long, default_value = "list")]
    suffix: String,
    /// Filter fields as name=value
    params: Vec<String>,
  },
  /// Check whether a raw key belongs to a list family
  Family { key: String, prefix: String },
}

fn parse_payment_status(raw: &str) -> Result<PaymentStatus, String> {
  match raw.trim().to_ascii_lowercase().as_str() {
    "request_approval" | "pending" => Ok(PaymentStatus::RequestApproval),
    "approved" => Ok(PaymentStatus::Approved),
    "rejected" => Ok(PaymentStatus::Rejected),
    "paid" => Ok(PaymentStatus::Paid),
    other => Err(format!("unknown payment status: {}", other)),
  }
}

fn demo_backend() -> Result<MockBackend> {
  let backend = MockBackend::new(MOCK_LATENCY);
  backend.seed(
    "/good-supplier",
    [
      json!({"id": 1, "code": "GS00001", "goodId": 10, "goodName": "Steel bolt M8", "supplierId": 20,
        "supplierName": "Hanoi Metals", "unitPrice": 500.0, "startDate": "2024-01-01",
        "endDate": "2024-06-30", "status": "ACTIVE"}),
      json!({"id": 2, "code": "GS00002", "goodId": 10, "goodName": "Steel bolt M8", "supplierId": 20,
        "supplierName": "Hanoi Metals", "unitPrice": 540.0, "startDate": "2024-07-01",
        "status": "ACTIVE"}),
      json!({"id": 3, "code": "GS00003", "goodId": 11, "goodName": "Hex nut M8", "supplierId": 21,
        "supplierName": "Saigon Fasteners", "unitPrice": 120.0, "status": "INACTIVE"}),
    ],
  )?;
  backend.seed(
    "/payment-request",
    [
      json!({"id": 1, "code": "PR00001", "amount": 12500000.0, "currency": "VND", "status": 0,
        "supplierId": 20, "supplierName": "Hanoi Metals"}),
      json!({"id": 2, "code": "PR00002", "amount": 830.0, "currency": "USD", "status": 1,
        "serviceProvider": {"name": "Blue Ocean Logistics"}}),
      json!({"id": 3, "code": "PR00003", "amount": 95.0, "currency": "USD", "status": 7,
        "shippingUnitName": "FastShip"}),
    ],
  )?;
  Ok(backend)
}

fn status_label(status: Status) -> &'static str {
  match status {
    Status::Active => "active",
    Status::Inactive => "inactive",
  }
}

fn print_price(price: &tradedesk::api::types::GoodSupplierPrice) {
  println!(
    "{:>5}  {:<8}  {:<18}  {:<18}  {:>10}  {} .. {}  {}",
    price.id,
    price.code.as_deref().unwrap_or("-"),
    price.good_name.as_deref().unwrap_or("-"),
    price.supplier_name.as_deref().unwrap_or("-"),
    price.unit_price.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "-".into()),
    price.start_date.map(|d| d.to_string()).unwrap_or_else(|| "open".into()),
    price.end_date.map(|d| d.to_string()).unwrap_or_else(|| "open".into()),
    status_label(price.status),
  );
}

fn print_payment(request: &tradedesk::api::types::PaymentRequest) {
  println!(
    "{:>5}  {:<8}  {:>14}  {:<4}  {:<16}  {}",
    request.id,
    request.code.as_deref().unwrap_or("-"),
    request.amount.map(|a| format!("{:.2}", a)).unwrap_or_else(|| "-".into()),
    request.currency.as_deref().unwrap_or(""),
    format!("{:?}", request.status),
    request.service_provider_name,
  );
}

async fn run_prices(api: GoodSupplierApi, command: PricesCommand) -> Result<()> {
  match command {
    PricesCommand::List {
      good,
      supplier,
      status,
      search,
      page,
    } => {
      let filter = PriceFilter {
        good_id: good,
        supplier_id: supplier,
        status,
        search,
        page,
        size: None,
      };
      let result = api.list(&filter).await?;
      for price in &result.content {
        print_price(price);
      }
      println!("page {} ({} total)", result.page, result.total_elements);
    }
    PricesCommand::Resolve {
      good,
      supplier,
      as_of,
    } => {
      let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
      match api.current_price(good, supplier, as_of).await? {
        Some(price) => print_price(&price),
        None => println!("No applicable price on {}", as_of),
      }
    }
    PricesCommand::Activate { id } => print_price(&api.activate(id).await?),
    PricesCommand::Deactivate { id } => print_price(&api.deactivate(id).await?),
  }
  Ok(())
}

async fn run_payments(api: PaymentRequestApi, command: PaymentsCommand) -> Result<()> {
  match command {
    PaymentsCommand::List { status, page } => {
      let filter = PaymentFilter {
        status,
        page,
        ..PaymentFilter::default()
      };
      let result = api.list(&filter).await?;
      for request in &result.content {
        print_payment(request);
      }
      println!("page {} ({} total)", result.page, result.total_elements);
    }
    PaymentsCommand::Show { id } => print_payment(&*api.get(id).await?),
  }
  Ok(())
}

fn run_key(command: KeyCommand) -> Result<()> {
  match command {
    KeyCommand::Encode {
      endpoint,
      suffix,
      params,
    } => {
      let filter = params.iter().try_fold(QueryFilter::new(), |filter, param| {
        param
          .split_once('=')
          .map(|(name, value)| filter.text(name, Some(value)))
          .ok_or_else(|| eyre!("Expected name=value, got {}", param))
      })?;
      println!("{}", encode(&endpoint, &suffix, &filter));
    }
    KeyCommand::Family { key, prefix } => {
      println!("{}", belongs_to_family(&key, &prefix));
    }
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let command = match args.command {
    Command::Key(command) => return run_key(command),
    other => other,
  };

  // The demo backend runs without a config file, but not with a broken one
  let config = if args.mock {
    Config::load_optional(args.config.as_deref())?
  } else {
    Some(Config::load(args.config.as_deref())?)
  };
  let logging_config = config
    .as_ref()
    .map(|c| c.logging.clone())
    .unwrap_or_else(LoggingConfig::default);
  let _guard = logging::init(&logging_config)?;

  let transport: Arc<dyn Transport> = match &config {
    Some(config) if !args.mock => Arc::new(HttpTransport::new(&config.api, Config::api_token())?),
    _ => Arc::new(demo_backend()?),
  };
  let store = match &config {
    Some(config) => CacheStore::with_policy(config.revalidation_policy()),
    None => CacheStore::new(),
  };
  let layer = CacheLayer::new(store);

  match command {
    Command::Prices(command) => run_prices(GoodSupplierApi::new(transport, layer), command).await,
    Command::Payments(command) => {
      run_payments(PaymentRequestApi::new(transport, layer), command).await
    }
    Command::Key(_) => Ok(()),
  }
}
