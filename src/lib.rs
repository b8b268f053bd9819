//! Client-side data core of the trade administration console.
//!
//! - [`cache`]: keyed cache of list pages and entities with optimistic mutations
//! - [`pricing`]: good-supplier price validity
//! - [`api`]: transport seam and the per-resource repositories built on both

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod pricing;
pub mod query;

pub use error::{Error, Result};
