//! Client-side resource cache.
//!
//! This module keeps server query results (list pages and single entities) in
//! memory for the lifetime of a session:
//! - Addresses results with typed keys that keep list pages and entities apart
//! - Lets any number of consumers observe a key through watch subscriptions
//! - Fetches once, then serves locally unless a policy or caller asks otherwise
//! - Applies write results optimistically to every affected page and entity

mod layer;
pub(crate) mod lock;
mod mutation;
mod policy;
mod store;
mod traits;

pub mod keys;

pub use keys::{belongs_to_family, encode, CacheKey, EntityKey, ListKey, QueryFamily, QueryFilter};
pub use layer::CacheLayer;
pub use mutation::{apply_mutation, optimistic, ListTransform, MutationReport, Snapshot};
pub use policy::{RevalidationPolicy, RevalidationTrigger};
pub use store::{CacheStore, WriteOptions};
pub use traits::{CacheEntry, Cacheable, Page};
