//! Error taxonomy shared by the cache, the transport and the repositories.

use thiserror::Error;

/// Errors surfaced by the data core.
///
/// Every variant carries owned strings so the error can be cloned into cache
/// entries and handed to every waiter of a shared in-flight fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
  /// Rejected on the client before any network call. Never touches the cache.
  #[error("{0}")]
  Validation(String),

  /// The request never produced a response (connection, timeout, TLS).
  #[error("request to {url} failed: {message}")]
  Network { url: String, message: String },

  /// The server answered with a non-2xx status.
  #[error("{url} responded with status {status}: {message}")]
  Status {
    url: String,
    status: u16,
    message: String,
  },

  /// The response body did not have the expected shape.
  #[error("failed to decode response from {url}: {message}")]
  Decode { url: String, message: String },

  /// A cache key was read or written with a different value type than the one
  /// it was created with.
  #[error("cache entry {key} holds a different value type")]
  TypeMismatch { key: String },
}

impl Error {
  pub fn validation(message: impl Into<String>) -> Self {
    Self::Validation(message.into())
  }

  pub fn decode(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
    Self::Decode {
      url: url.into(),
      message: err.to_string(),
    }
  }

  /// True for failures caused by the network or the server, as opposed to the
  /// client rejecting the call up front.
  pub fn is_network(&self) -> bool {
    matches!(self, Self::Network { .. } | Self::Status { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
