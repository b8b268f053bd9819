//! Revalidation policy: when a cached key is refetched instead of served.

use std::time::Duration;

const DEFAULT_ERROR_RETRY_COUNT: u32 = 2;
const DEFAULT_ERROR_RETRY_INTERVAL_MS: u64 = 1000;

/// Events that may cause a background refetch of a cached key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationTrigger {
  /// The window regained focus
  Focus,
  /// Network connectivity came back
  Reconnect,
  /// A consumer mounted on a key that already holds data
  Stale,
}

/// Per-key revalidation configuration.
///
/// The default disables every automatic trigger: list and detail data are
/// fetched once and afterwards change only through optimistic mutations or an
/// explicit refetch. Tables stay stable while a user interacts with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevalidationPolicy {
  pub revalidate_on_focus: bool,
  pub revalidate_on_reconnect: bool,
  pub revalidate_if_stale: bool,
  /// Retries after the first failed attempt of a read
  pub error_retry_count: u32,
  pub error_retry_interval: Duration,
}

impl Default for RevalidationPolicy {
  fn default() -> Self {
    Self {
      revalidate_on_focus: false,
      revalidate_on_reconnect: false,
      revalidate_if_stale: false,
      error_retry_count: DEFAULT_ERROR_RETRY_COUNT,
      error_retry_interval: Duration::from_millis(DEFAULT_ERROR_RETRY_INTERVAL_MS),
    }
  }
}

impl RevalidationPolicy {
  /// A policy that revalidates on every trigger, for data that should behave
  /// like a live feed.
  pub fn live() -> Self {
    Self {
      revalidate_on_focus: true,
      revalidate_on_reconnect: true,
      revalidate_if_stale: true,
      ..Self::default()
    }
  }

  pub fn with_retries(mut self, count: u32, interval: Duration) -> Self {
    self.error_retry_count = count;
    self.error_retry_interval = interval;
    self
  }

  pub fn allows(&self, trigger: RevalidationTrigger) -> bool {
    match trigger {
      RevalidationTrigger::Focus => self.revalidate_on_focus,
      RevalidationTrigger::Reconnect => self.revalidate_on_reconnect,
      RevalidationTrigger::Stale => self.revalidate_if_stale,
    }
  }

  /// Total number of attempts a read makes before giving up.
  pub fn max_attempts(&self) -> u32 {
    self.error_retry_count.saturating_add(1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_never_revalidates_implicitly() {
    let policy = RevalidationPolicy::default();
    assert!(!policy.allows(RevalidationTrigger::Focus));
    assert!(!policy.allows(RevalidationTrigger::Reconnect));
    assert!(!policy.allows(RevalidationTrigger::Stale));
    assert_eq!(policy.error_retry_count, 2);
    assert_eq!(policy.error_retry_interval, Duration::from_secs(1));
    assert_eq!(policy.max_attempts(), 3);
  }

  #[test]
  fn test_live_allows_all_triggers() {
    let policy = RevalidationPolicy::live().with_retries(0, Duration::ZERO);
    assert!(policy.allows(RevalidationTrigger::Focus));
    assert!(policy.allows(RevalidationTrigger::Stale));
    assert_eq!(policy.max_attempts(), 1);
  }
}
