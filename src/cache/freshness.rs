//! Freshness rules for cached order projections.
//!
//! Everything here is pure: the caller passes `now`, so the same inputs always
//! produce the same verdict.

use chrono::{DateTime, Duration, Utc};

/// Default time-to-live of a cached projection, in minutes.
pub const DEFAULT_TTL_MINUTES: i64 = 10;

/// Where a cached timestamp sits relative to the TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Younger than the warning threshold
  Fresh,
  /// Still valid, but past the warning threshold
  Aging,
  /// At or past the TTL; usable as a fallback only
  Stale,
  /// Never cached
  Missing,
}

impl Freshness {
  pub fn is_valid(self) -> bool {
    matches!(self, Freshness::Fresh | Freshness::Aging)
  }
}

/// Staleness policy: a TTL plus the age at which readers get a mild warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
  ttl: Duration,
  warning_age: Duration,
}

impl Default for CachePolicy {
  fn default() -> Self {
    Self::new(Duration::minutes(DEFAULT_TTL_MINUTES))
  }
}

impl CachePolicy {
  /// Policy with the warning threshold at half the TTL.
  pub fn new(ttl: Duration) -> Self {
    Self {
      ttl,
      warning_age: ttl / 2,
    }
  }

  pub fn with_warning_age(mut self, warning_age: Duration) -> Self {
    self.warning_age = warning_age;
    self
  }

  pub fn classify(&self, cached_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Freshness {
    let Some(cached_at) = cached_at else {
      return Freshness::Missing;
    };

    let age = now - cached_at;
    if age >= self.ttl {
      Freshness::Stale
    } else if age >= self.warning_age {
      Freshness::Aging
    } else {
      Freshness::Fresh
    }
  }

  /// True when `cached_at` is present and `now - cached_at < ttl`.
  pub fn is_valid(&self, cached_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    self.classify(cached_at, now).is_valid()
  }

  /// Human-readable advisory for the given cache timestamp, if one is due.
  pub fn warning(&self, cached_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<String> {
    let age = age_minutes(cached_at, now);
    match (self.classify(cached_at, now), age) {
      (Freshness::Missing, _) | (_, None) => Some("Data has never been synced".to_string()),
      (Freshness::Stale, Some(minutes)) => Some(format!(
        "Data is {} minutes old. Sync to refresh.",
        minutes
      )),
      (Freshness::Aging, Some(minutes)) => {
        Some(format!("Using cache that is {} minutes old.", minutes))
      }
      (Freshness::Fresh, Some(_)) => None,
    }
  }
}

/// Whole minutes elapsed since `cached_at`; `None` stands for an infinite age
/// (never cached). Timestamps in the future count as zero.
pub fn age_minutes(cached_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
  cached_at.map(|at| (now - at).num_minutes().max(0))
}
