use chrono::{DateTime, Duration, Utc};

/// Upper bound on the delay between two redelivery attempts, in minutes.
pub const BACKOFF_CAP_MINUTES: i64 = 16;

/// Largest exponent fed to `2^n`.
///
/// Anything past this is far above the cap anyway; clamping keeps the power
/// inside `i64` both here and in the store's SQL mirror of this function.
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Minutes to wait before the next attempt.
///
/// `retry_count` is the count *before* the failure being recorded is applied.
///
/// Formula: `min(2^retry_count, BACKOFF_CAP_MINUTES)`, giving
/// 1, 2, 4, 8, 16, 16, ... for retry counts 0, 1, 2, 3, 4, 5, ...
pub fn backoff_minutes(retry_count: u32) -> i64 {
    let exponent = retry_count.min(MAX_BACKOFF_EXPONENT);
    2i64.pow(exponent).min(BACKOFF_CAP_MINUTES)
}

/// [`backoff_minutes`] as a duration.
pub fn backoff_delay(retry_count: u32) -> Duration {
    Duration::minutes(backoff_minutes(retry_count))
}

/// Compute `next_retry_at` for a record that just failed again.
///
/// Returns `None` once the incremented count reaches `max_retries`: an
/// exhausted record is never scheduled.
pub fn next_retry_at(
    retry_count: u32,
    max_retries: u32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if retry_count.saturating_add(1) >= max_retries {
        None
    } else {
        Some(now + backoff_delay(retry_count))
    }
}
