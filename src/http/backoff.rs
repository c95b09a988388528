//! Retry delays for HTTP connect failures.
//!
//! Attempt `n` (1-based) waits `base * 2^(n-1)` plus up to 10% random
//! jitter. The result never exceeds `max`.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;

// ============================================================================
// Functions
// ============================================================================

/// Returns the delay before retry `attempt`. Attempt 0 waits nothing.
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);

    let factor = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..=jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped.saturating_add(jitter).min(max_ms))
}

// ============================================================================
// Tests
// ============================================================================
