//! Retry backoff: exponential with jitter, capped.

use std::time::Duration;

use rand::Rng;

/// Jitter fraction applied around the exponential delay (±25%).
const JITTER_FRACTION: f64 = 0.25;

/// Delay before re-dispatching a job that has failed `attempt` times.
///
/// `delay = base * 2^(attempt-1) ± jitter`, capped at `max`. The cap is
/// applied before jitter so the jittered value can exceed the cap by at most
/// the jitter fraction.
pub fn retry_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32);
    let raw_ms = (base.as_millis() as u64).saturating_mul(1u64 << exponent);
    let capped_ms = raw_ms.min(max.as_millis() as u64);

    let jitter_span = (capped_ms as f64 * JITTER_FRACTION) as i64;
    let jitter = if jitter_span > 0 {
        rand::thread_rng().gen_range(-jitter_span..=jitter_span)
    } else {
        0
    };

    Duration::from_millis((capped_ms as i64 + jitter).max(0) as u64)
}

/// Jitter-free bounds for a given attempt, used by tests and monitoring.
pub fn retry_delay_bounds(base: Duration, max: Duration, attempt: u32) -> (Duration, Duration) {
    let exponent = attempt.saturating_sub(1).min(32);
    let raw_ms = (base.as_millis() as u64).saturating_mul(1u64 << exponent);
    let capped_ms = raw_ms.min(max.as_millis() as u64) as f64;
    (
        Duration::from_millis((capped_ms * (1.0 - JITTER_FRACTION)) as u64),
        Duration::from_millis((capped_ms * (1.0 + JITTER_FRACTION)) as u64),
    )
}
