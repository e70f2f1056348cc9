// Reconnect backoff: capped exponential delay with jitter

use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Delay before reconnect attempt `attempt` (0-based):
/// `min(base * 2^attempt, max)` scaled by a uniform factor in
/// `[1 - jitter, 1 + jitter]`, rounded to the nearest millisecond.
pub fn backoff_duration<R: Rng + ?Sized>(
    config: &ReconnectConfig,
    attempt: u32,
    rng: &mut R,
) -> Duration {
    let exponential = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt.min(32)));
    let capped = exponential.min(config.max_delay_ms) as f64;

    let factor = if config.jitter > 0.0 {
        rng.gen_range((1.0 - config.jitter)..=(1.0 + config.jitter))
    } else {
        1.0
    };
    Duration::from_millis((capped * factor).round().max(0.0) as u64)
}
