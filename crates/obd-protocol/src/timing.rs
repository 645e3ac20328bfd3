//! Timeout arithmetic that never panics

use std::time::Duration;

/// `base * factor`, saturating at `Duration::MAX`
///
/// Negative or NaN factors yield `base` unchanged.
pub fn scale_timeout(base: Duration, factor: f64) -> Duration {
    if factor.is_nan() || factor < 0.0 {
        return base;
    }
    Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}
