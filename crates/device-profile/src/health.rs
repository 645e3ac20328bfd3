//! Adapter Health Scoring
//!
//! Every command outcome nudges the profile's health score. A low score puts
//! the session into safe mode, which slows polling down regardless of what
//! the adapter nominally supports.

use crate::profile::DeviceProfile;
use std::time::Duration;
use tracing::{debug, warn};

/// Below this score the session runs in safe mode
pub const SAFE_MODE_THRESHOLD: u8 = 40;

/// Below this score the adapter should be reset
pub const RESET_THRESHOLD: u8 = 10;

/// Poll rate ceiling in safe mode (Hz)
const SAFE_MODE_MAX_POLL_HZ: u32 = 4;

/// Inter-command delay floor in safe mode (ms)
const SAFE_MODE_MIN_DELAY_MS: u64 = 100;

/// Credit per successful command
const SUCCESS_CREDIT: i32 = 3;

/// Credit per successful command once a streak is established
const STREAK_CREDIT: i32 = 6;

/// Successes in a row needed before the streak credit applies
const STREAK_LENGTH: u32 = 5;

/// Outcome of one exchange with the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// No answer before the deadline
    Timeout,
    /// Garbled, rejected or overflowed response
    CorruptFrame,
    /// The adapter echoed the command although echo is off
    UnexpectedEcho,
    /// A bus protocol could not be negotiated
    NegotiationFailure,
    /// A usable answer
    Success,
}

impl HealthEvent {
    /// Score penalty for a failure event (positive number)
    pub fn penalty(&self) -> i32 {
        match self {
            HealthEvent::Timeout => 10,
            HealthEvent::CorruptFrame => 8,
            HealthEvent::UnexpectedEcho => 4,
            HealthEvent::NegotiationFailure => 15,
            HealthEvent::Success => 0,
        }
    }
}

/// Tracks the success streak and applies score changes to a profile
#[derive(Debug, Default)]
pub struct HealthMonitor {
    consecutive_successes: u32,
}

impl HealthMonitor {
    /// Create a monitor with no streak
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event to the profile and return the new score
    pub fn record(&mut self, profile: &mut DeviceProfile, event: HealthEvent) -> u8 {
        let was_safe = profile.is_in_safe_mode();
        let delta = match event {
            HealthEvent::Success => {
                let credit = if self.consecutive_successes >= STREAK_LENGTH {
                    STREAK_CREDIT
                } else {
                    SUCCESS_CREDIT
                };
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
                credit
            }
            failure => {
                self.consecutive_successes = 0;
                -failure.penalty()
            }
        };

        let score = profile.adjust_health(delta);
        metrics::gauge!("obd_health_score").set(score as f64);
        debug!("Health {:?}: {:+} -> {}", event, delta, score);

        match (was_safe, profile.is_in_safe_mode()) {
            (false, true) => warn!(
                "{} entered safe mode (health {})",
                profile.device_name, score
            ),
            (true, false) => debug!("{} left safe mode", profile.device_name),
            _ => {}
        }
        score
    }

    /// Successes since the last failure
    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// Score below the safe-mode threshold
    pub fn is_in_safe_mode(profile: &DeviceProfile) -> bool {
        profile.is_in_safe_mode()
    }

    /// Score low enough that the adapter needs a full reset
    pub fn requires_reset(profile: &DeviceProfile) -> bool {
        profile.health_score() < RESET_THRESHOLD
    }

    /// Poll rate to actually use, capped in safe mode
    pub fn effective_poll_rate(profile: &DeviceProfile) -> u32 {
        let nominal = profile.capabilities.max_poll_rate_hz;
        if profile.is_in_safe_mode() {
            nominal.min(SAFE_MODE_MAX_POLL_HZ)
        } else {
            nominal
        }
    }

    /// Pause before each command, floored in safe mode
    pub fn effective_delay(profile: &DeviceProfile) -> Duration {
        let nominal = profile.capabilities.recommended_delay_ms;
        let ms = if profile.is_in_safe_mode() {
            nominal.max(SAFE_MODE_MIN_DELAY_MS)
        } else {
            nominal
        };
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdapterFamily, DeviceCapabilities};

    fn profile(family: AdapterFamily) -> DeviceProfile {
        DeviceProfile::new(
            "test",
            family,
            "",
            "test",
            DeviceCapabilities::for_family(family),
        )
    }

    #[test]
    fn test_penalties() {
        let mut monitor = HealthMonitor::new();
        let mut p = profile(AdapterFamily::Genuine);
        assert_eq!(monitor.record(&mut p, HealthEvent::Timeout), 90);
        assert_eq!(monitor.record(&mut p, HealthEvent::CorruptFrame), 82);
        assert_eq!(monitor.record(&mut p, HealthEvent::UnexpectedEcho), 78);
        assert_eq!(monitor.record(&mut p, HealthEvent::NegotiationFailure), 63);
    }

    #[test]
    fn test_streak_doubles_credit() {
        let mut monitor = HealthMonitor::new();
        let mut p = profile(AdapterFamily::Genuine);
        p.set_health_score(0);
        for _ in 0..5 {
            monitor.record(&mut p, HealthEvent::Success);
        }
        assert_eq!(p.health_score(), 15);
        assert_eq!(monitor.record(&mut p, HealthEvent::Success), 21);

        // A failure breaks the streak
        monitor.record(&mut p, HealthEvent::Timeout);
        assert_eq!(monitor.consecutive_successes(), 0);
        assert_eq!(monitor.record(&mut p, HealthEvent::Success), 14);
    }

    #[test]
    fn test_safe_mode_derating() {
        let mut p = profile(AdapterFamily::HighPerformance);
        assert_eq!(HealthMonitor::effective_poll_rate(&p), 50);
        assert_eq!(HealthMonitor::effective_delay(&p), Duration::from_millis(10));

        p.set_health_score(39);
        assert!(HealthMonitor::is_in_safe_mode(&p));
        assert_eq!(HealthMonitor::effective_poll_rate(&p), 4);
        assert_eq!(HealthMonitor::effective_delay(&p), Duration::from_millis(100));

        // Already slower than the floor: keep the slower nominal value
        let mut slow = profile(AdapterFamily::Unknown);
        slow.set_health_score(10);
        assert_eq!(HealthMonitor::effective_poll_rate(&slow), 2);
        assert_eq!(HealthMonitor::effective_delay(&slow), Duration::from_millis(150));
    }

    #[test]
    fn test_requires_reset() {
        let mut p = profile(AdapterFamily::Clone);
        p.set_health_score(10);
        assert!(!HealthMonitor::requires_reset(&p));
        p.set_health_score(9);
        assert!(HealthMonitor::requires_reset(&p));
    }
}
