//! Adapter Family Drivers
//!
//! One driver per hardware family, selected once from the fingerprint. A
//! driver owns the family's initialization sequence, the per-command retry
//! loop and whatever the family needs to shake itself out of a bad state.
//!
//! Drivers never hold the device profile; the session lends it to every
//! call so there is exactly one owner of the mutable profile.

mod elm;
mod exchange;
mod gateway;
mod high_performance;
mod retry;

pub use elm::{ElmDriver, ElmVariant};
pub use exchange::{evaluate, Outcome};
pub use gateway::{GatewayDriver, GatewayMode};
pub use high_performance::HighPerformanceDriver;
pub use retry::RetryPolicy;

use device_profile::{AdapterFamily, DeviceProfile, HealthEvent, HealthMonitor};
use obd_protocol::{at, strip_echo, FrameError, ObdError};
use obd_transport::AdapterTransport;
use std::time::Duration;
use tracing::{debug, warn};

/// Settings shared by every driver
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Timeout for initialization and recovery commands
    pub setup_timeout: Duration,
    /// Per-command retry policy
    pub retry: RetryPolicy,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            setup_timeout: Duration::from_millis(1000),
            retry: RetryPolicy::default(),
        }
    }
}

/// Driver for the adapter family behind the current connection
#[derive(Debug)]
pub enum AdapterDriver {
    /// Genuine ELM327, clones and unclassified adapters
    Elm(ElmDriver),
    /// STN chips, branded or not
    HighPerformance(HighPerformanceDriver),
    /// Custom bridges, text or binary framed
    Gateway(GatewayDriver),
}

impl AdapterDriver {
    /// Pick the driver for a family
    pub fn for_family(family: AdapterFamily, settings: DriverSettings) -> Self {
        match family {
            AdapterFamily::Genuine => Self::Elm(ElmDriver::new(ElmVariant::Genuine, settings)),
            AdapterFamily::Clone => Self::Elm(ElmDriver::new(ElmVariant::Clone, settings)),
            AdapterFamily::Unknown => Self::Elm(ElmDriver::new(ElmVariant::Unknown, settings)),
            AdapterFamily::HighPerformance => {
                Self::HighPerformance(HighPerformanceDriver::new(false, settings))
            }
            AdapterFamily::ProprietaryBranded => {
                Self::HighPerformance(HighPerformanceDriver::new(true, settings))
            }
            AdapterFamily::Gateway => Self::Gateway(GatewayDriver::new(settings)),
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            AdapterDriver::Elm(d) => d.name(),
            AdapterDriver::HighPerformance(d) => d.name(),
            AdapterDriver::Gateway(_) => "gateway",
        }
    }

    fn settings(&self) -> &DriverSettings {
        match self {
            AdapterDriver::Elm(d) => &d.settings,
            AdapterDriver::HighPerformance(d) => &d.settings,
            AdapterDriver::Gateway(d) => &d.settings,
        }
    }

    /// Retry policy applied by [`AdapterDriver::send_command`]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.settings().retry
    }

    /// Family-specific setup, run once after fingerprinting and again after
    /// every recovery
    pub async fn initialize(
        &mut self,
        link: &AdapterTransport,
        profile: &mut DeviceProfile,
    ) -> Result<(), ObdError> {
        debug!("Initializing {} driver", self.name());
        let result = match self {
            AdapterDriver::Elm(d) => d.initialize(link, profile).await,
            AdapterDriver::HighPerformance(d) => d.initialize(link, profile).await,
            AdapterDriver::Gateway(d) => d.initialize(link, profile).await,
        };
        if let Err(e) = &result {
            warn!("{} driver initialization failed: {}", self.name(), e);
        }
        result
    }

    /// Send one command with delay, retries and health accounting
    ///
    /// Returns the response text, or an empty string once every attempt
    /// has failed. Never errors.
    pub async fn send_command(
        &mut self,
        link: &AdapterTransport,
        profile: &mut DeviceProfile,
        health: &mut HealthMonitor,
        command: &str,
        timeout: Duration,
    ) -> String {
        pace(profile).await;

        let policy = self.retry_policy().clone();
        for attempt in 0..policy.max_attempts {
            let attempt_timeout = policy.timeout_for(timeout, attempt);
            let outcome = match self.exchange(link, command, attempt_timeout).await {
                Ok(raw) => {
                    let (response, echoed) = strip_echo(command, &raw);
                    if echoed {
                        health.record(profile, HealthEvent::UnexpectedEcho);
                    }
                    match evaluate(command, &response) {
                        Outcome::Answered => {
                            health.record(profile, HealthEvent::Success);
                            self.note_success();
                            return response;
                        }
                        outcome => outcome,
                    }
                }
                Err(e) => {
                    debug!("Corrupt frame for {}: {}", command, e);
                    Outcome::Corrupt
                }
            };

            let event = match outcome {
                Outcome::Corrupt => HealthEvent::CorruptFrame,
                _ => HealthEvent::Timeout,
            };
            health.record(profile, event);
            debug!(
                "{} attempt {}/{} failed ({:?}, {}ms)",
                command,
                attempt + 1,
                policy.max_attempts,
                outcome,
                attempt_timeout.as_millis()
            );

            if !link.is_connected() {
                break;
            }
        }

        metrics::counter!("obd_command_failures_total").increment(1);
        self.on_command_failure(link, profile).await;
        String::new()
    }

    /// Single attempt without retries or health accounting
    ///
    /// Used for negotiation probes, whose failures are scored per protocol
    /// rather than per attempt.
    pub async fn query(
        &mut self,
        link: &AdapterTransport,
        profile: &DeviceProfile,
        command: &str,
        timeout: Duration,
    ) -> String {
        pace(profile).await;
        match self.exchange(link, command, timeout).await {
            Ok(raw) => strip_echo(command, &raw).0,
            Err(e) => {
                debug!("Corrupt frame for {}: {}", command, e);
                String::new()
            }
        }
    }

    /// Count a failed command and run the family mitigation once enough
    /// have piled up
    pub async fn on_command_failure(&mut self, link: &AdapterTransport, profile: &mut DeviceProfile) {
        match self {
            AdapterDriver::Elm(d) => d.on_command_failure(link, profile).await,
            AdapterDriver::HighPerformance(d) => d.on_command_failure(link).await,
            AdapterDriver::Gateway(d) => d.on_command_failure(link, profile).await,
        }
    }

    /// Run the family mitigation now, regardless of the failure count
    pub async fn recover(&mut self, link: &AdapterTransport, profile: &mut DeviceProfile) {
        warn!("Running {} driver recovery", self.name());
        match self {
            AdapterDriver::Elm(d) => d.recover(link, profile).await,
            AdapterDriver::HighPerformance(d) => d.recover(link).await,
            AdapterDriver::Gateway(d) => d.recover(link, profile).await,
        }
    }

    /// Consecutive failed commands since the last success or mitigation
    pub fn consecutive_failures(&self) -> u32 {
        match self {
            AdapterDriver::Elm(d) => d.consecutive_failures,
            AdapterDriver::HighPerformance(d) => d.consecutive_failures,
            AdapterDriver::Gateway(d) => d.consecutive_failures,
        }
    }

    /// Wire form of the keepalive ping for the current mode
    pub fn keepalive_command(&self) -> String {
        match self {
            AdapterDriver::Gateway(d) => d.wire_command(at::READ_VOLTAGE),
            _ => at::READ_VOLTAGE.to_string(),
        }
    }

    fn note_success(&mut self) {
        match self {
            AdapterDriver::Elm(d) => d.consecutive_failures = 0,
            AdapterDriver::HighPerformance(d) => d.consecutive_failures = 0,
            AdapterDriver::Gateway(d) => d.consecutive_failures = 0,
        }
    }

    async fn exchange(
        &mut self,
        link: &AdapterTransport,
        command: &str,
        timeout: Duration,
    ) -> Result<String, FrameError> {
        match self {
            AdapterDriver::Gateway(d) => d.exchange(link, command, timeout).await,
            _ => Ok(exchange::transact(link, command, timeout).await),
        }
    }
}

/// Wait out the inter-command delay for the current health
async fn pace(profile: &DeviceProfile) {
    let delay = HealthMonitor::effective_delay(profile);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_profile::DeviceCapabilities;
    use obd_transport::{Reply, SimulatedAdapter};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_settings() -> DriverSettings {
        DriverSettings {
            setup_timeout: Duration::from_millis(200),
            retry: RetryPolicy::default(),
        }
    }

    fn profile(family: AdapterFamily) -> DeviceProfile {
        DeviceProfile::new(
            "sim",
            family,
            "2.2",
            "sim",
            DeviceCapabilities {
                recommended_delay_ms: 0,
                ..DeviceCapabilities::for_family(family)
            },
        )
    }

    #[test]
    fn test_factory() {
        let s = DriverSettings::default;
        assert!(matches!(
            AdapterDriver::for_family(AdapterFamily::Genuine, s()),
            AdapterDriver::Elm(_)
        ));
        assert!(matches!(
            AdapterDriver::for_family(AdapterFamily::Unknown, s()),
            AdapterDriver::Elm(_)
        ));
        assert!(matches!(
            AdapterDriver::for_family(AdapterFamily::ProprietaryBranded, s()),
            AdapterDriver::HighPerformance(_)
        ));
        assert!(matches!(
            AdapterDriver::for_family(AdapterFamily::Gateway, s()),
            AdapterDriver::Gateway(_)
        ));
        assert_eq!(
            AdapterDriver::for_family(AdapterFamily::Clone, s()).name(),
            "elm327-clone"
        );
    }

    #[tokio::test]
    async fn test_success_restores_health() {
        let link = AdapterTransport::spawn(SimulatedAdapter::new().spawn(), "sim");
        let mut driver = AdapterDriver::for_family(AdapterFamily::Genuine, fast_settings());
        let mut p = profile(AdapterFamily::Genuine);
        let mut health = HealthMonitor::new();
        driver.initialize(&link, &mut p).await.unwrap();
        p.set_health_score(50);

        let response = driver
            .send_command(&link, &mut p, &mut health, "010C", Duration::from_millis(300))
            .await;
        assert_eq!(response, "410C1AF8");
        assert_eq!(p.health_score(), 53);
    }

    #[tokio::test]
    async fn test_retries_then_gives_up() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let sim = SimulatedAdapter::new().on_command(move |cmd| {
            (cmd == "010C").then(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                Reply::text("")
            })
        });
        let link = AdapterTransport::spawn(sim.spawn(), "sim");
        let mut driver = AdapterDriver::for_family(AdapterFamily::Genuine, fast_settings());
        let mut p = profile(AdapterFamily::Genuine);
        let mut health = HealthMonitor::new();
        driver.initialize(&link, &mut p).await.unwrap();

        let response = driver
            .send_command(&link, &mut p, &mut health, "010C", Duration::from_millis(200))
            .await;
        assert_eq!(response, "");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(p.health_score(), 70);
        assert_eq!(driver.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_then_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let sim = SimulatedAdapter::new().on_command(move |cmd| {
            if cmd != "010C" {
                return None;
            }
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Some(Reply::text("BUFFER FULL")),
                _ => None,
            }
        });
        let link = AdapterTransport::spawn(sim.spawn(), "sim");
        let mut driver = AdapterDriver::for_family(AdapterFamily::Genuine, fast_settings());
        let mut p = profile(AdapterFamily::Genuine);
        let mut health = HealthMonitor::new();
        driver.initialize(&link, &mut p).await.unwrap();

        let response = driver
            .send_command(&link, &mut p, &mut health, "010C", Duration::from_millis(300))
            .await;
        assert_eq!(response, "410C1AF8");
        // -8 for the overflow, +3 for the retry that worked
        assert_eq!(p.health_score(), 95);
    }

    #[tokio::test]
    async fn test_unexpected_echo_is_stripped_and_penalised() {
        let link = AdapterTransport::spawn(SimulatedAdapter::new().spawn(), "sim");
        let mut driver = AdapterDriver::for_family(AdapterFamily::Genuine, fast_settings());
        let mut p = profile(AdapterFamily::Genuine);
        let mut health = HealthMonitor::new();
        // No initialize: echo is still on
        p.set_health_score(50);

        let response = driver
            .send_command(&link, &mut p, &mut health, "010C", Duration::from_millis(300))
            .await;
        assert_eq!(response, "41 0C 1A F8");
        assert_eq!(p.health_score(), 49);
    }

    #[tokio::test]
    async fn test_no_data_is_an_answer() {
        let link = AdapterTransport::spawn(SimulatedAdapter::new().spawn(), "sim");
        let mut driver = AdapterDriver::for_family(AdapterFamily::Genuine, fast_settings());
        let mut p = profile(AdapterFamily::Genuine);
        let mut health = HealthMonitor::new();
        driver.initialize(&link, &mut p).await.unwrap();

        let response = driver
            .send_command(&link, &mut p, &mut health, "0142", Duration::from_millis(300))
            .await;
        assert_eq!(response, "NO DATA");
        assert_eq!(driver.consecutive_failures(), 0);
    }
}
