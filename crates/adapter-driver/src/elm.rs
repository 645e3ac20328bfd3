//! ELM327 driver: genuine chips, clones and unclassified adapters

use crate::exchange::{setup, transact};
use crate::DriverSettings;
use device_profile::{DeviceCapabilities, DeviceProfile, HealthMonitor};
use obd_protocol::{at, classify, scale_timeout, strip_echo, ObdError, ResponseKind};
use obd_transport::AdapterTransport;
use tracing::{debug, info, warn};

/// Firmware major from which the heavy-duty protocol probe is attempted
const HEAVY_DUTY_MIN_FIRMWARE: u32 = 2;

/// Which flavour of ELM327 the driver is tuned for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElmVariant {
    Genuine,
    Clone,
    Unknown,
}

/// Driver for ELM327-compatible adapters
#[derive(Debug)]
pub struct ElmDriver {
    variant: ElmVariant,
    pub(crate) settings: DriverSettings,
    pub(crate) consecutive_failures: u32,
}

impl ElmDriver {
    pub fn new(variant: ElmVariant, settings: DriverSettings) -> Self {
        Self {
            variant,
            settings,
            consecutive_failures: 0,
        }
    }

    pub fn variant(&self) -> ElmVariant {
        self.variant
    }

    pub fn name(&self) -> &'static str {
        match self.variant {
            ElmVariant::Genuine => "elm327",
            ElmVariant::Clone => "elm327-clone",
            ElmVariant::Unknown => "elm327-generic",
        }
    }

    /// Failed commands tolerated before a warm start
    pub fn failure_threshold(&self) -> u32 {
        match self.variant {
            ElmVariant::Genuine => 3,
            ElmVariant::Clone | ElmVariant::Unknown => 2,
        }
    }

    fn trusts_advanced_features(&self) -> bool {
        self.variant == ElmVariant::Genuine
    }

    async fn setup(&self, link: &AdapterTransport, command: &str) -> ResponseKind {
        setup(link, command, self.settings.setup_timeout).await
    }

    pub(crate) async fn initialize(
        &mut self,
        link: &AdapterTransport,
        profile: &mut DeviceProfile,
    ) -> Result<(), ObdError> {
        if self.setup(link, at::ECHO_OFF).await == ResponseKind::Empty {
            return Err(ObdError::AdapterNotResponding);
        }
        self.setup(link, at::LINEFEEDS_OFF).await;
        self.setup(link, at::SPACES_OFF).await;
        self.setup(link, at::HEADERS_OFF).await;

        let caps = profile.capabilities;
        if caps.supports_auto_protocol {
            self.setup(link, at::AUTO_PROTOCOL).await;
        }
        if caps.supports_adaptive_timing {
            self.setup(link, at::ADAPTIVE_TIMING_NORMAL).await;
        }
        // Clones claim long-frame support and then overflow their buffers
        if caps.supports_long_frames && self.trusts_advanced_features() {
            self.setup(link, at::LONG_FRAMES_ON).await;
        }

        if self.trusts_advanced_features()
            && profile.firmware_major().unwrap_or(0) >= HEAVY_DUTY_MIN_FIRMWARE
        {
            let heavy_duty = self.setup(link, at::HEAVY_DUTY_PROBE).await == ResponseKind::Ok;
            self.setup(link, at::AUTO_PROTOCOL).await;
            if heavy_duty != caps.supports_heavy_duty {
                info!("Heavy-duty protocol support: {}", heavy_duty);
                profile.capabilities = DeviceCapabilities {
                    supports_heavy_duty: heavy_duty,
                    ..caps
                };
            }
        }

        self.consecutive_failures = 0;
        Ok(())
    }

    pub(crate) async fn on_command_failure(
        &mut self,
        link: &AdapterTransport,
        profile: &mut DeviceProfile,
    ) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.failure_threshold() {
            warn!(
                "{} consecutive failures on {}, warm starting",
                self.consecutive_failures, profile.device_name
            );
            self.recover(link, profile).await;
        }
    }

    /// Warm start, or a full reset when the adapter rejects `ATWS` or its
    /// health is beyond saving
    pub(crate) async fn recover(&mut self, link: &AdapterTransport, profile: &mut DeviceProfile) {
        let full_reset = HealthMonitor::requires_reset(profile);
        let reset = if full_reset { at::RESET } else { at::SOFT_RESET };
        let timeout = scale_timeout(self.settings.setup_timeout, 2.5);

        link.drain_input().await;
        let response = transact(link, reset, timeout).await;
        let (response, _) = strip_echo(reset, &response);
        if !full_reset && classify(&response).is_corrupt() {
            debug!("Warm start rejected, falling back to full reset");
            transact(link, at::RESET, timeout).await;
        }
        for command in [at::ECHO_OFF, at::LINEFEEDS_OFF, at::SPACES_OFF] {
            self.setup(link, command).await;
        }
        self.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdapterDriver, RetryPolicy};
    use device_profile::AdapterFamily;
    use obd_transport::{Reply, SimulatedAdapter};
    use std::time::Duration;

    fn settings() -> DriverSettings {
        DriverSettings {
            setup_timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
        }
    }

    fn profile(family: AdapterFamily, firmware: &str) -> DeviceProfile {
        DeviceProfile::new(
            "sim",
            family,
            firmware,
            "sim",
            DeviceCapabilities {
                recommended_delay_ms: 0,
                ..DeviceCapabilities::for_family(family)
            },
        )
    }

    fn log_of(log: &obd_transport::CommandLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_genuine_initialization() {
        let sim = SimulatedAdapter::new();
        let log = sim.command_log();
        let link = AdapterTransport::spawn(sim.spawn(), "sim");
        let mut driver = ElmDriver::new(ElmVariant::Genuine, settings());
        let mut p = profile(AdapterFamily::Genuine, "2.2");

        driver.initialize(&link, &mut p).await.unwrap();
        assert_eq!(
            log_of(&log),
            vec![
                "ATE0", "ATL0", "ATS0", "ATH0", "ATSP0", "ATAT1", "ATAL", "ATSPA", "ATSP0"
            ]
        );
        assert!(p.capabilities.supports_heavy_duty);
    }

    #[tokio::test]
    async fn test_old_firmware_skips_heavy_duty_probe() {
        let sim = SimulatedAdapter::new();
        let log = sim.command_log();
        let link = AdapterTransport::spawn(sim.spawn(), "sim");
        let mut driver = ElmDriver::new(ElmVariant::Genuine, settings());
        let mut p = profile(AdapterFamily::Genuine, "1.4b");

        driver.initialize(&link, &mut p).await.unwrap();
        assert!(!log_of(&log).contains(&"ATSPA".to_string()));
        assert!(!p.capabilities.supports_heavy_duty);
    }

    #[tokio::test]
    async fn test_clone_never_enables_long_frames() {
        let sim = SimulatedAdapter::new();
        let log = sim.command_log();
        let link = AdapterTransport::spawn(sim.spawn(), "sim");
        let mut driver = ElmDriver::new(ElmVariant::Clone, settings());
        let mut p = profile(AdapterFamily::Clone, "2.1");
        p.capabilities.supports_long_frames = true;

        driver.initialize(&link, &mut p).await.unwrap();
        assert_eq!(log_of(&log), vec!["ATE0", "ATL0", "ATS0", "ATH0", "ATSP0"]);
    }

    #[tokio::test]
    async fn test_silent_adapter_fails_initialization() {
        let sim = SimulatedAdapter::new().on_command(|_| Some(Reply::Silent));
        let link = AdapterTransport::spawn(sim.spawn(), "sim");
        let mut driver = ElmDriver::new(ElmVariant::Unknown, settings());
        let mut p = profile(AdapterFamily::Unknown, "");

        let result = driver.initialize(&link, &mut p).await;
        assert!(matches!(result, Err(ObdError::AdapterNotResponding)));
    }

    #[tokio::test]
    async fn test_clone_warm_starts_after_two_failures() {
        let sim = SimulatedAdapter::new().on_command(|cmd| (cmd == "010C").then(|| Reply::text("")));
        let log = sim.command_log();
        let link = AdapterTransport::spawn(sim.spawn(), "sim");
        let mut driver = AdapterDriver::Elm(ElmDriver::new(ElmVariant::Clone, settings()));
        let mut p = profile(AdapterFamily::Clone, "1.5");
        let mut health = HealthMonitor::new();
        driver.initialize(&link, &mut p).await.unwrap();

        let timeout = Duration::from_millis(200);
        driver.send_command(&link, &mut p, &mut health, "010C", timeout).await;
        assert!(!log_of(&log).contains(&"ATWS".to_string()));
        driver.send_command(&link, &mut p, &mut health, "010C", timeout).await;
        assert!(log_of(&log).contains(&"ATWS".to_string()));
        assert_eq!(driver.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_rejected_warm_start_falls_back_to_reset() {
        let sim = SimulatedAdapter::new().on_command(|cmd| (cmd == "ATWS").then(|| Reply::text("?")));
        let log = sim.command_log();
        let link = AdapterTransport::spawn(sim.spawn(), "sim");
        let mut driver = ElmDriver::new(ElmVariant::Clone, settings());
        let mut p = profile(AdapterFamily::Clone, "1.5");

        driver.recover(&link, &mut p).await;
        assert_eq!(log_of(&log), vec!["ATWS", "ATZ", "ATE0", "ATL0", "ATS0"]);
    }

    #[tokio::test]
    async fn test_exhausted_health_uses_full_reset() {
        let sim = SimulatedAdapter::new();
        let log = sim.command_log();
        let link = AdapterTransport::spawn(sim.spawn(), "sim");
        let mut driver = ElmDriver::new(ElmVariant::Genuine, settings());
        let mut p = profile(AdapterFamily::Genuine, "2.2");
        p.set_health_score(5);

        driver.recover(&link, &mut p).await;
        assert_eq!(log_of(&log), vec!["ATZ", "ATE0", "ATL0", "ATS0"]);
    }
}
