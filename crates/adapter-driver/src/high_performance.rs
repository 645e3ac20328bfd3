//! STN-based adapters, with extras for vendor-branded units

use crate::exchange::setup;
use crate::DriverSettings;
use device_profile::DeviceProfile;
use obd_protocol::{at, ObdError, ResponseKind};
use obd_transport::AdapterTransport;
use tracing::{debug, warn};

/// Failed commands tolerated before the bus protocol is closed
const PROTOCOL_CLOSE_THRESHOLD: u32 = 3;

/// ISO-TP segmentation on receive and transmit (STN extension)
const SEGMENTATION_COMMANDS: [&str; 2] = ["STCSEGR1", "STCSEGT1"];

/// Driver for high-performance adapters
#[derive(Debug)]
pub struct HighPerformanceDriver {
    branded: bool,
    pub(crate) settings: DriverSettings,
    pub(crate) consecutive_failures: u32,
}

impl HighPerformanceDriver {
    pub fn new(branded: bool, settings: DriverSettings) -> Self {
        Self {
            branded,
            settings,
            consecutive_failures: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        if self.branded {
            "stn-branded"
        } else {
            "stn"
        }
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
            let timing = if caps.supports_high_speed_polling {
                at::ADAPTIVE_TIMING_AGGRESSIVE
            } else {
                at::ADAPTIVE_TIMING_NORMAL
            };
            self.setup(link, timing).await;
        }
        if caps.supports_long_frames {
            self.setup(link, at::LONG_FRAMES_ON).await;
        }
        if caps.supports_can_formatting {
            self.setup(link, at::CAN_FORMAT_ON).await;
        }

        if self.branded {
            for command in SEGMENTATION_COMMANDS {
                if self.setup(link, command).await != ResponseKind::Ok {
                    debug!("{} not accepted by {}", command, profile.device_name);
                }
            }
        }

        self.consecutive_failures = 0;
        Ok(())
    }

    pub(crate) async fn on_command_failure(&mut self, link: &AdapterTransport) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= PROTOCOL_CLOSE_THRESHOLD {
            warn!(
                "{} consecutive failures, closing bus protocol",
                self.consecutive_failures
            );
            self.recover(link).await;
        }
    }

    /// Close the bus so the next request reopens it from scratch
    pub(crate) async fn recover(&mut self, link: &AdapterTransport) {
        link.drain_input().await;
        self.setup(link, at::PROTOCOL_CLOSE).await;
        self.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdapterDriver, RetryPolicy};
    use device_profile::{AdapterFamily, DeviceCapabilities, HealthMonitor};
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

    fn profile(family: AdapterFamily) -> DeviceProfile {
        DeviceProfile::new(
            "sim",
            family,
            "5.6.19",
            "sim",
            DeviceCapabilities {
                recommended_delay_ms: 0,
                ..DeviceCapabilities::for_family(family)
            },
        )
    }

    #[tokio::test]
    async fn test_branded_initialization_enables_segmentation() {
        let sim = SimulatedAdapter::new()
            .on_command(|cmd| cmd.starts_with("STCSEG").then(|| Reply::text("OK")));
        let log = sim.command_log();
        let link = AdapterTransport::spawn(sim.spawn(), "sim");
        let mut driver = HighPerformanceDriver::new(true, settings());
        let mut p = profile(AdapterFamily::ProprietaryBranded);

        driver.initialize(&link, &mut p).await.unwrap();
        let log = log.lock().unwrap().clone();
        assert!(log.contains(&"ATAT2".to_string()));
        assert!(log.contains(&"ATCAF1".to_string()));
        assert!(log.ends_with(&["STCSEGR1".to_string(), "STCSEGT1".to_string()]));
    }

    #[tokio::test]
    async fn test_unbranded_skips_vendor_commands() {
        let sim = SimulatedAdapter::new();
        let log = sim.command_log();
        let link = AdapterTransport::spawn(sim.spawn(), "sim");
        let mut driver = HighPerformanceDriver::new(false, settings());
        let mut p = profile(AdapterFamily::HighPerformance);

        driver.initialize(&link, &mut p).await.unwrap();
        assert!(!log.lock().unwrap().iter().any(|c| c.starts_with("ST")));
    }

    #[tokio::test]
    async fn test_protocol_closed_after_three_failures() {
        let sim = SimulatedAdapter::new().on_command(|cmd| (cmd == "010C").then(|| Reply::text("")));
        let log = sim.command_log();
        let link = AdapterTransport::spawn(sim.spawn(), "sim");
        let mut driver =
            AdapterDriver::HighPerformance(HighPerformanceDriver::new(false, settings()));
        let mut p = profile(AdapterFamily::HighPerformance);
        let mut health = HealthMonitor::new();

        for _ in 0..2 {
            driver
                .send_command(&link, &mut p, &mut health, "010C", Duration::from_millis(200))
                .await;
        }
        assert!(!log.lock().unwrap().contains(&"ATPC".to_string()));
        driver
            .send_command(&link, &mut p, &mut health, "010C", Duration::from_millis(200))
            .await;
        assert!(log.lock().unwrap().contains(&"ATPC".to_string()));
    }
}
