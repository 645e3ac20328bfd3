//! Per-connection resources and bus protocol negotiation

use crate::SessionConfig;
use adapter_driver::AdapterDriver;
use device_profile::{DeviceProfile, HealthEvent, HealthMonitor};
use fallback::ProtocolFallbackSequencer;
use obd_protocol::{at, is_bus_ok, request, ObdProtocol};
use obd_transport::AdapterTransport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything that lives exactly as long as one physical link
pub(crate) struct Connection {
    pub link: Arc<AdapterTransport>,
    pub driver: AdapterDriver,
    pub health: HealthMonitor,
    pub fallback: ProtocolFallbackSequencer,
    pub profile: DeviceProfile,
}

impl Connection {
    /// Initialize the driver and negotiate a bus protocol
    pub async fn establish(&mut self, config: &SessionConfig) -> Option<ObdProtocol> {
        if let Err(e) = self.driver.initialize(&self.link, &mut self.profile).await {
            warn!("Driver initialization failed: {}", e);
            return None;
        }
        self.negotiate(config).await
    }

    /// Automatic mode first, then the fallback candidates in order
    pub async fn negotiate(&mut self, config: &SessionConfig) -> Option<ObdProtocol> {
        if self.profile.capabilities.supports_auto_protocol {
            if self.try_protocol(at::AUTO_PROTOCOL, config.auto_protocol_timeout(), config).await {
                let protocol = self.detected_protocol(config).await;
                info!("Automatic protocol search settled on {}", protocol);
                return Some(protocol);
            }
            debug!("Automatic protocol search failed, walking fallback candidates");
            self.health
                .record(&mut self.profile, HealthEvent::NegotiationFailure);
        }

        while let Some(candidate) = self.fallback.next_protocol() {
            for attempt in 0..config.negotiation_attempts.max(1) {
                let timeout = ProtocolFallbackSequencer::retry_timeout(&candidate, attempt);
                if self.try_protocol(candidate.command(), timeout, config).await {
                    self.fallback.mark_current_succeeded();
                    return Some(candidate.protocol);
                }
                if !self.link.is_connected() {
                    return None;
                }
            }
            self.health
                .record(&mut self.profile, HealthEvent::NegotiationFailure);
            self.fallback.mark_current_failed();
        }

        warn!("No bus protocol answered on {}", self.link.label());
        None
    }

    /// Ask which protocol automatic search picked, `Auto` if the adapter
    /// cannot say
    async fn detected_protocol(&mut self, config: &SessionConfig) -> ObdProtocol {
        let answer = self
            .driver
            .query(
                &self.link,
                &self.profile,
                at::DESCRIBE_PROTOCOL_NUMBER,
                config.identity_timeout(),
            )
            .await;
        ObdProtocol::from_protocol_number(&answer).unwrap_or(ObdProtocol::Auto)
    }

    /// Select a protocol and check that the bus answers under it
    async fn try_protocol(
        &mut self,
        select: &str,
        bus_timeout: Duration,
        config: &SessionConfig,
    ) -> bool {
        self.driver
            .query(&self.link, &self.profile, select, config.identity_timeout())
            .await;
        let response = self
            .driver
            .query(&self.link, &self.profile, request::SUPPORTED_PIDS, bus_timeout)
            .await;
        let ok = is_bus_ok(&response);
        debug!("{} bus check: {:?} -> {}", select, response, ok);
        ok
    }
}
