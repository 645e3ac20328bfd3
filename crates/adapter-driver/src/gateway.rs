//! Custom gateway bridges that speak either ELM-style text or framed binary

use crate::exchange::transact;
use crate::DriverSettings;
use device_profile::DeviceProfile;
use obd_protocol::{
    at, classify, decode_frame, encode_frame, is_frame_line, FrameError, ObdError, ResponseKind,
};
use obd_transport::AdapterTransport;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Failed commands tolerated before the wire mode is detected again
const REDETECT_THRESHOLD: u32 = 3;

/// Wire mode a gateway is currently speaking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Text,
    Binary,
}

/// Driver for gateway-class adapters
#[derive(Debug)]
pub struct GatewayDriver {
    pub(crate) mode: GatewayMode,
    pub(crate) settings: DriverSettings,
    pub(crate) consecutive_failures: u32,
}

impl GatewayDriver {
    pub fn new(settings: DriverSettings) -> Self {
        Self {
            mode: GatewayMode::Text,
            settings,
            consecutive_failures: 0,
        }
    }

    pub fn mode(&self) -> GatewayMode {
        self.mode
    }

    /// Bytes to put on the wire for `command` in the current mode
    pub(crate) fn wire_command(&self, command: &str) -> String {
        match self.mode {
            GatewayMode::Text => command.to_string(),
            GatewayMode::Binary => encode_frame(command).unwrap_or_else(|_| command.to_string()),
        }
    }

    /// Ask for identity in text first, then framed
    async fn detect_mode(&self, link: &AdapterTransport) -> Option<GatewayMode> {
        let timeout = self.settings.setup_timeout;
        link.drain_input().await;

        let text = transact(link, at::IDENTIFY, timeout).await;
        if classify(&text) != ResponseKind::Empty && !text.lines().any(is_frame_line) {
            return Some(GatewayMode::Text);
        }

        let request = encode_frame(at::IDENTIFY).ok()?;
        let reply = transact(link, &request, timeout).await;
        reply
            .lines()
            .find(|line| is_frame_line(line))
            .and_then(|line| decode_frame(line).ok())
            .map(|_| GatewayMode::Binary)
    }

    pub(crate) async fn initialize(
        &mut self,
        link: &AdapterTransport,
        profile: &mut DeviceProfile,
    ) -> Result<(), ObdError> {
        let mode = self
            .detect_mode(link)
            .await
            .ok_or(ObdError::AdapterNotResponding)?;
        info!("Gateway {} speaks {:?}", profile.device_name, mode);
        self.mode = mode;
        profile.capabilities.supports_binary_stream = mode == GatewayMode::Binary;

        if mode == GatewayMode::Text {
            for command in [at::ECHO_OFF, at::LINEFEEDS_OFF, at::SPACES_OFF, at::HEADERS_OFF] {
                transact(link, command, self.settings.setup_timeout).await;
            }
        }
        self.consecutive_failures = 0;
        Ok(())
    }

    /// One exchange in the current mode
    pub(crate) async fn exchange(
        &self,
        link: &AdapterTransport,
        command: &str,
        timeout: Duration,
    ) -> Result<String, FrameError> {
        if self.mode == GatewayMode::Text {
            return Ok(transact(link, command, timeout).await);
        }

        let request = encode_frame(command)?;
        let reply = transact(link, &request, timeout).await;
        if reply.trim().is_empty() {
            return Ok(String::new());
        }
        let frame = reply
            .lines()
            .find(|line| is_frame_line(line))
            .ok_or(FrameError::NotAFrame)?;
        decode_frame(frame)
    }

    pub(crate) async fn on_command_failure(
        &mut self,
        link: &AdapterTransport,
        profile: &mut DeviceProfile,
    ) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= REDETECT_THRESHOLD {
            warn!(
                "{} consecutive failures, re-detecting gateway mode",
                self.consecutive_failures
            );
            self.recover(link, profile).await;
        }
    }

    pub(crate) async fn recover(&mut self, link: &AdapterTransport, profile: &mut DeviceProfile) {
        match self.detect_mode(link).await {
            Some(mode) if mode != self.mode => {
                info!("Gateway switched from {:?} to {:?}", self.mode, mode);
                self.mode = mode;
                profile.capabilities.supports_binary_stream = mode == GatewayMode::Binary;
            }
            Some(_) => {}
            None => debug!("Gateway mode detection got no answer, keeping {:?}", self.mode),
        }
        self.consecutive_failures = 0;
    }
}
