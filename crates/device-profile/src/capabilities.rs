//! Adapter Capability Flags

use crate::profile::AdapterFamily;
use serde::{Deserialize, Serialize};

/// What an adapter is known to support
///
/// Every default is the safest, slowest choice so an adapter nobody could
/// classify still gets a working, if sluggish, session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)] // independent adapter feature flags
pub struct DeviceCapabilities {
    /// Messages longer than 7 data bytes (`ATAL`)
    pub supports_long_frames: bool,
    /// GM single-wire CAN (SAE J2411)
    pub supports_single_wire_can: bool,
    /// SAE J1939 heavy-duty bus
    pub supports_heavy_duty: bool,
    /// Raw binary framed mode instead of ELM327 text
    pub supports_binary_stream: bool,
    /// Automatic protocol search (`ATSP0`)
    pub supports_auto_protocol: bool,
    /// Adaptive response timing (`ATAT1`/`ATAT2`)
    pub supports_adaptive_timing: bool,
    /// CAN auto-formatting control (`ATCAF0`/`ATCAF1`)
    pub supports_can_formatting: bool,
    /// Custom request headers (`ATSH`)
    pub supports_custom_headers: bool,
    /// Sustained high-rate polling
    pub supports_high_speed_polling: bool,
    /// A pause between commands is mandatory
    pub requires_command_delay: bool,
    /// Receive buffer size in bytes
    pub buffer_size: u32,
    /// Maximum sustainable poll rate (Hz)
    pub max_poll_rate_hz: u32,
    /// Recommended pause between commands (ms)
    pub recommended_delay_ms: u64,
    /// The link drops when idle unless pinged
    pub keepalive_required: bool,
    /// Ping interval when a keepalive is required (ms)
    pub keepalive_interval_ms: u64,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            supports_long_frames: false,
            supports_single_wire_can: false,
            supports_heavy_duty: false,
            supports_binary_stream: false,
            supports_auto_protocol: false,
            supports_adaptive_timing: false,
            supports_can_formatting: false,
            supports_custom_headers: false,
            supports_high_speed_polling: false,
            requires_command_delay: true,
            buffer_size: 128,
            max_poll_rate_hz: 2,
            recommended_delay_ms: 150,
            keepalive_required: true,
            keepalive_interval_ms: 5000,
        }
    }
}

impl DeviceCapabilities {
    /// Baseline capabilities for an adapter family before any probing
    pub fn for_family(family: AdapterFamily) -> Self {
        let conservative = Self::default();
        match family {
            AdapterFamily::Genuine => Self {
                supports_long_frames: true,
                supports_auto_protocol: true,
                supports_adaptive_timing: true,
                supports_can_formatting: true,
                supports_custom_headers: true,
                requires_command_delay: false,
                buffer_size: 256,
                max_poll_rate_hz: 10,
                recommended_delay_ms: 50,
                keepalive_required: false,
                ..conservative
            },
            AdapterFamily::Clone => Self {
                supports_auto_protocol: true,
                supports_custom_headers: true,
                buffer_size: 128,
                max_poll_rate_hz: 5,
                recommended_delay_ms: 100,
                keepalive_required: true,
                keepalive_interval_ms: 3000,
                ..conservative
            },
            AdapterFamily::HighPerformance => Self {
                supports_long_frames: true,
                supports_single_wire_can: true,
                supports_heavy_duty: true,
                supports_auto_protocol: true,
                supports_adaptive_timing: true,
                supports_custom_headers: true,
                supports_high_speed_polling: true,
                requires_command_delay: false,
                buffer_size: 2048,
                max_poll_rate_hz: 50,
                recommended_delay_ms: 10,
                keepalive_required: false,
                ..conservative
            },
            AdapterFamily::ProprietaryBranded => Self {
                supports_can_formatting: true,
                max_poll_rate_hz: 100,
                buffer_size: 4096,
                ..Self::for_family(AdapterFamily::HighPerformance)
            },
            AdapterFamily::Gateway => Self {
                supports_binary_stream: true,
                supports_auto_protocol: false,
                supports_custom_headers: true,
                supports_long_frames: true,
                requires_command_delay: false,
                buffer_size: 1024,
                max_poll_rate_hz: 20,
                recommended_delay_ms: 20,
                keepalive_required: true,
                keepalive_interval_ms: 2000,
                ..conservative
            },
            AdapterFamily::Unknown => conservative,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_conservative() {
        let caps = DeviceCapabilities::default();
        assert!(!caps.supports_auto_protocol);
        assert!(!caps.supports_long_frames);
        assert!(caps.requires_command_delay);
        assert!(caps.keepalive_required);
        assert_eq!(caps.max_poll_rate_hz, 2);
    }

    #[test]
    fn test_family_mapping() {
        assert_eq!(
            DeviceCapabilities::for_family(AdapterFamily::Unknown),
            DeviceCapabilities::default()
        );

        let clone = DeviceCapabilities::for_family(AdapterFamily::Clone);
        assert!(!clone.supports_long_frames);
        assert!(!clone.supports_single_wire_can);

        let genuine = DeviceCapabilities::for_family(AdapterFamily::Genuine);
        assert!(!genuine.supports_single_wire_can);
        assert!(!genuine.supports_heavy_duty);

        let stn = DeviceCapabilities::for_family(AdapterFamily::HighPerformance);
        assert!(stn.supports_single_wire_can && stn.supports_heavy_duty);
        assert!(stn.supports_high_speed_polling);

        let branded = DeviceCapabilities::for_family(AdapterFamily::ProprietaryBranded);
        assert!(branded.supports_heavy_duty);
        assert!(branded.max_poll_rate_hz > stn.max_poll_rate_hz);

        let gateway = DeviceCapabilities::for_family(AdapterFamily::Gateway);
        assert!(gateway.supports_binary_stream);
        assert!(!gateway.supports_auto_protocol);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let caps: DeviceCapabilities =
            serde_json::from_str(r#"{"supports_long_frames": true}"#).unwrap();
        assert!(caps.supports_long_frames);
        assert_eq!(caps.recommended_delay_ms, 150);
    }
}
