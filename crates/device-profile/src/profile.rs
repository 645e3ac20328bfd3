//! Device Profile

use crate::capabilities::DeviceCapabilities;
use crate::health::SAFE_MODE_THRESHOLD;
use serde::{Deserialize, Serialize, Serializer};

/// Upper bound of the health score
pub const MAX_HEALTH: u8 = 100;

/// Hardware family of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterFamily {
    /// Genuine ELM Electronics ELM327
    Genuine,
    /// Counterfeit ELM327 firmware
    Clone,
    /// STN11xx / STN21xx chips
    HighPerformance,
    /// OBDLink-branded STN devices with the extended ST command set
    ProprietaryBranded,
    /// Custom or DIY bridge, possibly binary framed
    Gateway,
    /// Could not be classified
    Unknown,
}

impl AdapterFamily {
    /// Stable name used in logs and telemetry
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterFamily::Genuine => "Genuine",
            AdapterFamily::Clone => "Clone",
            AdapterFamily::HighPerformance => "HighPerformance",
            AdapterFamily::ProprietaryBranded => "ProprietaryBranded",
            AdapterFamily::Gateway => "Gateway",
            AdapterFamily::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for AdapterFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about the adapter behind the current connection
///
/// Built once per connection by the fingerprinter, then owned by the
/// session, which lends it out mutably to the driver and health monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Display name, e.g. "OBDLink MX+" or the raw identity string
    pub device_name: String,
    /// Classified hardware family
    pub chip_family: AdapterFamily,
    /// Firmware version string, empty when unknown
    pub firmware_version: String,
    /// Transport label, e.g. `tcp://192.168.0.10:35000`
    pub transport: String,
    /// Capability surface
    pub capabilities: DeviceCapabilities,
    health_score: u8,
}

impl DeviceProfile {
    /// Create a profile at full health
    pub fn new(
        device_name: impl Into<String>,
        chip_family: AdapterFamily,
        firmware_version: impl Into<String>,
        transport: impl Into<String>,
        capabilities: DeviceCapabilities,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            chip_family,
            firmware_version: firmware_version.into(),
            transport: transport.into(),
            capabilities,
            health_score: MAX_HEALTH,
        }
    }

    /// Current health score, always within `0..=100`
    pub fn health_score(&self) -> u8 {
        self.health_score
    }

    /// Set the health score, clamping into `0..=100`
    pub fn set_health_score(&mut self, score: i32) {
        self.health_score = score.clamp(0, MAX_HEALTH as i32) as u8;
    }

    /// Apply a signed change to the health score, returning the new value
    pub fn adjust_health(&mut self, delta: i32) -> u8 {
        self.set_health_score(self.health_score as i32 + delta);
        self.health_score
    }

    /// Counterfeit firmware
    pub fn is_clone(&self) -> bool {
        self.chip_family == AdapterFamily::Clone
    }

    /// STN-based adapter, branded or not
    pub fn is_high_performance(&self) -> bool {
        matches!(
            self.chip_family,
            AdapterFamily::HighPerformance | AdapterFamily::ProprietaryBranded
        )
    }

    /// Health has dropped far enough to derate polling
    pub fn is_in_safe_mode(&self) -> bool {
        self.health_score < SAFE_MODE_THRESHOLD
    }

    /// Leading number of the firmware version ("2.1" -> 2)
    pub fn firmware_major(&self) -> Option<u32> {
        self.firmware_version
            .split('.')
            .next()
            .and_then(|major| major.trim().parse().ok())
    }

    /// Telemetry representation
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Serialize)]
struct CapabilitySummary {
    long_frames: bool,
    single_wire_can: bool,
    heavy_duty: bool,
    binary_stream: bool,
}

#[derive(Serialize)]
struct ProfileRecord<'a> {
    device_name: &'a str,
    chip_family: &'static str,
    firmware_version: &'a str,
    transport: &'a str,
    capabilities: CapabilitySummary,
    buffer_size: u32,
    max_poll_rate: u32,
    recommended_delay_ms: u64,
    health_score: u8,
}

impl Serialize for DeviceProfile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let caps = &self.capabilities;
        ProfileRecord {
            device_name: &self.device_name,
            chip_family: self.chip_family.as_str(),
            firmware_version: &self.firmware_version,
            transport: &self.transport,
            capabilities: CapabilitySummary {
                long_frames: caps.supports_long_frames,
                single_wire_can: caps.supports_single_wire_can,
                heavy_duty: caps.supports_heavy_duty,
                binary_stream: caps.supports_binary_stream,
            },
            buffer_size: caps.buffer_size,
            max_poll_rate: caps.max_poll_rate_hz,
            recommended_delay_ms: caps.recommended_delay_ms,
            health_score: self.health_score,
        }
        .serialize(serializer)
    }
}
