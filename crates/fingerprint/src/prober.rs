//! Probe Sequence

use crate::classifier::{apply_clone_override, classify_family, parse_firmware, IdentityStrings};
use device_profile::{AdapterFamily, DeviceCapabilities, DeviceProfile, KnownDeviceRegistry};
use obd_protocol::{at, classify, request, strip_echo, ResponseKind};
use obd_transport::AdapterTransport;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeouts used while fingerprinting
#[derive(Debug, Clone)]
pub struct FingerprintConfig {
    /// Reset can take a second or more while the chip reboots
    pub reset_timeout: Duration,
    /// Identity, setup and probe commands
    pub command_timeout: Duration,
    /// First bus query; may trigger a protocol search
    pub bus_timeout: Duration,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            reset_timeout: Duration::from_millis(2500),
            command_timeout: Duration::from_millis(1000),
            bus_timeout: Duration::from_millis(5000),
        }
    }
}

/// Which optional commands the adapter accepted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProbeResults {
    pub long_frames: bool,
    pub custom_headers: bool,
    pub adaptive_timing: bool,
    pub can_formatting: bool,
}

impl ProbeResults {
    /// Overlay probe outcomes onto family defaults
    ///
    /// For a trusted family the probe decides. Otherwise a probe can only
    /// take a flag away: clones acknowledge commands they cannot honour.
    fn apply(&self, caps: DeviceCapabilities, trusted: bool) -> DeviceCapabilities {
        let decide = |default: bool, accepted: bool| {
            if trusted {
                accepted
            } else {
                default && accepted
            }
        };
        DeviceCapabilities {
            supports_long_frames: decide(caps.supports_long_frames, self.long_frames),
            supports_custom_headers: decide(caps.supports_custom_headers, self.custom_headers),
            supports_adaptive_timing: decide(caps.supports_adaptive_timing, self.adaptive_timing),
            supports_can_formatting: decide(caps.supports_can_formatting, self.can_formatting),
            ..caps
        }
    }
}

/// Outcome of fingerprinting one connection
#[derive(Debug, Clone)]
pub struct FingerprintReport {
    /// Profile for the session to own
    pub profile: DeviceProfile,
    /// Raw identity answers
    pub identity: IdentityStrings,
    /// Family before the clone override
    pub base_family: AdapterFamily,
    /// Registry entry key that matched, if any
    pub registry_key: Option<String>,
    /// Probe outcomes; all false when probing was skipped
    pub probes: ProbeResults,
    /// Whether anything at all came back for the bus query
    pub bus_responsive: bool,
}

/// Runs the fixed probe sequence over a transport
pub struct Fingerprinter<'a> {
    transport: &'a AdapterTransport,
    registry: &'a KnownDeviceRegistry,
    config: FingerprintConfig,
}

impl<'a> Fingerprinter<'a> {
    /// Create a fingerprinter for one connection
    pub fn new(
        transport: &'a AdapterTransport,
        registry: &'a KnownDeviceRegistry,
        config: FingerprintConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            config,
        }
    }

    /// Reset, identify, classify, probe and synthesize a profile
    pub async fn run(&self) -> FingerprintReport {
        info!("Fingerprinting adapter on {}", self.transport.label());

        self.reset().await;
        // Clones may ignore any of these
        for setup in [at::ECHO_OFF, at::LINEFEEDS_OFF, at::SPACES_OFF] {
            self.ask(setup, self.config.command_timeout).await;
        }

        let identity = IdentityStrings {
            general: self.identity(at::IDENTIFY).await,
            extended: self.identity(at::DEVICE_DESCRIPTION).await,
            protocol: self.identity(at::DESCRIBE_PROTOCOL).await,
        };
        if identity.is_blank() {
            warn!("Adapter returned no identity strings");
        }

        let base_family = classify_family(&identity);
        let firmware = parse_firmware(&identity.general);
        let family = apply_clone_override(base_family, &firmware, &identity.extended);
        if family != base_family {
            info!(
                "Firmware {:?} with description {:?} looks counterfeit",
                firmware, identity.extended
            );
        }

        let registry_hit = self
            .registry
            .lookup(&[identity.general.as_str(), identity.extended.as_str()])
            .cloned();

        let mut probes = ProbeResults::default();
        let registry_key = registry_hit.as_ref().map(|e| e.key.clone());
        let mut profile = match registry_hit {
            Some(entry) => {
                info!("Registry match {:?} -> {}", entry.key, entry.template.device_name);
                let mut profile = entry.template;
                if !firmware.is_empty() {
                    profile.firmware_version = firmware.clone();
                }
                profile
            }
            None => {
                probes = self.probe_capabilities().await;
                let trusted = !matches!(family, AdapterFamily::Clone | AdapterFamily::Unknown);
                let caps = probes.apply(DeviceCapabilities::for_family(family), trusted);
                DeviceProfile::new(device_name(&identity), family, firmware.clone(), "", caps)
            }
        };
        profile.transport = self.transport.label().to_string();

        let bus = self.ask(request::SUPPORTED_PIDS, self.config.bus_timeout).await;
        let bus_responsive = classify(&bus) != ResponseKind::Empty;
        if !bus_responsive {
            warn!("Adapter did not answer the bus query");
        }

        info!(
            "Identified {} as {} (firmware {:?})",
            profile.device_name, profile.chip_family, profile.firmware_version
        );

        FingerprintReport {
            profile,
            identity,
            base_family,
            registry_key,
            probes,
            bus_responsive,
        }
    }

    /// Warm start, escalating to a full reset when `ATWS` is rejected
    async fn reset(&self) {
        let answer = self.ask(at::SOFT_RESET, self.config.reset_timeout).await;
        if classify(&answer).is_corrupt() {
            debug!("Warm start rejected, falling back to full reset");
            self.ask(at::RESET, self.config.reset_timeout).await;
        }
    }

    /// Try each optional feature, switching it back off straight away
    async fn probe_capabilities(&self) -> ProbeResults {
        ProbeResults {
            long_frames: self.probe(at::LONG_FRAMES_ON, at::LONG_FRAMES_OFF).await,
            custom_headers: self.probe(at::HEADER_PROBE, at::HEADER_DEFAULT).await,
            adaptive_timing: self
                .probe(at::ADAPTIVE_TIMING_AGGRESSIVE, at::ADAPTIVE_TIMING_NORMAL)
                .await,
            can_formatting: self.probe(at::CAN_FORMAT_OFF, at::CAN_FORMAT_ON).await,
        }
    }

    async fn probe(&self, enable: &str, restore: &str) -> bool {
        let answer = self.ask(enable, self.config.command_timeout).await;
        let accepted = classify(&answer) == ResponseKind::Ok;
        if accepted {
            self.ask(restore, self.config.command_timeout).await;
        }
        debug!("Probe {}: {}", enable, if accepted { "accepted" } else { "rejected" });
        accepted
    }

    /// Identity string, with any echo and rejection removed
    async fn identity(&self, command: &str) -> String {
        let response = self.ask(command, self.config.command_timeout).await;
        match classify(&response) {
            ResponseKind::Empty | ResponseKind::Unknown | ResponseKind::Error => String::new(),
            _ => response,
        }
    }

    /// One exchange; link failures come back as an empty answer
    async fn ask(&self, command: &str, timeout: Duration) -> String {
        match self.transport.transact(command, timeout).await {
            Ok(response) => strip_echo(command, &response).0,
            Err(e) => {
                debug!("{} failed: {}", command, e);
                String::new()
            }
        }
    }
}

fn device_name(identity: &IdentityStrings) -> String {
    let general = identity.general.lines().next().unwrap_or("").trim();
    if general.is_empty() {
        "Unknown adapter".to_string()
    } else {
        general.to_string()
    }
}
