//! Known-Device Registry
//!
//! Adapters whose identity strings are recognised get a hand-tuned profile
//! instead of going through capability probing.

use crate::capabilities::DeviceCapabilities;
use crate::profile::{AdapterFamily, DeviceProfile};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// Errors applying a registry update
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Update document is not valid JSON of the expected shape
    #[error("Invalid registry update: {0}")]
    InvalidUpdate(#[from] serde_json::Error),

    /// An entry has an empty key, which would match every adapter
    #[error("Registry entry for {0:?} has an empty key")]
    EmptyKey(String),
}

/// One registry entry: a lower-cased identity fragment and its template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownDeviceEntry {
    /// Lower-cased substring matched against identity strings
    pub key: String,
    /// Profile handed out on a match
    pub template: DeviceProfile,
}

#[derive(Debug, Deserialize)]
struct EntryUpdate {
    key: String,
    device_name: String,
    chip_family: AdapterFamily,
    #[serde(default)]
    capabilities: DeviceCapabilities,
}

/// Ordered lookup table; the first matching entry wins
#[derive(Debug, Clone, Default)]
pub struct KnownDeviceRegistry {
    entries: Vec<KnownDeviceEntry>,
}

impl KnownDeviceRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with well-known adapters
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();

        let branded = DeviceCapabilities::for_family(AdapterFamily::ProprietaryBranded);
        registry.register(
            "obdlink mx+",
            template("OBDLink MX+", AdapterFamily::ProprietaryBranded, branded),
        );
        registry.register(
            "obdlink ex",
            template(
                "OBDLink EX",
                AdapterFamily::ProprietaryBranded,
                DeviceCapabilities {
                    // USB, never idles out
                    keepalive_required: false,
                    ..branded
                },
            ),
        );
        registry.register(
            "obdlink cx",
            template(
                "OBDLink CX",
                AdapterFamily::ProprietaryBranded,
                DeviceCapabilities {
                    // BLE link, bandwidth bound
                    max_poll_rate_hz: 40,
                    keepalive_required: true,
                    keepalive_interval_ms: 4000,
                    ..branded
                },
            ),
        );
        registry.register(
            "obdlink lx",
            template("OBDLink LX", AdapterFamily::ProprietaryBranded, branded),
        );
        registry.register(
            "vlinker",
            template(
                "Vgate vLinker",
                AdapterFamily::HighPerformance,
                DeviceCapabilities {
                    supports_single_wire_can: false,
                    max_poll_rate_hz: 25,
                    ..DeviceCapabilities::for_family(AdapterFamily::HighPerformance)
                },
            ),
        );
        registry.register(
            "wican",
            template(
                "WiCAN",
                AdapterFamily::Gateway,
                DeviceCapabilities::for_family(AdapterFamily::Gateway),
            ),
        );
        registry
    }

    /// Add an entry, replacing one with the same key in place
    pub fn register(&mut self, key: &str, template: DeviceProfile) {
        let key = key.to_lowercase();
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(existing) => {
                debug!("Overriding registry entry {}", key);
                existing.template = template;
            }
            None => self.entries.push(KnownDeviceEntry { key, template }),
        }
    }

    /// First entry whose key occurs in any of the identity strings
    pub fn lookup(&self, identities: &[&str]) -> Option<&KnownDeviceEntry> {
        let identities: Vec<String> = identities
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_lowercase())
            .collect();
        self.entries
            .iter()
            .find(|entry| identities.iter().any(|id| id.contains(&entry.key)))
    }

    /// Apply a remote capability-database update
    ///
    /// The document is a JSON array of
    /// `{ "key", "device_name", "chip_family", "capabilities" }` objects.
    /// Nothing is applied unless the whole document is valid.
    pub fn apply_update(&mut self, json: &str) -> Result<usize, RegistryError> {
        let updates: Vec<EntryUpdate> = serde_json::from_str(json)?;
        if let Some(bad) = updates.iter().find(|u| u.key.trim().is_empty()) {
            return Err(RegistryError::EmptyKey(bad.device_name.clone()));
        }
        let count = updates.len();
        for update in updates {
            self.register(
                &update.key,
                template(&update.device_name, update.chip_family, update.capabilities),
            );
        }
        info!("Applied {} registry update(s), {} entries", count, self.len());
        Ok(count)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in lookup order
    pub fn entries(&self) -> &[KnownDeviceEntry] {
        &self.entries
    }
}

fn template(name: &str, family: AdapterFamily, capabilities: DeviceCapabilities) -> DeviceProfile {
    DeviceProfile::new(name, family, "", "", capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_substring_lookup() {
        let registry = KnownDeviceRegistry::with_builtin();
        let hit = registry
            .lookup(&["ELM327 v1.4b", "OBDLink MX+ r2.3"])
            .unwrap();
        assert_eq!(hit.template.device_name, "OBDLink MX+");
        assert_eq!(hit.template.chip_family, AdapterFamily::ProprietaryBranded);

        assert!(registry.lookup(&["ELM327 v1.5", ""]).is_none());
        assert!(registry.lookup(&[]).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let mut registry = KnownDeviceRegistry::new();
        let caps = DeviceCapabilities::default();
        registry.register(
            "obdlink",
            template("Generic OBDLink", AdapterFamily::HighPerformance, caps),
        );
        registry.register(
            "obdlink mx",
            template("MX", AdapterFamily::ProprietaryBranded, caps),
        );
        let hit = registry.lookup(&["OBDLink MX"]).unwrap();
        assert_eq!(hit.template.device_name, "Generic OBDLink");
    }

    #[test]
    fn test_register_overrides_in_place() {
        let mut registry = KnownDeviceRegistry::with_builtin();
        let before = registry.len();
        registry.register(
            "WiCAN",
            template("WiCAN Pro", AdapterFamily::Gateway, DeviceCapabilities::default()),
        );
        assert_eq!(registry.len(), before);
        assert_eq!(
            registry.lookup(&["wican-usb"]).unwrap().template.device_name,
            "WiCAN Pro"
        );
    }

    #[test]
    fn test_apply_update() {
        let mut registry = KnownDeviceRegistry::with_builtin();
        let before = registry.len();
        let applied = registry
            .apply_update(
                r#"[
                    {"key": "wican", "device_name": "WiCAN v4", "chip_family": "Gateway",
                     "capabilities": {"supports_binary_stream": true, "max_poll_rate_hz": 30}},
                    {"key": "Kiwi 3", "device_name": "PLX Kiwi 3", "chip_family": "Clone"}
                ]"#,
            )
            .unwrap();
        assert_eq!(applied, 2);
        assert_eq!(registry.len(), before + 1);

        let wican = registry.lookup(&["WICAN"]).unwrap();
        assert_eq!(wican.template.device_name, "WiCAN v4");
        assert_eq!(wican.template.capabilities.max_poll_rate_hz, 30);

        let kiwi = registry.lookup(&["PLX KIWI 3 v1.0"]).unwrap();
        assert_eq!(kiwi.template.capabilities, DeviceCapabilities::default());
    }

    #[test]
    fn test_bad_update_leaves_registry_untouched() {
        let mut registry = KnownDeviceRegistry::with_builtin();
        let before = registry.entries().to_vec();

        assert!(matches!(
            registry.apply_update("{not json"),
            Err(RegistryError::InvalidUpdate(_))
        ));
        assert!(matches!(
            registry.apply_update(
                r#"[{"key": "ok", "device_name": "A", "chip_family": "Clone"},
                    {"key": " ", "device_name": "B", "chip_family": "Clone"}]"#
            ),
            Err(RegistryError::EmptyKey(_))
        ));
        assert_eq!(registry.entries(), before.as_slice());
    }
}
