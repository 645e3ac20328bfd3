//! Identity Classification
//!
//! Pure functions from identity strings to an [`AdapterFamily`]. The clone
//! override is kept separate from the base classification so each can be
//! checked on its own.

use device_profile::AdapterFamily;
use serde::Serialize;

/// Branded STN products
const BRANDED_KEYWORDS: &[&str] = &["OBDLINK"];

/// STN11xx / STN21xx chip lines
const CHIP_FAMILY_KEYWORDS: &[&str] = &["STN1", "STN2"];

/// The chip every clone pretends to be
const BASE_CHIP_KEYWORDS: &[&str] = &["ELM327"];

/// Custom bridges
const GATEWAY_KEYWORDS: &[&str] = &["WICAN", "GATEWAY"];

/// ELM Electronics never shipped this version; only clones report it
const UNRELEASED_VERSION: &str = "1.5";

/// The version most clones claim to be
const COUNTERFEITED_VERSION: &str = "2.1";

/// Phrases a genuine chip prints for `AT@1`
const GENUINE_PHRASES: &[&str] = &[
    "ELM ELECTRONICS",
    "OBDII TO RS232 INTERPRETER",
    "ELM327 GENUINE",
];

/// Brand strings OEM clone vendors burn into the `AT@1` field
const OEM_BRANDS: &[&str] = &["VGATE", "KONNWEI", "VEEPEAK", "BAFX", "KIWI", "PANLONG", "ICAR"];

/// The three identity strings read during fingerprinting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityStrings {
    /// Answer to `ATI`
    pub general: String,
    /// Answer to `AT@1`
    pub extended: String,
    /// Answer to `ATDP`
    pub protocol: String,
}

impl IdentityStrings {
    /// All three strings joined, upper-cased
    pub fn combined(&self) -> String {
        format!("{} {} {}", self.general, self.extended, self.protocol).to_ascii_uppercase()
    }

    /// Whether the adapter answered none of the identity requests
    pub fn is_blank(&self) -> bool {
        self.general.trim().is_empty()
            && self.extended.trim().is_empty()
            && self.protocol.trim().is_empty()
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Base family from keyword matching, before any clone override
pub fn classify_family(identity: &IdentityStrings) -> AdapterFamily {
    let text = identity.combined();
    if contains_any(&text, BRANDED_KEYWORDS) {
        AdapterFamily::ProprietaryBranded
    } else if contains_any(&text, CHIP_FAMILY_KEYWORDS) {
        AdapterFamily::HighPerformance
    } else if contains_any(&text, BASE_CHIP_KEYWORDS) {
        AdapterFamily::Genuine
    } else if contains_any(&text, GATEWAY_KEYWORDS) {
        AdapterFamily::Gateway
    } else {
        AdapterFamily::Unknown
    }
}

/// Firmware version from a general identity such as `ELM327 v1.5`
///
/// Returns an empty string when no version can be found.
pub fn parse_firmware(general: &str) -> String {
    for word in general.split_whitespace() {
        let Some(rest) = word.strip_prefix(['v', 'V']) else {
            continue;
        };
        if !rest.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        return rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '.')
            .collect();
    }
    String::new()
}

/// Whether firmware and extended identity give away a counterfeit chip
pub fn is_clone_firmware(firmware: &str, extended: &str) -> bool {
    let firmware = firmware.trim();
    if firmware == UNRELEASED_VERSION {
        return true;
    }
    if firmware != COUNTERFEITED_VERSION {
        return false;
    }
    let extended = extended.to_ascii_uppercase();
    // Genuine chips never carry OEM branding, even next to a genuine phrase
    if contains_any(&extended, OEM_BRANDS) {
        return true;
    }
    !contains_any(&extended, GENUINE_PHRASES)
}

/// Downgrade a Genuine classification to Clone when the firmware says so
pub fn apply_clone_override(base: AdapterFamily, firmware: &str, extended: &str) -> AdapterFamily {
    if base == AdapterFamily::Genuine && is_clone_firmware(firmware, extended) {
        AdapterFamily::Clone
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(general: &str, extended: &str) -> IdentityStrings {
        IdentityStrings {
            general: general.to_string(),
            extended: extended.to_string(),
            protocol: "AUTO".to_string(),
        }
    }

    #[test]
    fn test_family_keywords() {
        assert_eq!(
            classify_family(&identity("ELM327 v1.4b", "OBDLink MX+")),
            AdapterFamily::ProprietaryBranded
        );
        assert_eq!(
            classify_family(&identity("STN2120 v5.6.19", "")),
            AdapterFamily::HighPerformance
        );
        assert_eq!(
            classify_family(&identity("elm327 v2.2", "")),
            AdapterFamily::Genuine
        );
        assert_eq!(
            classify_family(&identity("WiCAN 3.10", "")),
            AdapterFamily::Gateway
        );
        assert_eq!(
            classify_family(&identity("FOO-BAR 9000", "?")),
            AdapterFamily::Unknown
        );
    }

    #[test]
    fn test_parse_firmware() {
        assert_eq!(parse_firmware("ELM327 v1.5"), "1.5");
        assert_eq!(parse_firmware("STN2120 v5.6.19"), "5.6.19");
        assert_eq!(parse_firmware("ELM327 V2.1"), "2.1");
        assert_eq!(parse_firmware("ELM327 v1.4b"), "1.4b");
        assert_eq!(parse_firmware("vgate"), "");
        assert_eq!(parse_firmware(""), "");
    }

    #[test]
    fn test_unreleased_version_is_always_clone() {
        assert!(is_clone_firmware("1.5", ""));
        assert!(is_clone_firmware("1.5", "OBDII to RS232 Interpreter"));
        assert_eq!(
            apply_clone_override(AdapterFamily::Genuine, "1.5", "ELM Electronics"),
            AdapterFamily::Clone
        );
    }

    #[test]
    fn test_counterfeited_version() {
        // Nothing vouches for it
        assert!(is_clone_firmware("2.1", ""));
        // OEM branding in the description field
        assert!(is_clone_firmware("2.1", "Vgate iCar2 WiFi"));
        assert!(is_clone_firmware("2.1", "OBDII to RS232 Interpreter - KONNWEI"));
        // Genuine phrase, no branding
        assert!(!is_clone_firmware("2.1", "OBDII to RS232 Interpreter"));
        assert!(!is_clone_firmware("2.1", "ELM Electronics"));
    }

    #[test]
    fn test_other_versions_are_trusted() {
        assert!(!is_clone_firmware("2.2", ""));
        assert!(!is_clone_firmware("1.4b", ""));
        assert!(!is_clone_firmware("", ""));
    }

    #[test]
    fn test_override_only_touches_genuine() {
        assert_eq!(
            apply_clone_override(AdapterFamily::HighPerformance, "1.5", ""),
            AdapterFamily::HighPerformance
        );
        assert_eq!(
            apply_clone_override(AdapterFamily::Unknown, "2.1", ""),
            AdapterFamily::Unknown
        );
        assert_eq!(
            apply_clone_override(AdapterFamily::Genuine, "2.1", "OBDII to RS232 Interpreter"),
            AdapterFamily::Genuine
        );
    }

    #[test]
    fn test_blank_identity() {
        assert!(IdentityStrings::default().is_blank());
        assert!(!identity("x", "").is_blank());
    }
}
