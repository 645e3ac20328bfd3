//! Adapter Fingerprinting
//!
//! Works out what is on the other end of the link: which hardware family,
//! which firmware, whether it is a counterfeit, and which optional features
//! it actually honours.

mod classifier;
mod prober;

pub use classifier::{
    apply_clone_override, classify_family, is_clone_firmware, parse_firmware, IdentityStrings,
};
pub use prober::{FingerprintConfig, FingerprintReport, Fingerprinter, ProbeResults};
