//! Adapter Device Profiles
//!
//! The data model shared by the fingerprinter, the family drivers and the
//! session: what kind of adapter is on the other end of the link, what it
//! can do, and how much it can currently be trusted.

mod capabilities;
mod health;
mod profile;
mod registry;

pub use capabilities::DeviceCapabilities;
pub use health::{HealthEvent, HealthMonitor, RESET_THRESHOLD, SAFE_MODE_THRESHOLD};
pub use profile::{AdapterFamily, DeviceProfile, MAX_HEALTH};
pub use registry::{KnownDeviceEntry, KnownDeviceRegistry, RegistryError};
