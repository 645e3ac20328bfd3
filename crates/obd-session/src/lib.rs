//! Adapter Session Engine
//!
//! Ties the transport, fingerprinting, family drivers, health monitor and
//! protocol fallback together behind one state machine:
//!
//! ```text
//! Disconnected -> TransportConnected -> DeviceIdentified -> ProtocolDetected
//!     -> SessionActive <-> Streaming
//!     -> ErrorRecovery -> SessionActive | Reconnecting
//! ```
//!
//! Only `SessionActive` and `Streaming` route commands. Failures never
//! surface as errors: a failed command is an empty string, and the state
//! and health score tell the rest.

mod connection;
mod keepalive;
mod session;
mod settings;
mod state;

pub use session::AdapterSession;
pub use settings::{ConfigError, SessionConfig};
pub use state::{SessionEvent, SessionState};
