//! OBD-II Adapter Protocol Definitions
//!
//! Shared vocabulary for talking to ELM327-family adapters: the AT command
//! set, the vehicle bus protocols an adapter can negotiate, and the
//! classification of the adapter's textual responses.

mod error;
mod frame;
mod protocol;
mod response;
mod timing;

pub use error::ObdError;
pub use frame::{
    decode_frame, encode_frame, is_frame_line, FrameError, FRAME_LINE_PREFIX, FRAME_START,
};
pub use protocol::{ObdProtocol, ProtocolCandidate};
pub use response::{classify, is_bus_ok, strip_echo, strip_searching, ResponseKind};
pub use timing::scale_timeout;

/// AT command constants used by the session engine
pub mod at {
    /// Full reset (reboots the interpreter)
    pub const RESET: &str = "ATZ";
    /// Warm start, skips the LED test
    pub const SOFT_RESET: &str = "ATWS";
    /// Echo off
    pub const ECHO_OFF: &str = "ATE0";
    /// Linefeeds off
    pub const LINEFEEDS_OFF: &str = "ATL0";
    /// Spaces off
    pub const SPACES_OFF: &str = "ATS0";
    /// Headers off
    pub const HEADERS_OFF: &str = "ATH0";
    /// General identity
    pub const IDENTIFY: &str = "ATI";
    /// Device description (extended identity)
    pub const DEVICE_DESCRIPTION: &str = "AT@1";
    /// Describe the current protocol
    pub const DESCRIBE_PROTOCOL: &str = "ATDP";
    /// Describe the current protocol by number
    pub const DESCRIBE_PROTOCOL_NUMBER: &str = "ATDPN";
    /// Automatic protocol search
    pub const AUTO_PROTOCOL: &str = "ATSP0";
    /// Close the current bus protocol
    pub const PROTOCOL_CLOSE: &str = "ATPC";
    /// Allow long (>7 byte) messages
    pub const LONG_FRAMES_ON: &str = "ATAL";
    /// Normal length messages only
    pub const LONG_FRAMES_OFF: &str = "ATNL";
    /// Adaptive timing, normal
    pub const ADAPTIVE_TIMING_NORMAL: &str = "ATAT1";
    /// Adaptive timing, aggressive
    pub const ADAPTIVE_TIMING_AGGRESSIVE: &str = "ATAT2";
    /// CAN auto formatting off
    pub const CAN_FORMAT_OFF: &str = "ATCAF0";
    /// CAN auto formatting on
    pub const CAN_FORMAT_ON: &str = "ATCAF1";
    /// Probe header used for the custom header capability check
    pub const HEADER_PROBE: &str = "ATSH7E0";
    /// Functional broadcast header (power-on default for 11-bit CAN)
    pub const HEADER_DEFAULT: &str = "ATSH7DF";
    /// Read battery voltage, used as keepalive ping
    pub const READ_VOLTAGE: &str = "ATRV";
    /// Select SAE J1939, used to probe heavy-duty support
    pub const HEAVY_DUTY_PROBE: &str = "ATSPA";
}

/// OBD-II requests used by the engine itself
pub mod request {
    /// Mode 01 PID 00: supported PIDs 01-20, answered by every compliant ECU
    pub const SUPPORTED_PIDS: &str = "0100";
}

/// Character the adapter prints when it is ready for the next command
pub const PROMPT: u8 = b'>';
