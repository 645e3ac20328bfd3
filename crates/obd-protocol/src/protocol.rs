//! OBD-II Protocol Definitions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vehicle bus protocols an ELM327-family adapter can negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObdProtocol {
    /// Automatic protocol detection
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Iso15765_4Can29bit250,
    /// SAE J1939 CAN (29 bit ID, 250 kbaud), heavy-duty vehicles
    SaeJ1939,
}

impl ObdProtocol {
    /// Get the ELM327 AT command that selects this protocol
    pub fn to_elm_command(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "ATSP0",
            ObdProtocol::J1850Pwm => "ATSP1",
            ObdProtocol::J1850Vpw => "ATSP2",
            ObdProtocol::Iso9141_2 => "ATSP3",
            ObdProtocol::Iso14230_4Kwp => "ATSP4",
            ObdProtocol::Iso14230_4KwpFast => "ATSP5",
            ObdProtocol::Iso15765_4Can11bit500 => "ATSP6",
            ObdProtocol::Iso15765_4Can29bit500 => "ATSP7",
            ObdProtocol::Iso15765_4Can11bit250 => "ATSP8",
            ObdProtocol::Iso15765_4Can29bit250 => "ATSP9",
            ObdProtocol::SaeJ1939 => "ATSPA",
        }
    }

    /// Human readable name as printed by `ATDP`
    pub fn name(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "AUTO",
            ObdProtocol::J1850Pwm => "SAE J1850 PWM",
            ObdProtocol::J1850Vpw => "SAE J1850 VPW",
            ObdProtocol::Iso9141_2 => "ISO 9141-2",
            ObdProtocol::Iso14230_4Kwp => "ISO 14230-4 (KWP 5BAUD)",
            ObdProtocol::Iso14230_4KwpFast => "ISO 14230-4 (KWP FAST)",
            ObdProtocol::Iso15765_4Can11bit500 => "ISO 15765-4 (CAN 11/500)",
            ObdProtocol::Iso15765_4Can29bit500 => "ISO 15765-4 (CAN 29/500)",
            ObdProtocol::Iso15765_4Can11bit250 => "ISO 15765-4 (CAN 11/250)",
            ObdProtocol::Iso15765_4Can29bit250 => "ISO 15765-4 (CAN 29/250)",
            ObdProtocol::SaeJ1939 => "SAE J1939 (CAN 29/250)",
        }
    }

    /// Parse the answer to `ATDPN` ("6", "A6", "A")
    ///
    /// A leading `A` means the protocol was found by automatic search; the
    /// digit after it is the protocol actually in use. A bare `A` is J1939.
    pub fn from_protocol_number(answer: &str) -> Option<Self> {
        let answer = answer.trim().to_ascii_uppercase();
        let digit = match answer.as_str() {
            "A" => 'A',
            s if s.len() == 2 && s.starts_with('A') => s.chars().nth(1)?,
            s if s.len() == 1 => s.chars().next()?,
            _ => return None,
        };
        let protocol = match digit {
            '0' => ObdProtocol::Auto,
            '1' => ObdProtocol::J1850Pwm,
            '2' => ObdProtocol::J1850Vpw,
            '3' => ObdProtocol::Iso9141_2,
            '4' => ObdProtocol::Iso14230_4Kwp,
            '5' => ObdProtocol::Iso14230_4KwpFast,
            '6' => ObdProtocol::Iso15765_4Can11bit500,
            '7' => ObdProtocol::Iso15765_4Can29bit500,
            '8' => ObdProtocol::Iso15765_4Can11bit250,
            '9' => ObdProtocol::Iso15765_4Can29bit250,
            'A' => ObdProtocol::SaeJ1939,
            _ => return None,
        };
        Some(protocol)
    }

    /// Check if this is a CAN protocol
    pub fn is_can(&self) -> bool {
        matches!(
            self,
            ObdProtocol::Iso15765_4Can11bit500
                | ObdProtocol::Iso15765_4Can29bit500
                | ObdProtocol::Iso15765_4Can11bit250
                | ObdProtocol::Iso15765_4Can29bit250
                | ObdProtocol::SaeJ1939
        )
    }

    /// Whether the bus needs a slow wake-up sequence before the first reply
    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            ObdProtocol::J1850Pwm
                | ObdProtocol::J1850Vpw
                | ObdProtocol::Iso9141_2
                | ObdProtocol::Iso14230_4Kwp
                | ObdProtocol::Iso14230_4KwpFast
        )
    }
}

impl Default for ObdProtocol {
    fn default() -> Self {
        ObdProtocol::Auto
    }
}

impl std::fmt::Display for ObdProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A bus protocol the negotiation may try, with its first-attempt timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolCandidate {
    /// Protocol selected by this candidate
    pub protocol: ObdProtocol,
    /// Timeout for the validation query on the first attempt
    pub base_timeout: Duration,
}

impl ProtocolCandidate {
    /// Create a candidate with the given first-attempt timeout
    pub fn new(protocol: ObdProtocol, base_timeout: Duration) -> Self {
        Self {
            protocol,
            base_timeout,
        }
    }

    /// Display name of the candidate
    pub fn name(&self) -> &'static str {
        self.protocol.name()
    }

    /// AT command that selects the candidate on the adapter
    pub fn command(&self) -> &'static str {
        self.protocol.to_elm_command()
    }

    /// Standard fallback order: fast CAN variants first, then slower CAN,
    /// then the legacy K-line and J1850 buses.
    pub fn standard_sequence() -> Vec<ProtocolCandidate> {
        let ms = Duration::from_millis;
        vec![
            Self::new(ObdProtocol::Iso15765_4Can11bit500, ms(1000)),
            Self::new(ObdProtocol::Iso15765_4Can29bit500, ms(1000)),
            Self::new(ObdProtocol::Iso15765_4Can11bit250, ms(1500)),
            Self::new(ObdProtocol::Iso15765_4Can29bit250, ms(1500)),
            Self::new(ObdProtocol::Iso14230_4KwpFast, ms(3000)),
            Self::new(ObdProtocol::Iso14230_4Kwp, ms(4000)),
            Self::new(ObdProtocol::Iso9141_2, ms(5000)),
            Self::new(ObdProtocol::J1850Vpw, ms(2000)),
            Self::new(ObdProtocol::J1850Pwm, ms(2000)),
        ]
    }
}
