//! Binary Gateway Framing
//!
//! Some DIY gateways drop the ELM327 text emulation and only accept framed
//! requests. A frame is `0x7E`, a one byte payload length, the payload and
//! an XOR checksum over length and payload. On the line-oriented link each
//! frame travels as a single line: `~` followed by the frame in uppercase hex.

use thiserror::Error;

/// Start-of-frame marker byte
pub const FRAME_START: u8 = 0x7E;

/// Line prefix that distinguishes a hex-encoded frame from plain text
pub const FRAME_LINE_PREFIX: char = '~';

/// Largest payload a single frame can carry
pub const MAX_FRAME_PAYLOAD: usize = u8::MAX as usize;

/// Errors while encoding or decoding a gateway frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Line does not start with the frame prefix
    #[error("Line is not a frame")]
    NotAFrame,

    /// Hex body could not be decoded
    #[error("Invalid hex in frame: {0}")]
    InvalidHex(String),

    /// First byte is not the start marker
    #[error("Bad start byte {0:02X}")]
    BadStart(u8),

    /// Declared length does not match the bytes received
    #[error("Length mismatch: declared {declared}, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:02X}, got {actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// Payload does not fit in one frame
    #[error("Payload of {0} bytes exceeds frame capacity")]
    TooLong(usize),
}

fn checksum(len: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(len, |acc, b| acc ^ b)
}

/// Encode a text payload as a frame line (without line terminator)
pub fn encode_frame(payload: &str) -> Result<String, FrameError> {
    let bytes = payload.as_bytes();
    if bytes.len() > MAX_FRAME_PAYLOAD {
        return Err(FrameError::TooLong(bytes.len()));
    }
    let len = bytes.len() as u8;
    let mut frame = Vec::with_capacity(bytes.len() + 3);
    frame.push(FRAME_START);
    frame.push(len);
    frame.extend_from_slice(bytes);
    frame.push(checksum(len, bytes));
    Ok(format!("{FRAME_LINE_PREFIX}{}", hex::encode_upper(frame)))
}

/// Whether a response line looks like a frame
pub fn is_frame_line(line: &str) -> bool {
    line.trim_start().starts_with(FRAME_LINE_PREFIX)
}

/// Decode a frame line back into its text payload
pub fn decode_frame(line: &str) -> Result<String, FrameError> {
    let body = line
        .trim()
        .strip_prefix(FRAME_LINE_PREFIX)
        .ok_or(FrameError::NotAFrame)?;
    let bytes = hex::decode(body).map_err(|e| FrameError::InvalidHex(e.to_string()))?;
    let (&start, rest) = bytes.split_first().ok_or(FrameError::LengthMismatch {
        declared: 0,
        actual: 0,
    })?;
    if start != FRAME_START {
        return Err(FrameError::BadStart(start));
    }
    let (&len, rest) = rest.split_first().ok_or(FrameError::LengthMismatch {
        declared: 0,
        actual: 0,
    })?;
    let declared = len as usize;
    if rest.len() != declared + 1 {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: rest.len().saturating_sub(1),
        });
    }
    let (payload, tail) = rest.split_at(declared);
    let expected = checksum(len, payload);
    if tail[0] != expected {
        return Err(FrameError::ChecksumMismatch {
            expected,
            actual: tail[0],
        });
    }
    Ok(String::from_utf8_lossy(payload).into_owned())
}
