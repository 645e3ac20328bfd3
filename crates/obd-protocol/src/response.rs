//! Adapter Response Classification
//!
//! The adapter answers in plain ASCII: hex frames for bus traffic, fixed
//! tokens for errors. Nothing here interprets PID payloads.

/// Coarse classification of one adapter response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Nothing came back before the deadline
    Empty,
    /// Hex frame data
    Data,
    /// Hex frame data carrying a negative response (`7F xx yy`)
    NegativeResponse,
    /// `OK` acknowledgement of an AT command
    Ok,
    /// Free text, e.g. an identity string
    Text,
    /// `NO DATA`: the bus is up but no ECU answered
    NoData,
    /// `?`: command not understood
    Unknown,
    /// Any `...ERROR` token
    Error,
    /// `BUFFER FULL`: adapter overran its receive buffer
    BufferFull,
    /// `UNABLE TO CONNECT`: no bus protocol could be established
    UnableToConnect,
    /// `STOPPED`: the request was interrupted
    Stopped,
}

impl ResponseKind {
    /// Whether this response points at a damaged or rejected exchange
    /// rather than a silent link
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            ResponseKind::Unknown | ResponseKind::Error | ResponseKind::BufferFull
        )
    }
}

/// Remove the `SEARCHING...` preamble printed during automatic protocol search
pub fn strip_searching(response: &str) -> String {
    response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.to_ascii_uppercase().starts_with("SEARCHING"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_hex_line(line: &str) -> bool {
    // Multi-frame CAN responses prefix each segment with "0:", "1:" ...
    let body = match line.split_once(':') {
        Some((index, rest)) if index.trim().chars().all(|c| c.is_ascii_hexdigit()) => rest,
        _ => line,
    };
    let mut digits = 0;
    for c in body.chars() {
        if c.is_ascii_hexdigit() {
            digits += 1;
        } else if c != ' ' {
            return false;
        }
    }
    digits > 0
}

fn compact(line: &str) -> String {
    line.chars()
        .filter(char::is_ascii_hexdigit)
        .collect::<String>()
        .to_ascii_uppercase()
}

fn normalize_command(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Drop an echoed copy of `command` from the start of `response`
///
/// Returns the remaining text and whether an echo was found.
pub fn strip_echo(command: &str, response: &str) -> (String, bool) {
    let mut lines = response.lines();
    match lines.next() {
        Some(first)
            if !first.trim().is_empty()
                && normalize_command(first) == normalize_command(command) =>
        {
            (lines.collect::<Vec<_>>().join("\n"), true)
        }
        _ => (response.to_string(), false),
    }
}

/// Classify a complete response (prompt already removed)
pub fn classify(response: &str) -> ResponseKind {
    let text = strip_searching(response).to_ascii_uppercase();
    if text.is_empty() {
        return ResponseKind::Empty;
    }
    if text == "?" {
        return ResponseKind::Unknown;
    }
    if text.contains("BUFFER FULL") {
        return ResponseKind::BufferFull;
    }
    if text.contains("UNABLE TO CONNECT") {
        return ResponseKind::UnableToConnect;
    }
    if text.contains("NO DATA") {
        return ResponseKind::NoData;
    }
    if text.contains("STOPPED") {
        return ResponseKind::Stopped;
    }
    if text.contains("ERROR") {
        return ResponseKind::Error;
    }
    if text == "OK" {
        return ResponseKind::Ok;
    }
    if text.lines().all(is_hex_line) {
        let first = text.lines().next().map(compact).unwrap_or_default();
        if first.starts_with("7F") && first.len() >= 6 {
            return ResponseKind::NegativeResponse;
        }
        return ResponseKind::Data;
    }
    ResponseKind::Text
}

/// Whether a response to `0100` proves the vehicle bus is answering
pub fn is_bus_ok(response: &str) -> bool {
    let text = strip_searching(response);
    text.lines()
        .filter(|line| is_hex_line(line))
        .any(|line| compact(line).contains("4100"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_echo() {
        assert_eq!(strip_echo("010C", "010C\n41 0C 1A F8"), ("41 0C 1A F8".into(), true));
        assert_eq!(strip_echo("at i", "ATI\nELM327 v2.1"), ("ELM327 v2.1".into(), true));
        assert_eq!(strip_echo("010C", "41 0C 1A F8"), ("41 0C 1A F8".into(), false));
        assert_eq!(strip_echo("ATE0", ""), (String::new(), false));
    }

    #[test]
    fn test_classify_tokens() {
        assert_eq!(classify(""), ResponseKind::Empty);
        assert_eq!(classify("  \n "), ResponseKind::Empty);
        assert_eq!(classify("?"), ResponseKind::Unknown);
        assert_eq!(classify("NO DATA"), ResponseKind::NoData);
        assert_eq!(classify("BUFFER FULL"), ResponseKind::BufferFull);
        assert_eq!(classify("UNABLE TO CONNECT"), ResponseKind::UnableToConnect);
        assert_eq!(classify("CAN ERROR"), ResponseKind::Error);
        assert_eq!(classify("BUS INIT: ...ERROR"), ResponseKind::Error);
        assert_eq!(classify("STOPPED"), ResponseKind::Stopped);
        assert_eq!(classify("OK"), ResponseKind::Ok);
    }

    #[test]
    fn test_classify_frames() {
        assert_eq!(classify("41 0C 1A F8"), ResponseKind::Data);
        assert_eq!(classify("410C1AF8"), ResponseKind::Data);
        assert_eq!(classify("SEARCHING...\n41 00 BE 3F A8 13"), ResponseKind::Data);
        assert_eq!(classify("7F 01 12"), ResponseKind::NegativeResponse);
        assert_eq!(classify("014\n0: 49 02 01 31 47 31\n1: 4A 43 35 34 34 34 52"), ResponseKind::Data);
    }

    #[test]
    fn test_classify_text() {
        assert_eq!(classify("ELM327 v1.5"), ResponseKind::Text);
        assert_eq!(classify("41 0C 1$ F8"), ResponseKind::Text);
    }

    #[test]
    fn test_corrupt_kinds() {
        assert!(ResponseKind::Unknown.is_corrupt());
        assert!(ResponseKind::BufferFull.is_corrupt());
        assert!(!ResponseKind::NoData.is_corrupt());
        assert!(!ResponseKind::Data.is_corrupt());
    }

    #[test]
    fn test_bus_ok() {
        assert!(is_bus_ok("41 00 BE 3F A8 13"));
        assert!(is_bus_ok("SEARCHING...\n4100BE3FA813"));
        assert!(!is_bus_ok("NO DATA"));
        assert!(!is_bus_ok("UNABLE TO CONNECT"));
        assert!(!is_bus_ok(""));
    }

    #[test]
    fn test_strip_searching() {
        assert_eq!(strip_searching("SEARCHING...\n41 00 00"), "41 00 00");
        assert_eq!(strip_searching("OK"), "OK");
    }
}
