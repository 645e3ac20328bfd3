//! In-process ELM327 Simulator
//!
//! Serves the adapter side of an in-memory pipe so the engine can be driven
//! end to end without hardware. Behaviour can be overridden per command to
//! imitate clones, gateways and failing links.

use obd_protocol::{decode_frame, encode_frame, is_frame_line};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tracing::{debug, trace};

/// Commands the simulator has received, in order
pub type CommandLog = Arc<Mutex<Vec<String>>>;

type Handler = Box<dyn FnMut(&str) -> Option<Reply> + Send>;

/// Answer to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Plain text such as `OK`, `NO DATA` or an identity string
    Text(String),
    /// Compact hex payload, spaced out when spaces are enabled
    Data(String),
    /// Say nothing at all, not even the prompt
    Silent,
}

impl Reply {
    /// Shorthand for [`Reply::Text`]
    pub fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }
}

/// Output settings toggled by AT commands
#[derive(Debug, Clone)]
struct Settings {
    echo: bool,
    linefeeds: bool,
    spaces: bool,
    headers: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            echo: true,
            linefeeds: true,
            spaces: true,
            headers: false,
        }
    }
}

impl Settings {
    fn line_ending(&self) -> &'static str {
        if self.linefeeds {
            "\r\n"
        } else {
            "\r"
        }
    }
}

/// Scriptable ELM327 emulator
pub struct SimulatedAdapter {
    identity: String,
    device_description: String,
    protocol_description: String,
    protocol_number: String,
    binary_only: bool,
    settings: Settings,
    handler: Option<Handler>,
    log: CommandLog,
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAdapter {
    /// A well-behaved ELM327 v2.1 on an 11-bit 500k CAN vehicle
    pub fn new() -> Self {
        Self {
            identity: "ELM327 v2.1".to_string(),
            device_description: "OBDII to RS232 Interpreter".to_string(),
            protocol_description: "AUTO, ISO 15765-4 (CAN 11/500)".to_string(),
            protocol_number: "A6".to_string(),
            binary_only: false,
            settings: Settings::default(),
            handler: None,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer to `ATI` (and the reset banner)
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Answer to `AT@1`
    pub fn with_device_description(mut self, description: impl Into<String>) -> Self {
        self.device_description = description.into();
        self
    }

    /// Answer to `ATDP`
    pub fn with_protocol_description(mut self, description: impl Into<String>) -> Self {
        self.protocol_description = description.into();
        self
    }

    /// Only answer `~`-framed requests, ignoring plain text
    pub fn binary_only(mut self) -> Self {
        self.binary_only = true;
        self
    }

    /// Consulted before the built-in behaviour; `None` falls through
    pub fn on_command<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&str) -> Option<Reply> + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Shared handle on the received command list
    pub fn command_log(&self) -> CommandLog {
        Arc::clone(&self.log)
    }

    /// Serve on one end of a fresh in-memory pipe and return the other end
    pub fn spawn(self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(self.serve(server));
        client
    }

    /// Serve the adapter side of `stream` until it closes
    pub async fn serve<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut line = Vec::new();
        let mut buf = [0u8; 256];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for &byte in &buf[..n] {
                match byte {
                    b'\r' => {
                        let raw = String::from_utf8_lossy(&line).to_string();
                        line.clear();
                        if let Some(output) = self.process_line(&raw) {
                            if writer.write_all(output.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                    b'\n' => {}
                    _ => line.push(byte),
                }
            }
        }
        debug!("Simulated adapter stopped");
    }

    /// Full byte output for one received line, `None` to stay silent
    fn process_line(&mut self, raw: &str) -> Option<String> {
        if raw.trim().is_empty() {
            return None;
        }

        if is_frame_line(raw) {
            let command = decode_frame(raw).ok()?;
            let command = normalize(&command);
            self.record(&command);
            let body = match self.reply_for(&command) {
                Reply::Silent => return None,
                Reply::Text(text) | Reply::Data(text) => text,
            };
            let frame = encode_frame(&body).ok()?;
            return Some(format!("{frame}\r>"));
        }

        let command = normalize(raw);
        self.record(&command);
        if self.binary_only {
            trace!("Binary-only simulator ignoring {}", command);
            return None;
        }

        let echo = if self.settings.echo {
            format!("{}\r", raw.trim())
        } else {
            String::new()
        };
        let reply = self.reply_for(&command);
        let le = self.settings.line_ending();
        let body = match reply {
            Reply::Silent => return None,
            Reply::Text(text) => text,
            Reply::Data(hex) => self.format_data(&hex),
        };
        Some(format!("{echo}{body}{le}{le}>"))
    }

    fn record(&self, command: &str) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.push(command.to_string());
    }

    fn reply_for(&mut self, command: &str) -> Reply {
        if let Some(handler) = self.handler.as_mut() {
            if let Some(reply) = handler(command) {
                return reply;
            }
        }
        self.builtin_reply(command)
    }

    fn builtin_reply(&mut self, command: &str) -> Reply {
        match command {
            "ATZ" | "ATWS" => {
                self.settings = Settings::default();
                Reply::Text(self.identity.clone())
            }
            "ATE0" => self.set(|s| s.echo = false),
            "ATE1" => self.set(|s| s.echo = true),
            "ATL0" => self.set(|s| s.linefeeds = false),
            "ATL1" => self.set(|s| s.linefeeds = true),
            "ATS0" => self.set(|s| s.spaces = false),
            "ATS1" => self.set(|s| s.spaces = true),
            "ATH0" => self.set(|s| s.headers = false),
            "ATH1" => self.set(|s| s.headers = true),
            "ATI" => Reply::Text(self.identity.clone()),
            "AT@1" => Reply::Text(self.device_description.clone()),
            "ATDP" => Reply::Text(self.protocol_description.clone()),
            "ATDPN" => Reply::Text(self.protocol_number.clone()),
            "ATRV" => Reply::text("12.6V"),
            "ATAL" | "ATNL" | "ATPC" | "ATD" => Reply::text("OK"),
            c if c.starts_with("ATSP")
                || c.starts_with("ATSH")
                || c.starts_with("ATAT")
                || c.starts_with("ATCAF")
                || c.starts_with("ATST") =>
            {
                Reply::text("OK")
            }
            c if c.starts_with("AT") => Reply::text("?"),
            "0100" => Reply::Data("4100BE3FA813".to_string()),
            "010C" => Reply::Data("410C1AF8".to_string()),
            "010D" => Reply::Data("410D28".to_string()),
            c if c.starts_with("01") && c.len() >= 4 => Reply::text("NO DATA"),
            _ => Reply::text("?"),
        }
    }

    fn set(&mut self, change: impl FnOnce(&mut Settings)) -> Reply {
        change(&mut self.settings);
        Reply::text("OK")
    }

    /// Space out compact hex when spaces are enabled
    fn format_data(&self, hex: &str) -> String {
        if !self.settings.spaces {
            return hex.to_string();
        }
        hex.as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_and_linefeeds() {
        let mut sim = SimulatedAdapter::new();
        assert_eq!(sim.process_line("ATI").unwrap(), "ATI\rELM327 v2.1\r\n\r\n>");

        sim.process_line("ATE0");
        sim.process_line("ATL0");
        assert_eq!(sim.process_line("ATI").unwrap(), "ELM327 v2.1\r\r>");
    }

    #[test]
    fn test_data_spacing() {
        let mut sim = SimulatedAdapter::new();
        sim.process_line("ATE0");
        sim.process_line("ATL0");
        assert_eq!(sim.process_line("010C").unwrap(), "41 0C 1A F8\r\r>");
        sim.process_line("ATS0");
        assert_eq!(sim.process_line("010C").unwrap(), "410C1AF8\r\r>");
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut sim = SimulatedAdapter::new();
        sim.process_line("ATE0");
        sim.process_line("ATZ");
        assert!(sim.process_line("ATI").unwrap().starts_with("ATI\r"));
    }

    #[test]
    fn test_handler_overrides() {
        let mut sim = SimulatedAdapter::new().on_command(|cmd| match cmd {
            "010C" => Some(Reply::Silent),
            "ATAL" => Some(Reply::text("?")),
            _ => None,
        });
        sim.process_line("ATE0");
        assert_eq!(sim.process_line("010C"), None);
        assert_eq!(sim.process_line("ATAL").unwrap(), "?\r\n\r\n>");
        assert_eq!(sim.process_line("ATNL").unwrap(), "OK\r\n\r\n>");
    }

    #[test]
    fn test_binary_only_ignores_text() {
        let mut sim = SimulatedAdapter::new().binary_only();
        assert_eq!(sim.process_line("ATI"), None);

        let request = encode_frame("ATI").unwrap();
        let output = sim.process_line(&request).unwrap();
        let frame = output.trim_end_matches('>').trim();
        assert_eq!(decode_frame(frame).unwrap(), "ELM327 v2.1");
    }

    #[test]
    fn test_command_log() {
        let mut sim = SimulatedAdapter::new();
        let log = sim.command_log();
        sim.process_line("at i");
        sim.process_line("0100");
        assert_eq!(*log.lock().unwrap(), vec!["ATI", "0100"]);
    }

    #[tokio::test]
    async fn test_spawned_simulator_over_pipe() {
        use crate::AdapterTransport;
        use std::time::Duration;

        let transport = AdapterTransport::spawn(SimulatedAdapter::new().spawn(), "sim");
        let response = transport
            .transact("ATE0", Duration::from_secs(1))
            .await
            .unwrap();
        // Echo was still on when ATE0 arrived
        assert_eq!(response, "ATE0\nOK");
        let response = transport
            .transact("0100", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response, "41 00 BE 3F A8 13");
    }
}
