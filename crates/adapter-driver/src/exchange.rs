//! Attempt evaluation shared by all drivers

use obd_protocol::{classify, strip_echo, ResponseKind};
use obd_transport::AdapterTransport;
use std::time::Duration;
use tracing::{debug, trace};

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The adapter produced a usable answer, `NO DATA` included
    Answered,
    /// Nothing came back before the deadline
    Timeout,
    /// Something came back but it was garbage or a rejection
    Corrupt,
}

/// Send one line and collect the response, mapping link errors to silence
pub(crate) async fn transact(link: &AdapterTransport, command: &str, timeout: Duration) -> String {
    match link.transact(command, timeout).await {
        Ok(response) => response,
        Err(e) => {
            trace!("{} on {}: {}", command, link.label(), e);
            String::new()
        }
    }
}

/// Send a configuration command and report how the adapter took it
pub(crate) async fn setup(link: &AdapterTransport, command: &str, timeout: Duration) -> ResponseKind {
    let response = transact(link, command, timeout).await;
    let kind = classify(&strip_echo(command, &response).0);
    debug!("{} -> {:?}", command, kind);
    kind
}

fn is_obd_request(command: &str) -> bool {
    let command: String = command.chars().filter(|c| !c.is_whitespace()).collect();
    command.len() >= 2 && command.chars().all(|c| c.is_ascii_hexdigit())
}

/// Judge one attempt's response to `command`
pub fn evaluate(command: &str, response: &str) -> Outcome {
    match classify(response) {
        ResponseKind::Empty => Outcome::Timeout,
        kind if kind.is_corrupt() => Outcome::Corrupt,
        // Free text in reply to a hex request is line noise
        ResponseKind::Text if is_obd_request(command) => Outcome::Corrupt,
        _ => Outcome::Answered,
    }
}
