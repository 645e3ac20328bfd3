//! Command-line front end
//!
//! Opens a TCP, serial or simulated adapter, brings an [`AdapterSession`]
//! up, prints the device profile and then runs commands from the command
//! line or from stdin. A session that drops to `Reconnecting` gets a fresh
//! link, up to `--max-reconnects` times.

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use obd_session::{AdapterSession, SessionConfig, SessionState};
use obd_transport::{ByteStream, LinkTarget, SimulatedAdapter};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "obd-link", version)]
#[command(about = "Connect to an OBD-II adapter and run commands")]
#[command(group(
    ArgGroup::new("target")
        .required(true)
        .args(["tcp", "serial", "simulate"])
))]
pub struct Cli {
    /// Wi-Fi adapter address, e.g. 192.168.0.10:35000
    #[arg(long)]
    pub tcp: Option<String>,

    /// Serial or RFCOMM device, e.g. /dev/rfcomm0
    #[arg(long)]
    pub serial: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 38400)]
    pub baud: u32,

    /// Use the built-in ELM327 simulator
    #[arg(long)]
    pub simulate: bool,

    /// Session settings file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Command to send; repeatable. Reads stdin when absent
    #[arg(short = 'c', long = "command")]
    pub commands: Vec<String>,

    /// Link re-opens allowed after the first attempt
    #[arg(long, default_value_t = 3)]
    pub max_reconnects: u32,

    /// Pause before re-opening the link (ms)
    #[arg(long, default_value_t = 2000)]
    pub reconnect_delay_ms: u64,

    /// Timeout for opening the link (ms)
    #[arg(long, default_value_t = 5000)]
    pub connect_timeout_ms: u64,
}

/// Where the session's byte stream comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Link(LinkTarget),
    Simulated,
}

impl Endpoint {
    pub fn label(&self) -> String {
        match self {
            Endpoint::Link(target) => target.label(),
            Endpoint::Simulated => "sim://elm327".to_string(),
        }
    }

    async fn open(&self, connect_timeout: Duration) -> Result<Box<dyn ByteStream>> {
        match self {
            Endpoint::Link(target) => Ok(target.open(connect_timeout).await?),
            Endpoint::Simulated => Ok(Box::new(SimulatedAdapter::new().spawn())),
        }
    }
}

impl Cli {
    pub fn endpoint(&self) -> Endpoint {
        if let Some(address) = &self.tcp {
            Endpoint::Link(LinkTarget::Tcp {
                address: address.clone(),
            })
        } else if let Some(path) = &self.serial {
            Endpoint::Link(LinkTarget::Serial {
                path: path.clone(),
                baud_rate: self.baud,
            })
        } else {
            Endpoint::Simulated
        }
    }
}

/// Initialize logging to stderr, honouring `RUST_LOG`
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("Logging already initialized: {e}");
    }
}

/// Open the link and bring the session up, re-opening on failure
pub async fn establish(
    session: &mut AdapterSession,
    endpoint: &Endpoint,
    cli: &Cli,
) -> Result<()> {
    let connect_timeout = Duration::from_millis(cli.connect_timeout_ms);
    let mut reconnects = 0;
    loop {
        match endpoint.open(connect_timeout).await {
            Ok(stream) => {
                let state = session.connect(stream, endpoint.label()).await;
                if state == SessionState::SessionActive {
                    return Ok(());
                }
                warn!("Session settled in {} on {}", state, endpoint.label());
            }
            Err(e) => warn!("Could not open {}: {:#}", endpoint.label(), e),
        }

        if reconnects >= cli.max_reconnects {
            session.disconnect().await;
            bail!(
                "adapter on {} unavailable after {} attempts",
                endpoint.label(),
                reconnects + 1
            );
        }
        reconnects += 1;
        info!(
            "Re-opening {} in {}ms ({}/{})",
            endpoint.label(),
            cli.reconnect_delay_ms,
            reconnects,
            cli.max_reconnects
        );
        tokio::time::sleep(Duration::from_millis(cli.reconnect_delay_ms)).await;
    }
}

/// Send one command, re-establishing the session if the link went away
pub async fn execute(
    session: &mut AdapterSession,
    endpoint: &Endpoint,
    cli: &Cli,
    command: &str,
) -> Result<String> {
    if session.check_link() == SessionState::Reconnecting {
        establish(session, endpoint, cli).await?;
    }
    let response = session.send(command).await;
    if session.state() == SessionState::Reconnecting {
        establish(session, endpoint, cli).await?;
    }
    Ok(response)
}

fn print_profile(session: &AdapterSession) -> Result<()> {
    if let Some(profile) = session.profile() {
        println!("{}", serde_json::to_string_pretty(&profile.to_json())?);
    }
    Ok(())
}

fn print_response(response: &str) {
    if response.is_empty() {
        println!("<no response>");
    } else {
        println!("{response}");
    }
}

/// Interactive loop over stdin
async fn repl(session: &mut AdapterSession, endpoint: &Endpoint, cli: &Cli) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => break,
            ":profile" => print_profile(session)?,
            ":state" => println!("{}", session.state()),
            ":stream" => {
                if !session.start_streaming() {
                    session.stop_streaming();
                }
                println!("{}", session.state());
            }
            command => {
                let response = execute(session, endpoint, cli, command).await?;
                print_response(&response);
            }
        }
    }
    Ok(())
}

/// Run the CLI to completion
pub async fn run(cli: Cli) -> Result<()> {
    let config = SessionConfig::load(cli.config.as_deref()).context("loading session config")?;
    let endpoint = cli.endpoint();
    let mut session = AdapterSession::new(config);

    establish(&mut session, &endpoint, &cli).await?;
    if let Some(protocol) = session.negotiated_protocol() {
        info!("Bus protocol: {}", protocol);
    }
    print_profile(&session)?;

    let outcome = if cli.commands.is_empty() {
        repl(&mut session, &endpoint, &cli).await
    } else {
        let mut outcome = Ok(());
        for command in &cli.commands {
            match execute(&mut session, &endpoint, &cli, command).await {
                Ok(response) => print_response(&response),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        outcome
    };

    session.disconnect().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_required() {
        assert!(Cli::try_parse_from(["obd-link"]).is_err());
        assert!(Cli::try_parse_from(["obd-link", "--tcp", "a:1", "--simulate"]).is_err());
    }

    #[test]
    fn test_endpoint_mapping() {
        let cli = Cli::try_parse_from(["obd-link", "--serial", "/dev/rfcomm0", "--baud", "9600"])
            .unwrap();
        assert_eq!(
            cli.endpoint(),
            Endpoint::Link(LinkTarget::Serial {
                path: "/dev/rfcomm0".into(),
                baud_rate: 9600
            })
        );

        let cli = Cli::try_parse_from(["obd-link", "--tcp", "192.168.0.10:35000"]).unwrap();
        assert_eq!(cli.endpoint().label(), "tcp://192.168.0.10:35000");

        let cli = Cli::try_parse_from(["obd-link", "--simulate", "-c", "0100", "-c", "010C"])
            .unwrap();
        assert_eq!(cli.endpoint(), Endpoint::Simulated);
        assert_eq!(cli.commands, vec!["0100", "010C"]);
        assert_eq!(cli.max_reconnects, 3);
    }

    #[tokio::test]
    async fn test_simulated_session() {
        let cli = Cli::try_parse_from(["obd-link", "--simulate"]).unwrap();
        let endpoint = cli.endpoint();
        let mut session = AdapterSession::new(SessionConfig::default());

        establish(&mut session, &endpoint, &cli).await.unwrap();
        assert_eq!(session.state(), SessionState::SessionActive);
        let response = execute(&mut session, &endpoint, &cli, "010D").await.unwrap();
        assert_eq!(response, "410D28");
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_unreachable_adapter_gives_up() {
        let cli = Cli::try_parse_from([
            "obd-link",
            "--tcp",
            "127.0.0.1:1",
            "--max-reconnects",
            "1",
            "--reconnect-delay-ms",
            "10",
            "--connect-timeout-ms",
            "200",
        ])
        .unwrap();
        let mut session = AdapterSession::new(SessionConfig::default());
        let result = establish(&mut session, &cli.endpoint(), &cli).await;
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
