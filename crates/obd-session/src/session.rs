//! The adapter session state machine

use crate::connection::Connection;
use crate::keepalive::spawn_keepalive;
use crate::{SessionConfig, SessionEvent, SessionState};
use adapter_driver::{AdapterDriver, DriverSettings, RetryPolicy};
use device_profile::{DeviceProfile, HealthMonitor, KnownDeviceRegistry};
use fallback::ProtocolFallbackSequencer;
use fingerprint::{FingerprintConfig, Fingerprinter};
use obd_protocol::ObdProtocol;
use obd_transport::AdapterTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 64;

/// One adapter session: owns the link, the driver, the health monitor and
/// the device profile for as long as the link lives
///
/// Every operation takes `&mut self`, so fingerprinting, negotiation,
/// command routing and recovery never overlap. The keepalive task is the
/// only other writer and it shares the transport's exchange lock.
pub struct AdapterSession {
    config: SessionConfig,
    registry: KnownDeviceRegistry,
    connection: Option<Connection>,
    protocol: Option<ObdProtocol>,
    consecutive_failures: u32,
    keepalive: Option<JoinHandle<()>>,
    state: watch::Sender<SessionState>,
    profile: watch::Sender<Option<DeviceProfile>>,
    events: broadcast::Sender<SessionEvent>,
}

impl AdapterSession {
    /// Create a disconnected session using the built-in device registry
    pub fn new(config: SessionConfig) -> Self {
        Self::with_registry(config, KnownDeviceRegistry::with_builtin())
    }

    /// Create a disconnected session with a caller-supplied registry
    pub fn with_registry(config: SessionConfig, registry: KnownDeviceRegistry) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (profile, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            registry,
            connection: None,
            protocol: None,
            consecutive_failures: 0,
            keepalive: None,
            state,
            profile,
            events,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Registry consulted on the next connect
    pub fn registry_mut(&mut self) -> &mut KnownDeviceRegistry {
        &mut self.registry
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Live profile, `None` until the first fingerprint completes
    pub fn subscribe_profile(&self) -> watch::Receiver<Option<DeviceProfile>> {
        self.profile.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Most recent device profile, kept after disconnect
    pub fn profile(&self) -> Option<DeviceProfile> {
        self.profile.borrow().clone()
    }

    /// Protocol agreed with the vehicle bus, `Auto` when automatic search
    /// worked but the adapter could not name the result
    pub fn negotiated_protocol(&self) -> Option<ObdProtocol> {
        self.protocol
    }

    /// Failed commands in a row since the last answer or recovery
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Take over a connected byte stream, fingerprint the adapter and
    /// negotiate a bus protocol
    ///
    /// Returns the state the session settled in: `SessionActive` on
    /// success, `Reconnecting` when the adapter could not be brought up.
    pub async fn connect<S>(&mut self, stream: S, label: impl Into<String>) -> SessionState
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if self.connection.is_some() {
            self.disconnect().await;
        }

        let link = Arc::new(AdapterTransport::spawn(stream, label));
        self.transition(SessionState::TransportConnected);

        let report = Fingerprinter::new(&link, &self.registry, self.fingerprint_config())
            .run()
            .await;
        let profile = report.profile;
        let driver = AdapterDriver::for_family(profile.chip_family, self.driver_settings());
        info!("Using {} driver for {}", driver.name(), profile.device_name);

        self.connection = Some(Connection {
            link,
            driver,
            health: HealthMonitor::new(),
            fallback: ProtocolFallbackSequencer::standard(),
            profile,
        });
        self.publish_profile();
        self.transition(SessionState::DeviceIdentified);

        let negotiated = match self.connection.as_mut() {
            Some(conn) => conn.establish(&self.config).await,
            None => None,
        };
        self.publish_profile();
        match negotiated {
            Some(protocol) => {
                self.protocol = Some(protocol);
                self.transition(SessionState::ProtocolDetected);
                self.activate();
            }
            None => {
                self.recover().await;
            }
        }
        self.state()
    }

    /// Send a command with the configured default timeout
    pub async fn send(&mut self, command: &str) -> String {
        let timeout = self.config.default_command_timeout();
        self.send_command(command, timeout).await
    }

    /// Route one command through the driver
    ///
    /// Returns the adapter's response, or an empty string when the session
    /// is not active or every attempt failed. Never errors.
    pub async fn send_command(&mut self, command: &str, timeout: Duration) -> String {
        let state = self.state();
        if !state.accepts_commands() {
            debug!("Dropping {:?} in state {}", command, state);
            return String::new();
        }
        let Some(conn) = self.connection.as_mut() else {
            return String::new();
        };
        if !conn.link.is_connected() {
            warn!("Link {} lost", conn.link.label());
            self.transition(SessionState::Reconnecting);
            return String::new();
        }

        let before = conn.profile.health_score();
        let response = conn
            .driver
            .send_command(&conn.link, &mut conn.profile, &mut conn.health, command, timeout)
            .await;
        let health_changed = conn.profile.health_score() != before;
        let link_up = conn.link.is_connected();
        if health_changed {
            self.publish_profile();
        }

        if !response.is_empty() {
            self.consecutive_failures = 0;
            return response;
        }

        self.consecutive_failures += 1;
        debug!(
            "{:?} failed ({} in a row)",
            command, self.consecutive_failures
        );
        if !link_up {
            warn!("Link lost during {:?}", command);
            self.transition(SessionState::Reconnecting);
        } else if self.consecutive_failures >= self.config.consecutive_failure_limit {
            warn!(
                "{} consecutive command failures, recovering",
                self.consecutive_failures
            );
            self.recover().await;
        }
        String::new()
    }

    /// Switch from `SessionActive` to `Streaming`
    pub fn start_streaming(&mut self) -> bool {
        if self.state() != SessionState::SessionActive {
            return false;
        }
        self.transition(SessionState::Streaming);
        true
    }

    /// Switch from `Streaming` back to `SessionActive`
    pub fn stop_streaming(&mut self) -> bool {
        if self.state() != SessionState::Streaming {
            return false;
        }
        self.transition(SessionState::SessionActive);
        true
    }

    /// Notice a dropped link without sending anything
    pub fn check_link(&mut self) -> SessionState {
        let lost = self
            .connection
            .as_ref()
            .is_some_and(|conn| !conn.link.is_connected());
        if lost && self.state() != SessionState::Reconnecting {
            warn!("Link lost while idle");
            self.transition(SessionState::Reconnecting);
        }
        self.state()
    }

    /// Stop the keepalive, close the link and drop every per-connection
    /// resource. Always ends in `Disconnected`.
    pub async fn disconnect(&mut self) {
        self.stop_keepalive();
        if let Some(conn) = self.connection.take() {
            conn.link.close(self.config.close_timeout()).await;
            info!("Disconnected from {}", conn.link.label());
        }
        self.protocol = None;
        self.consecutive_failures = 0;
        self.transition(SessionState::Disconnected);
    }

    /// Reset and re-negotiate on the same link
    async fn recover(&mut self) -> bool {
        self.transition(SessionState::ErrorRecovery);
        metrics::counter!("obd_recoveries_total").increment(1);

        let negotiated = match self.connection.as_mut() {
            Some(conn) if conn.link.is_connected() => {
                warn!("Recovering session on {}", conn.link.label());
                conn.link.drain_input().await;
                conn.driver.recover(&conn.link, &mut conn.profile).await;
                conn.fallback.reset();
                conn.establish(&self.config).await
            }
            _ => None,
        };
        self.consecutive_failures = 0;
        self.publish_profile();

        match negotiated {
            Some(protocol) => {
                info!("Recovered on {}", protocol);
                self.protocol = Some(protocol);
                self.activate();
                true
            }
            None => {
                error!("Recovery failed");
                self.protocol = None;
                self.transition(SessionState::Reconnecting);
                false
            }
        }
    }

    fn activate(&mut self) {
        self.consecutive_failures = 0;
        self.transition(SessionState::SessionActive);
        self.start_keepalive();
    }

    fn start_keepalive(&mut self) {
        if self.keepalive.is_some() {
            return;
        }
        let Some(conn) = self.connection.as_ref() else {
            return;
        };
        let caps = &conn.profile.capabilities;
        if !caps.keepalive_required || caps.keepalive_interval_ms == 0 {
            return;
        }
        debug!("Keepalive every {}ms", caps.keepalive_interval_ms);
        self.keepalive = Some(spawn_keepalive(
            Arc::clone(&conn.link),
            conn.driver.keepalive_command(),
            Duration::from_millis(caps.keepalive_interval_ms),
            self.config.keepalive_timeout(),
        ));
    }

    fn stop_keepalive(&mut self) {
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state();
        if from == to {
            return;
        }
        info!("Session {} -> {}", from, to);
        self.state.send_replace(to);
        metrics::gauge!("obd_session_state").set(to.code() as f64);
        metrics::counter!("obd_state_transitions_total").increment(1);
        let _ = self.events.send(SessionEvent::StateChanged { from, to });

        if !to.accepts_commands() {
            self.stop_keepalive();
        }
    }

    fn publish_profile(&self) {
        if let Some(conn) = self.connection.as_ref() {
            let health_score = conn.profile.health_score();
            self.profile.send_replace(Some(conn.profile.clone()));
            let _ = self.events.send(SessionEvent::ProfileUpdated { health_score });
        }
    }

    fn fingerprint_config(&self) -> FingerprintConfig {
        FingerprintConfig {
            reset_timeout: self.config.reset_timeout(),
            command_timeout: self.config.identity_timeout(),
            bus_timeout: self.config.auto_protocol_timeout(),
        }
    }

    fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            setup_timeout: self.config.identity_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Drop for AdapterSession {
    fn drop(&mut self) {
        self.stop_keepalive();
    }
}
