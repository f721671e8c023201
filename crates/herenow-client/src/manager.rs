//! Connection Manager
//!
//! Owns the single realtime channel and drives the link state machine from
//! `herenow-core`. One `ConnectionManager` is constructed per application
//! session; consumers interact through cloneable `ConnectionHandle`s. All
//! mutable state (the channel handle, the timers, the attempt counter inside
//! the state) lives in one driver task, so ordering discipline replaces
//! locking: timers are cancelled before anything that would replace them.

use std::future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, Sleep};
use tracing::{debug, info, warn};
use url::Url;

use herenow_core::config::ConnectionConfig;
use herenow_core::envelope::{InboundEnvelope, OutboundEnvelope};
use herenow_core::errors::{HerenowError, Result};
use herenow_core::link::{Effect, LinkEvent, LinkState, LinkStatus};
use herenow_core::registry::{ListenerRegistry, Subscription};
use herenow_core::types::Credential;

use crate::transport::{Channel, Frame, Transport};

// ----------------------------------------------------------------------------
// Commands and Signals
// ----------------------------------------------------------------------------

/// Commands sent from consumer handles to the driver task
enum Command {
    /// Explicit (re)connect with a credential
    Connect(Credential),
    /// The external credential signal changed
    CredentialChanged(Option<Credential>),
    /// Best-effort outbound send
    Send(OutboundEnvelope),
    /// Explicit teardown
    Close,
    /// Stop the driver task
    Shutdown,
}

/// Outcome of an open attempt, tagged with the attempt generation so a
/// superseded attempt can never hand its channel to a newer lifecycle.
enum OpenSignal {
    Opened {
        generation: u64,
        channel: Box<dyn Channel>,
    },
    OpenFailed {
        generation: u64,
        reason: String,
    },
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

/// Owner of the realtime channel, one per application session.
///
/// Construction spawns the driver task; `shutdown` tears it down. Handles
/// obtained from [`ConnectionManager::handle`] stay valid for the lifetime
/// of the driver and turn into silent no-ops afterwards.
pub struct ConnectionManager {
    handle: ConnectionHandle,
    driver: JoinHandle<()>,
}

impl ConnectionManager {
    /// Validate the configuration and spawn the driver task.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn<T: Transport>(config: ConnectionConfig, transport: T) -> Result<Self> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::Idle);
        let registry = Arc::new(ListenerRegistry::new());

        let driver = Driver {
            config,
            transport: Arc::new(transport),
            state: LinkState::new(),
            registry: Arc::clone(&registry),
            status_tx,
            command_rx,
            signal_tx,
            signal_rx,
            channel: None,
            pending_open: None,
            generation: 0,
            heartbeat: None,
            reconnect: None,
        };

        Ok(Self {
            handle: ConnectionHandle {
                command_tx,
                status_rx,
                registry,
            },
            driver: tokio::spawn(driver.run()),
        })
    }

    /// Get a cloneable consumer handle
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Explicit (re)connect entry point, e.g. from a reconnect user action
    pub fn connect(&self, credential: Credential) {
        self.handle.connect(credential)
    }

    /// Explicit teardown of the channel
    pub fn close(&self) {
        self.handle.close()
    }

    /// Best-effort send; silently dropped unless the channel is open
    pub fn send_message(&self, envelope: OutboundEnvelope) {
        self.handle.send_message(envelope)
    }

    /// Notify the manager that the external credential changed
    pub fn on_credential_changed(&self, credential: Option<Credential>) {
        self.handle.on_credential_changed(credential)
    }

    /// Whether the channel is currently open
    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Current link status
    pub fn status(&self) -> LinkStatus {
        self.handle.status()
    }

    /// Watch stream of link status changes
    pub fn status_stream(&self) -> watch::Receiver<LinkStatus> {
        self.handle.status_stream()
    }

    /// Register an inbound-message listener
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&InboundEnvelope) + Send + Sync + 'static,
    {
        self.handle.subscribe(handler)
    }

    /// Gracefully stop the driver task
    pub async fn shutdown(self) {
        let _ = self.handle.command_tx.send(Command::Shutdown);
        let _ = self.driver.await;
    }
}

// ----------------------------------------------------------------------------
// Consumer Handle
// ----------------------------------------------------------------------------

/// Cloneable handle to a [`ConnectionManager`]
#[derive(Clone)]
pub struct ConnectionHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<LinkStatus>,
    registry: Arc<ListenerRegistry>,
}

impl ConnectionHandle {
    /// Explicit (re)connect entry point
    pub fn connect(&self, credential: Credential) {
        self.send_command(Command::Connect(credential));
    }

    /// Explicit teardown of the channel
    pub fn close(&self) {
        self.send_command(Command::Close);
    }

    /// Best-effort send; silently dropped (not queued) unless the channel
    /// is open
    pub fn send_message(&self, envelope: OutboundEnvelope) {
        self.send_command(Command::Send(envelope));
    }

    /// Notify the manager that the external credential changed. An absent
    /// credential tears the channel down; a new value replaces it.
    pub fn on_credential_changed(&self, credential: Option<Credential>) {
        self.send_command(Command::CredentialChanged(credential));
    }

    /// Whether the channel is currently open
    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected()
    }

    /// Current link status; `LinkStatus::Failed` is the terminal-failure
    /// signal the application reacts to (e.g. by showing a disconnected
    /// view with a manual reconnect action)
    pub fn status(&self) -> LinkStatus {
        *self.status_rx.borrow()
    }

    /// Watch stream of link status changes
    pub fn status_stream(&self) -> watch::Receiver<LinkStatus> {
        self.status_rx.clone()
    }

    /// Register an inbound-message listener; the returned subscription is
    /// the disposer
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&InboundEnvelope) + Send + Sync + 'static,
    {
        self.registry.subscribe(handler)
    }

    fn send_command(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            debug!("connection manager is shut down; command dropped");
        }
    }
}

// ----------------------------------------------------------------------------
// Driver Task
// ----------------------------------------------------------------------------

struct Driver {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    state: LinkState,
    registry: Arc<ListenerRegistry>,
    status_tx: watch::Sender<LinkStatus>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    signal_tx: mpsc::UnboundedSender<OpenSignal>,
    signal_rx: mpsc::UnboundedReceiver<OpenSignal>,
    /// The single live channel handle; at most one at any time
    channel: Option<Box<dyn Channel>>,
    /// In-flight open attempt, aborted on teardown
    pending_open: Option<JoinHandle<()>>,
    /// Generation counter tagging open attempts
    generation: u64,
    /// Heartbeat timer; present exactly while the channel is open
    heartbeat: Option<Interval>,
    /// Pending reconnect timer
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                Some(signal) = self.signal_rx.recv() => {
                    self.handle_signal(signal);
                }
                frame = next_frame(&mut self.channel) => {
                    self.handle_frame(frame);
                }
                _ = heartbeat_tick(&mut self.heartbeat) => {
                    self.send_probe().await;
                }
                _ = reconnect_elapsed(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.apply(LinkEvent::RetryTimerFired);
                }
            }
        }

        self.abort_pending_open();
        self.channel = None;
        debug!("connection driver stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(credential) => self.apply(LinkEvent::ConnectRequested(credential)),
            Command::CredentialChanged(credential) => {
                self.apply(LinkEvent::CredentialChanged(credential))
            }
            Command::Close => self.apply(LinkEvent::CloseRequested),
            Command::Send(envelope) => self.send_envelope(envelope).await,
            // Intercepted by the run loop.
            Command::Shutdown => {}
        }
    }

    fn handle_signal(&mut self, signal: OpenSignal) {
        match signal {
            OpenSignal::Opened {
                generation,
                channel,
            } => {
                if generation != self.generation {
                    // A teardown or newer attempt superseded this one;
                    // dropping the handle closes the socket.
                    debug!("discarding channel from superseded open attempt");
                    return;
                }
                self.pending_open = None;
                self.channel = Some(channel);
                info!("channel connected");
                self.apply(LinkEvent::ChannelOpened);
            }
            OpenSignal::OpenFailed { generation, reason } => {
                if generation != self.generation {
                    return;
                }
                self.pending_open = None;
                self.apply(LinkEvent::ChannelClosed { reason });
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Text(text) => match InboundEnvelope::parse(&text) {
                Ok(envelope) => {
                    if envelope.is_for(&self.config.app_id) {
                        self.registry.dispatch(&envelope);
                    } else {
                        debug!(app_id = %envelope.app_id, "dropping message for another application");
                    }
                }
                // Malformed frames never reach listeners and never touch
                // the connection state.
                Err(e) => warn!("invalid inbound message: {}", e),
            },
            Frame::Closed { reason } => {
                info!("channel closed: {}", reason);
                self.channel = None;
                self.apply(LinkEvent::ChannelClosed { reason });
            }
        }
    }

    async fn send_envelope(&mut self, envelope: OutboundEnvelope) {
        if !self.state.can_send() {
            debug!("dropping outbound message; channel is not open");
            return;
        }
        let Some(channel) = self.channel.as_mut() else {
            debug!("dropping outbound message; channel handle is gone");
            return;
        };
        match envelope.to_json() {
            Ok(frame) => {
                if let Err(e) = channel.send_text(frame).await {
                    // The close frame, not the send error, drives the state
                    // transition.
                    warn!("send failed on live channel: {}", e);
                }
            }
            Err(e) => warn!("could not serialize outbound message: {}", e),
        }
    }

    async fn send_probe(&mut self) {
        // The probe goes through the same Open-state guard as any other
        // send; if the channel closed between tick and send it is skipped.
        self.send_envelope(OutboundEnvelope::ping()).await;
    }

    /// Run the state machine and execute the requested effects in order.
    fn apply(&mut self, event: LinkEvent) {
        let state = std::mem::take(&mut self.state);
        let from = state.state_name();
        let transition = state.transition(event, &self.config.retry);
        for effect in transition.effects {
            self.run_effect(effect);
        }
        let to = transition.new_state.state_name();
        if from != to {
            debug!(from, to, "link transition");
        }
        self.state = transition.new_state;
        self.status_tx.send_replace(self.state.status());
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::OpenChannel { credential } => self.open_channel(credential),
            Effect::CloseChannel => {
                self.abort_pending_open();
                self.channel = None;
            }
            Effect::StartHeartbeat => {
                // interval_at: the first probe fires one full interval after
                // the open, not immediately. Replacing the interval also
                // stops any prior one.
                let period = self.config.heartbeat_interval;
                self.heartbeat = Some(time::interval_at(Instant::now() + period, period));
            }
            Effect::StopHeartbeat => self.heartbeat = None,
            Effect::ScheduleReconnect { delay } => {
                self.reconnect = Some(Box::pin(time::sleep(delay)));
            }
            Effect::CancelReconnect => self.reconnect = None,
            Effect::NotifyLost => warn!(
                "realtime link lost after {} attempts; manual reconnect required",
                self.config.retry.max_retries
            ),
        }
    }

    fn open_channel(&mut self, credential: Credential) {
        // Cancel-before-replace: a superseded attempt must not outlive the
        // generation that owns the next one.
        self.abort_pending_open();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;

        let url = match channel_url(&self.config.endpoint, &credential) {
            Ok(url) => url,
            Err(e) => {
                // Surface as a failed open so the retry policy applies.
                let _ = self.signal_tx.send(OpenSignal::OpenFailed {
                    generation,
                    reason: e.to_string(),
                });
                return;
            }
        };

        let transport = Arc::clone(&self.transport);
        let signal_tx = self.signal_tx.clone();
        let connect_timeout = self.config.connect_timeout;
        self.pending_open = Some(tokio::spawn(async move {
            let attempt = transport.open(&url);
            let outcome = match connect_timeout {
                Some(limit) => match time::timeout(limit, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(HerenowError::transport("open attempt timed out")),
                },
                None => attempt.await,
            };
            let signal = match outcome {
                Ok(channel) => OpenSignal::Opened {
                    generation,
                    channel,
                },
                Err(e) => OpenSignal::OpenFailed {
                    generation,
                    reason: e.to_string(),
                },
            };
            let _ = signal_tx.send(signal);
        }));
    }

    fn abort_pending_open(&mut self) {
        if let Some(handle) = self.pending_open.take() {
            handle.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Select Helpers
// ----------------------------------------------------------------------------

// Arms backed by optional resources resolve to a pending future while the
// resource is absent, which keeps the select! loop free of stale guards.

async fn next_frame(channel: &mut Option<Box<dyn Channel>>) -> Frame {
    match channel.as_mut() {
        Some(channel) => channel.next_frame().await,
        None => future::pending().await,
    }
}

async fn heartbeat_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn reconnect_elapsed(reconnect: &mut Option<Pin<Box<Sleep>>>) {
    match reconnect.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}

// ----------------------------------------------------------------------------
// URL Composition
// ----------------------------------------------------------------------------

/// Compose the channel open target: `<endpoint>?token=<credential>`
fn channel_url(endpoint: &str, credential: &Credential) -> Result<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| HerenowError::config_error(format!("invalid endpoint {}: {}", endpoint, e)))?;
    url.query_pairs_mut()
        .append_pair("token", credential.as_str());
    Ok(url)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url_carries_credential() {
        let url = channel_url("wss://example.com/realtime", &Credential::new("tok-1")).unwrap();
        assert_eq!(url.as_str(), "wss://example.com/realtime?token=tok-1");
    }

    #[test]
    fn test_channel_url_preserves_existing_query() {
        let url = channel_url("wss://example.com/rt?v=2", &Credential::new("t")).unwrap();
        assert_eq!(url.as_str(), "wss://example.com/rt?v=2&token=t");
    }

    #[test]
    fn test_channel_url_escapes_credential() {
        let url = channel_url("wss://example.com/rt", &Credential::new("a b&c")).unwrap();
        assert!(url.query().unwrap().contains("token=a+b%26c"));
    }

    #[test]
    fn test_invalid_endpoint_is_a_configuration_error() {
        let err = channel_url("not a url", &Credential::new("t")).unwrap_err();
        assert!(matches!(err, HerenowError::Configuration { .. }));
    }
}
