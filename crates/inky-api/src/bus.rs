//! MQTT bus session with auto-reconnect.
//!
//! Owns the single connection to the message bus: connect, subscribe,
//! receive loop, publish, and reconnect with capped exponential
//! backoff. Inbound frames are decoded by topic and handed to the
//! dispatcher through bounded channels; outbound publishes go through a
//! cloneable [`BusPublisher`] that waits (bounded) for a live
//! connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use inky_api::bus::{BusConfig, BusSession};
//! use tokio_util::sync::CancellationToken;
//!
//! let (session, mut events, publisher) = BusSession::new(BusConfig::default(), "inky-kitchen");
//! let cancel = CancellationToken::new();
//! tokio::spawn(session.run(cancel.clone()));
//!
//! while let Some(command) = events.commands.recv().await {
//!     println!("{:?}", command.action);
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS, Transport};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::error::Error;
use crate::messages::{DeviceAcknowledge, DeviceRegistration, DisplayCommand, RegistrationResponse};

// ── Tunables ─────────────────────────────────────────────────────────

const RECONNECT_FLOOR: Duration = Duration::from_secs(5);
const RECONNECT_CAP: Duration = Duration::from_secs(60);
const CONNECT_WAIT: Duration = Duration::from_secs(30);
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// rumqttc request queue depth (publishes + subscribes in flight).
const REQUEST_QUEUE: usize = 16;

/// Inbound command queue. The dispatcher drains this sequentially; a
/// slow display refresh backpressures the receive loop, which is the
/// accepted behavior for this device.
const COMMAND_QUEUE: usize = 16;

const REGISTRATION_QUEUE: usize = 4;

// ── Topics ───────────────────────────────────────────────────────────

/// Bus topics for one device, templated by device id.
#[derive(Debug, Clone)]
pub struct Topics {
    /// `inky/{device_id}/command` — inbound commands (QoS 1).
    pub command: String,
    /// `inky/{device_id}/status` — outbound acknowledgments (QoS 0).
    pub status: String,
    /// `inky/{device_id}/registered` — inbound registration ack (QoS 1).
    pub registered: String,
}

impl Topics {
    /// `inky/register` — outbound registration requests (QoS 1).
    pub const REGISTER: &'static str = "inky/register";

    pub fn new(device_id: &str) -> Self {
        Self {
            command: format!("inky/{device_id}/command"),
            status: format!("inky/{device_id}/status"),
            registered: format!("inky/{device_id}/registered"),
        }
    }
}

// ── BusConfig ────────────────────────────────────────────────────────

/// MQTT transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusTransport {
    #[default]
    Tcp,
    Websockets,
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Client identifier; defaults to `inky-{device_id}` when unset.
    pub client_id: Option<String>,
    pub transport: BusTransport,
    /// Path for websocket transport (e.g. "/mqtt").
    pub websocket_path: Option<String>,
    pub tls: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            username: None,
            password: None,
            client_id: None,
            transport: BusTransport::Tcp,
            websocket_path: None,
            tls: false,
        }
    }
}

impl BusConfig {
    fn mqtt_options(&self, device_id: &str) -> MqttOptions {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| format!("inky-{device_id}"));

        let mut options = match self.transport {
            BusTransport::Tcp => {
                let mut opts = MqttOptions::new(client_id, self.host.clone(), self.port);
                if self.tls {
                    opts.set_transport(Transport::tls_with_default_config());
                }
                opts
            }
            BusTransport::Websockets => {
                // For websockets rumqttc expects the full URL as the
                // broker address.
                let scheme = if self.tls { "wss" } else { "ws" };
                let path = self.websocket_path.as_deref().unwrap_or("/mqtt");
                let url = format!("{scheme}://{}:{}{path}", self.host, self.port);
                let mut opts = MqttOptions::new(client_id, url, self.port);
                if self.tls {
                    opts.set_transport(Transport::wss_with_default_config());
                } else {
                    opts.set_transport(Transport::Ws);
                }
                opts
            }
        };

        if let Some(ref username) = self.username {
            let password = self
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_owned())
                .unwrap_or_default();
            options.set_credentials(username.clone(), password);
        }

        options.set_keep_alive(KEEP_ALIVE);
        options
    }
}

// ── Session ──────────────────────────────────────────────────────────

/// Inbound message channels handed to the dispatcher.
///
/// The Rust rendition of the session's two callbacks: commands arrive
/// in publish order and are consumed one at a time.
pub struct BusEvents {
    pub commands: mpsc::Receiver<DisplayCommand>,
    pub registrations: mpsc::Receiver<RegistrationResponse>,
}

/// Owns the MQTT event loop. [`run`](Self::run) suspends for the
/// process lifetime and returns only on cancellation.
pub struct BusSession {
    eventloop: EventLoop,
    client: AsyncClient,
    topics: Arc<Topics>,
    connected_tx: watch::Sender<bool>,
    commands_tx: mpsc::Sender<DisplayCommand>,
    registrations_tx: mpsc::Sender<RegistrationResponse>,
}

impl BusSession {
    /// Build a session for `device_id`. Does not connect; the first
    /// connection attempt happens inside [`run`](Self::run).
    pub fn new(config: &BusConfig, device_id: &str) -> (Self, BusEvents, BusPublisher) {
        let topics = Arc::new(Topics::new(device_id));
        let (client, eventloop) = AsyncClient::new(config.mqtt_options(device_id), REQUEST_QUEUE);

        let (connected_tx, connected_rx) = watch::channel(false);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (registrations_tx, registrations_rx) = mpsc::channel(REGISTRATION_QUEUE);

        let publisher = BusPublisher {
            client: client.clone(),
            connected: connected_rx,
            topics: topics.clone(),
        };

        let session = Self {
            eventloop,
            client,
            topics,
            connected_tx,
            commands_tx,
            registrations_tx,
        };

        let events = BusEvents {
            commands: commands_rx,
            registrations: registrations_rx,
        };

        (session, events, publisher)
    }

    /// Main loop: poll → route inbound frames → on error, backoff →
    /// reconnect. Runs until `cancel` fires; there is no upper bound on
    /// reconnect attempts.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(RECONNECT_FLOOR, RECONNECT_CAP);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("connected to bus");
                        backoff.reset();
                        self.connected_tx.send_replace(true);
                        self.subscribe().await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.route(publish).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.connected_tx.send_replace(false);
                        let delay = backoff.next();
                        tracing::warn!(
                            error = %e,
                            delay_secs = delay.as_secs(),
                            "bus connection error, reconnecting"
                        );

                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        // Leave the session logically disconnected so pending
        // publishers fail their bounded wait instead of hanging.
        self.connected_tx.send_replace(false);
        tracing::debug!("bus session loop exiting");
    }

    /// Subscriptions do not survive a reconnect; issued after every
    /// ConnAck.
    async fn subscribe(&mut self) {
        for topic in [&self.topics.command, &self.topics.registered] {
            match self.client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                Ok(()) => tracing::info!(topic = %topic, "subscribed"),
                Err(e) => tracing::warn!(topic = %topic, error = %e, "subscribe failed"),
            }
        }
    }

    /// Decode an inbound frame by topic and hand it off. Decode
    /// failures and unknown topics are logged and dropped; they never
    /// crash the loop.
    async fn route(&mut self, publish: Publish) {
        let topic = publish.topic.as_str();
        tracing::debug!(topic, bytes = publish.payload.len(), "inbound frame");

        if topic == self.topics.command {
            match serde_json::from_slice::<DisplayCommand>(&publish.payload) {
                Ok(command) => {
                    if self.commands_tx.send(command).await.is_err() {
                        tracing::warn!("command receiver dropped, discarding command");
                    }
                }
                Err(e) => tracing::warn!(topic, error = %e, "dropping undecodable command"),
            }
        } else if topic == self.topics.registered {
            match serde_json::from_slice::<RegistrationResponse>(&publish.payload) {
                Ok(response) => {
                    if self.registrations_tx.send(response).await.is_err() {
                        tracing::warn!("registration receiver dropped, discarding response");
                    }
                }
                Err(e) => {
                    tracing::warn!(topic, error = %e, "dropping undecodable registration response");
                }
            }
        } else {
            tracing::warn!(topic, "message on unexpected topic");
        }
    }
}

// ── Publisher ────────────────────────────────────────────────────────

/// Outbound half of the session. Cheaply cloneable; each publish waits
/// up to 30s for a live connection, then performs a single best-effort
/// publish.
#[derive(Clone)]
pub struct BusPublisher {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    topics: Arc<Topics>,
}

impl BusPublisher {
    /// Publish a registration request to `inky/register` with
    /// at-least-once delivery.
    pub async fn publish_registration(&self, registration: &DeviceRegistration) -> Result<(), Error> {
        self.wait_connected().await?;
        self.publish_json(Topics::REGISTER, QoS::AtLeastOnce, registration)
            .await?;
        tracing::info!(topic = Topics::REGISTER, "published registration");
        Ok(())
    }

    /// Publish a command acknowledgment to the device status topic with
    /// at-most-once delivery. Delivery failure is the caller's to log;
    /// it is never retried.
    pub async fn publish_acknowledge(&self, acknowledge: &DeviceAcknowledge) -> Result<(), Error> {
        self.wait_connected().await?;
        self.publish_json(&self.topics.status, QoS::AtMostOnce, acknowledge)
            .await?;
        tracing::debug!(
            success = acknowledge.successful_display_change,
            image_id = acknowledge.image_id.as_deref().unwrap_or("<none>"),
            "published acknowledgment"
        );
        Ok(())
    }

    async fn publish_json<T: serde::Serialize>(
        &self,
        topic: &str,
        qos: QoS,
        payload: &T,
    ) -> Result<(), Error> {
        let bytes = serde_json::to_vec(payload).map_err(|e| Error::Publish {
            topic: topic.to_owned(),
            reason: e.to_string(),
        })?;

        self.client
            .publish(topic, qos, false, bytes)
            .await
            .map_err(|e| Error::Publish {
                topic: topic.to_owned(),
                reason: e.to_string(),
            })
    }

    /// Bounded wait for a live connection. The watch channel is
    /// level-triggered: a connection established before this call is
    /// observed immediately.
    async fn wait_connected(&self) -> Result<(), Error> {
        let mut connected = self.connected.clone();
        tokio::time::timeout(CONNECT_WAIT, connected.wait_for(|up| *up))
            .await
            .map_err(|_| Error::ConnectionTimeout {
                timeout_secs: CONNECT_WAIT.as_secs(),
            })?
            .map_err(|_| Error::SessionClosed)?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
