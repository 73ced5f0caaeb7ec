//! Stream Connection Manager.
//!
//! Owns exactly one logical live-update connection. A background worker task
//! drives the connection state machine and talks to the handle through two
//! queues: commands in, [`StreamEvent`]s out. The current state is also
//! published on a `watch` channel for readers that only care about the
//! latest value.
//!
//! STATE MACHINE
//! =============
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connecting ...
//!
//! Retries use a fixed delay and never give up. `close()` is the only way
//! out of the retry loop.
//!
//! SUBSCRIPTIONS
//! =============
//! Requested channels are remembered for the lifetime of the manager. Every
//! transition into Connected sends one `subscribe` carrying the full set,
//! since the server keeps no subscription state across connections.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use wire::{ControlMessage, PushMessage};

use crate::transport::{Connector, Transport};

/// Connection status of the live-update channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted by the Connection Manager to its consumer.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// The connection state changed.
    State(ConnectionState),
    /// A decoded push message for the aggregator.
    Message(PushMessage),
}

#[derive(Debug)]
enum Command {
    Open(String),
    Subscribe(Vec<String>),
    Track(Value),
    Close,
    Shutdown,
}

/// Handle to a running Connection Manager.
///
/// Dropping the handle aborts the worker, which drops the transport.
pub struct StreamManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    worker: Option<JoinHandle<()>>,
}

impl StreamManager {
    /// Spawn the worker task. Starts Disconnected; nothing is opened until
    /// [`open`](Self::open).
    #[must_use]
    pub fn spawn(
        connector: Arc<dyn Connector>,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let worker = Worker {
            connector,
            reconnect_delay,
            commands: commands_rx,
            events: events_tx,
            state: state_tx,
            endpoint: None,
            channels: Vec::new(),
        };
        let handle = tokio::spawn(worker.run());

        (Self { commands: commands_tx, state: state_rx, worker: Some(handle) }, events_rx)
    }

    /// Open the connection to `endpoint`. No-op unless Disconnected.
    pub fn open(&self, endpoint: impl Into<String>) {
        self.command(Command::Open(endpoint.into()));
    }

    /// Declare interest in `channels`. Remembered and re-sent on every
    /// (re)connect.
    pub fn subscribe<I, S>(&self, channels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        if !channels.is_empty() {
            self.command(Command::Subscribe(channels));
        }
    }

    /// Send a `track_event` control message. Dropped unless Connected.
    pub fn track_event(&self, data: Value) {
        self.command(Command::Track(data));
    }

    /// Close the connection and stop reconnecting.
    pub fn close(&self) {
        self.command(Command::Close);
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Close the connection and wait for the worker to exit.
    pub async fn shutdown(mut self) {
        self.command(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("stream worker gone; command dropped");
        }
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

enum Phase {
    Idle,
    Connect,
    Live(Box<dyn Transport>),
    Backoff,
    Stopped,
}

enum LiveStep {
    Command(Option<Command>),
    Incoming(Option<Result<String, crate::transport::TransportError>>),
}

struct Worker {
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<StreamEvent>,
    state: watch::Sender<ConnectionState>,
    endpoint: Option<String>,
    channels: Vec<String>,
}

impl Worker {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connect => self.connect().await,
                Phase::Live(transport) => self.live(transport).await,
                Phase::Backoff => self.backoff().await,
                Phase::Stopped => break,
            };
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn idle(&mut self) -> Phase {
        self.set_state(ConnectionState::Disconnected);
        loop {
            match self.commands.recv().await {
                None | Some(Command::Shutdown) => return Phase::Stopped,
                Some(Command::Open(endpoint)) => {
                    self.endpoint = Some(endpoint);
                    return Phase::Connect;
                }
                Some(Command::Subscribe(channels)) => {
                    self.remember(channels);
                }
                Some(Command::Track(_)) => debug!("not connected; track_event dropped"),
                Some(Command::Close) => {}
            }
        }
    }

    async fn connect(&mut self) -> Phase {
        let Some(endpoint) = self.endpoint.clone() else {
            return Phase::Idle;
        };
        self.set_state(ConnectionState::Connecting);

        let connector = Arc::clone(&self.connector);
        let mut attempt = connector.connect(&endpoint);
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return Phase::Stopped,
                    Some(Command::Close) => return Phase::Idle,
                    Some(Command::Open(_)) => {}
                    Some(Command::Subscribe(channels)) => {
                        self.remember(channels);
                    }
                    Some(Command::Track(_)) => debug!("not connected; track_event dropped"),
                },
                result = &mut attempt => return match result {
                    Ok(transport) => self.established(transport).await,
                    Err(e) => {
                        warn!(error = %e, endpoint = %endpoint, "stream open failed");
                        Phase::Backoff
                    }
                },
            }
        }
    }

    async fn established(&mut self, mut transport: Box<dyn Transport>) -> Phase {
        self.set_state(ConnectionState::Connected);
        info!(channels = ?self.channels, "stream connected");

        if !self.channels.is_empty() {
            let subscribe = ControlMessage::Subscribe { channels: self.channels.clone() };
            if let Err(e) = transport.send(wire::encode_control(&subscribe)).await {
                warn!(error = %e, "subscribe failed; reconnecting");
                transport.close().await;
                return Phase::Backoff;
            }
        }
        Phase::Live(transport)
    }

    async fn live(&mut self, mut transport: Box<dyn Transport>) -> Phase {
        loop {
            let step = tokio::select! {
                biased;
                command = self.commands.recv() => LiveStep::Command(command),
                incoming = transport.recv() => LiveStep::Incoming(incoming),
            };

            let outgoing = match step {
                LiveStep::Command(None | Some(Command::Shutdown)) => {
                    transport.close().await;
                    return Phase::Stopped;
                }
                LiveStep::Command(Some(Command::Close)) => {
                    transport.close().await;
                    return Phase::Idle;
                }
                LiveStep::Command(Some(Command::Open(_))) => None,
                LiveStep::Command(Some(Command::Subscribe(channels))) => {
                    self.remember(channels.clone());
                    Some(ControlMessage::Subscribe { channels })
                }
                LiveStep::Command(Some(Command::Track(data))) => Some(ControlMessage::TrackEvent { data }),
                LiveStep::Incoming(None) => {
                    warn!("stream closed by peer");
                    return Phase::Backoff;
                }
                LiveStep::Incoming(Some(Err(e))) => {
                    warn!(error = %e, "stream receive failed");
                    transport.close().await;
                    return Phase::Backoff;
                }
                LiveStep::Incoming(Some(Ok(text))) => {
                    self.dispatch(&text);
                    None
                }
            };

            if let Some(message) = outgoing {
                if let Err(e) = transport.send(wire::encode_control(&message)).await {
                    warn!(error = %e, "stream send failed");
                    transport.close().await;
                    return Phase::Backoff;
                }
            }
        }
    }

    async fn backoff(&mut self) -> Phase {
        // Deadline is fixed before the state change is visible.
        let deadline = Instant::now() + self.reconnect_delay;
        self.set_state(ConnectionState::Reconnecting);
        info!(delay = ?self.reconnect_delay, "reconnect scheduled");

        let sleep = time::sleep_until(deadline);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => return Phase::Stopped,
                    Some(Command::Close) => return Phase::Idle,
                    Some(Command::Open(_)) => {}
                    Some(Command::Subscribe(channels)) => {
                        self.remember(channels);
                    }
                    Some(Command::Track(_)) => debug!("not connected; track_event dropped"),
                },
                () = &mut sleep => return Phase::Connect,
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let message = match wire::decode_push(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed push message");
                return;
            }
        };

        match message {
            PushMessage::ConnectionEstablished(notice) => {
                info!(user_id = ?notice.user_id, "stream session established");
            }
            PushMessage::SubscriptionConfirmed(ack) => {
                info!(channels = ?ack.channels, "subscription confirmed");
            }
            message => {
                let _ = self.events.send(StreamEvent::Message(message));
            }
        }
    }

    /// Union `channels` into the remembered set, keeping first-requested order.
    fn remember(&mut self, channels: Vec<String>) {
        for channel in channels {
            if !self.channels.contains(&channel) {
                self.channels.push(channel);
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!(state = %next, "stream state changed");
            let _ = self.events.send(StreamEvent::State(next));
        }
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;
