//! Live-update socket seam.
//!
//! The Connection Manager only ever talks to a [`Connector`] and the
//! [`Transport`] it hands back. Production code uses [`WsConnector`] over
//! `tokio-tungstenite`; tests substitute the fakes in `test_helpers`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

/// Error from the live-update transport. Every variant is recoverable.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(Box<tungstenite::Error>),
    #[error("websocket send failed: {0}")]
    Send(Box<tungstenite::Error>),
    #[error("websocket receive failed: {0}")]
    Recv(Box<tungstenite::Error>),
    #[error("websocket closed")]
    Closed,
}

/// One open live-update connection carrying text messages.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound text message. `None` once the peer has closed.
    ///
    /// Must be cancel-safe: the stream worker races it against commands.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}

/// Opens transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

/// Connector for `ws://` and `wss://` endpoints.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(Box::new(e)))?;
        Ok(Box::new(WsTransport { socket }))
    }
}

pub struct WsTransport {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(Box::new(e)))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!(len = bytes.len(), "ignoring non-utf8 binary message"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => return None,
                Err(e) => return Some(Err(TransportError::Recv(Box::new(e)))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::io;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;

    /// Test side of one fake connection.
    ///
    /// Dropping the peer (or its `inbound` sender) closes the connection as
    /// seen by the client.
    pub struct Peer {
        pub url: String,
        pub inbound: mpsc::UnboundedSender<String>,
        pub outbound: mpsc::UnboundedReceiver<String>,
    }

    impl Peer {
        /// Push one message to the client.
        pub fn push(&self, text: impl Into<String>) {
            let _ = self.inbound.send(text.into());
        }

        /// Everything the client has sent so far.
        pub fn sent(&mut self) -> Vec<String> {
            let mut sent = Vec::new();
            while let Ok(text) = self.outbound.try_recv() {
                sent.push(text);
            }
            sent
        }
    }

    /// Connector whose connections are driven from the test body.
    pub struct FakeConnector {
        attempts: AtomicUsize,
        failures: Mutex<usize>,
        peers: mpsc::UnboundedSender<Peer>,
    }

    impl FakeConnector {
        pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
            Self::failing_first(0)
        }

        /// The first `failures` attempts are refused.
        pub fn failing_first(failures: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
            let (peers, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self { attempts: AtomicUsize::new(0), failures: Mutex::new(failures), peers });
            (connector, rx)
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            {
                let mut failures = self.failures.lock().expect("failures lock");
                if *failures > 0 {
                    *failures -= 1;
                    let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
                    return Err(TransportError::Connect(Box::new(tungstenite::Error::Io(refused))));
                }
            }

            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let _ = self.peers.send(Peer { url: url.to_owned(), inbound: inbound_tx, outbound: outbound_rx });
            Ok(Box::new(FakeTransport { inbound: inbound_rx, outbound: outbound_tx }))
        }
    }

    pub struct FakeTransport {
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&mut self, text: String) -> Result<(), TransportError> {
            self.outbound.send(text).map_err(|_| TransportError::Closed)
        }

        async fn recv(&mut self) -> Option<Result<String, TransportError>> {
            self.inbound.recv().await.map(Ok)
        }

        async fn close(&mut self) {
            self.inbound.close();
        }
    }
}
