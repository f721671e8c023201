//! Channel Transport Abstraction
//!
//! The seam between the connection manager and the wire. `Transport` opens a
//! channel to an endpoint URL; `Channel` is the live handle carrying text
//! frames in both directions. The production implementation speaks WebSocket
//! over `tokio-tungstenite`; tests substitute scripted mocks.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use herenow_core::errors::{HerenowError, Result};

// ----------------------------------------------------------------------------
// Transport Traits
// ----------------------------------------------------------------------------

/// A frame received from the channel.
///
/// Transport-level errors and end-of-stream are folded into a single
/// `Closed` frame: the close, not the error, is what drives the lifecycle,
/// so one physical disconnect can never be handled twice.
#[derive(Debug)]
pub enum Frame {
    /// A text frame carrying a JSON envelope
    Text(String),
    /// The channel is gone, for whatever reason
    Closed { reason: String },
}

/// A live bidirectional channel
#[async_trait]
pub trait Channel: Send {
    /// Send a text frame
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Receive the next frame. After a `Closed` frame no further frames
    /// are delivered.
    async fn next_frame(&mut self) -> Frame;
}

/// Factory for opening channels to an endpoint
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a channel to the given URL. Resolves once the transport-level
    /// handshake completes or fails.
    async fn open(&self, url: &Url) -> Result<Box<dyn Channel>>;
}

// ----------------------------------------------------------------------------
// WebSocket Transport
// ----------------------------------------------------------------------------

/// Production transport speaking WebSocket over `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<Box<dyn Channel>> {
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| HerenowError::transport(e.to_string()))?;
        Ok(Box::new(WebSocketChannel { stream }))
    }
}

/// A live WebSocket channel
struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| HerenowError::transport(e.to_string()))
    }

    async fn next_frame(&mut self) -> Frame {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Frame::Text(text),
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by peer".to_string());
                    return Frame::Closed { reason };
                }
                // Binary, ping and pong frames are transport noise here;
                // tungstenite answers pings on its own.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Frame::Closed {
                        reason: e.to_string(),
                    }
                }
                None => {
                    return Frame::Closed {
                        reason: "stream ended".to_string(),
                    }
                }
            }
        }
    }
}
