//! Persistent chat channel
//!
//! One WebSocket per session, token passed as a query parameter and an
//! `Origin` header on the handshake. The traits keep the session
//! engine independent of the transport so tests can substitute an
//! in-process channel.

use crate::config::TargetConfig;
use crate::engine::classify::{FailureKind, FailureSignal};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("connection timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    /// Raw signal for the failure classifier
    pub fn signal(&self) -> FailureSignal {
        match self {
            ChannelError::Handshake(msg) => FailureSignal::new(FailureKind::Handshake, msg.clone()),
            ChannelError::Closed(msg) => FailureSignal::new(FailureKind::Closed, msg.clone()),
            ChannelError::Timeout(msg) | ChannelError::Transport(msg) => {
                FailureSignal::new(FailureKind::Other, msg.clone())
            }
        }
    }
}

/// One established channel. Text frames only; the engine owns the
/// strict request/response alternation on top.
#[async_trait]
pub trait ChatChannel: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError>;

    /// Next inbound text frame. `None` means the channel is closed
    /// (cleanly by either side); an error means it broke.
    async fn next_message(&mut self) -> Option<Result<String, ChannelError>>;

    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Channel factory, one connect per session
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, token: &str) -> Result<Box<dyn ChatChannel>, ChannelError>;
}

fn handshake_error(e: tungstenite::Error) -> ChannelError {
    match e {
        // HTTP rejections carry the status the classifier keys on
        // ("502 Bad Gateway", "503 Service Unavailable", ...)
        tungstenite::Error::Http(response) => {
            ChannelError::Handshake(format!("server rejected handshake: HTTP {}", response.status()))
        }
        tungstenite::Error::Tls(e) => ChannelError::Handshake(format!("tls failure: {e}")),
        other => ChannelError::Handshake(other.to_string()),
    }
}

fn transport_error(e: tungstenite::Error) -> ChannelError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ChannelError::Closed("connection closed".to_string())
        }
        tungstenite::Error::Protocol(p) => ChannelError::Closed(p.to_string()),
        other => ChannelError::Transport(other.to_string()),
    }
}

/// Production connector over tokio-tungstenite
pub struct WsConnector {
    target: TargetConfig,
}

impl WsConnector {
    pub fn new(target: TargetConfig) -> Self {
        Self { target }
    }

    fn endpoint(&self, token: &str) -> String {
        format!("{}?token={}", self.target.websocket_url, token)
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, token: &str) -> Result<Box<dyn ChatChannel>, ChannelError> {
        let url = self.endpoint(token);
        let mut request = url
            .into_client_request()
            .map_err(|e| ChannelError::Handshake(format!("invalid endpoint: {e}")))?;

        let origin = HeaderValue::from_str(&self.target.websocket_origin)
            .map_err(|e| ChannelError::Handshake(format!("invalid origin header: {e}")))?;
        request.headers_mut().insert(ORIGIN, origin);

        let connect = connect_async(request);
        let (ws, _) = tokio::time::timeout(self.target.connect_timeout, connect)
            .await
            .map_err(|_| {
                ChannelError::Timeout("websocket connect timed out during handshake".to_string())
            })?
            .map_err(handshake_error)?;

        Ok(Box::new(WsChannel { ws }))
    }
}

struct WsChannel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ChatChannel for WsChannel {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(transport_error)
    }

    async fn next_message(&mut self) -> Option<Result<String, ChannelError>> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => return None,
                // Control and binary frames are irrelevant to the exchange
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(transport_error(e))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.ws.close(None).await.map_err(transport_error)
    }
}
