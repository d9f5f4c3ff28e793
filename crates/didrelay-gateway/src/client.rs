//! Relay client
//!
//! A thin WebSocket client that registers an identifier on connect and
//! speaks the relay envelope format. Used by peers embedding the relay and by
//! the integration tests.

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::protocol::REGISTER_TYPE;

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connection to a relay, registered under one identifier
pub struct RelayClient {
    did: String,
    stream: Stream,
}

impl RelayClient {
    /// Connect to `url` and register as `did`
    pub async fn connect<R>(url: R, did: impl Into<String>) -> Result<Self, ClientError>
    where
        R: IntoClientRequest + Unpin,
    {
        let (stream, _response) = connect_async(url).await?;
        let mut client = Self {
            did: did.into(),
            stream,
        };
        client.register().await?;
        Ok(client)
    }

    /// Identifier this client registered as
    pub fn did(&self) -> &str {
        &self.did
    }

    /// Re-send the registration envelope for this client's identifier
    pub async fn register(&mut self) -> Result<(), ClientError> {
        let frame = json!({ "type": REGISTER_TYPE, "did": self.did }).to_string();
        self.send_raw(frame).await
    }

    /// Send a routed message from this client to `to`
    pub async fn send_to(
        &mut self,
        to: &str,
        kind: &str,
        payload: Value,
    ) -> Result<(), ClientError> {
        let frame = json!({
            "type": kind,
            "from": self.did,
            "to": to,
            "payload": payload,
        })
        .to_string();
        self.send_raw(frame).await
    }

    /// Send a text frame as-is
    pub async fn send_raw(&mut self, frame: impl Into<String>) -> Result<(), ClientError> {
        self.stream.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    /// Wait for the next text frame; `None` once the relay closes the stream
    pub async fn recv_text(&mut self) -> Result<Option<String>, ClientError> {
        while let Some(message) = self.stream.next().await {
            match message? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Close(_) => break,
                other => debug!("Ignoring non-text frame: {:?}", other),
            }
        }
        Ok(None)
    }

    /// Wait for the next frame and decode it as JSON
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ClientError> {
        match self.recv_text().await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient").field("did", &self.did).finish()
    }
}

/// Client-side errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
