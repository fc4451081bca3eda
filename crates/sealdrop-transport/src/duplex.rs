//! Persistent duplex channel to the store
//!
//! Wire protocol (all binary frames, in order):
//! ```text
//! → metadata block
//! → ciphertext chunk × N
//! → empty frame (end marker)
//! ← one text frame: session id
//! ```

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use sealdrop_core::{SealError, SealResult};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::store::transport_error;

/// A message received from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Binary(Bytes),
}

/// Ordered, message-oriented connection to the store
pub trait DuplexChannel {
    /// Send one frame; resolves once the frame was handed to the connection
    /// and flushed.
    fn send(&mut self, frame: Bytes) -> impl Future<Output = SealResult<()>> + Send;

    /// Next message from the store, `None` once the channel closed.
    fn recv(&mut self) -> impl Future<Output = SealResult<Option<Reply>>> + Send;
}

impl<C: DuplexChannel> DuplexChannel for &mut C {
    fn send(&mut self, frame: Bytes) -> impl Future<Output = SealResult<()>> + Send {
        (**self).send(frame)
    }

    fn recv(&mut self) -> impl Future<Output = SealResult<Option<Reply>>> + Send {
        (**self).recv()
    }
}

/// Derive the WebSocket endpoint from the HTTP API root.
///
/// `http://host/api` + `/upload/ws` → `ws://host/api/upload/ws`
pub fn duplex_url(server: &str, path: &str) -> SealResult<Url> {
    let mut url = Url::parse(server)
        .map_err(|e| SealError::Config(format!("invalid server URL {server:?}: {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SealError::Config(format!(
                "server URL scheme {other:?} has no WebSocket equivalent"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SealError::Config(format!("cannot switch {server} to {scheme}")))?;

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| SealError::Config(format!("server URL {server} cannot carry a path")))?;
        segments.pop_if_empty();
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
    }
    Ok(url)
}

/// [`DuplexChannel`] over a WebSocket
pub struct WsChannel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsChannel {
    pub async fn connect(url: &Url, connect_timeout: Duration) -> SealResult<Self> {
        let (ws, response) = timeout(connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| SealError::Transport(format!("WebSocket connect to {url} timed out")))?
            .map_err(|e| transport_error(&format!("WebSocket connect to {url}"), e))?;

        debug!(%url, status = %response.status(), "duplex channel open");
        Ok(Self { ws })
    }

    /// Close the channel after the exchange completed.
    pub async fn close(mut self) -> SealResult<()> {
        self.ws
            .close(None)
            .await
            .map_err(|e| transport_error("WebSocket close", e))
    }
}

impl DuplexChannel for WsChannel {
    async fn send(&mut self, frame: Bytes) -> SealResult<()> {
        trace!(len = frame.len(), "duplex send");
        // SinkExt::send flushes before resolving
        self.ws
            .send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|e| transport_error("WebSocket send", e))
    }

    async fn recv(&mut self) -> SealResult<Option<Reply>> {
        loop {
            let Some(message) = self.ws.next().await else {
                return Ok(None);
            };
            match message.map_err(|e| transport_error("WebSocket receive", e))? {
                Message::Text(text) => return Ok(Some(Reply::Text(text))),
                Message::Binary(data) => return Ok(Some(Reply::Binary(Bytes::from(data)))),
                Message::Close(frame) => {
                    debug!(?frame, "duplex channel closed by store");
                    return Ok(None);
                }
                // tungstenite answers pings on the next read/write
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}
