//! WebSocket Transport
//!
//! `tokio-tungstenite` implementation of the duplex stream port. Protocol
//! level ping/pong frames are handled by tungstenite; only text payloads
//! reach the supervisor.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{
    DuplexConnection, DuplexConnector, FrameSink, FrameSource, StreamError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens user-stream connections over WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DuplexConnector for WebSocketConnector {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<DuplexConnection, StreamError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| StreamError::Connect(format!("invalid header {key}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| StreamError::Connect(format!("invalid header {key}: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        let (write, read) = ws_stream.split();

        Ok(DuplexConnection {
            sink: Box::new(WebSocketSink { write }),
            source: Box::new(WebSocketSource { read }),
        })
    }
}

struct WebSocketSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), StreamError> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| StreamError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.write
            .close()
            .await
            .map_err(|e| StreamError::Send(e.to_string()))
    }
}

struct WebSocketSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Option<Result<String, StreamError>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!(len = data.len(), "Received non-UTF8 binary message");
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Server sent close frame");
                    return Some(Err(StreamError::Closed));
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(StreamError::Receive(e.to_string()))),
            }
        }
    }
}
