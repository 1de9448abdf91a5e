//! Duplex Stream Port (Driven Port)
//!
//! Transport for the authenticated user stream. A connection is split into
//! a sink and a source so the supervisor can write probes while a receive
//! is pending.

use async_trait::async_trait;

/// Stream transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Could not establish the connection.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The peer closed the connection.
    #[error("connection closed by venue")]
    Closed,

    /// The venue refused the login request.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// No login reply in time.
    #[error("authentication timed out")]
    AuthTimeout,

    /// No inbound traffic within the staleness window.
    #[error("no inbound traffic for {0:?}")]
    Stale(std::time::Duration),
}

/// Writing half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), StreamError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), StreamError>;
}

/// Reading half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame; `None` once the connection has ended.
    async fn next_frame(&mut self) -> Option<Result<String, StreamError>>;
}

/// An open connection.
pub struct DuplexConnection {
    /// Writing half.
    pub sink: Box<dyn FrameSink>,
    /// Reading half.
    pub source: Box<dyn FrameSource>,
}

/// Port for opening user-stream connections.
#[async_trait]
pub trait DuplexConnector: Send + Sync {
    /// Connect to `url` with extra request headers.
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<DuplexConnection, StreamError>;
}
