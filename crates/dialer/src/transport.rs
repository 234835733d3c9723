//! Port traits for the external multiplexing transport.
//!
//! The dialer never speaks the multiplexing wire protocol itself. It asks a
//! [`StreamTransport`] to upgrade a request against a remote endpoint and then
//! asks the resulting [`MultiplexedConnection`] for typed channels. Concrete
//! implementations (an HTTP upgrade client, the in-process loopback used in
//! tests) live in other crates.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Endpoint, Port, RequestId, TransportError};

// ---------------------------------------------------------------------------
// Header names understood by upgrade-style transports
// ---------------------------------------------------------------------------

/// Header carrying the [`ChannelKind`].
pub const STREAM_TYPE_HEADER: &str = "streamType";

/// Header carrying the target port.
pub const PORT_HEADER: &str = "port";

/// Header carrying the [`RequestId`] that pairs error and data channels.
pub const REQUEST_ID_HEADER: &str = "requestID";

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// The role of a channel within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Server-push only: carries at most one diagnostic from the remote.
    Error,
    /// Carries the forwarded byte stream in both directions.
    Data,
}

impl ChannelKind {
    /// Wire value of the stream-type header.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Data => "data",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the remote side needs to route a new channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Error or data.
    pub kind: ChannelKind,
    /// Port inside the target the channel is forwarded to.
    pub port: Port,
    /// Pairs this channel with its sibling.
    pub request_id: RequestId,
}

impl ChannelSpec {
    /// Returns the spec as `(name, value)` header pairs.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (STREAM_TYPE_HEADER, self.kind.as_str().to_string()),
            (PORT_HEADER, self.port.to_string()),
            (REQUEST_ID_HEADER, self.request_id.to_string()),
        ]
    }
}

/// A logical stream within a [`MultiplexedConnection`].
///
/// `AsyncWriteExt::shutdown` closes the local write half; the channel is
/// fully released when dropped or when its connection closes.
pub trait Channel: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Channel for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// An owned, type-erased channel.
pub type BoxedChannel = Box<dyn Channel>;

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// A physical connection that carries independent logical channels.
#[async_trait]
pub trait MultiplexedConnection: Send + Sync {
    /// Opens a new channel described by `spec`.
    async fn open_channel(&self, spec: &ChannelSpec) -> Result<BoxedChannel, TransportError>;

    /// Closes the physical connection, invalidating every channel on it.
    ///
    /// Synchronous so that it can run from `Drop`.
    fn close(&self) -> Result<(), TransportError>;
}

/// Upgrades a request against a remote endpoint into a
/// [`MultiplexedConnection`].
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Performs the upgrade handshake against `endpoint`.
    async fn upgrade(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn MultiplexedConnection>, TransportError>;
}
