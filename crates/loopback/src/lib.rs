//! In-process transport adapter for the portdial dialer.
//!
//! Implements [`dialer::StreamTransport`] without a network: every channel is
//! a [`tokio::io::duplex`] pipe whose far end is served by a registered
//! [`PortHandler`]. It behaves like the remote routing service the dialer is
//! normally pointed at:
//!
//! - upgrading against an unknown `{scope, target}` is rejected with status 404;
//! - a data channel to a port nothing serves opens successfully, then the
//!   remote writes a diagnostic onto the paired error channel and closes both;
//! - closing the connection tears down every channel and handler task on it.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Used by the `portdial` CLI and by end-to-end tests. The
//! [`dialer`] crate sees only [`dialer::StreamTransport`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dialer::{
    BoxedChannel, ChannelKind, ChannelSpec, Endpoint, LogicalAddress, MultiplexedConnection,
    RequestId, StreamTransport, TransportError,
};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinSet;

/// Pipe capacity used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Port handlers
// ---------------------------------------------------------------------------

/// Serves the remote end of one data channel.
#[async_trait]
pub trait PortHandler: Send + Sync {
    /// Handles a forwarded stream until either side closes it.
    async fn serve(&self, stream: DuplexStream);
}

/// Writes back everything it reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

#[async_trait]
impl PortHandler for Echo {
    async fn serve(&self, stream: DuplexStream) {
        let (mut reader, mut writer) = tokio::io::split(stream);
        match tokio::io::copy(&mut reader, &mut writer).await {
            Ok(bytes) => tracing::trace!(bytes, "echo finished"),
            Err(error) => tracing::debug!(%error, "echo stopped"),
        }
        let _ = writer.shutdown().await;
    }
}

type Ports = HashMap<u32, Arc<dyn PortHandler>>;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Registers handlers for a [`LoopbackTransport`].
#[derive(Default)]
pub struct LoopbackBuilder {
    targets: HashMap<Endpoint, Ports>,
    buffer_size: Option<usize>,
}

impl LoopbackBuilder {
    /// Serves `handler` on the port of `address`; replaces any earlier handler
    /// for that port.
    pub fn serve(mut self, address: &LogicalAddress, handler: impl PortHandler + 'static) -> Self {
        self.targets
            .entry(address.endpoint())
            .or_default()
            .insert(address.port().as_u32(), Arc::new(handler));
        self
    }

    /// Makes `{scope, target}` of `address` reachable without serving any port.
    pub fn target(mut self, address: &LogicalAddress) -> Self {
        self.targets.entry(address.endpoint()).or_default();
        self
    }

    /// Sets the capacity of every channel pipe.
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = Some(bytes);
        self
    }

    /// Finishes the transport.
    pub fn build(self) -> LoopbackTransport {
        LoopbackTransport {
            targets: self
                .targets
                .into_iter()
                .map(|(endpoint, ports)| (endpoint, Arc::new(ports)))
                .collect(),
            buffer_size: self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE).max(1),
        }
    }
}

/// A [`StreamTransport`] whose targets live in the current process.
pub struct LoopbackTransport {
    targets: HashMap<Endpoint, Arc<Ports>>,
    buffer_size: usize,
}

impl LoopbackTransport {
    /// Starts registering targets.
    pub fn builder() -> LoopbackBuilder {
        LoopbackBuilder::default()
    }

    /// Opens a connection directly, bypassing the [`StreamTransport`] trait
    /// object. Mainly useful to inspect connection state in tests.
    pub fn connect(&self, endpoint: &Endpoint) -> Result<LoopbackConnection, TransportError> {
        let ports = self
            .targets
            .get(endpoint)
            .ok_or_else(|| TransportError::Rejected {
                status: 404,
                message: format!("target {endpoint} not found"),
            })?;
        tracing::debug!(%endpoint, "loopback upgrade accepted");
        Ok(LoopbackConnection {
            ports: Arc::clone(ports),
            buffer_size: self.buffer_size,
            state: Mutex::new(ConnectionState::default()),
        })
    }
}

#[async_trait]
impl StreamTransport for LoopbackTransport {
    async fn upgrade(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn MultiplexedConnection>, TransportError> {
        let connection: Box<dyn MultiplexedConnection> = Box::new(self.connect(endpoint)?);
        Ok(connection)
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ConnectionState {
    closed: bool,
    /// Remote ends of error channels not yet claimed by a data channel.
    error_ends: HashMap<RequestId, DuplexStream>,
    /// Remote-side work: port handlers and error reporters.
    tasks: JoinSet<()>,
}

/// One simulated multiplexed connection.
pub struct LoopbackConnection {
    ports: Arc<Ports>,
    buffer_size: usize,
    state: Mutex<ConnectionState>,
}

impl LoopbackConnection {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        // A poisoned lock only means a panic elsewhere; the state stays usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `true` once [`MultiplexedConnection::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn open(&self, spec: &ChannelSpec) -> Result<BoxedChannel, TransportError> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }

        let (local, remote) = tokio::io::duplex(self.buffer_size);
        match spec.kind {
            ChannelKind::Error => {
                state.error_ends.insert(spec.request_id, remote);
            }
            ChannelKind::Data => {
                let error_end = state.error_ends.remove(&spec.request_id);
                match self.ports.get(&spec.port.as_u32()) {
                    Some(handler) => {
                        let handler = Arc::clone(handler);
                        state.tasks.spawn(async move { handler.serve(remote).await });
                        // The error end is dropped: the remote has nothing to report.
                        drop(error_end);
                    }
                    None => {
                        drop(remote);
                        let message = format!(
                            "error forwarding port {}: connection refused, nothing is listening",
                            spec.port
                        );
                        tracing::debug!(port = %spec.port, "loopback port not served");
                        if let Some(mut error_end) = error_end {
                            state.tasks.spawn(async move {
                                let _ = error_end.write_all(message.as_bytes()).await;
                                let _ = error_end.shutdown().await;
                            });
                        }
                    }
                }
            }
        }
        Ok(Box::new(local))
    }
}

#[async_trait]
impl MultiplexedConnection for LoopbackConnection {
    async fn open_channel(&self, spec: &ChannelSpec) -> Result<BoxedChannel, TransportError> {
        self.open(spec)
    }

    fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.tasks.abort_all();
        state.error_ends.clear();
        tracing::debug!("loopback connection closed");
        Ok(())
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        let _ = MultiplexedConnection::close(self);
    }
}

#[cfg(test)]
mod tests {
    use dialer::Port;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn address(s: &str) -> LogicalAddress {
        s.parse().unwrap()
    }

    fn spec(kind: ChannelKind, port: u32) -> ChannelSpec {
        ChannelSpec {
            kind,
            port: Port::new(port).unwrap(),
            request_id: RequestId::SINGLE_PAIR,
        }
    }

    #[tokio::test]
    async fn unknown_target_is_rejected_with_404() {
        let transport = LoopbackTransport::builder().build();
        let err = transport
            .upgrade(&address("default.missing:80").endpoint())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn echo_handler_answers_on_the_data_channel() {
        let target = address("default.echo:7");
        let transport = LoopbackTransport::builder().serve(&target, Echo).build();
        let conn = transport.connect(&target.endpoint()).unwrap();

        let _error = conn.open_channel(&spec(ChannelKind::Error, 7)).await.unwrap();
        let mut data = conn.open_channel(&spec(ChannelKind::Data, 7)).await.unwrap();

        data.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        data.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn unserved_port_reports_on_the_error_channel() {
        let target = address("default.idle:80");
        let transport = LoopbackTransport::builder().target(&target).build();
        let conn = transport.connect(&target.endpoint()).unwrap();

        let mut error = conn.open_channel(&spec(ChannelKind::Error, 80)).await.unwrap();
        let mut data = conn.open_channel(&spec(ChannelKind::Data, 80)).await.unwrap();

        let mut report = String::new();
        error.read_to_string(&mut report).await.unwrap();
        assert!(report.contains("port 80"), "{report}");

        let mut rest = Vec::new();
        assert_eq!(data.read_to_end(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn closed_connection_refuses_channels_and_ends_streams() {
        let target = address("default.echo:7");
        let transport = LoopbackTransport::builder().serve(&target, Echo).build();
        let conn = transport.connect(&target.endpoint()).unwrap();
        let mut error = conn.open_channel(&spec(ChannelKind::Error, 7)).await.unwrap();

        conn.close().unwrap();
        conn.close().unwrap();

        assert!(conn.is_closed());
        assert!(matches!(
            conn.open_channel(&spec(ChannelKind::Data, 7)).await,
            Err(TransportError::Closed)
        ));
        let mut rest = Vec::new();
        assert_eq!(error.read_to_end(&mut rest).await.unwrap(), 0);
    }
}
