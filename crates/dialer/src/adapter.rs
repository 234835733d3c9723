//! The connection object handed back to dial callers.
//!
//! A [`ConnectionAdapter`] is the single owner of both resources a dial
//! produces: the data channel and the physical connection it lives on. It
//! reads and writes through the data channel and releases both together,
//! either through [`ConnectionAdapter::close`] or when dropped.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::address::NETWORK;
use crate::{BoxedChannel, LogicalAddress, MonitorHandle, MultiplexedConnection};

// ---------------------------------------------------------------------------
// ConnectionGuard
// ---------------------------------------------------------------------------

/// Owns a physical connection and closes it exactly once, at the latest when
/// dropped.
///
/// Closing also cancels `closed`, which stops the connection's error monitor.
pub(crate) struct ConnectionGuard {
    connection: Box<dyn MultiplexedConnection>,
    closed: CancellationToken,
    open: bool,
}

impl ConnectionGuard {
    pub(crate) fn new(connection: Box<dyn MultiplexedConnection>, closed: CancellationToken) -> Self {
        Self {
            connection,
            closed,
            open: true,
        }
    }

    pub(crate) fn connection(&self) -> &dyn MultiplexedConnection {
        self.connection.as_ref()
    }

    pub(crate) fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.closed.cancel();
        if let Err(error) = self.connection.close() {
            tracing::debug!(%error, "closing the multiplexed connection failed");
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Local address placeholder
// ---------------------------------------------------------------------------

/// The local end of a forwarded connection.
///
/// The remote routing service terminates the physical connection, so there is
/// no meaningful local socket address to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LocalAddr;

impl LocalAddr {
    /// Name of the network this address belongs to.
    pub fn network(&self) -> &'static str {
        NETWORK
    }
}

impl std::fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("apiserver")
    }
}

// ---------------------------------------------------------------------------
// ConnectionAdapter
// ---------------------------------------------------------------------------

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection is closed")
}

/// A bidirectional byte stream to a port inside a remote target.
///
/// Reads and writes go to the data channel. Concurrent reads and writes from
/// separate tasks are supported through [`tokio::io::split`]; closing while a
/// read or write is in flight resolves that call to an error.
pub struct ConnectionAdapter {
    data: Option<BoxedChannel>,
    connection: ConnectionGuard,
    remote: LogicalAddress,
    monitor: Option<MonitorHandle>,
}

impl ConnectionAdapter {
    pub(crate) fn new(
        data: BoxedChannel,
        connection: ConnectionGuard,
        remote: LogicalAddress,
        monitor: MonitorHandle,
    ) -> Self {
        Self {
            data: Some(data),
            connection,
            remote,
            monitor: Some(monitor),
        }
    }

    /// Closes the data channel and then the physical connection.
    ///
    /// Idempotent: later calls return `Ok(())` without doing anything.
    /// Teardown failures are logged and never returned.
    pub async fn close(&mut self) -> io::Result<()> {
        if let Some(mut data) = self.data.take() {
            if let Err(error) = data.shutdown().await {
                tracing::debug!(address = %self.remote, %error, "closing the data channel failed");
            }
        }
        self.connection.close();
        Ok(())
    }

    /// Returns `true` until [`ConnectionAdapter::close`] has been called.
    pub fn is_open(&self) -> bool {
        self.data.is_some()
    }

    /// Returns the placeholder local address.
    pub fn local_addr(&self) -> LocalAddr {
        LocalAddr
    }

    /// Returns the address this connection was dialed with.
    pub fn remote_addr(&self) -> &LogicalAddress {
        &self.remote
    }

    /// Takes the handle of this connection's error monitor so the caller can
    /// wait for it. Returns `None` on every call after the first.
    pub fn take_error_monitor(&mut self) -> Option<MonitorHandle> {
        self.monitor.take()
    }

    /// Accepted for interface compatibility; has no effect.
    ///
    /// Channels have no deadline primitive. Bound the dial with the dialer's
    /// cancellation token or timeout, and wrap individual reads and writes in
    /// `tokio::time::timeout` where needed.
    pub fn set_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    /// Accepted for interface compatibility; has no effect.
    pub fn set_read_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    /// Accepted for interface compatibility; has no effect.
    pub fn set_write_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionAdapter")
            .field("remote", &self.remote)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl AsyncRead for ConnectionAdapter {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.data.as_mut() {
            Some(data) => Pin::new(data).poll_read(cx, buf),
            None => Poll::Ready(Err(not_connected())),
        }
    }
}

impl AsyncWrite for ConnectionAdapter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.data.as_mut() {
            Some(data) => Pin::new(data).poll_write(cx, buf),
            None => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.data.as_mut() {
            Some(data) => Pin::new(data).poll_flush(cx),
            None => Poll::Ready(Err(not_connected())),
        }
    }

    /// Half-closes the data channel. Use [`ConnectionAdapter::close`] to
    /// release the connection.
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.data.as_mut() {
            Some(data) => Pin::new(data).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
