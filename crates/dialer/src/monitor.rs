//! Background draining of the error channel.
//!
//! The remote side declares at most one error per connection by writing it to
//! the error channel and closing the channel. By the time that can happen the
//! dial has already returned, so the diagnostic is logged rather than returned
//! to anyone.

use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::{BoxedChannel, LogicalAddress};

/// How an error monitor finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The channel ended without a payload.
    Clean,
    /// The remote reported this diagnostic (lossy UTF-8, possibly truncated).
    RemoteError(String),
    /// Reading the channel failed.
    ReadFailed(String),
    /// The connection was closed locally or the dialer shut down first.
    Stopped,
}

/// Handle to a spawned error monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    task: JoinHandle<MonitorOutcome>,
}

impl MonitorHandle {
    /// Returns `true` once the monitor task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the monitor to finish. Returns `None` if the task panicked or
    /// was aborted by the runtime.
    pub async fn join(self) -> Option<MonitorOutcome> {
        self.task.await.ok()
    }
}

/// Drains an error channel and logs what the remote reported.
pub struct ErrorMonitor;

impl ErrorMonitor {
    /// Spawns [`ErrorMonitor::drain`] on `tracker` inside the current span.
    pub fn spawn(
        tracker: &TaskTracker,
        channel: BoxedChannel,
        address: LogicalAddress,
        limit: usize,
        shutdown: CancellationToken,
    ) -> MonitorHandle {
        let task = tracker.spawn(
            async move { Self::drain(channel, &address, limit, shutdown).await }
                .instrument(tracing::Span::current()),
        );
        MonitorHandle { task }
    }

    /// Reads `channel` to end-of-stream, keeping at most `limit` bytes.
    ///
    /// Emits exactly one error event for a read failure or a non-empty
    /// payload, and nothing above debug otherwise. Returns early with
    /// [`MonitorOutcome::Stopped`] once `shutdown` is cancelled.
    pub async fn drain(
        mut channel: BoxedChannel,
        address: &LogicalAddress,
        limit: usize,
        shutdown: CancellationToken,
    ) -> MonitorOutcome {
        let mut payload = Vec::new();
        let read = tokio::select! {
            biased;
            read = Self::read_report(&mut channel, limit, &mut payload) => read,
            () = shutdown.cancelled() => {
                tracing::debug!(%address, "error monitor stopped before the channel ended");
                return MonitorOutcome::Stopped;
            }
        };

        match read {
            Err(error) => {
                tracing::error!(%address, %error, "reading from the error channel failed");
                MonitorOutcome::ReadFailed(error.to_string())
            }
            Ok(_) if payload.is_empty() => {
                tracing::debug!(%address, "error channel closed without a report");
                MonitorOutcome::Clean
            }
            Ok(_) => {
                let message = String::from_utf8_lossy(&payload).into_owned();
                tracing::error!(
                    %address,
                    remote_error = %message,
                    "remote reported an error connecting to the forwarded port"
                );
                MonitorOutcome::RemoteError(message)
            }
        }
    }

    /// Keeps the first `limit` bytes and discards the rest until end-of-stream,
    /// so the remote can always finish writing its report.
    async fn read_report(
        channel: &mut BoxedChannel,
        limit: usize,
        payload: &mut Vec<u8>,
    ) -> std::io::Result<()> {
        let mut limited = (&mut *channel).take(limit as u64);
        limited.read_to_end(payload).await?;
        tokio::io::copy(channel, &mut tokio::io::sink()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
    use tracing::Level;

    use super::*;
    use crate::test_support::capture_events;

    fn address() -> LogicalAddress {
        LogicalAddress::parse("default.redis-0:6379").unwrap()
    }

    struct FailingChannel;

    impl AsyncRead for FailingChannel {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "stream reset",
            )))
        }
    }

    impl AsyncWrite for FailingChannel {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn payload_is_logged_once_at_error() {
        let (events, _guard) = capture_events();
        let channel: BoxedChannel = Box::new(Cursor::new(b"boom".to_vec()));

        let outcome =
            ErrorMonitor::drain(channel, &address(), 1024, CancellationToken::new()).await;

        assert_eq!(outcome, MonitorOutcome::RemoteError("boom".to_string()));
        let errors = events.at_level(Level::ERROR);
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("boom"));
        assert!(events.at_level(Level::WARN).is_empty());
    }

    #[tokio::test]
    async fn empty_channel_logs_nothing() {
        let (events, _guard) = capture_events();
        let channel: BoxedChannel = Box::new(Cursor::new(Vec::new()));

        let outcome =
            ErrorMonitor::drain(channel, &address(), 1024, CancellationToken::new()).await;

        assert_eq!(outcome, MonitorOutcome::Clean);
        assert!(events.at_level(Level::ERROR).is_empty());
        assert!(events.at_level(Level::WARN).is_empty());
        assert!(events.at_level(Level::INFO).is_empty());
    }

    #[tokio::test]
    async fn read_failure_is_logged_at_error() {
        let (events, _guard) = capture_events();
        let channel: BoxedChannel = Box::new(FailingChannel);

        let outcome =
            ErrorMonitor::drain(channel, &address(), 1024, CancellationToken::new()).await;

        assert!(matches!(outcome, MonitorOutcome::ReadFailed(ref e) if e.contains("stream reset")));
        let errors = events.at_level(Level::ERROR);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("stream reset"));
    }

    #[tokio::test]
    async fn payload_is_truncated_to_the_limit() {
        let channel: BoxedChannel = Box::new(Cursor::new(b"0123456789".to_vec()));
        let outcome = ErrorMonitor::drain(channel, &address(), 4, CancellationToken::new()).await;
        assert_eq!(outcome, MonitorOutcome::RemoteError("0123".to_string()));
    }

    #[tokio::test]
    async fn oversized_report_is_drained_to_the_end() {
        let (local, mut peer) = tokio::io::duplex(8);
        let writer = tokio::spawn(async move {
            peer.write_all(&[b'x'; 256]).await?;
            peer.shutdown().await
        });

        let outcome =
            ErrorMonitor::drain(Box::new(local), &address(), 4, CancellationToken::new()).await;

        assert_eq!(outcome, MonitorOutcome::RemoteError("xxxx".to_string()));
        writer
            .await
            .unwrap()
            .expect("the remote could not finish its report");
    }

    #[tokio::test]
    async fn shutdown_unblocks_a_pending_monitor() {
        let (events, _guard) = capture_events();
        // Keep the peer alive so the read never completes on its own.
        let (local, _peer) = tokio::io::duplex(64);
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let handle = ErrorMonitor::spawn(
            &tracker,
            Box::new(local),
            address(),
            1024,
            shutdown.clone(),
        );
        shutdown.cancel();

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), handle.join())
            .await
            .expect("monitor did not stop");
        assert_eq!(outcome, Some(MonitorOutcome::Stopped));
        assert!(events.at_level(Level::ERROR).is_empty());
    }
}
