//! Dial orchestration.
//!
//! A dial parses the address, upgrades a request against the remote endpoint
//! into a multiplexed connection, opens the error and data channels, leaves an
//! [`ErrorMonitor`] draining the error channel, and hands the data channel back
//! wrapped in a [`ConnectionAdapter`].
//!
//! From the moment the upgrade succeeds the connection is owned by a
//! `ConnectionGuard`, so it is closed exactly once on every path that does not
//! end in a returned adapter, including the dial future being dropped.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::adapter::ConnectionGuard;
use crate::channels::ChannelSet;
use crate::{
    CancelReason, ConnectionAdapter, DialError, DialId, DialStage, DialerConfig, ErrorMonitor,
    LogicalAddress, RequestId, StreamTransport,
};

/// A dial callback taking a cancellation token and a `<scope>.<target>:<port>`
/// string, for plugging the dialer into code that accepts a custom connector.
pub type DialHook = Arc<
    dyn Fn(CancellationToken, String) -> BoxFuture<'static, Result<ConnectionAdapter, DialError>>
        + Send
        + Sync,
>;

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// The cancellation token and deadline every blocking step of one dial races.
pub(crate) struct Budget {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    address: String,
}

impl Budget {
    fn new(cancel: CancellationToken, config: &DialerConfig, address: &LogicalAddress) -> Self {
        Self {
            cancel,
            // A timeout too large to represent as an instant never expires.
            deadline: config
                .dial_timeout
                .and_then(|timeout| Instant::now().checked_add(timeout)),
            address: address.to_string(),
        }
    }

    /// Drives `step` unless the token fires or the deadline passes first.
    ///
    /// Cancellation wins ties so a cancelled dial never starts another step.
    pub(crate) async fn run<F: Future>(
        &self,
        stage: DialStage,
        step: F,
    ) -> Result<F::Output, DialError> {
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(self.abandoned(stage, CancelReason::Cancelled)),
            () = expired => Err(self.abandoned(stage, CancelReason::TimedOut)),
            output = step => Ok(output),
        }
    }

    fn abandoned(&self, stage: DialStage, reason: CancelReason) -> DialError {
        tracing::debug!(%stage, %reason, "dial abandoned");
        DialError::DialCancelled {
            address: self.address.clone(),
            stage,
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// Dialer
// ---------------------------------------------------------------------------

/// Establishes byte streams to ports inside remote targets.
///
/// Independent dials share nothing but the task tracker that owns their error
/// monitors, so a single `Dialer` can serve any number of concurrent calls.
pub struct Dialer {
    transport: Arc<dyn StreamTransport>,
    config: DialerConfig,
    monitors: TaskTracker,
    shutdown: CancellationToken,
}

impl Dialer {
    /// Creates a dialer over `transport`.
    pub fn new(transport: Arc<dyn StreamTransport>, config: DialerConfig) -> Self {
        Self {
            transport,
            config,
            monitors: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    /// Parses `address` and dials it.
    ///
    /// Fails with [`DialError::InvalidAddress`] before any network activity
    /// if the address is malformed.
    pub async fn dial(
        &self,
        cancel: &CancellationToken,
        address: &str,
    ) -> Result<ConnectionAdapter, DialError> {
        let parsed = LogicalAddress::parse(address).map_err(|source| DialError::InvalidAddress {
            input: address.to_string(),
            source,
        })?;
        self.dial_address(cancel, parsed).await
    }

    /// Dials an already-parsed address.
    pub async fn dial_address(
        &self,
        cancel: &CancellationToken,
        address: LogicalAddress,
    ) -> Result<ConnectionAdapter, DialError> {
        let dial_id = DialId::new_random();
        let span = tracing::info_span!("dial", %dial_id, %address);
        self.establish(cancel.clone(), address).instrument(span).await
    }

    /// Runs one dial. The error monitor is spawned only once both channels are
    /// open, so every successful dial gets exactly one and a failed dial none.
    async fn establish(
        &self,
        cancel: CancellationToken,
        address: LogicalAddress,
    ) -> Result<ConnectionAdapter, DialError> {
        let budget = Budget::new(cancel, &self.config, &address);
        let endpoint = address.endpoint();

        tracing::debug!(%endpoint, "requesting upgrade");
        let connection = budget
            .run(DialStage::Upgrade, self.transport.upgrade(&endpoint))
            .await?
            .map_err(|source| DialError::UpgradeFailed {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let monitor_shutdown = self.shutdown.child_token();
        let guard = ConnectionGuard::new(connection, monitor_shutdown.clone());

        let channels = ChannelSet::open(
            guard.connection(),
            &address,
            RequestId::SINGLE_PAIR,
            &budget,
        )
        .await?;

        let monitor = ErrorMonitor::spawn(
            &self.monitors,
            channels.error,
            address.clone(),
            self.config.max_error_message_bytes,
            monitor_shutdown,
        );

        tracing::info!("connection established");
        Ok(ConnectionAdapter::new(channels.data, guard, address, monitor))
    }

    /// Returns a [`DialHook`] backed by this dialer.
    pub fn hook(self: &Arc<Self>) -> DialHook {
        let dialer = Arc::clone(self);
        Arc::new(move |cancel: CancellationToken, address: String| {
            let dialer = Arc::clone(&dialer);
            async move { dialer.dial(&cancel, &address).await }.boxed()
        })
    }

    /// Number of error monitors still running.
    pub fn active_monitors(&self) -> usize {
        self.monitors.len()
    }

    /// Stops every error monitor and waits for them to finish.
    ///
    /// Connections already handed out stay open; only their monitors stop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.monitors.close();
        self.monitors.wait().await;
    }
}

impl std::fmt::Debug for Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("config", &self.config)
            .field("active_monitors", &self.monitors.len())
            .finish_non_exhaustive()
    }
}
