//! Error and retry-policy types for dialing.
//!
//! [`DialError`] is the only error `Dialer::dial` returns. It separates caller
//! mistakes ([`DialError::InvalidAddress`]) from remote or transport failures
//! ([`DialError::UpgradeFailed`], [`DialError::OpenChannelFailed`]) and from
//! cancellation ([`DialError::DialCancelled`]).
//!
//! [`TransportError`] is what implementations of the transport port traits
//! return; the dialer wraps it as the source of the variant for the step that
//! failed.
//!
//! Diagnostics the remote pushes on the error channel after a dial succeeded
//! are never turned into a [`DialError`]; they are only logged.

use std::time::Duration;

use thiserror::Error;

use crate::{AddressError, ChannelKind};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// The dialer never retries on its own; this lets the caller decide without
/// matching on every variant.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry
        /// immediately or apply the caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// Retrying with the same input cannot succeed.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Failure reported by a [`crate::StreamTransport`] or
/// [`crate::MultiplexedConnection`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote routing service refused the request.
    #[error("remote rejected the request (status {status}): {message}")]
    Rejected {
        /// Status code reported by the remote service.
        status: u16,
        /// Reason given by the remote service.
        message: String,
    },

    /// The connection was already closed.
    #[error("connection is closed")]
    Closed,

    /// I/O failure on the underlying physical connection.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Any other failure of the external transport library.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Wraps an arbitrary transport library error.
    pub fn other(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(error.into())
    }
}

// ---------------------------------------------------------------------------
// Dial errors
// ---------------------------------------------------------------------------

/// The blocking step a dial was in when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialStage {
    /// Waiting for the upgrade handshake.
    Upgrade,
    /// Waiting for the error channel to open.
    OpenErrorChannel,
    /// Waiting for the data channel to open.
    OpenDataChannel,
}

impl DialStage {
    /// Stage in which opening a channel of `kind` blocks.
    pub fn opening(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Error => Self::OpenErrorChannel,
            ChannelKind::Data => Self::OpenDataChannel,
        }
    }
}

impl std::fmt::Display for DialStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Upgrade => "upgrade",
            Self::OpenErrorChannel => "error channel open",
            Self::OpenDataChannel => "data channel open",
        })
    }
}

/// Why a dial was abandoned before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The caller's cancellation token fired.
    Cancelled,
    /// The configured dial timeout elapsed.
    TimedOut,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed out",
        })
    }
}

/// Errors returned by `Dialer::dial`.
///
/// Whenever a physical connection was established before the error occurred,
/// it has been closed by the time the error is returned.
#[derive(Debug, Error)]
pub enum DialError {
    /// The address string does not match `<scope>.<target>:<port>`.
    ///
    /// No connection was attempted.
    #[error("invalid address {input:?}: {source}; must match <scope>.<target>:<port number>")]
    InvalidAddress {
        /// The rejected input.
        input: String,
        /// The grammar rule that failed.
        #[source]
        source: AddressError,
    },

    /// The remote endpoint or the transport failed the upgrade handshake.
    ///
    /// No channel was opened.
    #[error("upgrade to {endpoint} failed")]
    UpgradeFailed {
        /// `scope/target` the upgrade was addressed to.
        endpoint: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The handshake succeeded but a channel could not be opened.
    #[error("opening {kind} channel to {address} failed")]
    OpenChannelFailed {
        /// Which channel failed.
        kind: ChannelKind,
        /// The dialed address.
        address: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The dial was cancelled or timed out during a blocking step.
    #[error("dial to {address} {reason} during {stage}")]
    DialCancelled {
        /// The dialed address.
        address: String,
        /// The step that was in progress.
        stage: DialStage,
        /// Cancellation or timeout.
        reason: CancelReason,
    },
}

impl DialError {
    /// Returns whether the caller may retry the same dial.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::InvalidAddress { .. } | Self::DialCancelled { .. } => RetryPolicy::NonRetryable,
            Self::UpgradeFailed { .. } | Self::OpenChannelFailed { .. } => {
                RetryPolicy::Retryable { after: None }
            }
        }
    }
}
