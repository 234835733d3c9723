//! Connection-multiplexing dialer for services inside remote sandboxed targets.
//!
//! A dial turns a `<scope>.<target>:<port>` string into a bidirectional byte
//! stream. The dialer asks an external [`StreamTransport`] to upgrade a request
//! against `{scope, target}` into a [`MultiplexedConnection`], opens a paired
//! error channel and data channel on it, and returns the data channel wrapped
//! in a [`ConnectionAdapter`] that also owns the connection.
//!
//! ## Architectural Layer
//!
//! **Protocol layering + port definitions.** This crate never speaks the
//! multiplexing wire encoding. It defines *what* a transport must provide in
//! [`transport`]; infrastructure crates (for example `loopback`) define *how*.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`address`] | Address grammar (`LogicalAddress`, `AddressError`) |
//! | [`identifiers`] | Newtypes for address segments and correlation ids |
//! | [`transport`] | Transport port traits and channel descriptors |
//! | [`monitor`] | Background draining of the error channel |
//! | [`adapter`] | The connection object returned to callers |
//! | [`dialer`] | Dial orchestration, cancellation, dial hook |
//! | [`config`] | `DialerConfig` loading and validation |
//! | [`errors`] | Dial and transport errors, retry policy |

pub mod adapter;
pub mod address;
mod channels;
pub mod config;
pub mod dialer;
pub mod errors;
pub mod identifiers;
pub mod monitor;
pub mod transport;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use adapter::{ConnectionAdapter, LocalAddr};
pub use address::{AddressError, Endpoint, LogicalAddress};
pub use config::{ConfigError, DialerConfig};
pub use dialer::{DialHook, Dialer};
pub use errors::{CancelReason, DialError, DialStage, RetryPolicy, TransportError};
pub use identifiers::{DialId, Port, RequestId, Scope, Target};
pub use monitor::{ErrorMonitor, MonitorHandle, MonitorOutcome};
pub use transport::{
    BoxedChannel, Channel, ChannelKind, ChannelSpec, MultiplexedConnection, StreamTransport,
};
