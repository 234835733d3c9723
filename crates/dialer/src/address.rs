//! The logical address grammar: `<scope>.<target>:<port>`.
//!
//! A [`LogicalAddress`] is the only textual surface of the dialer. It is
//! parsed once at the start of a dial and travels with the resulting
//! connection as its remote address. [`LogicalAddress::parse`] and the
//! [`Display`](std::fmt::Display) implementation are exact inverses.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Port, Scope, Target};

/// Network name reported for both ends of a forwarded connection.
pub const NETWORK: &str = "port-forwarding";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The rule of the address grammar an input string violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// No `.` separates the scope from the target.
    #[error("missing '.' between scope and target")]
    MissingScopeDelimiter,

    /// The scope before the first `.` is empty.
    #[error("scope is empty")]
    EmptyScope,

    /// No `:` introduces the port.
    #[error("missing ':' before the port")]
    MissingPortDelimiter,

    /// The target between the scope and the port is empty.
    #[error("target is empty")]
    EmptyTarget,

    /// The port is not a non-empty run of decimal digits.
    #[error("port {0:?} is not a decimal number")]
    InvalidPort(String),

    /// The port is decimal but larger than [`Port::MAX`].
    #[error("port {0} is out of range")]
    PortOutOfRange(String),
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// The `{scope, target}` pair the upgrade request is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Isolation scope of the target.
    pub scope: Scope,
    /// Execution target within the scope.
    pub target: Target,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.scope, self.target)
    }
}

// ---------------------------------------------------------------------------
// LogicalAddress
// ---------------------------------------------------------------------------

/// A service port on a target inside a scope.
///
/// Serialises as its string form so it can be embedded in configuration and
/// structured log output unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalAddress {
    scope: Scope,
    target: Target,
    port: Port,
}

impl LogicalAddress {
    /// Creates an address from already-validated parts.
    pub fn new(scope: Scope, target: Target, port: Port) -> Self {
        Self {
            scope,
            target,
            port,
        }
    }

    /// Parses `<scope>.<target>:<port>`.
    ///
    /// The scope runs up to the first `.`, the target up to the following
    /// `:`, and the remainder must be decimal digits.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let (scope, rest) = input
            .split_once(Scope::DELIMITER)
            .ok_or(AddressError::MissingScopeDelimiter)?;
        let scope = Scope::new(scope).ok_or(AddressError::EmptyScope)?;

        let (target, port) = rest
            .split_once(Target::DELIMITER)
            .ok_or(AddressError::MissingPortDelimiter)?;
        let target = Target::new(target).ok_or(AddressError::EmptyTarget)?;

        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AddressError::InvalidPort(port.to_string()));
        }
        let port = port
            .parse::<u32>()
            .ok()
            .and_then(Port::new)
            .ok_or_else(|| AddressError::PortOutOfRange(port.to_string()))?;

        Ok(Self::new(scope, target, port))
    }

    /// Returns the scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Returns the target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Returns the port.
    pub fn port(&self) -> Port {
        self.port
    }

    /// Returns the `{scope, target}` pair to upgrade against.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            scope: self.scope.clone(),
            target: self.target.clone(),
        }
    }

    /// Name of the network this address belongs to.
    pub fn network(&self) -> &'static str {
        NETWORK
    }
}

impl std::fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}:{}", self.scope, self.target, self.port)
    }
}

impl FromStr for LogicalAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LogicalAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LogicalAddress> for String {
    fn from(value: LogicalAddress) -> Self {
        value.to_string()
    }
}
