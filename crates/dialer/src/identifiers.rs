//! Newtype identifiers for the pieces of a logical address and for the
//! correlation values attached to a dial.
//!
//! Every component of a [`crate::LogicalAddress`] is a distinct newtype so a
//! [`Scope`] can never be passed where a [`Target`] is expected, and so the
//! delimiter rules of the address grammar are enforced at construction time
//! rather than re-checked by every consumer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for delimiter-free String newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display,
// and serde conversions that re-run the validation.
// ---------------------------------------------------------------------------
macro_rules! segment_id {
    (
        $(#[$attr:meta])*
        $name:ident, forbids $delim:literal
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Character that may not appear in this segment.
            pub const DELIMITER: char = $delim;

            /// Creates a new segment, returning `None` if the value is empty or
            /// contains the delimiter.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() || v.contains(Self::DELIMITER) {
                    None
                } else {
                    Some(Self(v))
                }
            }

            /// Returns the segment as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value.clone()).ok_or_else(|| {
                    format!(
                        "{:?} is not a valid {}: must be non-empty and free of {:?}",
                        value,
                        stringify!($name),
                        $delim
                    )
                })
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Address segments
// ---------------------------------------------------------------------------

segment_id! {
    /// The isolation scope a target lives in (for example a namespace).
    ///
    /// The first `.` of an address string terminates the scope, so a scope can
    /// never contain one.
    Scope, forbids '.'
}

segment_id! {
    /// The sandboxed execution target within a [`Scope`] (for example a pod name).
    ///
    /// Targets may contain `.` but not `:`, which introduces the port.
    Target, forbids ':'
}

/// The service port inside the target.
///
/// Restricted to `[0, 2^31)`: the remote routing service carries ports as
/// signed 32-bit integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Port(u32);

impl Port {
    /// Largest representable port.
    pub const MAX: u32 = i32::MAX as u32;

    /// Creates a port, returning `None` if `value` exceeds [`Port::MAX`].
    pub fn new(value: u32) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the port number.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Port {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("port {value} exceeds {}", Self::MAX))
    }
}

impl From<Port> for u32 {
    fn from(value: Port) -> Self {
        value.0
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Correlation identifiers
// ---------------------------------------------------------------------------

/// Correlates the error and data channels that belong to one dial.
///
/// The remote side pairs channels by this value. Only one pair is ever opened
/// per physical connection, so every dial uses [`RequestId::SINGLE_PAIR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(u32);

impl RequestId {
    /// The identifier used for the one channel pair of a connection.
    pub const SINGLE_PAIR: RequestId = RequestId(1);

    /// Returns the underlying integer value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a single `dial` invocation.
///
/// Generated fresh for every call and attached to its tracing span so all
/// activity from one dial, including the error monitor it leaves behind, can
/// be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialId(Uuid);

impl DialId {
    /// Generates a new random dial identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for DialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
