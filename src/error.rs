//! Error types for limiter operations.
use std::fmt;

/// Unified error type for limiter operations.
///
/// `E` is the counter store's transport error, surfaced verbatim. A missing
/// counter record is never an error anywhere in this crate; it reads as a
/// count of zero.
#[derive(Debug, Clone)]
pub enum LimitError<E> {
    /// The store call itself failed (connection, timeout, protocol).
    Store(E),
    /// A counter record held something other than an integer.
    Corrupt { key: String, value: String },
    /// The conditional increment kept losing to concurrent writers and the
    /// retry budget ran out.
    Contention { key: String, retries: usize },
}

impl<E: fmt::Display> fmt::Display for LimitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "counter store: {}", e),
            Self::Corrupt { key, value } => {
                write!(f, "counter {:?} holds malformed value {:?}", key, value)
            }
            Self::Contention { key, retries } => {
                write!(f, "counter {:?} still contended after {} write attempts", key, retries)
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for LimitError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> LimitError<E> {
    /// Check if this error wraps a store failure.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
    /// Check if this error is a malformed counter value.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
    /// Check if this error is conflict-retry exhaustion.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention { .. })
    }
    /// Get the store error if this is a Store variant.
    pub fn into_store(self) -> Option<E> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the store error if present.
    pub fn as_store(&self) -> Option<&E> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
    /// Access corruption details as (key, raw value).
    pub fn corrupt_details(&self) -> Option<(&str, &str)> {
        match self {
            Self::Corrupt { key, value } => Some((key, value)),
            _ => None,
        }
    }
    /// Access the number of conditional writes lost before giving up.
    pub fn contention_retries(&self) -> Option<usize> {
        match self {
            Self::Contention { retries, .. } => Some(*retries),
            _ => None,
        }
    }
}
