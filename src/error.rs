//! # Data Link Layer Error Types
//!
//! The error taxonomy deliberately excludes transient link errors: CRC and
//! sequence failures are recovered locally via NAK + replay and never appear
//! at the API surface. What remains is backpressure, link-down, malformed
//! control packets, and configuration rejection.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Generic Result type for Data Link Layer operations
pub type Result<T> = core::result::Result<T, DllError>;

/// Unified error type for the DLL core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DllError {
    /// The retry buffer is full (or a replay is draining); the caller must
    /// hold the packet and retry. This is flow control, not data loss.
    #[error("transmit backpressure: retry buffer full or replay in progress")]
    Backpressure,

    /// The link is not trained to L0; submissions and control exchanges are
    /// refused until the LTSSM reports link-up again.
    #[error("link is down")]
    LinkDown,

    /// A control packet failed structural validation (length, CRC-16,
    /// unknown type, or nonzero reserved fields).
    #[error("malformed DLLP: {0}")]
    MalformedDllp(&'static str),

    /// Configuration rejected by [`crate::config::DllConfig::validate`].
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
