//! Typed error taxonomy shared across the platform.
//!
//! Fatal conditions (`LaunchError`, `ValidationError`,
//! `UnsupportedOperationError`, `UnsupportedVersionError`) always propagate
//! to the sync's caller. `MalformedLineError` is recovered locally by the
//! stream parser: skipped, counted, and optionally diagnosed.

use thiserror::Error;

use crate::version::ProtocolVersion;

/// A connector process could not be created. Never retried by this core;
/// retry policy belongs to the caller.
#[derive(Debug, Error)]
#[error("failed to launch connector process '{image}'")]
pub struct LaunchError {
    pub image: String,
    #[source]
    pub source: std::io::Error,
}

/// A catalog or field-selection invariant was violated by the caller.
/// Surfaced before any process I/O begins.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("catalog validation failed: {message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A structurally valid but intentionally unimplemented request.
/// Distinct from `ValidationError` so callers can special-case
/// "not yet supported" versus caller error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported operation: {message}")]
pub struct UnsupportedOperationError {
    pub message: String,
}

impl UnsupportedOperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Catalog resolution failure: either a caller error or an intentionally
/// unimplemented request. The two cases stay categorically distinct.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Unsupported(#[from] UnsupportedOperationError),
}

/// No migration path exists between two protocol versions in the required
/// direction. Surfaced at handle-start time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no migration path from protocol version {from} to {to}")]
pub struct UnsupportedVersionError {
    pub from: ProtocolVersion,
    pub to: ProtocolVersion,
}

/// A single connector line failed to parse. Recovered locally: the sync
/// continues and the line is counted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed connector line ({size_bytes} bytes): {reason}")]
pub struct MalformedLineError {
    pub size_bytes: usize,
    pub reason: String,
}
