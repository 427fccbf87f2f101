//! Top-level sync error model.
//!
//! Typed conditions carry their taxonomy from `syncbridge-types`; everything
//! host-side and opaque (channel failures, task panics, process I/O) is
//! `Infrastructure`. Per-line and per-monitor conditions never appear here:
//! malformed lines are absorbed by the parser and monitor trips are advisory
//! flags on the replication summary.

use thiserror::Error;

use syncbridge_types::errors::{CatalogError, LaunchError, UnsupportedVersionError};

#[derive(Debug, Error)]
pub enum SyncError {
    /// A connector process could not be created.
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// A catalog or field-selection invariant was violated, or the catalog
    /// requested an intentionally unimplemented operation.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// No migration path between the connector's declared protocol version
    /// and the canonical version.
    #[error(transparent)]
    UnsupportedVersion(#[from] UnsupportedVersionError),
    /// Opaque host-side failure (process I/O, channels, task panics).
    #[error("sync infrastructure failure: {0}")]
    Infrastructure(#[from] anyhow::Error),
}

impl SyncError {
    /// True when the condition was caused by the caller's configuration
    /// rather than the runtime environment.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::Catalog(_) | Self::UnsupportedVersion(_))
    }
}
