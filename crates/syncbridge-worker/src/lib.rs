//! Sync mediation between a source and a destination connector process.
//!
//! The worker launches and supervises connector processes, reads and writes
//! the versioned line protocol through `syncbridge-protocol`, resolves the
//! catalog that scopes what a source may emit and a destination may receive,
//! and watches handle activity for silent sources and stuck writes.

pub mod catalog;
pub mod config;
pub mod destination;
pub mod errors;
pub mod handle;
pub mod launcher;
pub mod metrics;
pub mod monitor;
pub mod replication;
pub mod source;

pub use errors::SyncError;
pub use replication::{run_replication, ReplicationOptions, ReplicationSummary};
