//! Versioned wire protocol between the platform and connector processes.
//!
//! Connectors speak newline-delimited JSON at their declared protocol
//! version. This crate parses, validates, and migrates those lines to the
//! platform's canonical version on read, and back to the connector's version
//! on write. The migration registry is an explicit instance handed to parser
//! and writer construction; there is no global registry.

pub mod extract;
pub mod migrate;
pub mod parser;
pub mod registry;
pub mod writer;

pub use migrate::Migrator;
pub use parser::{InvalidLineOptions, MessageCounters, MessageCountsSnapshot, VersionedMessageStream};
pub use registry::VersionRegistry;
pub use writer::VersionedMessageWriter;
