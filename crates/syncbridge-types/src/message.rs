//! Canonical message envelope exchanged with connector processes.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::SourceCatalog;

/// Canonical protocol message, tagged by the wire `type` field.
///
/// Consumers match exhaustively; adding a variant is a protocol change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolMessage {
    Record(RecordMessage),
    State(StateMessage),
    Log(LogMessage),
    Trace(TraceMessage),
    Catalog(CatalogMessage),
    ConnectionStatus(ConnectionStatusMessage),
    Spec(SpecMessage),
}

impl ProtocolMessage {
    /// Wire name of the message type, for counters and diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Record(_) => "RECORD",
            Self::State(_) => "STATE",
            Self::Log(_) => "LOG",
            Self::Trace(_) => "TRACE",
            Self::Catalog(_) => "CATALOG",
            Self::ConnectionStatus(_) => "CONNECTION_STATUS",
            Self::Spec(_) => "SPEC",
        }
    }
}

/// One emitted record, qualified by its stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordMessage {
    pub stream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Emission time, epoch milliseconds.
    pub emitted_at: i64,
    pub data: serde_json::Value,
    /// Pre-existing primary-key hint carried for diagnostics only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key_hint: Option<Vec<String>>,
}

impl RecordMessage {
    /// Emission time as a UTC timestamp, if representable.
    pub fn emitted_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.emitted_at).single()
    }
}

/// Opaque connector state; persisted and replayed by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateMessage {
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceKind {
    Error,
    Estimate,
    StreamStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceMessage {
    pub kind: TraceKind,
    /// Emission time, epoch milliseconds.
    pub emitted_at: i64,
    pub payload: serde_json::Value,
}

/// Catalog discovered by a source connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogMessage {
    pub catalog: SourceCatalog,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionStatusMessage {
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecMessage {
    pub connection_specification: serde_json::Value,
}
