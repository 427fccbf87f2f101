//! Catalog shapes: discovered, API-facing, and sync-resolved.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    FullRefresh,
    Incremental,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DestinationSyncMode {
    Append,
    Overwrite,
    AppendDedup,
}

impl DestinationSyncMode {
    pub fn is_dedup(self) -> bool {
        matches!(self, Self::AppendDedup)
    }
}

/// Stream identity within a catalog. Unique per catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl StreamDescriptor {
    pub fn new(name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            name: name.into(),
            namespace,
        }
    }
}

impl std::fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}.{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A stream as discovered by a source connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceStream {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// JSON-schema-shaped field definitions; top-level fields live under
    /// the `properties` node.
    pub json_schema: serde_json::Value,
    #[serde(default)]
    pub supported_sync_modes: Vec<SyncMode>,
    #[serde(default)]
    pub source_defined_cursor: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_cursor_field: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_defined_primary_key: Vec<Vec<String>>,
}

impl SourceStream {
    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor::new(self.name.clone(), self.namespace.clone())
    }

    pub fn supports_full_refresh(&self) -> bool {
        self.supported_sync_modes.contains(&SyncMode::FullRefresh)
    }
}

/// Catalog emitted by a source connector's discover phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceCatalog {
    pub streams: Vec<SourceStream>,
}

/// One selected top-level field. Multi-segment paths are not supported by
/// resolution and fail with a distinct unsupported-operation error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectedField {
    #[serde(default)]
    pub field_path: Vec<String>,
}

/// Per-stream sync configuration at the API boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiStreamConfig {
    pub sync_mode: SyncMode,
    pub destination_sync_mode: DestinationSyncMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cursor_field: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<Vec<String>>,
    #[serde(default)]
    pub field_selection_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_fields: Option<Vec<SelectedField>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiStreamAndConfig {
    pub stream: SourceStream,
    pub config: ApiStreamConfig,
}

/// User-facing catalog consumed and produced at the API boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiCatalog {
    pub streams: Vec<ApiStreamAndConfig>,
}

/// Field-selection state of a resolved stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FieldSelection {
    All,
    Selected(BTreeSet<String>),
}

impl FieldSelection {
    pub fn selects(&self, field: &str) -> bool {
        match self {
            Self::All => true,
            Self::Selected(fields) => fields.contains(field),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Selected(_))
    }
}

/// A stream as configured for one sync session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedStream {
    pub stream: SourceStream,
    pub sync_mode: SyncMode,
    pub destination_sync_mode: DestinationSyncMode,
    /// Present iff incremental and the cursor is not source-defined.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cursor_field: Vec<String>,
    /// Present iff the destination mode dedups and the key is not
    /// source-defined.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<Vec<String>>,
    pub field_selection: FieldSelection,
}

impl ResolvedStream {
    pub fn descriptor(&self) -> StreamDescriptor {
        self.stream.descriptor()
    }

    /// Effective primary key: the configured key, falling back to the
    /// source-defined one.
    pub fn effective_primary_key(&self) -> &[Vec<String>] {
        if self.primary_key.is_empty() {
            &self.stream.source_defined_primary_key
        } else {
            &self.primary_key
        }
    }
}

/// Ordered, immutable catalog owned by a sync session. Built once by the
/// resolver; read concurrently by the pumps without further coordination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedCatalog {
    pub streams: Vec<ResolvedStream>,
}

impl ResolvedCatalog {
    pub fn stream(&self, namespace: Option<&str>, name: &str) -> Option<&ResolvedStream> {
        self.streams
            .iter()
            .find(|s| s.stream.name == name && s.stream.namespace.as_deref() == namespace)
    }
}

/// Per-stream field-selection metadata carried alongside a resolved catalog
/// for presentation. The resolved shape does not remember whether "all
/// fields" arose from selection being disabled or from selecting everything.
/// Keyed by the descriptor's `namespace.name` form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldSelectionMetadata {
    enabled: BTreeMap<String, bool>,
}

impl FieldSelectionMetadata {
    pub fn set(&mut self, descriptor: StreamDescriptor, enabled: bool) {
        self.enabled.insert(descriptor.to_string(), enabled);
    }

    pub fn is_enabled(&self, descriptor: &StreamDescriptor) -> bool {
        self.enabled
            .get(&descriptor.to_string())
            .copied()
            .unwrap_or(false)
    }
}
