//! Catalog resolution and presentation.
//!
//! `resolve` turns the user-facing catalog into the immutable shape a sync
//! session runs against, validating every field-selection, cursor, and
//! primary-key invariant up front. `present` goes the other way, and
//! `present_discovered` infers default modes for freshly discovered streams.

use std::collections::BTreeSet;

use syncbridge_types::catalog::{
    ApiCatalog, ApiStreamAndConfig, ApiStreamConfig, DestinationSyncMode, FieldSelection,
    FieldSelectionMetadata, ResolvedCatalog, ResolvedStream, SelectedField, SourceCatalog,
    SourceStream, StreamDescriptor, SyncMode,
};
use syncbridge_types::errors::{CatalogError, UnsupportedOperationError, ValidationError};

/// Resolve a user-facing catalog into the catalog a sync session owns.
///
/// Fails with `CatalogError::Validation` on caller errors and
/// `CatalogError::Unsupported` on intentionally unimplemented requests
/// (nested field-path selection); the two are never conflated.
pub fn resolve(api: &ApiCatalog) -> Result<ResolvedCatalog, CatalogError> {
    let mut seen = BTreeSet::new();
    let mut streams = Vec::with_capacity(api.streams.len());

    for entry in &api.streams {
        let descriptor = entry.stream.descriptor();
        if !seen.insert(descriptor.clone()) {
            return Err(ValidationError::new(format!(
                "duplicate stream '{descriptor}' in catalog"
            ))
            .into());
        }
        streams.push(resolve_stream(entry)?);
    }

    Ok(ResolvedCatalog { streams })
}

fn resolve_stream(entry: &ApiStreamAndConfig) -> Result<ResolvedStream, CatalogError> {
    let stream = &entry.stream;
    let config = &entry.config;
    let descriptor = stream.descriptor();

    let cursor_field = if config.sync_mode == SyncMode::Incremental && !stream.source_defined_cursor
    {
        let cursor = if config.cursor_field.is_empty() {
            stream.default_cursor_field.clone()
        } else {
            config.cursor_field.clone()
        };
        if cursor.is_empty() {
            return Err(ValidationError::new(format!(
                "stream '{descriptor}' is incremental but has no cursor field"
            ))
            .into());
        }
        cursor
    } else {
        Vec::new()
    };

    let primary_key = if config.destination_sync_mode.is_dedup()
        && stream.source_defined_primary_key.is_empty()
    {
        if config.primary_key.is_empty() {
            return Err(ValidationError::new(format!(
                "stream '{descriptor}' dedups at the destination but has no primary key"
            ))
            .into());
        }
        config.primary_key.clone()
    } else {
        Vec::new()
    };

    let field_selection = if config.field_selection_enabled {
        FieldSelection::Selected(resolve_selected_fields(
            stream,
            config,
            &descriptor,
            &cursor_field,
            &primary_key,
        )?)
    } else {
        FieldSelection::All
    };

    Ok(ResolvedStream {
        stream: stream.clone(),
        sync_mode: config.sync_mode,
        destination_sync_mode: config.destination_sync_mode,
        cursor_field,
        primary_key,
        field_selection,
    })
}

fn resolve_selected_fields(
    stream: &SourceStream,
    config: &ApiStreamConfig,
    descriptor: &StreamDescriptor,
    cursor_field: &[String],
    primary_key: &[Vec<String>],
) -> Result<BTreeSet<String>, CatalogError> {
    let selected = config
        .selected_fields
        .as_ref()
        .filter(|fields| !fields.is_empty())
        .ok_or_else(|| {
            ValidationError::new(format!(
                "field selection enabled for stream '{descriptor}' but no fields selected"
            ))
        })?;

    let properties = stream
        .json_schema
        .get("properties")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| {
            ValidationError::new(format!(
                "stream '{descriptor}' schema declares no properties to select from"
            ))
        })?;

    let mut fields = BTreeSet::new();
    for selected_field in selected {
        let path = &selected_field.field_path;
        if path.is_empty() {
            return Err(ValidationError::new(format!(
                "selected field with empty path on stream '{descriptor}'"
            ))
            .into());
        }
        if path.len() > 1 {
            return Err(UnsupportedOperationError::new(format!(
                "nested field selection '{}' on stream '{descriptor}'",
                path.join(".")
            ))
            .into());
        }
        let field = &path[0];
        if !properties.contains_key(field) {
            return Err(ValidationError::new(format!(
                "selected field '{field}' does not exist in schema of stream '{descriptor}'"
            ))
            .into());
        }
        fields.insert(field.clone());
    }

    // `cursor_field` and `primary_key` are the effective, already-resolved
    // values: empty whenever the mode does not require them or the source
    // defines them itself.
    if let Some(cursor) = cursor_field.first() {
        if !fields.contains(cursor) {
            return Err(ValidationError::new(format!(
                "cursor field '{cursor}' of incremental stream '{descriptor}' is not selected"
            ))
            .into());
        }
    }

    for path in primary_key {
        if let Some(key) = path.first() {
            if !fields.contains(key) {
                return Err(ValidationError::new(format!(
                    "primary key field '{key}' of deduped stream '{descriptor}' is not selected"
                ))
                .into());
            }
        }
    }

    Ok(fields)
}

/// Present a resolved catalog back in its user-facing shape.
pub fn present(resolved: &ResolvedCatalog, metadata: &FieldSelectionMetadata) -> ApiCatalog {
    let streams = resolved
        .streams
        .iter()
        .map(|entry| ApiStreamAndConfig {
            stream: entry.stream.clone(),
            config: ApiStreamConfig {
                sync_mode: entry.sync_mode,
                destination_sync_mode: entry.destination_sync_mode,
                cursor_field: entry.cursor_field.clone(),
                primary_key: entry.primary_key.clone(),
                field_selection_enabled: metadata.is_enabled(&entry.descriptor()),
                selected_fields: match &entry.field_selection {
                    FieldSelection::All => None,
                    FieldSelection::Selected(fields) => Some(
                        fields
                            .iter()
                            .map(|field| SelectedField {
                                field_path: vec![field.clone()],
                            })
                            .collect(),
                    ),
                },
            },
        })
        .collect();
    ApiCatalog { streams }
}

/// Present a freshly discovered catalog, inferring default sync modes.
pub fn present_discovered(discovered: &SourceCatalog) -> ApiCatalog {
    let streams = discovered
        .streams
        .iter()
        .map(|stream| {
            let (sync_mode, destination_sync_mode) = default_modes(stream);
            ApiStreamAndConfig {
                stream: stream.clone(),
                config: ApiStreamConfig {
                    sync_mode,
                    destination_sync_mode,
                    cursor_field: stream.default_cursor_field.clone(),
                    primary_key: stream.source_defined_primary_key.clone(),
                    field_selection_enabled: false,
                    selected_fields: None,
                },
            }
        })
        .collect();
    ApiCatalog { streams }
}

/// Default mode inference for a discovered stream.
///
/// A source-defined cursor and primary key together allow incremental
/// dedup; otherwise full refresh with overwrite is preferred whenever the
/// stream supports it, and a cursor-only stream that cannot full-refresh
/// falls back to incremental append. An empty supported-mode list is
/// treated as supporting full refresh.
fn default_modes(stream: &SourceStream) -> (SyncMode, DestinationSyncMode) {
    let has_cursor = stream.source_defined_cursor;
    let has_primary_key = !stream.source_defined_primary_key.is_empty();
    let full_refresh_supported =
        stream.supported_sync_modes.is_empty() || stream.supports_full_refresh();

    if has_cursor && has_primary_key {
        (SyncMode::Incremental, DestinationSyncMode::AppendDedup)
    } else if full_refresh_supported {
        (SyncMode::FullRefresh, DestinationSyncMode::Overwrite)
    } else if has_cursor {
        (SyncMode::Incremental, DestinationSyncMode::Append)
    } else {
        (SyncMode::FullRefresh, DestinationSyncMode::Overwrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn two_field_stream() -> SourceStream {
        SourceStream {
            name: "users".to_string(),
            namespace: None,
            json_schema: serde_json::json!({
                "type": "object",
                "properties": {"id": {"type": "integer"}, "email": {"type": "string"}}
            }),
            supported_sync_modes: vec![SyncMode::FullRefresh, SyncMode::Incremental],
            source_defined_cursor: false,
            default_cursor_field: vec![],
            source_defined_primary_key: vec![],
        }
    }

    fn catalog_with(config: ApiStreamConfig) -> ApiCatalog {
        ApiCatalog {
            streams: vec![ApiStreamAndConfig {
                stream: two_field_stream(),
                config,
            }],
        }
    }

    fn full_refresh_config() -> ApiStreamConfig {
        ApiStreamConfig {
            sync_mode: SyncMode::FullRefresh,
            destination_sync_mode: DestinationSyncMode::Overwrite,
            cursor_field: vec![],
            primary_key: vec![],
            field_selection_enabled: false,
            selected_fields: None,
        }
    }

    fn select(fields: &[&str]) -> Option<Vec<SelectedField>> {
        Some(
            fields
                .iter()
                .map(|f| SelectedField {
                    field_path: vec![(*f).to_string()],
                })
                .collect(),
        )
    }

    #[test]
    fn test_resolve_without_selection_keeps_all_fields() {
        let resolved = resolve(&catalog_with(full_refresh_config())).expect("resolve");
        assert_eq!(resolved.streams[0].field_selection, FieldSelection::All);
    }

    #[test]
    fn test_selection_enabled_without_fields_is_validation_error() {
        let mut config = full_refresh_config();
        config.field_selection_enabled = true;
        config.selected_fields = None;
        let err = resolve(&catalog_with(config)).err().expect("error");
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn test_selection_enabled_with_empty_list_is_validation_error() {
        let mut config = full_refresh_config();
        config.field_selection_enabled = true;
        config.selected_fields = Some(vec![]);
        let err = resolve(&catalog_with(config)).err().expect("error");
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn test_schema_without_properties_is_validation_error() {
        let mut config = full_refresh_config();
        config.field_selection_enabled = true;
        config.selected_fields = select(&["id"]);
        let mut catalog = catalog_with(config);
        catalog.streams[0].stream.json_schema = serde_json::json!({"type": "object"});
        let err = resolve(&catalog).err().expect("error");
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn test_empty_field_path_is_validation_error() {
        let mut config = full_refresh_config();
        config.field_selection_enabled = true;
        config.selected_fields = Some(vec![SelectedField { field_path: vec![] }]);
        let err = resolve(&catalog_with(config)).err().expect("error");
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn test_nested_field_path_is_unsupported_not_validation() {
        let mut config = full_refresh_config();
        config.field_selection_enabled = true;
        config.selected_fields = Some(vec![SelectedField {
            field_path: vec!["address".to_string(), "city".to_string()],
        }]);
        let err = resolve(&catalog_with(config)).err().expect("error");
        assert!(matches!(err, CatalogError::Unsupported(_)));
    }

    #[test]
    fn test_unknown_selected_field_is_validation_error() {
        let mut config = full_refresh_config();
        config.field_selection_enabled = true;
        config.selected_fields = select(&["id", "phone"]);
        let err = resolve(&catalog_with(config)).err().expect("error");
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn test_cursor_excluded_from_selection_fails_for_incremental() {
        let mut config = full_refresh_config();
        config.sync_mode = SyncMode::Incremental;
        config.cursor_field = vec!["email".to_string()];
        config.field_selection_enabled = true;
        config.selected_fields = select(&["id"]);
        let err = resolve(&catalog_with(config)).err().expect("error");
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn test_cursor_included_in_selection_succeeds() {
        let mut config = full_refresh_config();
        config.sync_mode = SyncMode::Incremental;
        config.cursor_field = vec!["email".to_string()];
        config.field_selection_enabled = true;
        config.selected_fields = select(&["id", "email"]);
        let resolved = resolve(&catalog_with(config)).expect("resolve");
        assert_eq!(resolved.streams[0].cursor_field, vec!["email".to_string()]);
    }

    #[test]
    fn test_cursor_excluded_is_fine_for_full_refresh() {
        let mut config = full_refresh_config();
        config.cursor_field = vec!["email".to_string()];
        config.field_selection_enabled = true;
        config.selected_fields = select(&["id"]);
        assert!(resolve(&catalog_with(config)).is_ok());
    }

    #[test]
    fn test_primary_key_excluded_from_selection_fails_for_dedup() {
        let mut config = full_refresh_config();
        config.destination_sync_mode = DestinationSyncMode::AppendDedup;
        config.primary_key = vec![vec!["email".to_string()]];
        config.field_selection_enabled = true;
        config.selected_fields = select(&["id"]);
        let err = resolve(&catalog_with(config)).err().expect("error");
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn test_primary_key_excluded_is_fine_for_overwrite() {
        let mut config = full_refresh_config();
        config.primary_key = vec![vec!["email".to_string()]];
        config.field_selection_enabled = true;
        config.selected_fields = select(&["id"]);
        assert!(resolve(&catalog_with(config)).is_ok());
    }

    #[test]
    fn test_incremental_without_any_cursor_is_validation_error() {
        let mut config = full_refresh_config();
        config.sync_mode = SyncMode::Incremental;
        let err = resolve(&catalog_with(config)).err().expect("error");
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn test_dedup_without_any_primary_key_is_validation_error() {
        let mut config = full_refresh_config();
        config.destination_sync_mode = DestinationSyncMode::AppendDedup;
        let err = resolve(&catalog_with(config)).err().expect("error");
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn test_duplicate_streams_rejected() {
        let mut catalog = catalog_with(full_refresh_config());
        catalog.streams.push(catalog.streams[0].clone());
        let err = resolve(&catalog).err().expect("error");
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[test]
    fn test_source_defined_cursor_skips_selection_check() {
        let mut catalog = catalog_with(ApiStreamConfig {
            sync_mode: SyncMode::Incremental,
            destination_sync_mode: DestinationSyncMode::Append,
            cursor_field: vec![],
            primary_key: vec![],
            field_selection_enabled: true,
            selected_fields: select(&["id"]),
        });
        catalog.streams[0].stream.source_defined_cursor = true;
        let resolved = resolve(&catalog).expect("resolve");
        assert!(resolved.streams[0].cursor_field.is_empty());
    }

    #[test]
    fn test_resolve_present_roundtrip_preserves_modes() {
        let mut config = full_refresh_config();
        config.field_selection_enabled = true;
        config.selected_fields = select(&["id"]);
        let catalog = catalog_with(config);
        let resolved = resolve(&catalog).expect("resolve");

        let mut metadata = FieldSelectionMetadata::default();
        metadata.set(resolved.streams[0].descriptor(), true);
        let presented = present(&resolved, &metadata);
        assert_eq!(presented, catalog);
    }

    #[rstest]
    #[case::no_cursor(false, false, true, SyncMode::FullRefresh, DestinationSyncMode::Overwrite)]
    #[case::cursor_and_pk(true, true, true, SyncMode::Incremental, DestinationSyncMode::AppendDedup)]
    #[case::cursor_and_pk_no_full_refresh(
        true,
        true,
        false,
        SyncMode::Incremental,
        DestinationSyncMode::AppendDedup
    )]
    #[case::cursor_only(true, false, true, SyncMode::FullRefresh, DestinationSyncMode::Overwrite)]
    #[case::cursor_only_no_full_refresh(
        true,
        false,
        false,
        SyncMode::Incremental,
        DestinationSyncMode::Append
    )]
    fn test_discovered_default_modes(
        #[case] source_cursor: bool,
        #[case] source_pk: bool,
        #[case] full_refresh: bool,
        #[case] expected_sync: SyncMode,
        #[case] expected_dest: DestinationSyncMode,
    ) {
        let mut stream = two_field_stream();
        stream.source_defined_cursor = source_cursor;
        if source_cursor {
            stream.default_cursor_field = vec!["email".to_string()];
        }
        if source_pk {
            stream.source_defined_primary_key = vec![vec!["id".to_string()]];
        }
        if !full_refresh {
            stream.supported_sync_modes = vec![SyncMode::Incremental];
        }

        let presented = present_discovered(&SourceCatalog {
            streams: vec![stream],
        });
        let config = &presented.streams[0].config;
        assert_eq!(config.sync_mode, expected_sync);
        assert_eq!(config.destination_sync_mode, expected_dest);
        assert!(!config.field_selection_enabled);
    }

    #[test]
    fn test_discovered_defaults_survive_resolution() {
        let mut stream = two_field_stream();
        stream.source_defined_cursor = true;
        stream.source_defined_primary_key = vec![vec!["id".to_string()]];
        let presented = present_discovered(&SourceCatalog {
            streams: vec![stream],
        });
        let resolved = resolve(&presented).expect("resolve");
        assert_eq!(resolved.streams[0].sync_mode, SyncMode::Incremental);
        // Source-defined cursor and key mean neither is materialized.
        assert!(resolved.streams[0].cursor_field.is_empty());
        assert!(resolved.streams[0].primary_key.is_empty());
    }
}
