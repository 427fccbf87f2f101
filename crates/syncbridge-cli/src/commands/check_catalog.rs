//! `syncbridge check-catalog` — resolve a catalog without running a sync.

use std::path::Path;

use anyhow::{Context, Result};

use syncbridge_types::catalog::{ApiCatalog, SourceCatalog};
use syncbridge_types::errors::CatalogError;
use syncbridge_worker::catalog;

pub fn execute(path: &Path, discovered: bool) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog: {}", path.display()))?;

    if discovered {
        let source_catalog: SourceCatalog =
            serde_json::from_str(&content).context("Failed to parse discovered catalog JSON")?;
        let presented = catalog::present_discovered(&source_catalog);
        println!("{}", serde_json::to_string_pretty(&presented)?);
        return Ok(());
    }

    let api_catalog: ApiCatalog =
        serde_json::from_str(&content).context("Failed to parse catalog JSON")?;
    match catalog::resolve(&api_catalog) {
        Ok(resolved) => {
            for stream in &resolved.streams {
                tracing::info!(
                    stream = %stream.descriptor(),
                    sync_mode = ?stream.sync_mode,
                    destination_sync_mode = ?stream.destination_sync_mode,
                    field_selection = stream.field_selection.is_enabled(),
                    "Stream resolved"
                );
            }
            println!("catalog ok: {} stream(s)", resolved.streams.len());
            Ok(())
        }
        Err(CatalogError::Unsupported(err)) => {
            // Distinct from a validation failure: the catalog is well formed
            // but asks for something this platform does not implement yet.
            anyhow::bail!("catalog uses an unsupported feature: {err}")
        }
        Err(CatalogError::Validation(err)) => anyhow::bail!("invalid catalog: {err}"),
    }
}
