//! `syncbridge run` — execute one sync attempt.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use syncbridge_protocol::{InvalidLineOptions, Migrator, VersionRegistry};
use syncbridge_types::catalog::ApiCatalog;
use syncbridge_types::launch::LaunchConfig;
use syncbridge_worker::catalog;
use syncbridge_worker::config::{
    parse_sync_config, validate_sync_config, ConnectorSection, ExecutionMode, SyncConfig,
};
use syncbridge_worker::destination::DestinationHandle;
use syncbridge_worker::launcher::ProcessLauncher;
use syncbridge_worker::monitor::{DestinationTimeoutMonitor, HeartbeatMonitor};
use syncbridge_worker::source::SourceHandle;
use syncbridge_worker::{run_replication, ReplicationOptions};

pub async fn execute(sync_path: &Path) -> Result<()> {
    let config = parse_sync_config(sync_path)?;
    let registry = Arc::new(VersionRegistry::standard());
    validate_sync_config(&config, &registry)?;

    if config.execution_mode == ExecutionMode::SingleProcess {
        bail!(
            "single-process mode adopts pre-opened pipe handles and is only \
             available when embedding the worker; use multi_process from the CLI"
        );
    }

    let catalog_path = resolve_relative(sync_path, &config);
    let api_catalog: ApiCatalog = serde_json::from_str(
        &std::fs::read_to_string(&catalog_path)
            .with_context(|| format!("Failed to read catalog: {}", catalog_path.display()))?,
    )
    .context("Failed to parse catalog JSON")?;
    let resolved = Arc::new(catalog::resolve(&api_catalog)?);

    tracing::info!(
        sync = config.sync,
        streams = resolved.streams.len(),
        source = config.source.image,
        destination = config.destination.image,
        "Starting sync"
    );

    let migrator = Migrator::new(registry);
    let job_id = format!("{}-{}", config.sync, std::process::id());
    let invalid_line = InvalidLineOptions {
        log_long_record_pks: config.limits.log_long_record_pks,
        ..InvalidLineOptions::default()
    };

    let source = SourceHandle::launched(
        ProcessLauncher::new(launch_config(&job_id, &config, &config.source)),
        config.source.args.clone(),
        config.source.protocol_version,
        migrator.clone(),
        Arc::clone(&resolved),
    )
    .with_invalid_line_options(invalid_line.clone());

    let timeout_monitor = Arc::new(DestinationTimeoutMonitor::new(
        config.limits.destination_timeout(),
    ));
    let destination = DestinationHandle::launched(
        ProcessLauncher::new(launch_config(&job_id, &config, &config.destination)),
        config.destination.args.clone(),
        config.destination.protocol_version,
        migrator,
        Arc::clone(&timeout_monitor),
    )
    .with_invalid_line_options(invalid_line);

    let heartbeat = Arc::new(HeartbeatMonitor::new(config.limits.heartbeat_timeout()));
    let options = ReplicationOptions {
        channel_capacity: config.limits.channel_capacity,
        supervisor_interval: config.limits.supervisor_interval(),
    };

    let summary = run_replication(
        source,
        destination,
        resolved,
        heartbeat,
        timeout_monitor,
        options,
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.liveness_tripped {
        bail!("sync stalled: no source activity within the configured silence threshold");
    }
    if summary.destination_timeout_tripped {
        bail!("sync stalled: a destination write exceeded the configured timeout");
    }
    Ok(())
}

fn launch_config(job_id: &str, config: &SyncConfig, section: &ConnectorSection) -> LaunchConfig {
    let mut launch = LaunchConfig::new(
        job_id,
        0,
        config.connection_id.clone(),
        config.workspace_id.clone(),
        section.image.clone(),
    );
    launch.extra_env = section.env.clone();
    launch
}

/// Catalog paths are resolved relative to the sync file's directory.
fn resolve_relative(sync_path: &Path, config: &SyncConfig) -> std::path::PathBuf {
    if config.catalog.is_absolute() {
        return config.catalog.clone();
    }
    sync_path
        .parent()
        .map(|dir| dir.join(&config.catalog))
        .unwrap_or_else(|| config.catalog.clone())
}
