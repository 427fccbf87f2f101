//! Sync YAML parsing with environment variable substitution and semantic
//! validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use syncbridge_protocol::VersionRegistry;
use syncbridge_types::version::ProtocolVersion;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Execution-mode switch: whether connectors run as separately launched
/// processes or talk over pre-opened pipes in the same process group.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    SingleProcess,
    #[default]
    MultiProcess,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectorSection {
    /// Executable or image reference for the connector.
    pub image: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncLimits {
    pub channel_capacity: usize,
    pub heartbeat_timeout_seconds: u64,
    pub destination_timeout_seconds: u64,
    pub supervisor_interval_seconds: u64,
    pub log_long_record_pks: bool,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
            heartbeat_timeout_seconds: 300,
            destination_timeout_seconds: 900,
            supervisor_interval_seconds: 1,
            log_long_record_pks: false,
        }
    }
}

impl SyncLimits {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    pub fn destination_timeout(&self) -> Duration {
        Duration::from_secs(self.destination_timeout_seconds)
    }

    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    pub version: String,
    /// Sync name, used for logging and job identity.
    pub sync: String,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    pub connection_id: String,
    pub workspace_id: String,
    pub source: ConnectorSection,
    pub destination: ConnectorSection,
    /// Path to the user-facing catalog JSON.
    pub catalog: PathBuf,
    #[serde(default)]
    pub limits: SyncLimits,
}

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error if any referenced environment variable is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let mut errors = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => {
                errors.push(var_name.to_string());
            }
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", errors.join(", "));
    }

    Ok(result)
}

/// Parse a sync YAML string (after env var substitution).
pub fn parse_sync_config_str(yaml_str: &str) -> Result<SyncConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: SyncConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse sync YAML")?;
    Ok(config)
}

/// Parse a sync YAML file.
pub fn parse_sync_config(path: &Path) -> Result<SyncConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sync file: {}", path.display()))?;
    parse_sync_config_str(&content)
}

/// Validate a parsed sync configuration.
/// Returns Ok(()) if valid, Err with all validation errors if not.
pub fn validate_sync_config(config: &SyncConfig, registry: &VersionRegistry) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported sync config version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.sync.trim().is_empty() {
        errors.push("Sync name must not be empty".to_string());
    }

    if config.source.image.trim().is_empty() {
        errors.push("Source image must not be empty".to_string());
    }
    if config.destination.image.trim().is_empty() {
        errors.push("Destination image must not be empty".to_string());
    }

    for (role, section) in [("Source", &config.source), ("Destination", &config.destination)] {
        if !registry.is_registered(section.protocol_version) {
            errors.push(format!(
                "{} protocol version {} is not a registered version (known: {})",
                role,
                section.protocol_version,
                registry
                    .versions()
                    .iter()
                    .map(|version| version.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
    }

    if config.limits.channel_capacity == 0 {
        errors.push("channel_capacity must be at least 1".to_string());
    }
    if config.limits.heartbeat_timeout_seconds == 0 {
        errors.push("heartbeat_timeout_seconds must be at least 1".to_string());
    }
    if config.limits.destination_timeout_seconds == 0 {
        errors.push("destination_timeout_seconds must be at least 1".to_string());
    }
    if config.limits.supervisor_interval_seconds == 0 {
        errors.push("supervisor_interval_seconds must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("Sync validation failed:\n  - {}", errors.join("\n  - "));
    }
}
