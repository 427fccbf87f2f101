//! Launch configuration for connector processes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Resource requirements, passed through to the process runtime opaquely.
/// The launcher does not interpret their semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

/// Everything needed to start one connector process for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchConfig {
    pub job_id: String,
    pub attempt_id: u32,
    pub connection_id: String,
    pub workspace_id: String,
    /// Target image or executable reference.
    pub image: String,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default)]
    pub is_custom_connector: bool,
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_labels: BTreeMap<String, String>,
}

impl LaunchConfig {
    pub fn new(
        job_id: impl Into<String>,
        attempt_id: u32,
        connection_id: impl Into<String>,
        workspace_id: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            attempt_id,
            connection_id: connection_id.into(),
            workspace_id: workspace_id.into(),
            image: image.into(),
            resources: ResourceRequirements::default(),
            allowed_hosts: Vec::new(),
            is_custom_connector: false,
            extra_env: BTreeMap::new(),
            extra_labels: BTreeMap::new(),
        }
    }
}
