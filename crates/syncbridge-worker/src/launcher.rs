//! Connector process launching.

use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use syncbridge_types::errors::LaunchError;
use syncbridge_types::launch::LaunchConfig;

/// Starts connector processes from a launch configuration.
///
/// Resource and network-allow-list parameters are passed through opaquely as
/// environment; the launcher does not interpret their semantics. Launch
/// failures are never retried here; retry policy belongs to the caller.
pub struct ProcessLauncher {
    config: LaunchConfig,
}

impl ProcessLauncher {
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Platform environment injected into every launched connector.
    pub fn environment(&self) -> BTreeMap<String, String> {
        let config = &self.config;
        let mut env = BTreeMap::new();
        env.insert("JOB_ID".to_string(), config.job_id.clone());
        env.insert("ATTEMPT_ID".to_string(), config.attempt_id.to_string());
        env.insert("CONNECTION_ID".to_string(), config.connection_id.clone());
        env.insert("WORKSPACE_ID".to_string(), config.workspace_id.clone());
        env.insert(
            "IS_CUSTOM_CONNECTOR".to_string(),
            config.is_custom_connector.to_string(),
        );
        if !config.allowed_hosts.is_empty() {
            env.insert("ALLOWED_HOSTS".to_string(), config.allowed_hosts.join(","));
        }
        if let Some(cpu) = &config.resources.cpu_request {
            env.insert("CPU_REQUEST".to_string(), cpu.clone());
        }
        if let Some(cpu) = &config.resources.cpu_limit {
            env.insert("CPU_LIMIT".to_string(), cpu.clone());
        }
        if let Some(memory) = &config.resources.memory_request {
            env.insert("MEMORY_REQUEST".to_string(), memory.clone());
        }
        if let Some(memory) = &config.resources.memory_limit {
            env.insert("MEMORY_LIMIT".to_string(), memory.clone());
        }
        for (key, value) in &config.extra_labels {
            env.insert(format!("LABEL_{}", key.to_uppercase()), value.clone());
        }
        // Explicit extras win over platform defaults.
        for (key, value) in &config.extra_env {
            env.insert(key.clone(), value.clone());
        }
        env
    }

    /// Launch the connector with the given arguments.
    pub fn launch(&self, args: &[String]) -> Result<ConnectorProcess, LaunchError> {
        let image = &self.config.image;
        tracing::info!(
            image,
            job_id = self.config.job_id,
            attempt_id = self.config.attempt_id,
            connection_id = self.config.connection_id,
            "Launching connector process"
        );

        let child = Command::new(image)
            .args(args)
            .envs(self.environment())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError {
                image: image.clone(),
                source,
            })?;

        Ok(ConnectorProcess {
            image: image.clone(),
            child,
        })
    }
}

/// A launched connector. Its stdio handles are owned exclusively by the
/// wrapping source or destination handle.
pub struct ConnectorProcess {
    image: String,
    child: Child,
}

impl ConnectorProcess {
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Forward the process's stderr to the log as unstructured connector
    /// output. Runs until the process closes its stderr.
    pub fn spawn_stderr_forwarder(&mut self, origin: &'static str) {
        let Some(stderr) = self.child.stderr.take() else {
            return;
        };
        let image = self.image.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(origin, image, "connector: {line}");
            }
        });
    }

    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Interrupt the process's I/O by killing it. Safe to call repeatedly.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        match self.child.try_wait() {
            Ok(Some(_)) => Ok(()),
            _ => self.child.kill().await,
        }
    }
}
