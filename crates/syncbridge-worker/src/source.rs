//! Source connector handle: pull interface over a launched or piped process.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::io::{AsyncBufRead, BufReader};

use syncbridge_protocol::{InvalidLineOptions, MessageCounters, Migrator, VersionedMessageStream};
use syncbridge_types::catalog::ResolvedCatalog;
use syncbridge_types::message::ProtocolMessage;
use syncbridge_types::version::{ProtocolVersion, CANONICAL_VERSION};

use crate::errors::SyncError;
use crate::handle::{DynReader, HandleState};
use crate::launcher::{ConnectorProcess, ProcessLauncher};

/// Source handle over one connector. Two variants share the contract: the
/// launched variant owns a separately started process, the piped variant
/// adopts pre-opened pipe handles when the sync runs in single-process
/// mode. Selection between them is the execution-mode flag, not a
/// difference in protocol handling.
pub enum SourceHandle {
    Launched(LaunchedSource),
    Piped(PipedSource),
}

impl SourceHandle {
    pub fn launched(
        launcher: ProcessLauncher,
        args: Vec<String>,
        declared_version: ProtocolVersion,
        migrator: Migrator,
        catalog: Arc<ResolvedCatalog>,
    ) -> Self {
        Self::Launched(LaunchedSource {
            launcher,
            args,
            process: None,
            core: SourceCore::new(declared_version, migrator, catalog),
        })
    }

    pub fn piped(
        reader: impl AsyncBufRead + Send + Unpin + 'static,
        declared_version: ProtocolVersion,
        migrator: Migrator,
        catalog: Arc<ResolvedCatalog>,
    ) -> Self {
        Self::Piped(PipedSource {
            pending_reader: Some(Box::new(reader)),
            core: SourceCore::new(declared_version, migrator, catalog),
        })
    }

    pub fn with_invalid_line_options(mut self, options: InvalidLineOptions) -> Self {
        self.core_mut().invalid_line = options;
        self
    }

    fn core(&self) -> &SourceCore {
        match self {
            Self::Launched(source) => &source.core,
            Self::Piped(source) => &source.core,
        }
    }

    fn core_mut(&mut self) -> &mut SourceCore {
        match self {
            Self::Launched(source) => &mut source.core,
            Self::Piped(source) => &mut source.core,
        }
    }

    /// Start the handle. Fails if already started; version mismatches
    /// surface here, before any message is read.
    pub async fn start(&mut self) -> Result<(), SyncError> {
        match self {
            Self::Launched(source) => {
                source.core.check_startable()?;
                let mut process = source.launcher.launch(&source.args)?;
                process.spawn_stderr_forwarder("source");
                let stdout = process
                    .take_stdout()
                    .ok_or_else(|| anyhow!("source process stdout was not piped"))?;
                source.process = Some(process);
                source.core.install(Box::new(BufReader::new(stdout)));
            }
            Self::Piped(source) => {
                source.core.check_startable()?;
                let reader = source
                    .pending_reader
                    .take()
                    .ok_or_else(|| anyhow!("piped source reader already consumed"))?;
                source.core.install(reader);
            }
        }
        tracing::info!(
            version = %self.core().declared_version,
            "Source handle started"
        );
        Ok(())
    }

    /// Read the next canonical message, awaiting at most one line of
    /// connector output. `None` means the source is exhausted.
    pub async fn attempt_read(&mut self) -> Result<Option<ProtocolMessage>, SyncError> {
        let core = self.core_mut();
        match core.state {
            HandleState::Started => {}
            HandleState::Finished => return Ok(None),
            other => {
                return Err(SyncError::Infrastructure(anyhow!(
                    "attempt_read on source handle in state {other:?}"
                )))
            }
        }
        let stream = core
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("started source handle has no stream"))?;
        match stream.next_message().await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => {
                core.state = HandleState::Finished;
                Ok(None)
            }
            Err(err) => {
                core.state = HandleState::Failed;
                Err(SyncError::Infrastructure(err))
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.core().state,
            HandleState::Finished | HandleState::Failed
        )
    }

    pub fn state(&self) -> HandleState {
        self.core().state
    }

    pub fn counters(&self) -> Option<Arc<MessageCounters>> {
        self.core()
            .stream
            .as_ref()
            .map(VersionedMessageStream::counters)
    }

    /// Idempotent close. Interrupts in-flight process I/O by killing the
    /// child rather than waiting for graceful completion; releases the
    /// output stream.
    pub async fn close(&mut self) -> Result<(), SyncError> {
        if self.core().state == HandleState::Closed {
            return Ok(());
        }
        if let Self::Launched(source) = self {
            if let Some(mut process) = source.process.take() {
                if let Err(err) = process.kill().await {
                    tracing::warn!(image = process.image(), "source kill failed: {err}");
                }
            }
        }
        let core = self.core_mut();
        core.stream = None;
        core.state = HandleState::Closed;
        tracing::info!("Source handle closed");
        Ok(())
    }
}

pub struct LaunchedSource {
    launcher: ProcessLauncher,
    args: Vec<String>,
    process: Option<ConnectorProcess>,
    core: SourceCore,
}

pub struct PipedSource {
    pending_reader: Option<DynReader>,
    core: SourceCore,
}

struct SourceCore {
    declared_version: ProtocolVersion,
    migrator: Migrator,
    catalog: Arc<ResolvedCatalog>,
    invalid_line: InvalidLineOptions,
    state: HandleState,
    stream: Option<VersionedMessageStream<DynReader>>,
}

impl SourceCore {
    fn new(
        declared_version: ProtocolVersion,
        migrator: Migrator,
        catalog: Arc<ResolvedCatalog>,
    ) -> Self {
        Self {
            declared_version,
            migrator,
            catalog,
            invalid_line: InvalidLineOptions::default(),
            state: HandleState::Created,
            stream: None,
        }
    }

    fn check_startable(&self) -> Result<(), SyncError> {
        if self.state != HandleState::Created {
            return Err(SyncError::Infrastructure(anyhow!(
                "source handle already started (state {:?})",
                self.state
            )));
        }
        self.migrator
            .check_path(self.declared_version, CANONICAL_VERSION)?;
        Ok(())
    }

    fn install(&mut self, reader: DynReader) {
        self.stream = Some(
            VersionedMessageStream::new(
                reader,
                self.declared_version,
                self.migrator.clone(),
                "source",
            )
            .with_catalog(Arc::clone(&self.catalog))
            .with_options(self.invalid_line.clone()),
        );
        self.state = HandleState::Started;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncbridge_protocol::VersionRegistry;
    use syncbridge_types::catalog::{
        DestinationSyncMode, FieldSelection, ResolvedStream, SourceStream, SyncMode,
    };

    fn migrator() -> Migrator {
        Migrator::new(Arc::new(VersionRegistry::standard()))
    }

    fn catalog() -> Arc<ResolvedCatalog> {
        Arc::new(ResolvedCatalog {
            streams: vec![ResolvedStream {
                stream: SourceStream {
                    name: "users".to_string(),
                    namespace: None,
                    json_schema: serde_json::json!({}),
                    supported_sync_modes: vec![SyncMode::FullRefresh],
                    source_defined_cursor: false,
                    default_cursor_field: vec![],
                    source_defined_primary_key: vec![],
                },
                sync_mode: SyncMode::FullRefresh,
                destination_sync_mode: DestinationSyncMode::Overwrite,
                cursor_field: vec![],
                primary_key: vec![],
                field_selection: FieldSelection::All,
            }],
        })
    }

    fn piped_over(input: &'static str) -> SourceHandle {
        SourceHandle::piped(input.as_bytes(), CANONICAL_VERSION, migrator(), catalog())
    }

    #[tokio::test]
    async fn test_piped_source_reads_until_exhausted() {
        let mut source = piped_over(
            "{\"type\":\"RECORD\",\"stream\":\"users\",\"emitted_at\":1,\"data\":{\"id\":1}}\n\
             {\"type\":\"STATE\",\"data\":{}}\n",
        );
        source.start().await.expect("start");
        assert!(!source.is_finished());

        let mut seen = 0;
        while let Some(_message) = source.attempt_read().await.expect("read") {
            seen += 1;
        }
        assert_eq!(seen, 2);
        assert!(source.is_finished());
        assert_eq!(source.state(), HandleState::Finished);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_once() {
        let mut source = piped_over("");
        source.start().await.expect("start");
        assert!(source.start().await.is_err());
    }

    #[tokio::test]
    async fn test_read_before_start_fails() {
        let mut source = piped_over("");
        assert!(source.attempt_read().await.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_version_surfaces_at_start() {
        let mut source = SourceHandle::piped(
            &b""[..],
            ProtocolVersion::new(0, 9, 0),
            migrator(),
            catalog(),
        );
        let err = source.start().await.err().expect("version error");
        assert!(matches!(err, SyncError::UnsupportedVersion(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut source = piped_over("{\"type\":\"STATE\",\"data\":{}}\n");
        source.start().await.expect("start");
        source.close().await.expect("close");
        source.close().await.expect("close again");
        assert_eq!(source.state(), HandleState::Closed);
    }
}
