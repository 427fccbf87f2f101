//! Destination connector handle: push interface over a launched or piped
//! process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use syncbridge_protocol::{
    InvalidLineOptions, MessageCounters, Migrator, VersionedMessageStream, VersionedMessageWriter,
};
use syncbridge_types::catalog::ResolvedCatalog;
use syncbridge_types::message::{ProtocolMessage, StateMessage};
use syncbridge_types::version::{ProtocolVersion, CANONICAL_VERSION};

use crate::errors::SyncError;
use crate::handle::{DynReader, DynWriter, HandleState};
use crate::launcher::{ConnectorProcess, ProcessLauncher};
use crate::monitor::{DestinationTimeoutMonitor, TimedCall};

/// How long close waits for a notified destination to exit on its own
/// before killing it. An un-notified close kills immediately.
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(10);

const DRAIN_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Destination handle over one connector. Variants mirror
/// [`crate::source::SourceHandle`]: one shared contract, selected by the
/// execution-mode flag.
pub enum DestinationHandle {
    Launched(LaunchedDestination),
    Piped(PipedDestination),
}

impl DestinationHandle {
    pub fn launched(
        launcher: ProcessLauncher,
        args: Vec<String>,
        declared_version: ProtocolVersion,
        migrator: Migrator,
        monitor: Arc<DestinationTimeoutMonitor>,
    ) -> Self {
        Self::Launched(LaunchedDestination {
            launcher,
            args,
            process: None,
            core: DestinationCore::new(declared_version, migrator, monitor),
        })
    }

    pub fn piped(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        reader: Option<Box<dyn AsyncBufRead + Send + Unpin>>,
        declared_version: ProtocolVersion,
        migrator: Migrator,
        monitor: Arc<DestinationTimeoutMonitor>,
    ) -> Self {
        Self::Piped(PipedDestination {
            pending_writer: Some(Box::new(writer)),
            pending_reader: reader,
            core: DestinationCore::new(declared_version, migrator, monitor),
        })
    }

    pub fn with_invalid_line_options(mut self, options: InvalidLineOptions) -> Self {
        self.core_mut().invalid_line = options;
        self
    }

    fn core(&self) -> &DestinationCore {
        match self {
            Self::Launched(dest) => &dest.core,
            Self::Piped(dest) => &dest.core,
        }
    }

    fn core_mut(&mut self) -> &mut DestinationCore {
        match self {
            Self::Launched(dest) => &mut dest.core,
            Self::Piped(dest) => &mut dest.core,
        }
    }

    /// Start the handle against the resolved catalog. Fails if already
    /// started; version mismatches surface here.
    pub async fn start(&mut self, catalog: Arc<ResolvedCatalog>) -> Result<(), SyncError> {
        match self {
            Self::Launched(dest) => {
                dest.core.check_startable()?;
                let mut process = dest.launcher.launch(&dest.args)?;
                process.spawn_stderr_forwarder("destination");
                let stdin = process
                    .take_stdin()
                    .ok_or_else(|| anyhow!("destination process stdin was not piped"))?;
                let stdout = process
                    .take_stdout()
                    .ok_or_else(|| anyhow!("destination process stdout was not piped"))?;
                dest.process = Some(process);
                dest.core.install(
                    Box::new(stdin),
                    Some(Box::new(BufReader::new(stdout))),
                    catalog,
                );
            }
            Self::Piped(dest) => {
                dest.core.check_startable()?;
                let writer = dest
                    .pending_writer
                    .take()
                    .ok_or_else(|| anyhow!("piped destination writer already consumed"))?;
                let reader = dest.pending_reader.take();
                dest.core.install(writer, reader, catalog);
            }
        }
        tracing::info!(
            version = %self.core().declared_version,
            "Destination handle started"
        );
        Ok(())
    }

    /// Deliver one message. May block on backpressure from the destination
    /// process; the timeout monitor observes the call from outside.
    pub async fn accept(&mut self, message: &ProtocolMessage) -> Result<(), SyncError> {
        let core = self.core_mut();
        if core.state != HandleState::Started {
            return Err(SyncError::Infrastructure(anyhow!(
                "accept on destination handle in state {:?}",
                core.state
            )));
        }
        let writer = core
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("destination input already closed"))?;
        core.monitor.start_call(TimedCall::Accept);
        let result = writer.write_message(message).await;
        core.monitor.end_call();
        if let Err(err) = result {
            core.state = HandleState::Failed;
            return Err(SyncError::Infrastructure(err));
        }
        Ok(())
    }

    /// Close the destination's input, signaling that no further messages
    /// will arrive. Idempotent.
    pub async fn notify_end_of_input(&mut self) -> Result<(), SyncError> {
        let core = self.core_mut();
        let Some(mut writer) = core.writer.take() else {
            return Ok(());
        };
        core.monitor.start_call(TimedCall::NotifyEndOfInput);
        let result = writer.shutdown().await;
        core.monitor.end_call();
        drop(writer);
        result.map_err(SyncError::Infrastructure)
    }

    /// True once the destination's output is fully drained.
    pub fn is_finished(&self) -> bool {
        let core = self.core();
        match &core.drain {
            Some(task) => task.is_finished(),
            None => core.writer.is_none(),
        }
    }

    pub fn state(&self) -> HandleState {
        self.core().state
    }

    pub fn counters(&self) -> Option<Arc<MessageCounters>> {
        self.core().counters.clone()
    }

    /// State messages emitted by the destination, available after start.
    pub fn take_state_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<StateMessage>> {
        self.core_mut().state_rx.take()
    }

    /// Idempotent close. A destination that was notified of end-of-input
    /// gets a grace period to exit; an aborted one is killed immediately so
    /// a pump blocked mid-write cannot deadlock the shutdown.
    pub async fn close(&mut self) -> Result<(), SyncError> {
        if self.core().state == HandleState::Closed {
            return Ok(());
        }
        let notified = self.core().writer.is_none();
        if !notified {
            if let Err(err) = self.notify_end_of_input().await {
                tracing::warn!("destination end-of-input during close failed: {err}");
            }
        }

        if let Self::Launched(dest) = self {
            if let Some(mut process) = dest.process.take() {
                if notified {
                    match tokio::time::timeout(GRACEFUL_EXIT_TIMEOUT, process.wait()).await {
                        Ok(Ok(status)) => {
                            tracing::info!(code = status.code(), "Destination process exited")
                        }
                        Ok(Err(err)) => {
                            tracing::warn!("destination wait failed: {err}");
                        }
                        Err(_) => {
                            tracing::warn!("destination did not exit in time, killing");
                            let _ = process.kill().await;
                        }
                    }
                } else if let Err(err) = process.kill().await {
                    tracing::warn!(image = process.image(), "destination kill failed: {err}");
                }
            }
        }

        let core = self.core_mut();
        if let Some(task) = core.drain.take() {
            if tokio::time::timeout(DRAIN_SETTLE_TIMEOUT, task).await.is_err() {
                tracing::warn!("destination output drain did not settle, detaching");
            }
        }
        core.state = HandleState::Closed;
        tracing::info!("Destination handle closed");
        Ok(())
    }
}

pub struct LaunchedDestination {
    launcher: ProcessLauncher,
    args: Vec<String>,
    process: Option<ConnectorProcess>,
    core: DestinationCore,
}

pub struct PipedDestination {
    pending_writer: Option<DynWriter>,
    pending_reader: Option<DynReader>,
    core: DestinationCore,
}

struct DestinationCore {
    declared_version: ProtocolVersion,
    migrator: Migrator,
    monitor: Arc<DestinationTimeoutMonitor>,
    invalid_line: InvalidLineOptions,
    state: HandleState,
    writer: Option<VersionedMessageWriter<DynWriter>>,
    drain: Option<JoinHandle<()>>,
    counters: Option<Arc<MessageCounters>>,
    state_rx: Option<mpsc::UnboundedReceiver<StateMessage>>,
}

impl DestinationCore {
    fn new(
        declared_version: ProtocolVersion,
        migrator: Migrator,
        monitor: Arc<DestinationTimeoutMonitor>,
    ) -> Self {
        Self {
            declared_version,
            migrator,
            monitor,
            invalid_line: InvalidLineOptions::default(),
            state: HandleState::Created,
            writer: None,
            drain: None,
            counters: None,
            state_rx: None,
        }
    }

    fn check_startable(&self) -> Result<(), SyncError> {
        if self.state != HandleState::Created {
            return Err(SyncError::Infrastructure(anyhow!(
                "destination handle already started (state {:?})",
                self.state
            )));
        }
        // Writes migrate canonical -> connector, reads the other way.
        self.migrator
            .check_path(CANONICAL_VERSION, self.declared_version)?;
        self.migrator
            .check_path(self.declared_version, CANONICAL_VERSION)?;
        Ok(())
    }

    fn install(
        &mut self,
        writer: DynWriter,
        reader: Option<DynReader>,
        catalog: Arc<ResolvedCatalog>,
    ) {
        self.writer = Some(VersionedMessageWriter::new(
            writer,
            self.declared_version,
            self.migrator.clone(),
        ));
        if let Some(reader) = reader {
            let stream = VersionedMessageStream::new(
                reader,
                self.declared_version,
                self.migrator.clone(),
                "destination",
            )
            .with_catalog(catalog)
            .with_options(self.invalid_line.clone());
            self.counters = Some(stream.counters());
            let (state_tx, state_rx) = mpsc::unbounded_channel();
            self.state_rx = Some(state_rx);
            self.drain = Some(spawn_output_drain(stream, state_tx));
        }
        self.state = HandleState::Started;
    }
}

/// Drain the destination's output independently of the write path: state
/// messages go to the caller, everything else is logged and counted.
fn spawn_output_drain(
    mut stream: VersionedMessageStream<DynReader>,
    state_tx: mpsc::UnboundedSender<StateMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match stream.next_message().await {
                Ok(Some(ProtocolMessage::State(state))) => {
                    let _ = state_tx.send(state);
                }
                Ok(Some(ProtocolMessage::Log(log))) => {
                    tracing::info!(origin = "destination", level = ?log.level, "{}", log.message);
                }
                Ok(Some(other)) => {
                    tracing::debug!(
                        origin = "destination",
                        message_type = other.type_name(),
                        "Ignoring unexpected destination message"
                    );
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!("destination output stream failed: {err:#}");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use syncbridge_protocol::VersionRegistry;
    use syncbridge_types::message::{RecordMessage, StateMessage};

    fn migrator() -> Migrator {
        Migrator::new(Arc::new(VersionRegistry::standard()))
    }

    fn monitor() -> Arc<DestinationTimeoutMonitor> {
        Arc::new(DestinationTimeoutMonitor::new(Duration::from_secs(60)))
    }

    fn empty_catalog() -> Arc<ResolvedCatalog> {
        Arc::new(ResolvedCatalog { streams: vec![] })
    }

    fn record() -> ProtocolMessage {
        ProtocolMessage::Record(RecordMessage {
            stream: "users".to_string(),
            namespace: None,
            emitted_at: 1,
            data: serde_json::json!({"id": 1}),
            primary_key_hint: None,
        })
    }

    #[tokio::test]
    async fn test_piped_destination_writes_downgraded_lines() {
        let (writer, mut read_half) = tokio::io::duplex(4096);
        let mut dest = DestinationHandle::piped(
            writer,
            None,
            ProtocolVersion::new(0, 1, 0),
            migrator(),
            monitor(),
        );
        dest.start(empty_catalog()).await.expect("start");
        dest.accept(&record()).await.expect("accept");
        dest.notify_end_of_input().await.expect("end of input");

        use tokio::io::AsyncReadExt;
        let mut output = String::new();
        read_half.read_to_string(&mut output).await.expect("read");
        let doc: serde_json::Value = serde_json::from_str(output.trim()).expect("json");
        assert_eq!(doc["emittedAt"], 1);
        assert!(doc.get("emitted_at").is_none());
    }

    #[tokio::test]
    async fn test_accept_before_start_fails() {
        let (writer, _read_half) = tokio::io::duplex(64);
        let mut dest =
            DestinationHandle::piped(writer, None, CANONICAL_VERSION, migrator(), monitor());
        assert!(dest.accept(&record()).await.is_err());
    }

    #[tokio::test]
    async fn test_accept_after_end_of_input_fails() {
        let (writer, _read_half) = tokio::io::duplex(4096);
        let mut dest =
            DestinationHandle::piped(writer, None, CANONICAL_VERSION, migrator(), monitor());
        dest.start(empty_catalog()).await.expect("start");
        dest.notify_end_of_input().await.expect("end of input");
        assert!(dest.accept(&record()).await.is_err());
    }

    #[tokio::test]
    async fn test_state_messages_surface_through_receiver() {
        let (writer, _writer_read_half) = tokio::io::duplex(4096);
        let output = "{\"type\":\"STATE\",\"data\":{\"cursor\":5}}\n\
                      {\"type\":\"LOG\",\"level\":\"INFO\",\"message\":\"done\"}\n";
        let mut dest = DestinationHandle::piped(
            writer,
            Some(Box::new(&output.as_bytes()[..])),
            CANONICAL_VERSION,
            migrator(),
            monitor(),
        );
        dest.start(empty_catalog()).await.expect("start");
        let mut states = dest.take_state_receiver().expect("receiver");
        let state = states.recv().await.expect("state message");
        assert_eq!(
            state,
            StateMessage {
                data: serde_json::json!({"cursor": 5})
            }
        );
        dest.close().await.expect("close");
        assert!(dest.is_finished());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (writer, _read_half) = tokio::io::duplex(64);
        let mut dest =
            DestinationHandle::piped(writer, None, CANONICAL_VERSION, migrator(), monitor());
        dest.start(empty_catalog()).await.expect("start");
        assert!(dest.start(empty_catalog()).await.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_version_surfaces_at_start() {
        let (writer, _read_half) = tokio::io::duplex(64);
        let mut dest = DestinationHandle::piped(
            writer,
            None,
            ProtocolVersion::new(0, 9, 9),
            migrator(),
            monitor(),
        );
        let err = dest.start(empty_catalog()).await.err().expect("error");
        assert!(matches!(err, SyncError::UnsupportedVersion(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (writer, _read_half) = tokio::io::duplex(4096);
        let mut dest =
            DestinationHandle::piped(writer, None, CANONICAL_VERSION, migrator(), monitor());
        dest.start(empty_catalog()).await.expect("start");
        dest.close().await.expect("close");
        dest.close().await.expect("close again");
        assert_eq!(dest.state(), HandleState::Closed);
    }
}
