//! Versioned message writer: canonical messages out, connector lines in the
//! connector's declared protocol version.

use anyhow::{Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use syncbridge_types::message::ProtocolMessage;
use syncbridge_types::version::{ProtocolVersion, CANONICAL_VERSION};

use crate::migrate::Migrator;

pub struct VersionedMessageWriter<W> {
    sink: W,
    declared: ProtocolVersion,
    migrator: Migrator,
}

impl<W: AsyncWrite + Unpin> VersionedMessageWriter<W> {
    pub fn new(sink: W, declared: ProtocolVersion, migrator: Migrator) -> Self {
        Self {
            sink,
            declared,
            migrator,
        }
    }

    /// Serialize one canonical message as a single line at the connector's
    /// declared version. May block on sink backpressure.
    pub async fn write_message(&mut self, message: &ProtocolMessage) -> Result<()> {
        let doc = serde_json::to_value(message).context("serializing canonical message")?;
        let doc = self
            .migrator
            .migrate(doc, CANONICAL_VERSION, self.declared)
            .context("migrating message to connector version")?;
        let mut line = serde_json::to_string(&doc).context("encoding connector line")?;
        line.push('\n');
        self.sink
            .write_all(line.as_bytes())
            .await
            .context("writing connector line")?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.sink.flush().await.context("flushing connector sink")
    }

    /// Flush and shut the sink down, signaling end of input to the process.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.sink
            .shutdown()
            .await
            .context("shutting down connector sink")
    }
}
