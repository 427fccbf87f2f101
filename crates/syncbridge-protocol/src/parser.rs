//! Versioned stream parser: connector lines in, canonical messages out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use syncbridge_types::catalog::ResolvedCatalog;
use syncbridge_types::errors::MalformedLineError;
use syncbridge_types::message::ProtocolMessage;
use syncbridge_types::version::{ProtocolVersion, CANONICAL_VERSION};

use crate::extract;
use crate::migrate::Migrator;

/// Lines longer than this are never echoed into logs; with
/// [`InvalidLineOptions::log_long_record_pks`] set, a best-effort primary-key
/// extraction runs over the truncated payload instead.
pub const DEFAULT_MAX_LOGGED_LINE_BYTES: usize = 16 * 1024 * 1024;

const MALFORMED_PREVIEW_BYTES: usize = 1_000;

/// Invalid-line failure policy knobs.
#[derive(Debug, Clone)]
pub struct InvalidLineOptions {
    pub log_long_record_pks: bool,
    pub max_logged_line_bytes: usize,
}

impl Default for InvalidLineOptions {
    fn default() -> Self {
        Self {
            log_long_record_pks: false,
            max_logged_line_bytes: DEFAULT_MAX_LOGGED_LINE_BYTES,
        }
    }
}

/// Per-type message counters, shared with the metrics collaborator.
/// Single-writer per parser; snapshots are taken concurrently.
#[derive(Debug, Default)]
pub struct MessageCounters {
    records: AtomicU64,
    states: AtomicU64,
    logs: AtomicU64,
    traces: AtomicU64,
    catalogs: AtomicU64,
    connection_statuses: AtomicU64,
    specs: AtomicU64,
    malformed_lines: AtomicU64,
    dropped_records: AtomicU64,
}

impl MessageCounters {
    pub fn observe(&self, message: &ProtocolMessage) {
        let counter = match message {
            ProtocolMessage::Record(_) => &self.records,
            ProtocolMessage::State(_) => &self.states,
            ProtocolMessage::Log(_) => &self.logs,
            ProtocolMessage::Trace(_) => &self.traces,
            ProtocolMessage::Catalog(_) => &self.catalogs,
            ProtocolMessage::ConnectionStatus(_) => &self.connection_statuses,
            ProtocolMessage::Spec(_) => &self.specs,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_malformed(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_dropped(&self) {
        self.dropped_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MessageCountsSnapshot {
        MessageCountsSnapshot {
            records: self.records.load(Ordering::Relaxed),
            states: self.states.load(Ordering::Relaxed),
            logs: self.logs.load(Ordering::Relaxed),
            traces: self.traces.load(Ordering::Relaxed),
            catalogs: self.catalogs.load(Ordering::Relaxed),
            connection_statuses: self.connection_statuses.load(Ordering::Relaxed),
            specs: self.specs.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageCountsSnapshot {
    pub records: u64,
    pub states: u64,
    pub logs: u64,
    pub traces: u64,
    pub catalogs: u64,
    pub connection_statuses: u64,
    pub specs: u64,
    pub malformed_lines: u64,
    pub dropped_records: u64,
}

/// Lazy, finite, non-restartable sequence of canonical messages over a
/// connector's line output.
///
/// Never raises for a single malformed line; only source-level I/O failure
/// is fatal. Ends when the underlying reader is exhausted.
pub struct VersionedMessageStream<R> {
    lines: Lines<R>,
    declared: ProtocolVersion,
    migrator: Migrator,
    catalog: Option<Arc<ResolvedCatalog>>,
    counters: Arc<MessageCounters>,
    options: InvalidLineOptions,
    /// Which side of the sync this stream reads, for diagnostics.
    origin: &'static str,
}

impl<R: AsyncBufRead + Unpin> VersionedMessageStream<R> {
    pub fn new(
        reader: R,
        declared: ProtocolVersion,
        migrator: Migrator,
        origin: &'static str,
    ) -> Self {
        Self {
            lines: reader.lines(),
            declared,
            migrator,
            catalog: None,
            counters: Arc::new(MessageCounters::default()),
            options: InvalidLineOptions::default(),
            origin,
        }
    }

    /// Attach the resolved catalog used to drop unknown streams and project
    /// record payloads to selected fields.
    pub fn with_catalog(mut self, catalog: Arc<ResolvedCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_options(mut self, options: InvalidLineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn counters(&self) -> Arc<MessageCounters> {
        Arc::clone(&self.counters)
    }

    /// Next canonical message, or `None` once the reader is exhausted.
    pub async fn next_message(&mut self) -> Result<Option<ProtocolMessage>> {
        loop {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .context("reading connector output line")?
            else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            if let Some(message) = self.process_line(&line)? {
                self.counters.observe(&message);
                return Ok(Some(message));
            }
        }
    }

    /// `Ok(None)` means the line was absorbed by policy (malformed or
    /// filtered); errors are fatal to the stream.
    fn process_line(&self, line: &str) -> Result<Option<ProtocolMessage>> {
        let doc: Value = match serde_json::from_str(line) {
            Ok(doc) => doc,
            Err(err) => {
                self.note_malformed(line, &err.to_string());
                return Ok(None);
            }
        };
        let Some(message_type) = doc.get("type").and_then(Value::as_str) else {
            self.note_malformed(line, "missing message type tag");
            return Ok(None);
        };

        if message_type == "RECORD" {
            if let Some(catalog) = &self.catalog {
                let Some(stream) = doc.get("stream").and_then(Value::as_str) else {
                    self.note_malformed(line, "record without stream name");
                    return Ok(None);
                };
                let namespace = doc.get("namespace").and_then(Value::as_str);
                if catalog.stream(namespace, stream).is_none() {
                    tracing::debug!(
                        origin = self.origin,
                        stream,
                        namespace,
                        "Dropping record for stream absent from catalog"
                    );
                    self.counters.observe_dropped();
                    return Ok(None);
                }
            }
        }

        let migrated = self
            .migrator
            .migrate(doc, self.declared, CANONICAL_VERSION)
            .context("migrating connector message to canonical version")?;

        let mut message: ProtocolMessage = match serde_json::from_value(migrated) {
            Ok(message) => message,
            Err(err) => {
                self.note_malformed(line, &err.to_string());
                return Ok(None);
            }
        };

        if let ProtocolMessage::Record(record) = &mut message {
            if let Some(catalog) = &self.catalog {
                let resolved = catalog.stream(record.namespace.as_deref(), &record.stream);
                if let Some(resolved) = resolved {
                    if resolved.field_selection.is_enabled() {
                        if let Some(data) = record.data.as_object_mut() {
                            data.retain(|field, _| resolved.field_selection.selects(field));
                        }
                    }
                }
            }
        }

        Ok(Some(message))
    }

    fn note_malformed(&self, line: &str, reason: &str) {
        self.counters.observe_malformed();
        let error = MalformedLineError {
            size_bytes: line.len(),
            reason: reason.to_string(),
        };

        if line.len() > self.options.max_logged_line_bytes {
            if self.options.log_long_record_pks {
                let fragment = truncate_at(line, self.options.max_logged_line_bytes);
                let stream = extract::extract_stream_name(fragment);
                let pk_fields: Vec<String> = stream
                    .as_deref()
                    .and_then(|name| {
                        self.catalog
                            .as_ref()
                            .and_then(|catalog| catalog.stream(None, name))
                    })
                    .map(|resolved| {
                        resolved
                            .effective_primary_key()
                            .iter()
                            .filter_map(|path| path.first().cloned())
                            .collect()
                    })
                    .unwrap_or_default();
                let primary_keys = extract::extract_primary_keys(fragment, &pk_fields);
                tracing::warn!(
                    origin = self.origin,
                    error = %error,
                    stream = stream.as_deref(),
                    primary_keys = ?primary_keys,
                    "Skipping oversized connector line"
                );
            } else {
                tracing::warn!(
                    origin = self.origin,
                    error = %error,
                    "Skipping oversized connector line"
                );
            }
        } else {
            tracing::warn!(
                origin = self.origin,
                error = %error,
                preview = truncate_at(line, MALFORMED_PREVIEW_BYTES),
                "Skipping malformed connector line"
            );
        }
    }
}

fn truncate_at(line: &str, max_bytes: usize) -> &str {
    if line.len() <= max_bytes {
        return line;
    }
    let mut end = max_bytes;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use syncbridge_types::catalog::{
        DestinationSyncMode, FieldSelection, ResolvedStream, SourceStream, SyncMode,
    };
    use tokio::io::BufReader;

    use crate::registry::VersionRegistry;

    fn migrator() -> Migrator {
        Migrator::new(Arc::new(VersionRegistry::standard()))
    }

    fn stream_over(
        input: &'static str,
        declared: ProtocolVersion,
    ) -> VersionedMessageStream<BufReader<&'static [u8]>> {
        VersionedMessageStream::new(
            BufReader::new(input.as_bytes()),
            declared,
            migrator(),
            "source",
        )
    }

    fn users_catalog(selection: FieldSelection) -> Arc<ResolvedCatalog> {
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
                primary_key: vec![vec!["id".to_string()]],
                field_selection: selection,
            }],
        })
    }

    #[tokio::test]
    async fn test_well_formed_lines_yield_messages() {
        let input = "{\"type\":\"RECORD\",\"stream\":\"users\",\"emitted_at\":1,\"data\":{\"id\":1}}\n\
                     {\"type\":\"STATE\",\"data\":{\"cursor\":1}}\n";
        let mut stream = stream_over(input, CANONICAL_VERSION);
        let first = stream.next_message().await.expect("read").expect("message");
        assert!(matches!(first, ProtocolMessage::Record(_)));
        let second = stream.next_message().await.expect("read").expect("message");
        assert!(matches!(second, ProtocolMessage::State(_)));
        assert!(stream.next_message().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_skipped_and_counted() {
        let input = "{\"type\":\"STATE\",\"data\":{}}\n\
                     this is not json\n\
                     {\"type\":\"STATE\",\"data\":{}}\n";
        let mut stream = stream_over(input, CANONICAL_VERSION);
        let counters = stream.counters();

        let mut yielded = 0;
        while let Some(_message) = stream.next_message().await.expect("read") {
            yielded += 1;
        }
        assert_eq!(yielded, 2);
        assert_eq!(counters.snapshot().malformed_lines, 1);
        assert_eq!(counters.snapshot().states, 2);
    }

    #[tokio::test]
    async fn test_document_without_type_tag_is_malformed() {
        let input = "{\"stream\":\"users\"}\n123\n";
        let mut stream = stream_over(input, CANONICAL_VERSION);
        assert!(stream.next_message().await.expect("read").is_none());
        assert_eq!(stream.counters().snapshot().malformed_lines, 2);
    }

    #[tokio::test]
    async fn test_record_for_unknown_stream_dropped() {
        let input = "{\"type\":\"RECORD\",\"stream\":\"orders\",\"emitted_at\":1,\"data\":{}}\n";
        let mut stream =
            stream_over(input, CANONICAL_VERSION).with_catalog(users_catalog(FieldSelection::All));
        let counters = stream.counters();
        assert!(stream.next_message().await.expect("read").is_none());
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.dropped_records, 1);
        assert_eq!(snapshot.malformed_lines, 0);
    }

    #[tokio::test]
    async fn test_field_selection_projects_record_data() {
        let input = "{\"type\":\"RECORD\",\"stream\":\"users\",\"emitted_at\":1,\
                     \"data\":{\"id\":7,\"email\":\"a@b.c\"}}\n";
        let selection =
            FieldSelection::Selected(["id".to_string()].into_iter().collect::<BTreeSet<_>>());
        let mut stream =
            stream_over(input, CANONICAL_VERSION).with_catalog(users_catalog(selection));
        let message = stream.next_message().await.expect("read").expect("message");
        let ProtocolMessage::Record(record) = message else {
            panic!("expected record");
        };
        assert_eq!(record.data, serde_json::json!({"id": 7}));
    }

    #[tokio::test]
    async fn test_older_version_line_migrates_to_canonical() {
        let input = "{\"type\":\"RECORD\",\"stream\":\"users\",\"emittedAt\":42,\"data\":{}}\n";
        let mut stream = stream_over(input, ProtocolVersion::new(0, 1, 0));
        let message = stream.next_message().await.expect("read").expect("message");
        let ProtocolMessage::Record(record) = message else {
            panic!("expected record");
        };
        assert_eq!(record.emitted_at, 42);
        assert_eq!(record.namespace, None);
    }

    #[tokio::test]
    async fn test_oversized_malformed_line_with_pk_logging() {
        // Threshold of 60 bytes forces the oversized path; the line is cut
        // mid-document so extraction exercises the regex fallback.
        let input = "{\"type\":\"RECORD\",\"stream\":\"users\",\"data\":{\"id\":42,\
                     \"blob\":\"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n";
        let options = InvalidLineOptions {
            log_long_record_pks: true,
            max_logged_line_bytes: 60,
        };
        let mut stream = stream_over(input, CANONICAL_VERSION)
            .with_catalog(users_catalog(FieldSelection::All))
            .with_options(options);
        assert!(stream.next_message().await.expect("read").is_none());
        assert_eq!(stream.counters().snapshot().malformed_lines, 1);
    }

    #[tokio::test]
    async fn test_blank_lines_skipped_without_counting() {
        let input = "\n\n{\"type\":\"STATE\",\"data\":{}}\n\n";
        let mut stream = stream_over(input, CANONICAL_VERSION);
        assert!(stream.next_message().await.expect("read").is_some());
        assert!(stream.next_message().await.expect("read").is_none());
        assert_eq!(stream.counters().snapshot().malformed_lines, 0);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "abc\u{00e9}def";
        let cut = truncate_at(s, 4);
        assert!(s.starts_with(cut));
        assert!(cut.len() <= 4);
    }
}
