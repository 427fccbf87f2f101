//! Registered protocol versions and the migration steps between them.

use serde_json::Value;

use syncbridge_types::errors::UnsupportedVersionError;
use syncbridge_types::version::{ProtocolVersion, CANONICAL_VERSION};

/// A single-step migration between two adjacent registered versions.
///
/// Each step declares both directions; the migrator invokes exactly one per
/// call. Transformations are pure and total over well-formed documents.
pub struct MigrationStep {
    pub from: ProtocolVersion,
    pub to: ProtocolVersion,
    pub forward: fn(Value) -> Value,
    pub backward: fn(Value) -> Value,
}

/// One link of a resolved migration chain.
pub(crate) enum ChainLink<'a> {
    Forward(&'a MigrationStep),
    Backward(&'a MigrationStep),
}

impl ChainLink<'_> {
    pub(crate) fn apply(&self, doc: Value) -> Value {
        match self {
            Self::Forward(step) => (step.forward)(doc),
            Self::Backward(step) => (step.backward)(doc),
        }
    }
}

/// Ordered set of registered protocol versions plus the steps between
/// adjacent pairs.
pub struct VersionRegistry {
    versions: Vec<ProtocolVersion>,
    steps: Vec<MigrationStep>,
}

impl VersionRegistry {
    /// Registry with the versions this platform ships migrations for.
    pub fn standard() -> Self {
        Self {
            versions: vec![
                ProtocolVersion::new(0, 1, 0),
                ProtocolVersion::new(0, 2, 0),
                CANONICAL_VERSION,
            ],
            steps: vec![
                MigrationStep {
                    from: ProtocolVersion::new(0, 1, 0),
                    to: ProtocolVersion::new(0, 2, 0),
                    forward: migrate_v01_to_v02,
                    backward: migrate_v02_to_v01,
                },
                MigrationStep {
                    from: ProtocolVersion::new(0, 2, 0),
                    to: CANONICAL_VERSION,
                    forward: migrate_v02_to_v03,
                    backward: migrate_v03_to_v02,
                },
            ],
        }
    }

    /// Registry over an explicit version/step set. Steps must connect
    /// adjacent entries of `versions` in ascending order.
    pub fn new(versions: Vec<ProtocolVersion>, steps: Vec<MigrationStep>) -> Self {
        Self { versions, steps }
    }

    pub fn is_registered(&self, version: ProtocolVersion) -> bool {
        self.versions.contains(&version)
    }

    pub fn versions(&self) -> &[ProtocolVersion] {
        &self.versions
    }

    /// Build the directed chain of steps from `from` to `to`.
    pub(crate) fn chain(
        &self,
        from: ProtocolVersion,
        to: ProtocolVersion,
    ) -> Result<Vec<ChainLink<'_>>, UnsupportedVersionError> {
        let unsupported = || UnsupportedVersionError { from, to };
        if !self.is_registered(from) || !self.is_registered(to) {
            return Err(unsupported());
        }
        if from == to {
            return Ok(Vec::new());
        }

        let mut links = Vec::new();
        let mut at = from;
        if from < to {
            while at < to {
                let step = self
                    .steps
                    .iter()
                    .find(|s| s.from == at)
                    .ok_or_else(unsupported)?;
                at = step.to;
                links.push(ChainLink::Forward(step));
            }
        } else {
            while at > to {
                let step = self
                    .steps
                    .iter()
                    .find(|s| s.to == at)
                    .ok_or_else(unsupported)?;
                at = step.from;
                links.push(ChainLink::Backward(step));
            }
        }
        if at != to {
            return Err(unsupported());
        }
        Ok(links)
    }
}

fn rename_key(doc: &mut Value, from: &str, to: &str) {
    if let Some(obj) = doc.as_object_mut() {
        if let Some(v) = obj.remove(from) {
            obj.insert(to.to_string(), v);
        }
    }
}

fn message_type(doc: &Value) -> Option<&str> {
    doc.get("type").and_then(Value::as_str)
}

/// 0.1.0 → 0.2.0: record emission timestamp key `emittedAt` becomes
/// `emitted_at`; log payload key `msg` becomes `message`.
fn migrate_v01_to_v02(mut doc: Value) -> Value {
    match message_type(&doc) {
        Some("RECORD") | Some("TRACE") => rename_key(&mut doc, "emittedAt", "emitted_at"),
        Some("LOG") => rename_key(&mut doc, "msg", "message"),
        _ => {}
    }
    doc
}

fn migrate_v02_to_v01(mut doc: Value) -> Value {
    match message_type(&doc) {
        Some("RECORD") | Some("TRACE") => rename_key(&mut doc, "emitted_at", "emittedAt"),
        Some("LOG") => rename_key(&mut doc, "message", "msg"),
        _ => {}
    }
    doc
}

/// 0.2.0 → 0.3.0: records gain a stream `namespace`; absent means the
/// connector predates namespacing, so a null default is injected.
fn migrate_v02_to_v03(mut doc: Value) -> Value {
    if message_type(&doc) == Some("RECORD") {
        if let Some(obj) = doc.as_object_mut() {
            obj.entry("namespace").or_insert(Value::Null);
        }
    }
    doc
}

fn migrate_v03_to_v02(mut doc: Value) -> Value {
    if message_type(&doc) == Some("RECORD") {
        if let Some(obj) = doc.as_object_mut() {
            obj.remove("namespace");
        }
    }
    doc
}
