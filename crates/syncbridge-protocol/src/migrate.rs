//! Chain-building migrator over wire documents.

use std::sync::Arc;

use serde_json::Value;

use syncbridge_types::errors::UnsupportedVersionError;
use syncbridge_types::version::ProtocolVersion;

use crate::registry::VersionRegistry;

/// Applies the directed chain of single-step migrations between two
/// registered versions. Intermediate forms never escape this call.
#[derive(Clone)]
pub struct Migrator {
    registry: Arc<VersionRegistry>,
}

impl Migrator {
    pub fn new(registry: Arc<VersionRegistry>) -> Self {
        Self { registry }
    }

    /// Verify a path exists without migrating anything. Handles call this at
    /// start time so version mismatches surface before any process I/O.
    pub fn check_path(
        &self,
        from: ProtocolVersion,
        to: ProtocolVersion,
    ) -> Result<(), UnsupportedVersionError> {
        self.registry.chain(from, to).map(|_| ())
    }

    /// Migrate one wire document from `from` to `to`.
    pub fn migrate(
        &self,
        doc: Value,
        from: ProtocolVersion,
        to: ProtocolVersion,
    ) -> Result<Value, UnsupportedVersionError> {
        let chain = self.registry.chain(from, to)?;
        Ok(chain.iter().fold(doc, |doc, link| link.apply(doc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use syncbridge_types::version::CANONICAL_VERSION;

    fn migrator() -> Migrator {
        Migrator::new(Arc::new(VersionRegistry::standard()))
    }

    const V01: ProtocolVersion = ProtocolVersion::new(0, 1, 0);
    const V02: ProtocolVersion = ProtocolVersion::new(0, 2, 0);

    #[test]
    fn test_migrate_v01_record_to_canonical() {
        let doc = json!({"type": "RECORD", "stream": "users", "emittedAt": 7, "data": {"id": 1}});
        let up = migrator()
            .migrate(doc, V01, CANONICAL_VERSION)
            .expect("migrate");
        assert_eq!(up["emitted_at"], 7);
        assert_eq!(up["namespace"], serde_json::Value::Null);
        assert!(up.get("emittedAt").is_none());
    }

    #[test]
    fn test_migrate_identity() {
        let doc = json!({"type": "STATE", "data": {}});
        let out = migrator()
            .migrate(doc.clone(), CANONICAL_VERSION, CANONICAL_VERSION)
            .expect("migrate");
        assert_eq!(out, doc);
    }

    #[test]
    fn test_migrate_unregistered_fails() {
        let err = migrator()
            .migrate(json!({}), ProtocolVersion::new(9, 9, 9), CANONICAL_VERSION)
            .err()
            .expect("unsupported");
        assert_eq!(err.from, ProtocolVersion::new(9, 9, 9));
    }

    #[test]
    fn test_check_path_matches_migrate() {
        let m = migrator();
        assert!(m.check_path(V01, CANONICAL_VERSION).is_ok());
        assert!(m.check_path(CANONICAL_VERSION, V01).is_ok());
        assert!(m
            .check_path(ProtocolVersion::new(0, 4, 0), CANONICAL_VERSION)
            .is_err());
    }

    // Round-trip property: for registered V1 <= V2, migrating up then back
    // down reproduces the original document for every message variant the
    // steps touch.
    #[test]
    fn test_roundtrip_all_variants_all_version_pairs() {
        let m = migrator();
        let docs_by_version = [
            (
                V01,
                vec![
                    json!({"type": "RECORD", "stream": "users", "emittedAt": 7, "data": {"id": 1}}),
                    json!({"type": "LOG", "level": "INFO", "msg": "hi"}),
                    json!({"type": "TRACE", "kind": "ERROR", "emittedAt": 7, "payload": {}}),
                    json!({"type": "STATE", "data": {"cursor": 3}}),
                ],
            ),
            (
                V02,
                vec![
                    json!({"type": "RECORD", "stream": "users", "emitted_at": 7, "data": {"id": 1}}),
                    json!({"type": "LOG", "level": "INFO", "message": "hi"}),
                    json!({"type": "STATE", "data": {"cursor": 3}}),
                ],
            ),
        ];

        for (from, docs) in docs_by_version {
            for to in [V02, CANONICAL_VERSION] {
                if to < from {
                    continue;
                }
                for doc in &docs {
                    let up = m.migrate(doc.clone(), from, to).expect("up");
                    let back = m.migrate(up, to, from).expect("down");
                    assert_eq!(&back, doc, "roundtrip {from} -> {to} -> {from}");
                }
            }
        }
    }
}
