//! In-memory schema and stream-association store
//!
//! Two maps, each behind its own lock:
//!
//! - package name -> [`RegisteredSchema`]
//! - [`StreamId`] -> [`StreamAssociation`]
//!
//! Locks are only held for the map operation itself; nothing here performs
//! I/O. The only nested acquisition is associations -> schemas (in
//! [`SchemaStore::associate`]), so there is no lock-order inversion.

use crate::error::{DecoderError, DecoderResult};
use crate::types::{
    AssociateOutcome, DisassociateOutcome, RegisteredSchema, StreamAssociation, StreamId,
    UpsertOutcome,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Process-wide schema store shared by the control plane and the listener
#[derive(Debug, Default)]
pub struct SchemaStore {
    schemas: RwLock<HashMap<String, RegisteredSchema>>,
    associations: RwLock<HashMap<StreamId, StreamAssociation>>,
}

impl SchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the schema for `package`
    ///
    /// Identical bytes (same fingerprint) are a no-op.
    pub fn upsert_schema(&self, package: &str, descriptor: Vec<u8>) -> UpsertOutcome {
        let schema = RegisteredSchema::new(package, descriptor);
        let mut schemas = self.schemas.write();

        let outcome = match schemas.get(package) {
            Some(current) if current.fingerprint == schema.fingerprint => {
                info!(package = %package, fingerprint = %schema.fingerprint, "Checksum matches, skipping");
                return UpsertOutcome::Skipped;
            }
            Some(_) => {
                warn!(package = %package, fingerprint = %schema.fingerprint, "Overwriting existing proto package");
                UpsertOutcome::Replaced
            }
            None => {
                info!(package = %package, fingerprint = %schema.fingerprint, "Setting proto package");
                UpsertOutcome::Inserted
            }
        };

        schemas.insert(package.to_string(), schema);
        outcome
    }

    /// Bind `stream` to `(package, message)`
    ///
    /// Fails with [`DecoderError::SchemaNotRegistered`] if no schema exists for
    /// `package` at the time of the call.
    pub fn associate(
        &self,
        stream: StreamId,
        package: &str,
        message: &str,
    ) -> DecoderResult<AssociateOutcome> {
        let mut associations = self.associations.write();

        if let Some(current) = associations.get(&stream) {
            if current.package == package && current.message == message {
                debug!(stream_id = %stream, package = %package, message = %message, "Association already present");
                return Ok(AssociateOutcome::AlreadyAssociated);
            }
            return Ok(AssociateOutcome::Conflict(current.clone()));
        }

        if !self.schemas.read().contains_key(package) {
            return Err(DecoderError::SchemaNotRegistered(package.to_string()));
        }

        associations.insert(stream, StreamAssociation::new(package, message));
        info!(stream_id = %stream, package = %package, message = %message, "Association added");
        Ok(AssociateOutcome::Created)
    }

    /// Remove the association for `stream`, if any
    pub fn disassociate(&self, stream: StreamId) -> DisassociateOutcome {
        match self.associations.write().remove(&stream) {
            Some(removed) => {
                info!(
                    stream_id = %stream,
                    package = %removed.package,
                    message = %removed.message,
                    "Association removed"
                );
                DisassociateOutcome::Removed(removed)
            }
            None => {
                debug!(stream_id = %stream, "No association found for stream");
                DisassociateOutcome::NotFound
            }
        }
    }

    /// Current association of `stream`
    pub fn resolve(&self, stream: StreamId) -> DecoderResult<StreamAssociation> {
        self.associations
            .read()
            .get(&stream)
            .cloned()
            .ok_or(DecoderError::StreamNotAssociated(stream))
    }

    /// Current descriptor bytes registered for `package`
    pub fn lookup_schema(&self, package: &str) -> DecoderResult<RegisteredSchema> {
        self.schemas
            .read()
            .get(package)
            .cloned()
            .ok_or_else(|| DecoderError::SchemaNotRegistered(package.to_string()))
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.read().len()
    }

    pub fn association_count(&self) -> usize {
        self.associations.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn stream(n: u8) -> StreamId {
        StreamId::from_slice(&[n; 16]).unwrap()
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = SchemaStore::new();
        assert_eq!(store.upsert_schema("p", vec![1, 2, 3]), UpsertOutcome::Inserted);
        let before = store.lookup_schema("p").unwrap().fingerprint;

        store.associate(stream(1), "p", "M").unwrap();
        assert_eq!(store.upsert_schema("p", vec![1, 2, 3]), UpsertOutcome::Skipped);

        assert_eq!(store.lookup_schema("p").unwrap().fingerprint, before);
        assert_eq!(
            store.resolve(stream(1)).unwrap(),
            StreamAssociation::new("p", "M")
        );
    }

    #[test]
    fn test_upsert_overwrites_different_bytes() {
        let store = SchemaStore::new();
        store.upsert_schema("p", vec![1]);
        assert_eq!(store.upsert_schema("p", vec![2]), UpsertOutcome::Replaced);
        assert_eq!(store.lookup_schema("p").unwrap().descriptor, vec![2]);
        assert_eq!(store.schema_count(), 1);
    }

    #[test]
    fn test_associate_requires_schema() {
        let store = SchemaStore::new();
        let err = store.associate(stream(1), "missing", "M").unwrap_err();
        assert!(matches!(err, DecoderError::SchemaNotRegistered(p) if p == "missing"));
        assert_eq!(store.association_count(), 0);
    }

    #[test]
    fn test_associate_is_idempotent() {
        let store = SchemaStore::new();
        store.upsert_schema("p", vec![1]);
        assert_eq!(
            store.associate(stream(1), "p", "M").unwrap(),
            AssociateOutcome::Created
        );
        assert_eq!(
            store.associate(stream(1), "p", "M").unwrap(),
            AssociateOutcome::AlreadyAssociated
        );
        assert_eq!(store.association_count(), 1);
    }

    #[test]
    fn test_associate_conflict_keeps_existing() {
        let store = SchemaStore::new();
        store.upsert_schema("p", vec![1]);
        store.upsert_schema("q", vec![2]);
        store.associate(stream(1), "p", "M1").unwrap();

        assert_eq!(
            store.associate(stream(1), "p", "M2").unwrap(),
            AssociateOutcome::Conflict(StreamAssociation::new("p", "M1"))
        );
        assert_eq!(
            store.associate(stream(1), "q", "M1").unwrap(),
            AssociateOutcome::Conflict(StreamAssociation::new("p", "M1"))
        );
        assert_eq!(
            store.resolve(stream(1)).unwrap(),
            StreamAssociation::new("p", "M1")
        );
    }

    #[test]
    fn test_disassociate() {
        let store = SchemaStore::new();
        assert_eq!(store.disassociate(stream(9)), DisassociateOutcome::NotFound);

        store.upsert_schema("p", vec![1]);
        store.associate(stream(1), "p", "M").unwrap();
        assert_eq!(
            store.disassociate(stream(1)),
            DisassociateOutcome::Removed(StreamAssociation::new("p", "M"))
        );
        assert!(matches!(
            store.resolve(stream(1)),
            Err(DecoderError::StreamNotAssociated(_))
        ));

        // rebinding to a different message is allowed after an explicit disassociate
        assert_eq!(
            store.associate(stream(1), "p", "Other").unwrap(),
            AssociateOutcome::Created
        );
    }

    #[test]
    fn test_concurrent_associate_and_resolve() {
        let store = Arc::new(SchemaStore::new());
        store.upsert_schema("p", vec![1]);

        let handles: Vec<_> = (0..8u8)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.associate(stream(n), "p", "M").unwrap();
                        if let Ok(assoc) = store.resolve(stream(n)) {
                            assert_eq!(assoc, StreamAssociation::new("p", "M"));
                        }
                        store.disassociate(stream(n));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.association_count(), 0);
    }
}
