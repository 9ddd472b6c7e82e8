use thiserror::Error;

use crate::entity::EntityRef;
use crate::ops::{Identity, NodeRef};
use crate::schema::SchemaError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type for the object-graph mapper.
///
/// Every variant aborts the whole save call.
#[derive(Error, Debug)]
pub enum OgmError {
    #[error("Invalid key for {type_name} at {slot}: {reason}")]
    InvalidKey {
        type_name: String,
        slot: EntityRef,
        reason: String,
    },

    #[error("Cyclic key conflict: {type_name} at {slot} has no usable key but lies on a reference cycle")]
    CyclicKeyConflict {
        type_name: String,
        slot: EntityRef,
        #[source]
        source: Box<OgmError>,
    },

    #[error("Unresolvable dependency: {} node operations never became ready ({})", remaining.len(), display_identities(remaining))]
    UnresolvableDependency { remaining: Vec<Identity> },

    #[error("Conflicting state for {identity}: {property} differs between {first} and {duplicate}")]
    ConflictingEntityState {
        identity: Identity,
        property: String,
        first: EntityRef,
        duplicate: EntityRef,
    },

    #[error("Entity {slot} links through {field} to missing slot {target}")]
    DanglingReference {
        slot: EntityRef,
        field: String,
        target: EntityRef,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure reported by a [`Persister`](crate::Persister).
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("batch {batch} failed: {source}")]
    Batch {
        batch: usize,
        #[source]
        source: BoxError,
    },

    #[error("transaction failed: {0}")]
    Transaction(#[source] BoxError),

    #[error("batch {batch} refers to {node_ref}, which no earlier operation wrote")]
    UnknownNodeRef { batch: usize, node_ref: NodeRef },
}

impl PersistenceError {
    pub fn batch(batch: usize, source: impl Into<BoxError>) -> Self {
        Self::Batch {
            batch,
            source: source.into(),
        }
    }

    pub fn transaction(source: impl Into<BoxError>) -> Self {
        Self::Transaction(source.into())
    }
}

pub type Result<T> = std::result::Result<T, OgmError>;

fn display_identities(ids: &[Identity]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::KeyValue;

    #[test]
    fn test_unresolvable_dependency_lists_identities() {
        let err = OgmError::UnresolvableDependency {
            remaining: vec![
                Identity::Natural {
                    label: "Person".to_string(),
                    key: KeyValue::String("a".to_string()),
                },
                Identity::Transient { slot: EntityRef(2) },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 node operations"));
        assert!(msg.contains("Person(\"a\")"));
        assert!(msg.contains("new#2"));
    }

    #[test]
    fn test_persistence_error_wraps_source() {
        let err: OgmError = PersistenceError::batch(3, "connection reset").into();
        assert_eq!(
            err.to_string(),
            "Persistence error: batch 3 failed: connection reset"
        );
    }
}
