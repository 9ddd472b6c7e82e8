//! ogm-core: Shared types, schema, and error handling for the object-graph mapper.
//!
//! This crate provides the foundational types used across all mapper components:
//! - Scalar values and identity keys
//! - The entity arena that application object graphs are expressed in
//! - The declarative schema registry (labels, id strategies, relationship fields)
//! - Node and relationship operations handed to a `Persister`
//! - Configuration management and save lifecycle events

pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod ops;
pub mod persister;
pub mod schema;
pub mod value;

pub use config::{DuplicatePolicy, Neo4jSettings, OgmConfig, PersistSettings};
pub use entity::{Entity, EntityGraph, EntityRef, Link};
pub use error::{OgmError, PersistenceError, Result};
pub use ops::{BatchResult, ClearOp, Identity, NodeOp, NodeRef, OperationBatch, RelationshipOp};
pub use persister::{PersistTransaction, Persister};
pub use schema::{
    Direction, IdDescriptor, IdStrategy, NodeDescriptor, RelationshipDescriptor, SchemaError,
    SchemaRegistry,
};
pub use value::{KeyValue, Properties, Value};
