//! ogm-graph: graph stores behind the `Persister` seam.
//!
//! [`Neo4jPersister`] turns operation batches into Cypher and runs them in a
//! single Neo4j transaction. [`MemoryStore`] implements the same contract in
//! process and is what the engine tests run against.

pub mod client;
pub mod cypher;
pub mod memory;
pub mod persister;
pub mod queries;

pub use client::{GraphClient, GraphConfig, GraphError};
pub use memory::{MemoryStore, MemoryTransaction, StoredNode, StoredRelationship};
pub use persister::{Neo4jPersister, Neo4jTransaction};
pub use queries::NodeRecord;
