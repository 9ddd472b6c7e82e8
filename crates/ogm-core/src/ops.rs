//! Node and relationship operations handed to a persister.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityRef;
use crate::schema::{Direction, IdStrategy};
use crate::value::{KeyValue, Properties, Value};

/// In-memory correlation handle for a node operation.
///
/// Not a store id: relationship operations use it to refer to nodes written
/// in the same batch or an earlier batch of the same save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeRef(pub usize);

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What makes two entity instances the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    /// Natural key, or an externally generated key once assigned.
    Natural { label: String, key: KeyValue },
    /// Store-generated id of an already persisted node.
    Surrogate { label: String, id: i64 },
    /// Not yet persisted, store-generated id. Only the instance itself matches.
    Transient { slot: EntityRef },
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Natural { label, key } => write!(f, "{label}({key})"),
            Identity::Surrogate { label, id } => write!(f, "{label}[id={id}]"),
            Identity::Transient { slot } => write!(f, "new{slot}"),
        }
    }
}

/// Create or merge one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOp {
    pub node_ref: NodeRef,
    pub identity: Identity,
    /// Primary label first.
    pub labels: Vec<String>,
    pub id_property: String,
    /// Key written to `id_property`, or the store id for generated ids.
    /// `None` only for nodes whose id the store has yet to allocate.
    pub key: Option<Value>,
    pub strategy: IdStrategy,
    pub properties: Properties,
    pub is_new: bool,
    /// Instance whose attributes were captured.
    pub origin: EntityRef,
}

impl NodeOp {
    pub fn primary_label(&self) -> &str {
        self.labels.first().map(String::as_str).unwrap_or_default()
    }
}

/// Create one relationship between two node operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipOp {
    pub rel_type: String,
    pub direction: Direction,
    /// The node declaring the relationship field.
    pub from: NodeRef,
    /// The referenced node.
    pub to: NodeRef,
    pub properties: Properties,
    /// Field the relationship was declared on.
    pub field: String,
    /// Back reference into a node still being walked when it was found.
    /// Deferred relationships never order node creation.
    pub deferred: bool,
}

impl RelationshipOp {
    /// Start and end of the stored relationship, honoring direction.
    pub fn endpoints(&self) -> (NodeRef, NodeRef) {
        match self.direction {
            Direction::Outgoing => (self.from, self.to),
            Direction::Incoming => (self.to, self.from),
        }
    }
}

/// Remove the stored relationships a node holds through one field.
///
/// Emitted for nodes that may already be stored, so a re-saved entity ends
/// up with exactly the relationships it declares now. Placed in the batch of
/// its node, ahead of every relationship of the same save touching that
/// node, so it only ever removes relationships written by earlier saves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearOp {
    pub node: NodeRef,
    pub field: String,
    /// `None` for dynamic fields: relationships of any type are removed.
    pub rel_type: Option<String>,
    pub direction: Direction,
    /// Primary label of the field's target type.
    pub target_label: String,
}

/// A dependency-safe group of operations executed together.
///
/// Inside a batch, node operations run first, then clears, then
/// relationship operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationBatch {
    pub index: usize,
    pub nodes: Vec<NodeOp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clears: Vec<ClearOp>,
    pub relationships: Vec<RelationshipOp>,
}

impl OperationBatch {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.clears.len() + self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.clears.is_empty() && self.relationships.is_empty()
    }
}

/// Outcome of executing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub index: usize,
    /// Store ids of the nodes written by this batch.
    pub store_ids: Vec<(NodeRef, i64)>,
    pub nodes_written: usize,
    pub relationships_written: usize,
    /// Stale relationships deleted by the batch's clears.
    #[serde(default)]
    pub relationships_removed: usize,
}
