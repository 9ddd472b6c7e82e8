//! In-process graph store.
//!
//! Mirrors the write semantics of the Cypher statements: keyed nodes merge on
//! (primary label, key property), nodes with generated ids are created or
//! matched by internal id, clears delete a node's relationships through one
//! field, relationships are always created, and node property maps merge
//! with null removing a property. A transaction holds
//! the store's write lock and works on a staged copy, so nothing is visible
//! before commit and rollback is a drop.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ogm_core::{
    BatchResult, ClearOp, Direction, IdStrategy, NodeOp, NodeRef, OperationBatch,
    PersistTransaction, PersistenceError, Persister, Properties, Value,
};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::client::GraphError;

const NO_FAILURE: usize = usize::MAX;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: Properties,
}

impl StoredNode {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRelationship {
    pub rel_type: String,
    pub start: i64,
    pub end: i64,
    pub properties: Properties,
}

#[derive(Debug, Clone, Default)]
struct GraphState {
    nodes: BTreeMap<i64, StoredNode>,
    relationships: Vec<StoredRelationship>,
    next_id: i64,
}

impl GraphState {
    fn find_keyed(&self, label: &str, property: &str, key: &Value) -> Option<i64> {
        self.nodes
            .values()
            .find(|n| n.has_label(label) && n.property(property) == Some(key))
            .map(|n| n.id)
    }

    fn create(&mut self, labels: &[String], properties: Properties) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        let properties = properties.into_iter().filter(|(_, v)| !v.is_null()).collect();
        self.nodes.insert(
            id,
            StoredNode {
                id,
                labels: labels.to_vec(),
                properties,
            },
        );
        id
    }

    fn write_node(&mut self, op: &NodeOp) -> Result<i64, GraphError> {
        let label = op.primary_label();
        let existing = match (op.strategy, &op.key) {
            (IdStrategy::Generated, None) => None,
            (IdStrategy::Generated, Some(Value::Int(id))) => match self.nodes.get(id) {
                Some(node) if node.has_label(label) => Some(*id),
                _ => {
                    return Err(GraphError::NotFound {
                        label: label.to_string(),
                        id: id.to_string(),
                    })
                }
            },
            (IdStrategy::Generated, Some(other)) => {
                return Err(GraphError::Serialization(format!(
                    "{} carries a {} store id",
                    op.identity,
                    other.kind()
                )))
            }
            (_, Some(key)) => self.find_keyed(label, &op.id_property, key),
            (_, None) => {
                return Err(GraphError::Constraint(format!(
                    "{} has no value for {}",
                    op.identity, op.id_property
                )))
            }
        };

        let Some(id) = existing else {
            let mut properties = op.properties.clone();
            if op.strategy != IdStrategy::Generated {
                if let Some(key) = &op.key {
                    properties.insert(op.id_property.clone(), key.clone());
                }
            }
            return Ok(self.create(&op.labels, properties));
        };

        if let Some(node) = self.nodes.get_mut(&id) {
            merge_properties(&mut node.properties, &op.properties);
            for l in &op.labels {
                if !node.has_label(l) {
                    node.labels.push(l.clone());
                }
            }
        }
        Ok(id)
    }

    fn create_relationship(&mut self, rel_type: &str, start: i64, end: i64, properties: &Properties) {
        self.relationships.push(StoredRelationship {
            rel_type: rel_type.to_string(),
            start,
            end,
            properties: properties
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        });
    }

    /// Delete what `op` matches from node `node`. Returns the number removed.
    fn clear_relationships(&mut self, op: &ClearOp, node: i64) -> usize {
        let before = self.relationships.len();
        let nodes = &self.nodes;
        self.relationships.retain(|r| {
            let (near, far) = match op.direction {
                Direction::Outgoing => (r.start, r.end),
                Direction::Incoming => (r.end, r.start),
            };
            let matched = near == node
                && op.rel_type.as_deref().map_or(true, |t| t == r.rel_type)
                && nodes.get(&far).is_some_and(|n| n.has_label(&op.target_label));
            !matched
        });
        before - self.relationships.len()
    }
}

fn merge_properties(target: &mut Properties, update: &Properties) {
    for (k, v) in update {
        if v.is_null() {
            target.remove(k);
        } else {
            target.insert(k.clone(), v.clone());
        }
    }
}

/// In-memory `Persister`. Clones share the same store.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<GraphState>>,
    fail_on_batch: Arc<AtomicUsize>,
    transactions: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(GraphState::default())),
            fail_on_batch: Arc::new(AtomicUsize::new(NO_FAILURE)),
            transactions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every later transaction fail when it executes batch `index`.
    pub fn fail_on_batch(&self, index: usize) {
        self.fail_on_batch.store(index, Ordering::SeqCst);
    }

    pub fn clear_failure(&self) {
        self.fail_on_batch.store(NO_FAILURE, Ordering::SeqCst);
    }

    /// Number of transactions begun so far.
    pub fn transactions(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    pub async fn node(&self, id: i64) -> Option<StoredNode> {
        self.state.read().await.nodes.get(&id).cloned()
    }

    /// First node with `label` whose `property` equals `value`.
    pub async fn find_node(&self, label: &str, property: &str, value: &Value) -> Option<StoredNode> {
        let state = self.state.read().await;
        state
            .find_keyed(label, property, value)
            .and_then(|id| state.nodes.get(&id).cloned())
    }

    pub async fn nodes(&self, label: &str) -> Vec<StoredNode> {
        self.state
            .read()
            .await
            .nodes
            .values()
            .filter(|n| n.has_label(label))
            .cloned()
            .collect()
    }

    /// Nodes at the end of outgoing `rel_type` relationships of node `id`.
    pub async fn related(&self, id: i64, rel_type: &str) -> Vec<StoredNode> {
        let state = self.state.read().await;
        state
            .relationships
            .iter()
            .filter(|r| r.start == id && r.rel_type == rel_type)
            .filter_map(|r| state.nodes.get(&r.end).cloned())
            .collect()
    }

    pub async fn relationships(&self, rel_type: &str) -> Vec<StoredRelationship> {
        self.state
            .read()
            .await
            .relationships
            .iter()
            .filter(|r| r.rel_type == rel_type)
            .cloned()
            .collect()
    }

    pub async fn count_nodes(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    pub async fn count_relationships(&self) -> usize {
        self.state.read().await.relationships.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Persister for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, PersistenceError> {
        let guard = self.state.clone().write_owned().await;
        let staged = guard.clone();
        self.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTransaction {
            guard,
            staged,
            store_ids: HashMap::new(),
            fail_on_batch: self.fail_on_batch.load(Ordering::SeqCst),
        })
    }
}

/// Exclusive transaction over a [`MemoryStore`].
pub struct MemoryTransaction {
    guard: OwnedRwLockWriteGuard<GraphState>,
    staged: GraphState,
    store_ids: HashMap<NodeRef, i64>,
    fail_on_batch: usize,
}

impl MemoryTransaction {
    fn endpoint(&self, batch: usize, node: NodeRef) -> Result<i64, PersistenceError> {
        self.store_ids
            .get(&node)
            .copied()
            .ok_or(PersistenceError::UnknownNodeRef {
                batch,
                node_ref: node,
            })
    }
}

#[async_trait]
impl PersistTransaction for MemoryTransaction {
    async fn execute(&mut self, batch: &OperationBatch) -> Result<BatchResult, PersistenceError> {
        let mut result = BatchResult {
            index: batch.index,
            ..Default::default()
        };

        for op in &batch.nodes {
            let id = self
                .staged
                .write_node(op)
                .map_err(|e| PersistenceError::batch(batch.index, e))?;
            self.store_ids.insert(op.node_ref, id);
            result.store_ids.push((op.node_ref, id));
            result.nodes_written += 1;
        }

        if batch.index == self.fail_on_batch {
            return Err(PersistenceError::batch(
                batch.index,
                GraphError::Constraint(format!("injected failure in batch {}", batch.index)),
            ));
        }

        for op in &batch.clears {
            let node = self.endpoint(batch.index, op.node)?;
            result.relationships_removed += self.staged.clear_relationships(op, node);
        }

        for op in &batch.relationships {
            let (start, end) = op.endpoints();
            let start = self.endpoint(batch.index, start)?;
            let end = self.endpoint(batch.index, end)?;
            self.staged
                .create_relationship(&op.rel_type, start, end, &op.properties);
            result.relationships_written += 1;
        }

        Ok(result)
    }

    async fn commit(self) -> Result<(), PersistenceError> {
        let MemoryTransaction {
            mut guard, staged, ..
        } = self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self) -> Result<(), PersistenceError> {
        Ok(())
    }
}
