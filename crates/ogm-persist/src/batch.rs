//! Statement batching.
//!
//! A node depends on every node it references through a non-deferred
//! relationship: referenced entities exist before the entity pointing at
//! them. Nodes are layered greedily (Kahn's algorithm, one layer per batch)
//! and ties are broken by discovery order, so a given reference graph always
//! yields the same batches.
//!
//! A clear shares the batch of its node. Every relationship touching a node
//! lands in that batch or a later one, and clears run before relationship
//! writes inside a batch, so a clear never removes a relationship of the
//! save it belongs to.

use ogm_core::{OgmError, OperationBatch, PersistSettings, Result};

use crate::walk::ReferenceGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Place a relationship in the batch of its later endpoint instead of
    /// the batch after it.
    pub relationships_in_node_batch: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            relationships_in_node_batch: true,
        }
    }
}

impl From<&PersistSettings> for BatchOptions {
    fn from(settings: &PersistSettings) -> Self {
        Self {
            relationships_in_node_batch: settings.relationships_in_node_batch,
        }
    }
}

/// Order the operations of `graph` into dependency-safe batches.
pub fn batch(graph: &ReferenceGraph, options: BatchOptions) -> Result<Vec<OperationBatch>> {
    let levels = layer_nodes(graph)?;

    let rel_offset = usize::from(!options.relationships_in_node_batch);
    let rel_levels: Vec<usize> = graph
        .relationships()
        .iter()
        .map(|r| levels[r.from.0].max(levels[r.to.0]) + rel_offset)
        .collect();

    let batch_count = levels
        .iter()
        .chain(rel_levels.iter())
        .map(|l| l + 1)
        .max()
        .unwrap_or(0);

    let mut batches: Vec<OperationBatch> = (0..batch_count).map(OperationBatch::new).collect();
    for (node, &level) in graph.nodes().iter().zip(levels.iter()) {
        batches[level].nodes.push(node.clone());
    }
    for clear in graph.clears() {
        batches[levels[clear.node.0]].clears.push(clear.clone());
    }
    for (rel, &level) in graph.relationships().iter().zip(rel_levels.iter()) {
        batches[level].relationships.push(rel.clone());
    }

    batches.retain(|b| !b.is_empty());
    for (i, b) in batches.iter_mut().enumerate() {
        b.index = i;
    }

    tracing::debug!(
        batches = batches.len(),
        nodes = graph.nodes().len(),
        clears = graph.clears().len(),
        relationships = graph.relationships().len(),
        "Operations batched"
    );
    Ok(batches)
}

/// Batch level of every node, indexed by `NodeRef`.
fn layer_nodes(graph: &ReferenceGraph) -> Result<Vec<usize>> {
    let n = graph.nodes().len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut unmet = vec![0usize; n];

    for rel in graph.relationships() {
        if rel.deferred || rel.from == rel.to {
            continue;
        }
        dependents[rel.to.0].push(rel.from.0);
        unmet[rel.from.0] += 1;
    }

    let mut levels = vec![usize::MAX; n];
    let mut ready: Vec<usize> = (0..n).filter(|&i| unmet[i] == 0).collect();
    let mut depth = 0;
    let mut placed = 0;

    while !ready.is_empty() {
        let mut next = Vec::new();
        for &i in &ready {
            levels[i] = depth;
            placed += 1;
            for &d in &dependents[i] {
                unmet[d] -= 1;
                if unmet[d] == 0 {
                    next.push(d);
                }
            }
        }
        next.sort_unstable();
        ready = next;
        depth += 1;
    }

    if placed < n {
        let remaining = graph
            .nodes()
            .iter()
            .filter(|op| levels[op.node_ref.0] == usize::MAX)
            .map(|op| op.identity.clone())
            .collect();
        let err = OgmError::UnresolvableDependency { remaining };
        tracing::error!(error = %err, "Dependency layering stalled");
        return Err(err);
    }

    Ok(levels)
}
