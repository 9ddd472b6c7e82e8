//! ogm-persist: Cycle-safe persistence of entity graphs.
//!
//! Resolves the identity of every entity reachable from a save root, walks
//! the reference graph without recursing into identities already seen,
//! orders node and relationship operations into dependency-safe batches, and
//! runs those batches inside one transaction of a [`Persister`].

pub mod batch;
pub mod resolve;
pub mod walk;

pub use batch::{batch, BatchOptions};
pub use resolve::{IdentityDescriptor, KeyResolver};
pub use walk::{walk, walk_all, ReferenceGraph};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ogm_core::events::{SaveEvent, SavePayload};
use ogm_core::{
    EntityGraph, EntityRef, IdStrategy, NodeRef, OgmError, OperationBatch, PersistSettings,
    PersistTransaction, Persister, Result, SchemaRegistry, Value,
};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Walk and batch output for one save call, before any I/O.
#[derive(Debug, Clone)]
pub struct SavePlan {
    pub graph: ReferenceGraph,
    pub batches: Vec<OperationBatch>,
}

impl SavePlan {
    /// Copy of `entities` with the ids known after executing this plan.
    ///
    /// `store_ids` maps node operations to the ids the store reported. Every
    /// instance sharing an identity receives the same id.
    pub fn apply_ids(
        &self,
        entities: &EntityGraph,
        store_ids: &HashMap<NodeRef, i64>,
    ) -> EntityGraph {
        let mut saved = entities.clone();
        for (slot, node) in self.graph.slots() {
            let (Some(op), Some(entity)) = (self.graph.node(node), saved.get_mut(slot)) else {
                continue;
            };
            match op.strategy {
                IdStrategy::Generated => {
                    if let Some(id) = store_ids.get(&node) {
                        entity.id = Some(Value::Int(*id));
                    }
                }
                IdStrategy::ExternallyGenerated => {
                    if op.key.is_some() {
                        entity.id = op.key.clone();
                    }
                }
                IdStrategy::Assigned => {}
            }
        }
        saved
    }
}

/// Summary of a committed save.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveReport {
    pub save_id: Uuid,
    pub batches: usize,
    pub nodes_written: usize,
    pub relationships_written: usize,
    /// Relationships of re-saved nodes that they no longer declare.
    pub relationships_removed: usize,
    pub completed_at: DateTime<Utc>,
}

/// Result of [`EntityPersister::save`]: the caller's graph with ids filled in.
#[derive(Debug, Clone)]
pub struct PersistedEntity {
    pub graph: EntityGraph,
    pub root: EntityRef,
    pub report: SaveReport,
}

/// Result of [`EntityPersister::save_all`].
#[derive(Debug, Clone)]
pub struct PersistedEntities {
    pub graph: EntityGraph,
    pub roots: Vec<EntityRef>,
    pub report: SaveReport,
}

/// Build the walk and batches for `roots` without touching the store.
pub fn plan_all(
    schema: &SchemaRegistry,
    graph: &EntityGraph,
    roots: &[EntityRef],
    settings: &PersistSettings,
) -> Result<SavePlan> {
    let reference_graph = walk_all(schema, graph, roots, settings.duplicate_policy)?;
    let batches = batch(&reference_graph, BatchOptions::from(settings))?;
    Ok(SavePlan {
        graph: reference_graph,
        batches,
    })
}

/// The save engine.
///
/// Stateless between calls: everything learned about entities lives in the
/// plan of a single call.
pub struct EntityPersister<P: Persister> {
    persister: P,
    schema: Arc<SchemaRegistry>,
    settings: PersistSettings,
    events: Option<UnboundedSender<SaveEvent>>,
}

impl<P: Persister> EntityPersister<P> {
    pub fn new(persister: P, schema: Arc<SchemaRegistry>) -> Self {
        Self {
            persister,
            schema,
            settings: PersistSettings::default(),
            events: None,
        }
    }

    pub fn with_settings(mut self, settings: PersistSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Publish save lifecycle events to `sink`.
    pub fn with_event_sink(mut self, sink: UnboundedSender<SaveEvent>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn persister(&self) -> &P {
        &self.persister
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Dry run of [`save`](Self::save).
    pub fn plan(&self, graph: &EntityGraph, root: EntityRef) -> Result<SavePlan> {
        plan_all(&self.schema, graph, &[root], &self.settings)
    }

    /// Persist everything reachable from `root` in one transaction.
    pub async fn save(&self, graph: &EntityGraph, root: EntityRef) -> Result<PersistedEntity> {
        let (graph, report) = self.execute(graph, &[root]).await?;
        Ok(PersistedEntity {
            graph,
            root,
            report,
        })
    }

    /// Persist several roots in one transaction. Entities shared between
    /// roots are written once.
    pub async fn save_all(
        &self,
        graph: &EntityGraph,
        roots: &[EntityRef],
    ) -> Result<PersistedEntities> {
        let (graph, report) = self.execute(graph, roots).await?;
        Ok(PersistedEntities {
            graph,
            roots: roots.to_vec(),
            report,
        })
    }

    async fn execute(
        &self,
        graph: &EntityGraph,
        roots: &[EntityRef],
    ) -> Result<(EntityGraph, SaveReport)> {
        let save_id = Uuid::new_v4();
        let plan = plan_all(&self.schema, graph, roots, &self.settings)?;

        let mut report = SaveReport {
            save_id,
            batches: plan.batches.len(),
            nodes_written: 0,
            relationships_written: 0,
            relationships_removed: 0,
            completed_at: Utc::now(),
        };
        if plan.batches.is_empty() {
            return Ok((graph.clone(), report));
        }

        self.emit(
            save_id,
            SavePayload::SaveStarted {
                roots: roots.len(),
                nodes: plan.graph.nodes().len(),
                relationships: plan.graph.relationships().len(),
                batches: plan.batches.len(),
            },
        );

        let mut txn = match self.persister.begin().await {
            Ok(txn) => txn,
            Err(e) => {
                self.emit(save_id, SavePayload::SaveRolledBack { reason: e.to_string() });
                return Err(e.into());
            }
        };

        let mut store_ids: HashMap<NodeRef, i64> = HashMap::new();
        for batch in &plan.batches {
            match txn.execute(batch).await {
                Ok(result) => {
                    tracing::debug!(
                        %save_id,
                        batch = result.index,
                        nodes = result.nodes_written,
                        relationships = result.relationships_written,
                        removed = result.relationships_removed,
                        "Batch executed"
                    );
                    report.nodes_written += result.nodes_written;
                    report.relationships_written += result.relationships_written;
                    report.relationships_removed += result.relationships_removed;
                    self.emit(
                        save_id,
                        SavePayload::BatchExecuted {
                            batch: result.index,
                            nodes_written: result.nodes_written,
                            relationships_written: result.relationships_written,
                        },
                    );
                    store_ids.extend(result.store_ids);
                }
                Err(e) => {
                    tracing::warn!(%save_id, batch = batch.index, error = %e, "Batch failed, rolling back");
                    if let Err(rollback) = txn.rollback().await {
                        tracing::error!(%save_id, error = %rollback, "Rollback failed");
                    }
                    self.emit(save_id, SavePayload::SaveRolledBack { reason: e.to_string() });
                    return Err(OgmError::Persistence(e));
                }
            }
        }

        if let Err(e) = txn.commit().await {
            tracing::warn!(%save_id, error = %e, "Commit failed");
            self.emit(save_id, SavePayload::SaveRolledBack { reason: e.to_string() });
            return Err(e.into());
        }

        report.completed_at = Utc::now();
        tracing::info!(
            %save_id,
            batches = report.batches,
            nodes = report.nodes_written,
            relationships = report.relationships_written,
            removed = report.relationships_removed,
            "Save committed"
        );
        self.emit(
            save_id,
            SavePayload::SaveCommitted {
                nodes_written: report.nodes_written,
                relationships_written: report.relationships_written,
            },
        );

        Ok((plan.apply_ids(graph, &store_ids), report))
    }

    fn emit(&self, save_id: Uuid, payload: SavePayload) {
        if let Some(sink) = &self.events {
            let _ = sink.send(SaveEvent::new(save_id, payload));
        }
    }
}
