//! `Persister` over a live Neo4j database.

use std::collections::HashMap;

use async_trait::async_trait;
use neo4rs::Txn;
use ogm_core::{BatchResult, NodeRef, OperationBatch, PersistTransaction, PersistenceError, Persister};

use crate::client::{GraphClient, GraphError};
use crate::cypher::{self, INTERNAL_ID, REMOVED};

/// Runs each save call in one explicit Neo4j transaction.
#[derive(Clone)]
pub struct Neo4jPersister {
    client: GraphClient,
}

impl Neo4jPersister {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }
}

#[async_trait]
impl Persister for Neo4jPersister {
    type Transaction = Neo4jTransaction;

    async fn begin(&self) -> Result<Neo4jTransaction, PersistenceError> {
        let txn = self
            .client
            .start_txn()
            .await
            .map_err(PersistenceError::transaction)?;
        tracing::debug!("Neo4j transaction started");
        Ok(Neo4jTransaction {
            txn,
            store_ids: HashMap::new(),
        })
    }
}

/// An open Neo4j transaction plus the internal ids written so far.
pub struct Neo4jTransaction {
    txn: Txn,
    store_ids: HashMap<NodeRef, i64>,
}

impl Neo4jTransaction {
    /// Run `statement` and read `column` from its first row.
    async fn fetch_i64(
        &mut self,
        statement: cypher::Statement,
        column: &str,
    ) -> Result<Option<i64>, GraphError> {
        let mut stream = self.txn.execute(statement.into_query()).await?;
        let mut value = None;
        while let Some(row) = stream.next(self.txn.handle()).await? {
            if value.is_none() {
                let v: i64 = row
                    .get(column)
                    .map_err(|e| GraphError::Serialization(e.to_string()))?;
                value = Some(v);
            }
        }
        Ok(value)
    }

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
impl PersistTransaction for Neo4jTransaction {
    async fn execute(&mut self, batch: &OperationBatch) -> Result<BatchResult, PersistenceError> {
        let mut result = BatchResult {
            index: batch.index,
            ..Default::default()
        };

        for op in &batch.nodes {
            let statement =
                cypher::node_statement(op).map_err(|e| PersistenceError::batch(batch.index, e))?;
            let id = self
                .fetch_i64(statement, INTERNAL_ID)
                .await
                .map_err(|e| PersistenceError::batch(batch.index, e))?
                .ok_or_else(|| {
                    PersistenceError::batch(
                        batch.index,
                        GraphError::NotFound {
                            label: op.primary_label().to_string(),
                            id: op.identity.to_string(),
                        },
                    )
                })?;
            self.store_ids.insert(op.node_ref, id);
            result.store_ids.push((op.node_ref, id));
            result.nodes_written += 1;
        }

        for op in &batch.clears {
            let statement = cypher::clear_statement(op, self.endpoint(batch.index, op.node)?);
            let removed = self
                .fetch_i64(statement, REMOVED)
                .await
                .map_err(|e| PersistenceError::batch(batch.index, e))?
                .unwrap_or(0);
            result.relationships_removed += usize::try_from(removed).unwrap_or(0);
        }

        for op in &batch.relationships {
            let (start, end) = op.endpoints();
            let statement = cypher::relationship_statement(
                op,
                self.endpoint(batch.index, start)?,
                self.endpoint(batch.index, end)?,
            );
            self.txn
                .run(statement.into_query())
                .await
                .map_err(|e| PersistenceError::batch(batch.index, GraphError::from(e)))?;
            result.relationships_written += 1;
        }

        tracing::debug!(
            batch = batch.index,
            nodes = result.nodes_written,
            relationships = result.relationships_written,
            removed = result.relationships_removed,
            "Cypher batch executed"
        );
        Ok(result)
    }

    async fn commit(self) -> Result<(), PersistenceError> {
        self.txn
            .commit()
            .await
            .map_err(|e| PersistenceError::transaction(GraphError::from(e)))
    }

    async fn rollback(self) -> Result<(), PersistenceError> {
        self.txn
            .rollback()
            .await
            .map_err(|e| PersistenceError::transaction(GraphError::from(e)))
    }
}
