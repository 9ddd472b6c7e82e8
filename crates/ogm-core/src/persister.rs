//! The contract between the save engine and a graph store.

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::ops::{BatchResult, OperationBatch};

/// A graph store able to run operation batches transactionally.
#[async_trait]
pub trait Persister: Send + Sync {
    type Transaction: PersistTransaction;

    /// Open the transaction that spans every batch of one save call.
    async fn begin(&self) -> Result<Self::Transaction, PersistenceError>;
}

/// One open transaction.
///
/// Either [`commit`](PersistTransaction::commit) or
/// [`rollback`](PersistTransaction::rollback) ends it. Nothing executed in it
/// is visible to other callers before commit.
#[async_trait]
pub trait PersistTransaction: Send {
    /// Execute node operations, then relationship operations. Relationship
    /// endpoints may refer to nodes written by earlier batches.
    async fn execute(&mut self, batch: &OperationBatch) -> Result<BatchResult, PersistenceError>;

    async fn commit(self) -> Result<(), PersistenceError>;

    async fn rollback(self) -> Result<(), PersistenceError>;
}
