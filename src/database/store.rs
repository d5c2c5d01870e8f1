use async_trait::async_trait;

use super::manager::DatabaseError;
use super::record::{EntityKey, Record};
use crate::filter::{Condition, Filter};
use crate::schema::EntitySpec;

/// Row lock taken by [`StoreTx::fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    None,
    /// Held on parents while a child is written; blocks a concurrent disable.
    Share,
    /// Held on the row being transitioned or updated.
    Update,
}

/// Persistence gateway. Every lifecycle operation runs inside one
/// transaction obtained from [`Store::begin`]; dropping the transaction
/// without committing rolls it back.
#[async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn begin(&self) -> Result<Box<dyn StoreTx>, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Row by key regardless of its `active` flag.
    async fn fetch(
        &mut self,
        spec: &'static EntitySpec,
        key: &EntityKey,
        lock: RowLock,
    ) -> Result<Option<Record>, DatabaseError>;

    async fn select(&mut self, filter: &Filter) -> Result<Vec<Record>, DatabaseError>;

    /// Rows matching every condition, visible or not.
    async fn count(&mut self, spec: &'static EntitySpec, conditions: &[Condition]) -> Result<i64, DatabaseError>;

    /// Inserts a row; `active` defaults to true when the record omits it.
    async fn insert(&mut self, spec: &'static EntitySpec, record: &Record) -> Result<Record, DatabaseError>;

    async fn update(
        &mut self,
        spec: &'static EntitySpec,
        key: &EntityKey,
        changes: &Record,
    ) -> Result<Option<Record>, DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;
}
