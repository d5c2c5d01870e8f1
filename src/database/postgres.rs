use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::manager::{DatabaseError, DatabaseManager};
use super::query_builder::{bind_param_query, QueryBuilder};
use super::record::{EntityKey, Record};
use super::store::{RowLock, Store, StoreTx};
use crate::filter::{Condition, Filter, SqlResult};
use crate::schema::EntitySpec;

/// PostgreSQL-backed store. Transactions run at READ COMMITTED; guards are
/// re-checked under row locks inside the transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    log_queries: bool,
}

impl PgStore {
    pub fn new(pool: PgPool, log_queries: bool) -> Self {
        Self { pool, log_queries }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, DatabaseError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx, log_queries: self.log_queries }))
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        DatabaseManager::health_check(&self.pool).await
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
    log_queries: bool,
}

impl PgTx {
    async fn fetch_rows(&mut self, table: &str, sql: SqlResult) -> Result<Vec<Record>, DatabaseError> {
        if self.log_queries {
            tracing::debug!(query = %sql.query, params = sql.params.len(), "sql");
        }
        let mut q = sqlx::query(&sql.query);
        for p in sql.params.iter() {
            q = bind_param_query(q, p);
        }
        let rows = q.fetch_all(&mut *self.tx).await?;

        rows.iter()
            .map(|row| {
                let value: Value = row.try_get("row")?;
                Record::try_from(value).map_err(|_| DatabaseError::QueryError(format!("non-object row from {}", table)))
            })
            .collect()
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn fetch(
        &mut self,
        spec: &'static EntitySpec,
        key: &EntityKey,
        lock: RowLock,
    ) -> Result<Option<Record>, DatabaseError> {
        let sql = QueryBuilder::select_by_key(spec, key, lock);
        Ok(self.fetch_rows(spec.table, sql).await?.into_iter().next())
    }

    async fn select(&mut self, filter: &Filter) -> Result<Vec<Record>, DatabaseError> {
        let sql = QueryBuilder::select(filter);
        self.fetch_rows(filter.spec.table, sql).await
    }

    async fn count(&mut self, spec: &'static EntitySpec, conditions: &[Condition]) -> Result<i64, DatabaseError> {
        let sql = QueryBuilder::count(spec, conditions);
        if self.log_queries {
            tracing::debug!(query = %sql.query, params = sql.params.len(), "sql");
        }
        let mut q = sqlx::query(&sql.query);
        for p in sql.params.iter() {
            q = bind_param_query(q, p);
        }
        let row = q.fetch_one(&mut *self.tx).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count)
    }

    async fn insert(&mut self, spec: &'static EntitySpec, record: &Record) -> Result<Record, DatabaseError> {
        let sql = QueryBuilder::insert(spec, record)?;
        self.fetch_rows(spec.table, sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::QueryError(format!("insert into {} returned no row", spec.table)))
    }

    async fn update(
        &mut self,
        spec: &'static EntitySpec,
        key: &EntityKey,
        changes: &Record,
    ) -> Result<Option<Record>, DatabaseError> {
        let sql = QueryBuilder::update(spec, key, changes)?;
        Ok(self.fetch_rows(spec.table, sql).await?.into_iter().next())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx.commit().await?;
        Ok(())
    }
}
