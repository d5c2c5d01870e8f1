use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::manager::DatabaseError;
use super::record::{EntityKey, Record};
use super::store::{RowLock, Store, StoreTx};
use crate::filter::{Condition, Filter, SortDirection};
use crate::schema::{ColumnType, EntityKind, EntitySpec};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<EntityKey, Record>,
    last_id: i64,
}

type Tables = HashMap<EntityKind, Table>;

/// In-process store with the same semantics as the PostgreSQL one.
///
/// A transaction holds the single writer lock for its whole lifetime and
/// works on a copy of the tables that replaces the shared state on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, DatabaseError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

impl MemoryTx {
    fn table(&self, kind: EntityKind) -> Option<&Table> {
        self.working.get(&kind)
    }

    fn rows(&self, kind: EntityKind) -> impl Iterator<Item = &Record> {
        self.table(kind).into_iter().flat_map(|t| t.rows.values())
    }

    fn visible(&self, spec: &EntitySpec, row: &Record) -> bool {
        if !row.is_active() {
            return false;
        }
        spec.parents.iter().filter(|l| !l.optional).all(|link| {
            let Some(parent_id) = row.get_i64(link.column) else {
                return false;
            };
            let parent_spec = link.parent.spec();
            self.table(link.parent)
                .and_then(|t| t.rows.get(&EntityKey::id(parent_id)))
                .map_or(false, |parent| self.visible(parent_spec, parent))
        })
    }

    fn check_unique(&self, spec: &EntitySpec, candidate: &Record, own_key: &EntityKey) -> Result<(), DatabaseError> {
        for group in spec.unique {
            let values: Vec<&Value> = group.iter().filter_map(|c| candidate.value(c)).collect();
            if values.len() != group.len() {
                continue;
            }
            let clash = self.rows(spec.kind).any(|row| {
                EntityKey::from_record(spec, row).as_ref() != Some(own_key)
                    && group
                        .iter()
                        .zip(values.iter())
                        .all(|(c, v)| row.get(c).map_or(false, |existing| values_equal(existing, v)))
            });
            if clash {
                return Err(DatabaseError::UniqueViolation(format!("{}_{}_key", spec.table, group.join("_"))));
            }
        }
        Ok(())
    }

    fn check_not_null(&self, spec: &EntitySpec, candidate: &Record) -> Result<(), DatabaseError> {
        match spec.fields.iter().find(|f| !f.nullable && candidate.value(f.name).is_none()) {
            Some(field) => Err(DatabaseError::NotNullViolation(field.name.to_string())),
            None => Ok(()),
        }
    }

    fn check_references(&self, spec: &EntitySpec, candidate: &Record) -> Result<(), DatabaseError> {
        for link in spec.parents {
            if let Some(parent_id) = candidate.get_i64(link.column) {
                let exists = self
                    .table(link.parent)
                    .map_or(false, |t| t.rows.contains_key(&EntityKey::id(parent_id)));
                if !exists {
                    return Err(DatabaseError::ForeignKeyViolation(format!("{}_{}_fkey", spec.table, link.column)));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn fetch(
        &mut self,
        spec: &'static EntitySpec,
        key: &EntityKey,
        _lock: RowLock,
    ) -> Result<Option<Record>, DatabaseError> {
        Ok(self.table(spec.kind).and_then(|t| t.rows.get(key)).cloned())
    }

    async fn select(&mut self, filter: &Filter) -> Result<Vec<Record>, DatabaseError> {
        let spec = filter.spec;
        let needle = filter.search.as_ref().map(|s| s.to_lowercase());

        let mut rows: Vec<&Record> = self
            .rows(spec.kind)
            .filter(|row| matches_all(spec, row, &filter.conditions))
            .filter(|row| filter.include_inactive || self.visible(spec, row))
            .filter(|row| match &needle {
                None => true,
                Some(needle) => spec.search.iter().any(|c| {
                    row.get_str(c).map_or(false, |text| text.to_lowercase().contains(needle.as_str()))
                }),
            })
            .collect();

        rows.sort_by(|a, b| {
            for info in &filter.order {
                let ord = compare_values(a.get(info.column), b.get(info.column));
                let ord = match info.sort {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        let limit = filter.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(filter.offset as usize).take(limit).cloned().collect())
    }

    async fn count(&mut self, spec: &'static EntitySpec, conditions: &[Condition]) -> Result<i64, DatabaseError> {
        Ok(self.rows(spec.kind).filter(|row| matches_all(spec, row, conditions)).count() as i64)
    }

    async fn insert(&mut self, spec: &'static EntitySpec, record: &Record) -> Result<Record, DatabaseError> {
        for (column, _) in record.iter() {
            if spec.column_type(column).is_none() {
                return Err(DatabaseError::QueryError(format!("unknown column {}.{}", spec.table, column)));
            }
        }

        let mut row = Record::new();
        for field in spec.fields {
            row.insert(field.name, Value::Null);
        }
        row.merge(record);
        if !row.contains("active") {
            row.insert("active", Value::Bool(true));
        }

        let next_id = self.table(spec.kind).map_or(0, |t| t.last_id) + 1;
        if spec.has_surrogate_key() {
            row.insert("id", Value::from(next_id));
        }
        let key = EntityKey::from_record(spec, &row)
            .ok_or_else(|| DatabaseError::QueryError(format!("incomplete key for {}", spec.table)))?;

        if self.table(spec.kind).map_or(false, |t| t.rows.contains_key(&key)) {
            return Err(DatabaseError::UniqueViolation(format!("{}_pkey", spec.table)));
        }
        self.check_not_null(spec, &row)?;
        self.check_unique(spec, &row, &key)?;
        self.check_references(spec, &row)?;

        let table = self.working.entry(spec.kind).or_default();
        if spec.has_surrogate_key() {
            table.last_id = next_id;
        }
        table.rows.insert(key, row.clone());
        Ok(row)
    }

    async fn update(
        &mut self,
        spec: &'static EntitySpec,
        key: &EntityKey,
        changes: &Record,
    ) -> Result<Option<Record>, DatabaseError> {
        for (column, _) in changes.iter() {
            if spec.column_type(column).is_none() || (spec.is_key_column(column) && spec.has_surrogate_key()) {
                return Err(DatabaseError::QueryError(format!("cannot update {}.{}", spec.table, column)));
            }
        }
        let Some(mut row) = self.table(spec.kind).and_then(|t| t.rows.get(key)).cloned() else {
            return Ok(None);
        };
        row.merge(changes);
        self.check_not_null(spec, &row)?;
        self.check_unique(spec, &row, key)?;
        self.check_references(spec, &row)?;

        if let Some(table) = self.working.get_mut(&spec.kind) {
            table.rows.insert(key.clone(), row.clone());
        }
        Ok(Some(row))
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

fn matches_all(spec: &EntitySpec, row: &Record, conditions: &[Condition]) -> bool {
    conditions.iter().all(|condition| match condition {
        Condition::Active => row.is_active(),
        Condition::Eq(column, value) => row.get(column).map_or(false, |v| values_equal(v, value)),
        Condition::In(column, values) => row
            .get(column)
            .map_or(false, |v| values.iter().any(|candidate| values_equal(v, candidate))),
        Condition::ExcludeKey(key) => EntityKey::from_record(spec, row).as_ref() != Some(key),
        Condition::Range(column, op, bound) => row
            .value(column)
            .and_then(|v| compare_bound(spec, column, v, bound))
            .map_or(false, |ord| op.holds(ord)),
    })
}

/// Orders a stored value against a range bound; timestamps compare as instants.
fn compare_bound(spec: &EntitySpec, column: &str, value: &Value, bound: &Value) -> Option<Ordering> {
    match (spec.column_type(column)?, value, bound) {
        (_, _, Value::Null) => None,
        (ColumnType::Timestamp, Value::String(a), Value::String(b)) => {
            let a = DateTime::parse_from_rfc3339(a).ok()?;
            let b = DateTime::parse_from_rfc3339(b).ok()?;
            Some(a.cmp(&b))
        }
        (_, Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (_, Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// SQL equality: NULL never matches, numbers compare by value.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ascending order with NULLs last, as PostgreSQL sorts by default.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
