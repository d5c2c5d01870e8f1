//! Soft-delete lifecycle over the entity graph.
//!
//! Every write runs inside one store transaction. Guards are evaluated under
//! row locks: the row being transitioned is locked for update, and parents
//! consulted by a guard are locked for share so a concurrent disable of the
//! parent waits until the child write commits (and then sees the new child).

pub mod error;
pub mod summary;

pub use error::{ConflictReason, LifecycleError};
pub use summary::{NumericSummary, RecordStats, Summary};

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::record::validate_input;
use crate::database::{EntityKey, Record, RowLock, Store, StoreTx, WriteMode};
use crate::filter::{Condition, Filter};
use crate::schema::{DependencyGraph, EntitySpec, Relation, ThroughRoute};

pub type LifecycleResult<T> = Result<T, LifecycleError>;

pub struct LifecycleManager {
    store: Arc<dyn Store>,
    graph: Arc<DependencyGraph>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn Store>, graph: Arc<DependencyGraph>) -> Self {
        Self { store, graph }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Inserts a new active row after checking that every referenced parent
    /// exists and is active, uniqueness holds, and capacity is not exceeded.
    pub async fn create(&self, spec: &'static EntitySpec, input: Value) -> LifecycleResult<Record> {
        let record = validate_input(spec, input, WriteMode::Create)?;
        let mut tx = self.store.begin().await?;

        let capacity_column = spec.capacity.map(|rule| rule.column);
        let mut capacity_parent = None;
        for relation in self.graph.parents(spec.kind) {
            let Some(parent_id) = record.get_i64(relation.column) else {
                continue;
            };
            let lock = if capacity_column == Some(relation.column) { RowLock::Update } else { RowLock::Share };
            let parent = require_active_parent(tx.as_mut(), relation, parent_id, lock).await?;
            if capacity_column == Some(relation.column) {
                capacity_parent = Some((relation, parent_id, parent));
            }
        }

        check_unique(tx.as_mut(), spec, &record, None).await?;

        if let (Some(rule), Some((relation, parent_id, parent))) = (spec.capacity, capacity_parent) {
            if let Some(capacity) = parent.get_i64(rule.parent_field) {
                let conditions = [
                    Condition::eq(rule.column, parent_id),
                    Condition::eq(rule.counted_when.0, rule.counted_when.1),
                    Condition::Active,
                ];
                let taken = tx.count(spec, &conditions).await?;
                if taken >= capacity {
                    warn!(entity = %spec.kind, parent = %relation.parent, taken, capacity, "create refused: capacity reached");
                    return Err(LifecycleError::Conflict(ConflictReason::Capacity(relation.parent)));
                }
            }
        }

        let created = tx.insert(spec, &record).await?;
        tx.commit().await?;

        info!(
            entity = %spec.kind,
            key = %EntityKey::from_record(spec, &created).map(|k| k.to_string()).unwrap_or_default(),
            "created"
        );
        Ok(created)
    }

    /// One visible row by key.
    pub async fn read(&self, spec: &'static EntitySpec, key: &EntityKey) -> LifecycleResult<Record> {
        let mut tx = self.store.begin().await?;
        let found = tx.select(&Filter::new(spec).key(key).limit(1)).await?;
        tx.commit().await?;
        found.into_iter().next().ok_or_else(|| LifecycleError::not_found(spec.kind, key))
    }

    pub async fn list(&self, filter: &Filter) -> LifecycleResult<Vec<Record>> {
        let mut tx = self.store.begin().await?;
        let rows = tx.select(filter).await?;
        tx.commit().await?;
        debug!(entity = %filter.spec.kind, count = rows.len(), "listed");
        Ok(rows)
    }

    /// Visible children of one visible parent row.
    pub async fn list_children(
        &self,
        parent: &'static EntitySpec,
        parent_key: &EntityKey,
        filter: Filter,
    ) -> LifecycleResult<Vec<Record>> {
        let child = filter.spec;
        let relation = self
            .graph
            .relation(parent.kind, child.kind)
            .ok_or_else(|| LifecycleError::not_found(child.kind, parent_key))?;
        let parent_id = parent_key.values().first().copied().unwrap_or_default();

        let mut tx = self.store.begin().await?;
        let visible_parent = tx.select(&Filter::new(parent).key(parent_key).limit(1)).await?;
        if visible_parent.is_empty() {
            return Err(LifecycleError::not_found(parent.kind, parent_key));
        }
        let rows = tx.select(&filter.where_eq(relation.column, parent_id)).await?;
        tx.commit().await?;
        Ok(rows)
    }

    /// Visible `route.child` rows hanging off the visible `route.via` rows of
    /// one visible parent, e.g. a student's payments across their enrollments.
    pub async fn list_through(
        &self,
        route: &ThroughRoute,
        parent_key: &EntityKey,
        filter: Filter,
    ) -> LifecycleResult<Vec<Record>> {
        let (to_via, to_child) = self
            .graph
            .through(route)
            .ok_or_else(|| LifecycleError::not_found(route.child, parent_key))?;
        let parent = route.parent.spec();
        let parent_id = parent_key.values().first().copied().unwrap_or_default();

        let mut tx = self.store.begin().await?;
        let visible_parent = tx.select(&Filter::new(parent).key(parent_key).limit(1)).await?;
        if visible_parent.is_empty() {
            return Err(LifecycleError::not_found(parent.kind, parent_key));
        }
        let via_ids: Vec<Value> = tx
            .select(&Filter::new(route.via.spec()).where_eq(to_via.column, parent_id))
            .await?
            .iter()
            .filter_map(|row| row.get_i64("id"))
            .map(Value::from)
            .collect();
        let rows = tx.select(&filter.where_in(to_child.column, via_ids)).await?;
        tx.commit().await?;
        debug!(parent = %parent.kind, via = %route.via, child = %route.child, count = rows.len(), "listed through");
        Ok(rows)
    }

    /// Rewrites (PUT) or patches (PATCH) a visible row.
    pub async fn update(
        &self,
        spec: &'static EntitySpec,
        key: &EntityKey,
        input: Value,
        mode: WriteMode,
    ) -> LifecycleResult<Record> {
        let changes = validate_input(spec, input, mode)?;
        let mut tx = self.store.begin().await?;

        let current = tx
            .fetch(spec, key, RowLock::Update)
            .await?
            .filter(Record::is_active)
            .ok_or_else(|| LifecycleError::not_found(spec.kind, key))?;
        if !ancestors_active(tx.as_mut(), spec, &current).await? {
            return Err(LifecycleError::not_found(spec.kind, key));
        }

        for relation in self.graph.parents(spec.kind) {
            let Some(new_id) = changes.get_i64(relation.column) else {
                continue;
            };
            if current.get_i64(relation.column) != Some(new_id) {
                require_active_parent(tx.as_mut(), relation, new_id, RowLock::Share).await?;
            }
        }

        let mut merged = current.clone();
        merged.merge(&changes);
        let touched: Vec<&[&str]> = spec
            .unique
            .iter()
            .copied()
            .filter(|group| group.iter().any(|c| changes.get(c).is_some_and(|v| current.get(c) != Some(v))))
            .collect();
        check_unique_groups(tx.as_mut(), spec, &merged, Some(key), &touched).await?;

        let updated = tx
            .update(spec, key, &changes)
            .await?
            .ok_or_else(|| LifecycleError::not_found(spec.kind, key))?;
        tx.commit().await?;

        info!(entity = %spec.kind, key = %key, fields = changes.iter().count(), "updated");
        Ok(updated)
    }

    /// Soft-deletes an active row. Refused while any active child row still
    /// references it.
    pub async fn disable(&self, spec: &'static EntitySpec, key: &EntityKey) -> LifecycleResult<Record> {
        let mut tx = self.store.begin().await?;

        let current = tx
            .fetch(spec, key, RowLock::Update)
            .await?
            .filter(Record::is_active)
            .ok_or_else(|| LifecycleError::not_found(spec.kind, key))?;

        if let Some(id) = current.get_i64("id") {
            for relation in self.graph.children(spec.kind) {
                let mut conditions = vec![Condition::eq(relation.column, id), Condition::Active];
                if let Some((column, value)) = relation.blocks_when {
                    conditions.push(Condition::eq(column, value));
                }
                let blocking = tx.count(relation.child.spec(), &conditions).await?;
                if blocking > 0 {
                    warn!(entity = %spec.kind, key = %key, child = %relation.child, blocking, "disable refused");
                    return Err(LifecycleError::Conflict(ConflictReason::BlockingChildren(relation.child)));
                }
            }
        }

        let disabled = set_active(tx.as_mut(), spec, key, false).await?;
        tx.commit().await?;

        info!(entity = %spec.kind, key = %key, "disabled");
        Ok(disabled)
    }

    /// Reactivates a row. Refused while any referenced parent is inactive.
    pub async fn enable(&self, spec: &'static EntitySpec, key: &EntityKey) -> LifecycleResult<Record> {
        let mut tx = self.store.begin().await?;

        let current = tx
            .fetch(spec, key, RowLock::Update)
            .await?
            .ok_or_else(|| LifecycleError::not_found(spec.kind, key))?;

        for relation in self.graph.parents(spec.kind) {
            let Some(parent_id) = current.get_i64(relation.column) else {
                continue;
            };
            let parent = tx.fetch(relation.parent.spec(), &EntityKey::id(parent_id), RowLock::Share).await?;
            if !parent.as_ref().is_some_and(Record::is_active) {
                warn!(entity = %spec.kind, key = %key, parent = %relation.parent, parent_id, "enable refused");
                return Err(LifecycleError::Conflict(ConflictReason::InactiveParent(relation.parent)));
            }
        }

        let enabled = set_active(tx.as_mut(), spec, key, true).await?;
        tx.commit().await?;

        info!(entity = %spec.kind, key = %key, "enabled");
        Ok(enabled)
    }

    pub async fn summary(&self, spec: &'static EntitySpec) -> LifecycleResult<Summary> {
        let mut tx = self.store.begin().await?;
        let total = tx.count(spec, &[]).await?;
        let visible = tx.select(&Filter::new(spec)).await?;
        tx.commit().await?;
        Ok(Summary::compute(spec, total, &visible))
    }

    /// Summaries of each child entity's rows under one visible row, e.g. a
    /// tutor's sessions (with total capacity), activities and room assignments.
    pub async fn record_stats(&self, spec: &'static EntitySpec, key: &EntityKey) -> LifecycleResult<RecordStats> {
        let mut tx = self.store.begin().await?;
        let visible = tx.select(&Filter::new(spec).key(key).limit(1)).await?;
        let Some(id) = visible.first().and_then(|row| row.get_i64("id")) else {
            return Err(LifecycleError::not_found(spec.kind, key));
        };

        let mut children = BTreeMap::new();
        for relation in self.graph.children(spec.kind) {
            let child = relation.child.spec();
            let total = tx.count(child, &[Condition::eq(relation.column, id)]).await?;
            let rows = tx.select(&Filter::new(child).where_eq(relation.column, id)).await?;
            children.insert(child.kind.to_string(), Summary::compute(child, total, &rows));
        }
        tx.commit().await?;

        Ok(RecordStats { entity: spec.kind.to_string(), key: key.to_string(), children })
    }
}

async fn require_active_parent(
    tx: &mut dyn StoreTx,
    relation: &Relation,
    parent_id: i64,
    lock: RowLock,
) -> LifecycleResult<Record> {
    let parent = tx
        .fetch(relation.parent.spec(), &EntityKey::id(parent_id), lock)
        .await?
        .ok_or_else(|| LifecycleError::not_found(relation.parent, parent_id))?;
    if !parent.is_active() {
        return Err(LifecycleError::Conflict(ConflictReason::InactiveParent(relation.parent)));
    }
    Ok(parent)
}

/// Walks required parents up the chain; false as soon as one is missing or
/// inactive. Direct parents are share-locked for the rest of the transaction.
async fn ancestors_active(tx: &mut dyn StoreTx, spec: &'static EntitySpec, record: &Record) -> LifecycleResult<bool> {
    let mut pending: Vec<(&'static EntitySpec, Record, bool)> = vec![(spec, record.clone(), true)];
    while let Some((spec, record, direct)) = pending.pop() {
        for link in spec.parents.iter().filter(|p| !p.optional) {
            let Some(parent_id) = record.get_i64(link.column) else {
                return Ok(false);
            };
            let lock = if direct { RowLock::Share } else { RowLock::None };
            let parent_spec = link.parent.spec();
            match tx.fetch(parent_spec, &EntityKey::id(parent_id), lock).await? {
                Some(parent) if parent.is_active() => pending.push((parent_spec, parent, false)),
                _ => return Ok(false),
            }
        }
    }
    Ok(true)
}

pub(crate) async fn check_unique(
    tx: &mut dyn StoreTx,
    spec: &'static EntitySpec,
    candidate: &Record,
    exclude: Option<&EntityKey>,
) -> LifecycleResult<()> {
    let groups: Vec<&[&str]> = spec.unique.to_vec();
    check_unique_groups(tx, spec, candidate, exclude, &groups).await
}

/// Uniqueness spans disabled rows too; a duplicate of a disabled row would
/// collide on reactivation.
async fn check_unique_groups(
    tx: &mut dyn StoreTx,
    spec: &'static EntitySpec,
    candidate: &Record,
    exclude: Option<&EntityKey>,
    groups: &[&[&str]],
) -> LifecycleResult<()> {
    for group in groups {
        let mut conditions = Vec::with_capacity(group.len() + 1);
        for column in group.iter() {
            match candidate.value(column) {
                Some(value) => conditions.push(Condition::eq(*column, value.clone())),
                None => break,
            }
        }
        if conditions.len() < group.len() {
            continue;
        }
        if let Some(key) = exclude {
            conditions.push(Condition::ExcludeKey(key.clone()));
        }
        if tx.count(spec, &conditions).await? > 0 {
            return Err(LifecycleError::Conflict(ConflictReason::Duplicate(group.join(", "))));
        }
    }
    Ok(())
}

async fn set_active(
    tx: &mut dyn StoreTx,
    spec: &'static EntitySpec,
    key: &EntityKey,
    active: bool,
) -> LifecycleResult<Record> {
    let changes = Record::try_from(json!({ "active": active }))?;
    tx.update(spec, key, &changes)
        .await?
        .ok_or_else(|| LifecycleError::not_found(spec.kind, key))
}
