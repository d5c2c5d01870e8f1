use serde_json::Value;
use sqlx::postgres::PgArguments;

use super::manager::DatabaseError;
use super::record::{EntityKey, Record};
use super::store::RowLock;
use crate::filter::filter_order::FilterOrder;
use crate::filter::{Condition, Filter, SqlResult};
use crate::schema::{ColumnType, EntitySpec};

const ALIAS: &str = "t";

/// Generates parameterized PostgreSQL for one entity table.
///
/// Identifiers only ever come from the static registry; every value is a
/// numbered placeholder with an explicit cast to the column type.
pub struct QueryBuilder {
    spec: &'static EntitySpec,
    params: Vec<Value>,
}

impl QueryBuilder {
    pub fn new(spec: &'static EntitySpec) -> Self {
        Self { spec, params: vec![] }
    }

    pub fn select_by_key(spec: &'static EntitySpec, key: &EntityKey, lock: RowLock) -> SqlResult {
        let mut qb = Self::new(spec);
        let where_clause = qb.key_clause(key);
        let lock_clause = match lock {
            RowLock::None => "",
            RowLock::Share => " FOR SHARE",
            RowLock::Update => " FOR UPDATE",
        };
        qb.finish(format!(
            "SELECT row_to_json({a}) AS row FROM \"{}\" {a} WHERE {}{}",
            spec.table,
            where_clause,
            lock_clause,
            a = ALIAS
        ))
    }

    pub fn select(filter: &Filter) -> SqlResult {
        let spec = filter.spec;
        let mut qb = Self::new(spec);

        let mut clauses: Vec<String> = filter.conditions.iter().map(|c| qb.condition(c)).collect();
        if !filter.include_inactive {
            let mut depth = 0;
            clauses.push(visibility_clause(spec, ALIAS, &mut depth));
        }
        if let Some(term) = &filter.search {
            let placeholder = qb.param(Value::String(format!("%{}%", escape_like(term))), "text");
            let matches: Vec<String> = spec
                .search
                .iter()
                .map(|column| format!("{}.\"{}\" ILIKE {}", ALIAS, column, placeholder))
                .collect();
            clauses.push(format!("({})", matches.join(" OR ")));
        }

        let mut query = format!(
            "SELECT row_to_json({a}) AS row FROM \"{}\" {a} WHERE {}",
            spec.table,
            join_where(&clauses),
            a = ALIAS
        );
        let order = FilterOrder::generate(ALIAS, &filter.order);
        if !order.is_empty() {
            query.push(' ');
            query.push_str(&order);
        }
        if let Some(limit) = filter.limit {
            let placeholder = qb.param(Value::from(limit), "bigint");
            query.push_str(&format!(" LIMIT {}", placeholder));
        }
        if filter.offset > 0 {
            let placeholder = qb.param(Value::from(filter.offset), "bigint");
            query.push_str(&format!(" OFFSET {}", placeholder));
        }
        qb.finish(query)
    }

    pub fn count(spec: &'static EntitySpec, conditions: &[Condition]) -> SqlResult {
        let mut qb = Self::new(spec);
        let clauses: Vec<String> = conditions.iter().map(|c| qb.condition(c)).collect();
        qb.finish(format!(
            "SELECT COUNT(*) AS count FROM \"{}\" {a} WHERE {}",
            spec.table,
            join_where(&clauses),
            a = ALIAS
        ))
    }

    pub fn insert(spec: &'static EntitySpec, record: &Record) -> Result<SqlResult, DatabaseError> {
        let mut qb = Self::new(spec);
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (column, value) in record.iter() {
            let cast = qb.cast_for(column)?;
            columns.push(format!("\"{}\"", column));
            values.push(qb.param(value.clone(), cast));
        }
        let body = if columns.is_empty() {
            "DEFAULT VALUES".to_string()
        } else {
            format!("({}) VALUES ({})", columns.join(", "), values.join(", "))
        };
        Ok(qb.finish(format!(
            "INSERT INTO \"{}\" AS {a} {} RETURNING row_to_json({a}) AS row",
            spec.table,
            body,
            a = ALIAS
        )))
    }

    pub fn update(spec: &'static EntitySpec, key: &EntityKey, changes: &Record) -> Result<SqlResult, DatabaseError> {
        if changes.is_empty() {
            return Err(DatabaseError::QueryError(format!("empty update on {}", spec.table)));
        }
        let mut qb = Self::new(spec);
        let mut assignments = Vec::new();
        for (column, value) in changes.iter() {
            let cast = qb.cast_for(column)?;
            let placeholder = qb.param(value.clone(), cast);
            assignments.push(format!("\"{}\" = {}", column, placeholder));
        }
        let where_clause = qb.key_clause(key);
        Ok(qb.finish(format!(
            "UPDATE \"{}\" AS {a} SET {} WHERE {} RETURNING row_to_json({a}) AS row",
            spec.table,
            assignments.join(", "),
            where_clause,
            a = ALIAS
        )))
    }

    fn param(&mut self, value: Value, cast: &str) -> String {
        self.params.push(value);
        format!("${}::{}", self.params.len(), cast)
    }

    fn cast_for(&self, column: &str) -> Result<&'static str, DatabaseError> {
        self.spec
            .column_type(column)
            .map(|ty| ty.sql_cast())
            .ok_or_else(|| DatabaseError::QueryError(format!("unknown column {}.{}", self.spec.table, column)))
    }

    fn key_clause(&mut self, key: &EntityKey) -> String {
        let parts: Vec<String> = key
            .pairs(self.spec)
            .map(|(column, value)| {
                let placeholder = self.param(Value::from(value), ColumnType::Integer.sql_cast());
                format!("{}.\"{}\" = {}", ALIAS, column, placeholder)
            })
            .collect();
        parts.join(" AND ")
    }

    fn condition(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::Active => format!("{}.\"active\"", ALIAS),
            Condition::Eq(column, value) => {
                let Some((column, cast)) = self.known_column(column) else {
                    return "FALSE".to_string();
                };
                let placeholder = self.param(value.clone(), cast);
                format!("{}.\"{}\" = {}", ALIAS, column, placeholder)
            }
            Condition::In(column, values) => {
                let Some((column, cast)) = self.known_column(column) else {
                    return "FALSE".to_string();
                };
                if values.is_empty() {
                    return "FALSE".to_string();
                }
                let placeholders: Vec<String> = values.iter().map(|v| self.param(v.clone(), cast)).collect();
                format!("{}.\"{}\" IN ({})", ALIAS, column, placeholders.join(", "))
            }
            Condition::ExcludeKey(key) => format!("NOT ({})", self.key_clause(key)),
            Condition::Range(column, op, value) => {
                let Some((column, cast)) = self.known_column(column) else {
                    return "FALSE".to_string();
                };
                let placeholder = self.param(value.clone(), cast);
                format!("{}.\"{}\" {} {}", ALIAS, column, op.to_sql(), placeholder)
            }
        }
    }

    /// Registry spelling and cast of a column; `None` for anything undeclared.
    fn known_column(&self, column: &str) -> Option<(&'static str, &'static str)> {
        let ty = self.spec.column_type(column)?;
        let name = match column {
            "active" => "active",
            "id" => "id",
            _ => self
                .spec
                .key
                .iter()
                .copied()
                .find(|k| *k == column)
                .or_else(|| self.spec.field(column).map(|f| f.name))?,
        };
        Some((name, ty.sql_cast()))
    }

    fn finish(self, query: String) -> SqlResult {
        SqlResult { query, params: self.params }
    }
}

/// `active` on the row plus an `EXISTS` per required parent, recursively.
pub fn visibility_clause(spec: &EntitySpec, alias: &str, depth: &mut usize) -> String {
    let mut parts = vec![format!("{}.\"active\"", alias)];
    for link in spec.parents.iter().filter(|l| !l.optional) {
        *depth += 1;
        let parent_alias = format!("p{}", depth);
        let parent = link.parent.spec();
        let inner = visibility_clause(parent, &parent_alias, depth);
        parts.push(format!(
            "EXISTS (SELECT 1 FROM \"{}\" {pa} WHERE {pa}.\"id\" = {}.\"{}\" AND {})",
            parent.table,
            alias,
            link.column,
            inner,
            pa = parent_alias
        ));
    }
    parts.join(" AND ")
}

/// Escapes `%`, `_` and `\` for use inside an ILIKE pattern.
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn join_where(clauses: &[String]) -> String {
    if clauses.is_empty() {
        "TRUE".to_string()
    } else {
        clauses.join(" AND ")
    }
}

pub fn bind_param_query<'q>(
    q: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    v: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s.as_str()),
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}
