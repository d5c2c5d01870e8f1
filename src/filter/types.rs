use serde_json::Value;
use std::cmp::Ordering;

use crate::database::record::EntityKey;

/// A single predicate over one entity table.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
    /// Row's own `active` flag is set; says nothing about its parents.
    Active,
    ExcludeKey(EntityKey),
    /// `column <op> value`; NULL never satisfies a bound.
    Range(String, RangeOp, Value),
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Eq(column.into(), value.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Gte,
    Lte,
    Lt,
}

impl RangeOp {
    pub fn to_sql(&self) -> &'static str {
        match self {
            RangeOp::Gte => ">=",
            RangeOp::Lte => "<=",
            RangeOp::Lt => "<",
        }
    }

    /// Whether `row <op> bound` holds given `row.cmp(bound)`.
    pub fn holds(&self, ord: Ordering) -> bool {
        match self {
            RangeOp::Gte => ord != Ordering::Less,
            RangeOp::Lte => ord != Ordering::Greater,
            RangeOp::Lt => ord == Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOrderInfo {
    pub column: &'static str,
    pub sort: SortDirection,
}

#[derive(Debug, Clone, Copy)]
pub struct ListLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for ListLimits {
    fn default() -> Self {
        Self { default_limit: 100, max_limit: 1000 }
    }
}

impl From<&crate::config::ApiConfig> for ListLimits {
    fn from(api: &crate::config::ApiConfig) -> Self {
        Self { default_limit: api.default_list_limit, max_limit: api.max_list_limit }
    }
}

#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<Value>,
}
