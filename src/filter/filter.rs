use chrono::{NaiveDate, SecondsFormat};
use serde_json::Value;
use std::collections::HashMap;

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::types::{Condition, FilterOrderInfo, ListLimits, RangeOp};
use crate::database::record::{coerce_param, EntityKey, RecordError};
use crate::schema::{ColumnType, EntitySpec};

/// A list request over one entity table.
///
/// Unless [`Filter::with_inactive`] is set, only visible rows are returned:
/// the row is active and so is every required parent up the chain.
#[derive(Debug, Clone)]
pub struct Filter {
    pub spec: &'static EntitySpec,
    pub conditions: Vec<Condition>,
    pub search: Option<String>,
    pub order: Vec<FilterOrderInfo>,
    pub limit: Option<u32>,
    pub offset: u32,
    pub include_inactive: bool,
}

impl Filter {
    pub fn new(spec: &'static EntitySpec) -> Self {
        Self {
            spec,
            conditions: vec![],
            search: None,
            order: FilterOrder::defaults(spec),
            limit: None,
            offset: 0,
            include_inactive: false,
        }
    }

    /// Builds a filter from query-string parameters: `q`, `order`, `limit`,
    /// `offset`, equality on any declared filter column, and `<col>[gte]` /
    /// `<col>[lte]` bounds on declared range columns.
    pub fn from_params(
        spec: &'static EntitySpec,
        params: &HashMap<String, String>,
        limits: ListLimits,
    ) -> Result<Self, FilterError> {
        let mut filter = Self::new(spec);
        let mut limit = limits.default_limit;

        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();
        for key in keys {
            let raw = &params[key];
            if let Some((column, op)) = range_key(key) {
                if !spec.ranges.contains(&column) {
                    return Err(FilterError::UnknownFilter(key.to_string()));
                }
                filter.conditions.push(range_bound(spec, column, op, raw)?);
                continue;
            }
            match key.as_str() {
                "q" => {
                    filter = filter.search(raw)?;
                }
                "order" => {
                    filter = filter.order(raw)?;
                }
                "limit" => {
                    limit = raw
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|l| *l > 0)
                        .ok_or_else(|| FilterError::InvalidLimit("limit must be a positive integer".to_string()))?;
                }
                "offset" => {
                    filter.offset = raw
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| FilterError::InvalidOffset("offset must be a non-negative integer".to_string()))?;
                }
                column if spec.filters.contains(&column) => {
                    let value = coerce_param(spec, column, raw).map_err(|e| param_error(column, e))?;
                    filter = filter.where_eq(column, value);
                }
                other => return Err(FilterError::UnknownFilter(other.to_string())),
            }
        }

        if limit > limits.max_limit {
            tracing::debug!("limit {} exceeds max {}, capping", limit, limits.max_limit);
            limit = limits.max_limit;
        }
        filter.limit = Some(limit);
        Ok(filter)
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::eq(column, value));
        self
    }

    pub fn where_in(mut self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.conditions.push(Condition::In(column.into(), values));
        self
    }

    pub fn where_range(mut self, column: impl Into<String>, op: RangeOp, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Range(column.into(), op, value.into()));
        self
    }

    /// Restricts to the row addressed by `key`.
    pub fn key(mut self, key: &EntityKey) -> Self {
        for (column, value) in key.pairs(self.spec) {
            self.conditions.push(Condition::eq(column, value));
        }
        self
    }

    pub fn search(mut self, term: &str) -> Result<Self, FilterError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(self);
        }
        if self.spec.search.is_empty() {
            return Err(FilterError::SearchUnsupported(self.spec.collection));
        }
        self.search = Some(term.to_string());
        Ok(self)
    }

    pub fn order(mut self, order: &str) -> Result<Self, FilterError> {
        let parsed = FilterOrder::parse(self.spec, order)?;
        if !parsed.is_empty() {
            self.order = parsed;
        }
        Ok(self)
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the visibility rule; the raw table is listed.
    pub fn with_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }
}

fn range_key(key: &str) -> Option<(&str, RangeOp)> {
    if let Some(column) = key.strip_suffix("[gte]") {
        return Some((column, RangeOp::Gte));
    }
    key.strip_suffix("[lte]").map(|column| (column, RangeOp::Lte))
}

/// Bound on a range column. A bare date on a timestamp column covers the whole
/// day: `[gte]` starts at its midnight, `[lte]` stops before the next one.
fn range_bound(spec: &EntitySpec, column: &str, op: RangeOp, raw: &str) -> Result<Condition, FilterError> {
    if spec.column_type(column) == Some(ColumnType::Timestamp) {
        if let Ok(day) = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
            let (op, day) = match op {
                RangeOp::Lte => (RangeOp::Lt, day.succ_opt()),
                other => (other, Some(day)),
            };
            let midnight = day.and_then(|d| d.and_hms_opt(0, 0, 0)).ok_or_else(|| FilterError::InvalidValue {
                field: column.to_string(),
                message: "date out of range".to_string(),
            })?;
            let bound = midnight.and_utc().to_rfc3339_opts(SecondsFormat::AutoSi, false);
            return Ok(Condition::Range(column.to_string(), op, Value::String(bound)));
        }
    }
    let value = coerce_param(spec, column, raw).map_err(|e| param_error(column, e))?;
    Ok(Condition::Range(column.to_string(), op, value))
}

fn param_error(column: &str, err: RecordError) -> FilterError {
    match err {
        RecordError::InvalidValue { field, message } => FilterError::InvalidValue { field, message },
        other => FilterError::InvalidValue { field: column.to_string(), message: other.to_string() },
    }
}
