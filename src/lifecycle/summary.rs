use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::database::Record;
use crate::schema::EntitySpec;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub count: usize,
    pub sum: f64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Aggregates over an entity's visible rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub entity: String,
    /// Every row, disabled ones included.
    pub total: i64,
    pub active: i64,
    #[serde(flatten)]
    pub numeric: BTreeMap<String, NumericSummary>,
    #[serde(flatten)]
    pub groups: BTreeMap<String, BTreeMap<String, i64>>,
    /// `distinct_<col>` counts of different non-null values.
    #[serde(flatten)]
    pub distinct: BTreeMap<String, usize>,
}

/// Aggregates over the visible children of one row, keyed by child entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordStats {
    pub entity: String,
    pub key: String,
    pub children: BTreeMap<String, Summary>,
}

impl Summary {
    pub fn compute(spec: &EntitySpec, total: i64, visible: &[Record]) -> Self {
        let mut numeric = BTreeMap::new();
        for column in spec.summary.numeric {
            let values: Vec<f64> = visible.iter().filter_map(|r| r.get(column).and_then(Value::as_f64)).collect();
            let sum: f64 = values.iter().sum();
            let summary = NumericSummary {
                count: values.len(),
                sum,
                avg: (!values.is_empty()).then(|| sum / values.len() as f64),
                min: values.iter().copied().reduce(f64::min),
                max: values.iter().copied().reduce(f64::max),
            };
            numeric.insert(column.to_string(), summary);
        }

        let mut groups = BTreeMap::new();
        for column in spec.summary.group_by {
            let mut counts: BTreeMap<String, i64> = BTreeMap::new();
            for row in visible {
                let bucket = match row.get(column) {
                    None | Some(Value::Null) => "none".to_string(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                };
                *counts.entry(bucket).or_insert(0) += 1;
            }
            groups.insert(format!("by_{}", column), counts);
        }

        let distinct = spec
            .summary
            .distinct
            .iter()
            .map(|column| {
                let values: BTreeSet<String> =
                    visible.iter().filter_map(|r| r.value(column)).map(Value::to_string).collect();
                (format!("distinct_{}", column), values.len())
            })
            .collect();

        Self {
            entity: spec.kind.to_string(),
            total,
            active: visible.len() as i64,
            numeric,
            groups,
            distinct,
        }
    }
}
