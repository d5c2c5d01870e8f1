use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;

use crate::schema::{ColumnType, EntitySpec, FieldDefault, FieldSpec};

/// Columns managed by the lifecycle itself, never accepted from API input.
const SYSTEM_FIELDS: &[&str] = &["id", "active"];

/// How an input document is applied to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    /// PUT: every mutable field is rewritten and omitted nullable ones are cleared.
    /// Omitted `NOT NULL` fields fall back to a static default, or keep their
    /// stored value when the default is generated at insert time.
    Replace,
    /// PATCH: only the supplied fields change.
    Merge,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("Field '{0}' is managed by the server and cannot be set")]
    SystemFieldNotAllowed(String),
    #[error("Request body must be a JSON object")]
    NotAnObject,
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Field '{0}' cannot be changed after creation")]
    ImmutableField(String),
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
    #[error("Update contains no fields")]
    EmptyUpdate,
    #[error("Malformed key segment '{segment}' for {column}")]
    MalformedKey { column: String, segment: String },
}

impl RecordError {
    pub fn reason(&self) -> &'static str {
        match self {
            RecordError::SystemFieldNotAllowed(_) | RecordError::ImmutableField(_) => "immutable-field",
            RecordError::NotAnObject => "not-an-object",
            RecordError::UnknownField(_) => "unknown-field",
            RecordError::MissingRequiredField(_) => "missing-field",
            RecordError::InvalidValue { .. } => "invalid-value",
            RecordError::EmptyUpdate => "empty-update",
            RecordError::MalformedKey { .. } => "malformed-key",
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            RecordError::SystemFieldNotAllowed(f)
            | RecordError::UnknownField(f)
            | RecordError::ImmutableField(f)
            | RecordError::MissingRequiredField(f) => Some(f),
            RecordError::InvalidValue { field, .. } => Some(field),
            RecordError::MalformedKey { column, .. } => Some(column),
            RecordError::NotAnObject | RecordError::EmptyUpdate => None,
        }
    }

    fn invalid(field: &str, message: impl Into<String>) -> Self {
        RecordError::InvalidValue { field: field.to_string(), message: message.into() }
    }
}

/// Identity of a row: the surrogate id, or the full composite key tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(Vec<i64>);

impl EntityKey {
    pub fn id(id: i64) -> Self {
        Self(vec![id])
    }

    pub fn composite(values: Vec<i64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[i64] {
        &self.0
    }

    /// Builds a key from named path parameters.
    pub fn from_params(spec: &EntitySpec, params: &HashMap<String, String>) -> Result<Self, RecordError> {
        let mut values = Vec::with_capacity(spec.key.len());
        for column in spec.key {
            let segment = params.get(*column).map(String::as_str).unwrap_or_default();
            let value = segment.trim().parse::<i64>().map_err(|_| RecordError::MalformedKey {
                column: column.to_string(),
                segment: segment.to_string(),
            })?;
            values.push(value);
        }
        Ok(Self(values))
    }

    pub fn from_record(spec: &EntitySpec, record: &Record) -> Option<Self> {
        spec.key
            .iter()
            .map(|column| record.get_i64(column))
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    /// `(column, value)` pairs in key order.
    pub fn pairs<'a>(&'a self, spec: &'a EntitySpec) -> impl Iterator<Item = (&'static str, i64)> + 'a {
        spec.key.iter().copied().zip(self.0.iter().copied())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        f.write_str(&parts.join("/"))
    }
}

/// One row of an entity table, as column name to JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.0.get(column).and_then(Value::as_i64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(Value::as_str)
    }

    /// Non-null value of a column.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.0.get(column).filter(|v| !v.is_null())
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(column.into(), value)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_active(&self) -> bool {
        self.0.get("active").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Overlays `changes` onto this record.
    pub fn merge(&mut self, changes: &Record) {
        for (column, value) in changes.iter() {
            self.0.insert(column.clone(), value.clone());
        }
    }

    /// Response form with hidden columns removed.
    pub fn redacted(mut self, spec: &EntitySpec) -> Value {
        for column in spec.hidden_fields() {
            self.0.remove(column);
        }
        Value::Object(self.0)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = RecordError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(RecordError::NotAnObject),
        }
    }
}

/// Validates an API document against an entity's field list and returns the
/// columns to write, coerced to their column types.
pub fn validate_input(spec: &EntitySpec, input: Value, mode: WriteMode) -> Result<Record, RecordError> {
    let map = match input {
        Value::Object(map) => map,
        _ => return Err(RecordError::NotAnObject),
    };
    if mode == WriteMode::Merge && map.is_empty() {
        return Err(RecordError::EmptyUpdate);
    }

    let mut record = Record::new();
    for (name, value) in map {
        if SYSTEM_FIELDS.contains(&name.as_str()) {
            return Err(RecordError::SystemFieldNotAllowed(name));
        }
        let field = match spec.field(&name) {
            Some(field) if !field.hidden => field,
            _ => return Err(RecordError::UnknownField(name)),
        };
        if mode != WriteMode::Create && !field.mutable {
            return Err(RecordError::ImmutableField(name));
        }
        let value = coerce(field, &value)?;
        if value.is_null() {
            if field.required {
                return Err(RecordError::MissingRequiredField(name));
            }
            if !field.nullable {
                return Err(RecordError::invalid(&name, "must not be null"));
            }
        }
        record.insert(name, value);
    }

    match mode {
        WriteMode::Merge => {}
        WriteMode::Create | WriteMode::Replace => {
            for field in spec.fields.iter().filter(|f| !f.hidden) {
                if record.contains(field.name) || (mode == WriteMode::Replace && !field.mutable) {
                    continue;
                }
                let default = match (mode, field.default) {
                    (WriteMode::Create, Some(default)) => Some(default_value(default)),
                    (_, Some(FieldDefault::Text(text))) => Some(Value::String(text.to_string())),
                    (_, Some(FieldDefault::Bool(flag))) => Some(Value::Bool(flag)),
                    // Generated on insert; the stored value stays.
                    (_, Some(_)) => continue,
                    _ => None,
                };
                match default {
                    Some(value) => {
                        record.insert(field.name, value);
                    }
                    None if field.required || !field.nullable => {
                        return Err(RecordError::MissingRequiredField(field.name.to_string()));
                    }
                    None => {
                        record.insert(field.name, Value::Null);
                    }
                }
            }
        }
    }

    Ok(record)
}

/// Coerces one input value to the field's column type. `null` passes through.
pub fn coerce(field: &FieldSpec, value: &Value) -> Result<Value, RecordError> {
    let name = field.name;
    let coerced = match (field.ty, value) {
        (_, Value::Null) => return Ok(Value::Null),

        (ColumnType::Text, Value::String(s)) => {
            if field.required && s.trim().is_empty() {
                return Err(RecordError::MissingRequiredField(name.to_string()));
            }
            Value::String(s.clone())
        }
        (ColumnType::Text, Value::Number(n)) => Value::String(n.to_string()),

        (ColumnType::Integer, Value::Number(n)) => {
            let i = n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .ok_or_else(|| RecordError::invalid(name, "expected an integer"))?;
            integer_in_range(name, i)?
        }
        (ColumnType::Integer, Value::String(s)) => {
            let i = s
                .trim()
                .parse::<i64>()
                .map_err(|_| RecordError::invalid(name, "expected an integer"))?;
            integer_in_range(name, i)?
        }

        (ColumnType::Decimal, Value::Number(n)) => {
            if n.as_f64().map_or(true, |f| !f.is_finite()) {
                return Err(RecordError::invalid(name, "expected a number"));
            }
            Value::Number(n.clone())
        }
        (ColumnType::Decimal, Value::String(s)) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Value::Number(i.into())
            } else {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| RecordError::invalid(name, "expected a number"))?
            }
        }

        (ColumnType::Date, Value::String(s)) => {
            let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|_| RecordError::invalid(name, "expected a date (YYYY-MM-DD)"))?;
            Value::String(date.format("%Y-%m-%d").to_string())
        }

        (ColumnType::Time, Value::String(s)) => {
            let trimmed = s.trim();
            let time = NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
                .map_err(|_| RecordError::invalid(name, "expected a time (HH:MM[:SS])"))?;
            Value::String(time.format("%H:%M:%S").to_string())
        }

        (ColumnType::Timestamp, Value::String(s)) => {
            let timestamp = parse_timestamp(s.trim())
                .ok_or_else(|| RecordError::invalid(name, "expected an RFC 3339 timestamp"))?;
            Value::String(timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false))
        }

        (ColumnType::Boolean, Value::Bool(b)) => Value::Bool(*b),
        (ColumnType::Boolean, Value::String(s)) => match s.trim() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(RecordError::invalid(name, "expected true or false")),
        },

        (ty, _) => {
            return Err(RecordError::invalid(name, format!("unsupported value for a {} column", ty.sql_cast())));
        }
    };

    if !field.allowed.is_empty() {
        if let Some(text) = coerced.as_str() {
            if !field.allowed.contains(&text) {
                return Err(RecordError::invalid(name, format!("must be one of {}", field.allowed.join(", "))));
            }
        }
    }

    Ok(coerced)
}

/// Coerces a query-string value for a column of `spec`.
pub fn coerce_param(spec: &EntitySpec, column: &str, raw: &str) -> Result<Value, RecordError> {
    match spec.field(column) {
        Some(field) => {
            let probe = FieldSpec { required: false, ..*field };
            coerce(&probe, &Value::String(raw.to_string()))
        }
        None if column == "id" => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| RecordError::invalid(column, "expected an integer")),
        None => Err(RecordError::UnknownField(column.to_string())),
    }
}

fn integer_in_range(name: &str, value: i64) -> Result<Value, RecordError> {
    if i32::try_from(value).is_err() {
        return Err(RecordError::invalid(name, "integer out of range"));
    }
    Ok(Value::from(value))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn default_value(default: FieldDefault) -> Value {
    match default {
        FieldDefault::Text(text) => Value::String(text.to_string()),
        FieldDefault::Bool(flag) => Value::Bool(flag),
        FieldDefault::Today => Value::String(Utc::now().date_naive().format("%Y-%m-%d").to_string()),
        FieldDefault::Now => Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, false)),
        FieldDefault::QrCode => Value::String(generate_qr_code()),
    }
}

/// `QR-<unix millis>-<9 random alphanumerics>`
pub fn generate_qr_code() -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("QR-{}-{}", Utc::now().timestamp_millis(), suffix.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityKind;
    use serde_json::json;

    #[test]
    fn test_create_applies_defaults() {
        let spec = EntityKind::Enrollment.spec();
        let record = validate_input(spec, json!({"student_id": 1, "session_id": "2"}), WriteMode::Create).unwrap();
        assert_eq!(record.get("status"), Some(&json!("Pending")));
        assert_eq!(record.get("session_id"), Some(&json!(2)));
        assert_eq!(record.get("assigned_seat"), Some(&Value::Null));
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        assert_eq!(record.get_str("enrolled_on"), Some(today.as_str()));
    }

    #[test]
    fn test_create_requires_fields() {
        let spec = EntityKind::Student.spec();
        let err = validate_input(spec, json!({"first_name": "Ana", "last_name": "Rojas"}), WriteMode::Create)
            .unwrap_err();
        assert_eq!(err, RecordError::MissingRequiredField("email".to_string()));
        assert_eq!(err.reason(), "missing-field");

        let err = validate_input(
            spec,
            json!({"first_name": "  ", "last_name": "Rojas", "email": "a@b.c"}),
            WriteMode::Create,
        )
        .unwrap_err();
        assert_eq!(err, RecordError::MissingRequiredField("first_name".to_string()));
    }

    #[test]
    fn test_rejects_unknown_and_system_fields() {
        let spec = EntityKind::Institution.spec();
        let err = validate_input(spec, json!({"name": "X", "rating": 5}), WriteMode::Create).unwrap_err();
        assert_eq!(err, RecordError::UnknownField("rating".to_string()));
        let err = validate_input(spec, json!({"name": "X", "active": false}), WriteMode::Create).unwrap_err();
        assert_eq!(err, RecordError::SystemFieldNotAllowed("active".to_string()));
        let err = validate_input(spec, json!(["name"]), WriteMode::Create).unwrap_err();
        assert_eq!(err, RecordError::NotAnObject);
    }

    #[test]
    fn test_merge_rejects_immutable_and_empty() {
        let spec = EntityKind::Enrollment.spec();
        let err = validate_input(spec, json!({"session_id": 4}), WriteMode::Merge).unwrap_err();
        assert_eq!(err, RecordError::ImmutableField("session_id".to_string()));
        assert_eq!(validate_input(spec, json!({}), WriteMode::Merge).unwrap_err(), RecordError::EmptyUpdate);
        let patch = validate_input(spec, json!({"status": "Active"}), WriteMode::Merge).unwrap();
        assert_eq!(patch.iter().count(), 1);
    }

    #[test]
    fn test_replace_clears_omitted_optional_fields() {
        let spec = EntityKind::Tutor.spec();
        let record = validate_input(
            spec,
            json!({"first_name": "Luis", "last_name": "Paz", "email": "l@p.bo"}),
            WriteMode::Replace,
        )
        .unwrap();
        assert_eq!(record.get("specialty"), Some(&Value::Null));
        let err = validate_input(spec, json!({"first_name": "Luis"}), WriteMode::Replace).unwrap_err();
        assert!(matches!(err, RecordError::MissingRequiredField(_)));
    }

    #[test]
    fn test_replace_keeps_generated_not_null_fields() {
        let record = validate_input(EntityKind::Payment.spec(), json!({"amount": 5}), WriteMode::Replace).unwrap();
        assert_eq!(record.get("amount"), Some(&json!(5)));
        assert!(!record.contains("qr_code"));
        assert!(!record.contains("paid_at"));
        assert!(!record.contains("enrollment_id"));

        let record =
            validate_input(EntityKind::Enrollment.spec(), json!({"assigned_seat": 3}), WriteMode::Replace).unwrap();
        assert!(!record.contains("enrolled_on"));
        assert_eq!(record.get("status"), Some(&json!("Pending")));
        assert_eq!(record.get("assigned_seat"), Some(&json!(3)));
    }

    #[test]
    fn test_explicit_null_on_not_null_field() {
        let spec = EntityKind::Enrollment.spec();
        let err = validate_input(spec, json!({"student_id": 1, "session_id": 1, "status": null}), WriteMode::Create)
            .unwrap_err();
        assert_eq!(err.reason(), "invalid-value");
        assert_eq!(err.field(), Some("status"));
        let err = validate_input(spec, json!({"status": null}), WriteMode::Merge).unwrap_err();
        assert_eq!(err.reason(), "invalid-value");

        let payments = EntityKind::Payment.spec();
        let err = validate_input(payments, json!({"qr_code": null}), WriteMode::Merge).unwrap_err();
        assert_eq!(err.field(), Some("qr_code"));
        let err = validate_input(payments, json!({"amount": 5, "paid_at": null}), WriteMode::Replace).unwrap_err();
        assert_eq!(err.field(), Some("paid_at"));

        let cleared = validate_input(spec, json!({"assigned_seat": null}), WriteMode::Merge).unwrap();
        assert_eq!(cleared.get("assigned_seat"), Some(&Value::Null));
    }

    #[test]
    fn test_allowed_values() {
        let spec = EntityKind::Enrollment.spec();
        let err = validate_input(spec, json!({"status": "Maybe"}), WriteMode::Merge).unwrap_err();
        assert_eq!(err.reason(), "invalid-value");
        assert_eq!(err.field(), Some("status"));
    }

    #[test]
    fn test_coerce_types() {
        let amount = EntityKind::Payment.spec().field("amount").unwrap();
        assert_eq!(coerce(amount, &json!("150.50")).unwrap(), json!(150.5));
        assert_eq!(coerce(amount, &json!(20)).unwrap(), json!(20));
        assert!(coerce(amount, &json!("abc")).is_err());

        let starts = EntityKind::RoomAssignment.spec().field("starts_at").unwrap();
        assert_eq!(coerce(starts, &json!("08:30")).unwrap(), json!("08:30:00"));
        assert!(coerce(starts, &json!("25:00")).is_err());

        let paid = EntityKind::Payment.spec().field("paid_at").unwrap();
        assert_eq!(coerce(paid, &json!("2024-03-01T10:00:00Z")).unwrap(), json!("2024-03-01T10:00:00+00:00"));

        let capacity = EntityKind::TutoringSession.spec().field("capacity").unwrap();
        assert!(coerce(capacity, &json!(1.5)).is_err());
        assert!(coerce(capacity, &json!(10_000_000_000i64)).is_err());
        assert!(coerce(capacity, &json!(true)).is_err());
    }

    #[test]
    fn test_entity_key_from_params() {
        let spec = EntityKind::RoomAssignment.spec();
        let params: HashMap<String, String> = [("classroom_id", "1"), ("session_id", "2"), ("tutor_id", "3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let key = EntityKey::from_params(spec, &params).unwrap();
        assert_eq!(key.values(), &[1, 2, 3]);
        assert_eq!(key.to_string(), "1/2/3");

        let bad: HashMap<String, String> = [("id".to_string(), "abc".to_string())].into_iter().collect();
        let err = EntityKey::from_params(EntityKind::Tutor.spec(), &bad).unwrap_err();
        assert_eq!(err.reason(), "malformed-key");
    }

    #[test]
    fn test_qr_code_format() {
        let code = generate_qr_code();
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "QR");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
    }

    #[test]
    fn test_redacted_drops_hidden_columns() {
        let mut record = Record::new();
        record.insert("username", json!("admin"));
        record.insert("password_hash", json!("$2b$..."));
        let value = record.redacted(EntityKind::User.spec());
        assert!(value.get("password_hash").is_none());
        assert_eq!(value["username"], "admin");
    }
}
