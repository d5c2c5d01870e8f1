use std::fmt;
use thiserror::Error;

use crate::database::{DatabaseError, RecordError};
use crate::filter::FilterError;
use crate::schema::EntityKind;

/// Why a lifecycle transition or write was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// An active child row still references the entity.
    BlockingChildren(EntityKind),
    /// A parent the entity depends on is disabled.
    InactiveParent(EntityKind),
    Duplicate(String),
    /// The parent already holds as many counted children as it allows.
    Capacity(EntityKind),
    MissingReference(String),
}

impl ConflictReason {
    pub fn code(&self) -> &'static str {
        match self {
            ConflictReason::BlockingChildren(_) => "blocking-children",
            ConflictReason::InactiveParent(_) => "inactive-parent",
            ConflictReason::Duplicate(_) => "duplicate",
            ConflictReason::Capacity(_) => "capacity",
            ConflictReason::MissingReference(_) => "missing-reference",
        }
    }

    /// Machine-readable detail, e.g. `blocking-children: Classroom`.
    pub fn detail(&self) -> String {
        match self {
            ConflictReason::BlockingChildren(kind) | ConflictReason::InactiveParent(kind) => {
                format!("{}: {}", self.code(), kind)
            }
            _ => self.code().to_string(),
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::BlockingChildren(kind) => write!(f, "Active {} records still reference this entity", kind),
            ConflictReason::InactiveParent(kind) => write!(f, "Referenced {} is not active", kind),
            ConflictReason::Duplicate(fields) => write!(f, "A record with the same {} already exists", fields),
            ConflictReason::Capacity(kind) => write!(f, "{} has no remaining capacity", kind),
            ConflictReason::MissingReference(constraint) => write!(f, "Referenced record does not exist ({})", constraint),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{entity} {key} not found")]
    NotFound { entity: EntityKind, key: String },

    #[error("{0}")]
    Conflict(ConflictReason),

    #[error("{0}")]
    InvalidInput(#[from] RecordError),

    #[error("Internal error: {0}")]
    Internal(DatabaseError),
}

impl LifecycleError {
    pub fn not_found(entity: EntityKind, key: impl fmt::Display) -> Self {
        LifecycleError::NotFound { entity, key: key.to_string() }
    }

    pub fn conflict_reason(&self) -> Option<&ConflictReason> {
        match self {
            LifecycleError::Conflict(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<DatabaseError> for LifecycleError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::UniqueViolation(constraint) => LifecycleError::Conflict(ConflictReason::Duplicate(constraint)),
            DatabaseError::ForeignKeyViolation(constraint) => {
                LifecycleError::Conflict(ConflictReason::MissingReference(constraint))
            }
            DatabaseError::NotNullViolation(column) => LifecycleError::InvalidInput(RecordError::InvalidValue {
                field: column,
                message: "must not be null".to_string(),
            }),
            DatabaseError::CheckViolation(constraint) => LifecycleError::InvalidInput(RecordError::InvalidValue {
                field: constraint,
                message: "violates a check constraint".to_string(),
            }),
            other => LifecycleError::Internal(other),
        }
    }
}

impl From<FilterError> for LifecycleError {
    fn from(err: FilterError) -> Self {
        let record_error = match err {
            FilterError::UnknownFilter(name) | FilterError::InvalidColumn(name) => RecordError::UnknownField(name),
            FilterError::InvalidValue { field, message } => RecordError::InvalidValue { field, message },
            FilterError::SearchUnsupported(collection) => RecordError::InvalidValue {
                field: "q".to_string(),
                message: format!("search is not supported on {}", collection),
            },
            FilterError::InvalidLimit(message) => RecordError::InvalidValue { field: "limit".to_string(), message },
            FilterError::InvalidOffset(message) => RecordError::InvalidValue { field: "offset".to_string(), message },
        };
        LifecycleError::InvalidInput(record_error)
    }
}
