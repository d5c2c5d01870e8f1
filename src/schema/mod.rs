//! Static description of every entity type the API manages.
//!
//! Each table is described once by an [`EntitySpec`]; the lifecycle manager,
//! the SQL generator, the in-memory store and the HTTP router all take the
//! spec as data instead of carrying per-resource code.

pub mod graph;
pub mod registry;

use serde::Serialize;
use std::fmt;

use crate::filter::SortDirection;

pub use graph::{DependencyGraph, GraphError, Relation};
pub use registry::THROUGH_ROUTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EntityKind {
    Institution,
    Tutor,
    Classroom,
    TutoringSession,
    Student,
    Enrollment,
    RoomAssignment,
    Payment,
    Activity,
    Question,
    #[serde(rename = "Option")]
    AnswerOption,
    SurveyResponse,
    User,
}

impl EntityKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Institution => "Institution",
            EntityKind::Tutor => "Tutor",
            EntityKind::Classroom => "Classroom",
            EntityKind::TutoringSession => "TutoringSession",
            EntityKind::Student => "Student",
            EntityKind::Enrollment => "Enrollment",
            EntityKind::RoomAssignment => "RoomAssignment",
            EntityKind::Payment => "Payment",
            EntityKind::Activity => "Activity",
            EntityKind::Question => "Question",
            EntityKind::AnswerOption => "Option",
            EntityKind::SurveyResponse => "SurveyResponse",
            EntityKind::User => "User",
        }
    }

    pub fn spec(&self) -> &'static EntitySpec {
        registry::spec_for(*self)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Decimal,
    Date,
    Time,
    Timestamp,
    Boolean,
}

impl ColumnType {
    /// Cast appended to every bound placeholder for this column.
    pub fn sql_cast(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "numeric",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamptz",
            ColumnType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldDefault {
    Text(&'static str),
    Bool(bool),
    Today,
    Now,
    QrCode,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    pub required: bool,
    /// Column is `NOT NULL`; an explicit `null` is rejected even when the field may be omitted.
    pub nullable: bool,
    pub mutable: bool,
    pub default: Option<FieldDefault>,
    pub allowed: &'static [&'static str],
    pub hidden: bool,
}

impl FieldSpec {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            required: false,
            nullable: true,
            mutable: true,
            default: None,
            allowed: &[],
            hidden: false,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self.nullable = false;
        self
    }

    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub const fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    pub const fn default_to(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    pub const fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Foreign key from a child entity to its parent.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ParentLink {
    pub parent: EntityKind,
    pub column: &'static str,
    pub optional: bool,
    /// Extra `column = value` condition a child row must meet to block disabling the parent.
    pub blocks_when: Option<(&'static str, &'static str)>,
}

impl ParentLink {
    pub const fn required(parent: EntityKind, column: &'static str) -> Self {
        Self { parent, column, optional: false, blocks_when: None }
    }

    pub const fn optional(parent: EntityKind, column: &'static str) -> Self {
        Self { parent, column, optional: true, blocks_when: None }
    }

    pub const fn blocking_when(mut self, column: &'static str, value: &'static str) -> Self {
        self.blocks_when = Some((column, value));
        self
    }
}

/// Caps how many children in a given state a parent row accepts.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CapacityRule {
    pub column: &'static str,
    pub parent_field: &'static str,
    pub counted_when: (&'static str, &'static str),
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SummarySpec {
    pub numeric: &'static [&'static str],
    pub group_by: &'static [&'static str],
    /// Columns reported as `distinct_<col>`: how many different non-null values the visible rows hold.
    pub distinct: &'static [&'static str],
}

/// Listing of `child` rows reached from `parent` through an intermediate entity,
/// e.g. a student's payments through their enrollments.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThroughRoute {
    pub parent: EntityKind,
    pub via: EntityKind,
    pub child: EntityKind,
}

#[derive(Debug, Serialize)]
pub struct EntitySpec {
    pub kind: EntityKind,
    pub table: &'static str,
    pub collection: &'static str,
    pub key: &'static [&'static str],
    pub fields: &'static [FieldSpec],
    pub parents: &'static [ParentLink],
    pub unique: &'static [&'static [&'static str]],
    pub search: &'static [&'static str],
    pub filters: &'static [&'static str],
    /// Columns accepting `<col>[gte]` / `<col>[lte]` bounds.
    pub ranges: &'static [&'static str],
    #[serde(skip)]
    pub order: &'static [(&'static str, SortDirection)],
    pub capacity: Option<CapacityRule>,
    pub summary: SummarySpec,
    /// Served through the generic lifecycle routes.
    pub routed: bool,
}

impl EntitySpec {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Column type for any column including the surrogate key.
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        if name == "id" && self.key == ["id"] {
            return Some(ColumnType::Integer);
        }
        if name == "active" {
            return Some(ColumnType::Boolean);
        }
        self.field(name).map(|f| f.ty)
    }

    pub fn has_surrogate_key(&self) -> bool {
        self.key == ["id"]
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.key.contains(&name)
    }

    pub fn parent_link(&self, column: &str) -> Option<&'static ParentLink> {
        self.parents.iter().find(|p| p.column == column)
    }

    pub fn hidden_fields(&self) -> impl Iterator<Item = &'static str> {
        self.fields.iter().filter(|f| f.hidden).map(|f| f.name)
    }

    /// Route suffix addressing one row, e.g. `/:id`.
    pub fn key_path(&self) -> String {
        self.key.iter().map(|k| format!("/:{}", k)).collect()
    }
}
