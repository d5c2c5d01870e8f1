use super::{
    CapacityRule, ColumnType, EntityKind, EntitySpec, FieldDefault, FieldSpec, ParentLink, SummarySpec,
    ThroughRoute,
};
use crate::filter::SortDirection;

pub const ENROLLMENT_STATUSES: &[&str] = &["Pending", "Active", "Cancelled"];

const BY_ID: &[(&str, SortDirection)] = &[("id", SortDirection::Asc)];

pub static INSTITUTION: EntitySpec = EntitySpec {
    kind: EntityKind::Institution,
    table: "institutions",
    collection: "institutions",
    key: &["id"],
    fields: &[
        FieldSpec::text("name").required(),
        FieldSpec::text("address"),
        FieldSpec::text("phone"),
        FieldSpec::text("institution_type"),
        FieldSpec::text("opening_hours"),
    ],
    parents: &[],
    unique: &[],
    search: &["name", "address"],
    filters: &["institution_type"],
    ranges: &[],
    order: &[("name", SortDirection::Asc), ("id", SortDirection::Asc)],
    capacity: None,
    summary: SummarySpec { numeric: &[], group_by: &["institution_type"], distinct: &[] },
    routed: true,
};

pub static TUTOR: EntitySpec = EntitySpec {
    kind: EntityKind::Tutor,
    table: "tutors",
    collection: "tutors",
    key: &["id"],
    fields: &[
        FieldSpec::text("first_name").required(),
        FieldSpec::text("last_name").required(),
        FieldSpec::text("second_last_name"),
        FieldSpec::text("phone"),
        FieldSpec::text("email").required(),
        FieldSpec::text("specialty"),
        FieldSpec::text("academic_level"),
    ],
    parents: &[],
    unique: &[&["email"]],
    search: &["first_name", "last_name", "specialty"],
    filters: &["specialty", "academic_level", "email"],
    ranges: &[],
    order: &[("last_name", SortDirection::Asc), ("first_name", SortDirection::Asc), ("id", SortDirection::Asc)],
    capacity: None,
    summary: SummarySpec { numeric: &[], group_by: &["academic_level"], distinct: &[] },
    routed: true,
};

pub static CLASSROOM: EntitySpec = EntitySpec {
    kind: EntityKind::Classroom,
    table: "classrooms",
    collection: "classrooms",
    key: &["id"],
    fields: &[
        FieldSpec::text("classroom_type"),
        FieldSpec::text("location"),
        FieldSpec::integer("capacity"),
        FieldSpec::integer("institution_id").required(),
    ],
    parents: &[ParentLink::required(EntityKind::Institution, "institution_id")],
    unique: &[],
    search: &["location", "classroom_type"],
    filters: &["institution_id", "classroom_type"],
    ranges: &[],
    order: BY_ID,
    capacity: None,
    summary: SummarySpec { numeric: &["capacity"], group_by: &["classroom_type"], distinct: &[] },
    routed: true,
};

pub static TUTORING_SESSION: EntitySpec = EntitySpec {
    kind: EntityKind::TutoringSession,
    table: "tutoring_sessions",
    collection: "sessions",
    key: &["id"],
    fields: &[
        FieldSpec::text("code"),
        FieldSpec::text("name").required(),
        FieldSpec::integer("capacity").required(),
        FieldSpec::text("description"),
        FieldSpec::integer("tutor_id").required(),
        FieldSpec::integer("institution_id").required(),
    ],
    parents: &[
        ParentLink::required(EntityKind::Tutor, "tutor_id"),
        ParentLink::required(EntityKind::Institution, "institution_id"),
    ],
    unique: &[],
    search: &["name", "code", "description"],
    filters: &["tutor_id", "institution_id", "code"],
    ranges: &[],
    order: &[("name", SortDirection::Asc), ("id", SortDirection::Asc)],
    capacity: None,
    summary: SummarySpec { numeric: &["capacity"], group_by: &[], distinct: &["tutor_id", "institution_id"] },
    routed: true,
};

pub static STUDENT: EntitySpec = EntitySpec {
    kind: EntityKind::Student,
    table: "students",
    collection: "students",
    key: &["id"],
    fields: &[
        FieldSpec::text("first_name").required(),
        FieldSpec::text("last_name").required(),
        FieldSpec::text("second_last_name"),
        FieldSpec::text("phone"),
        FieldSpec::text("email").required(),
        FieldSpec::text("major"),
        FieldSpec::text("school"),
    ],
    parents: &[],
    unique: &[&["email"]],
    search: &["first_name", "last_name", "second_last_name", "email"],
    filters: &["major", "school", "email"],
    ranges: &[],
    order: &[("last_name", SortDirection::Asc), ("first_name", SortDirection::Asc), ("id", SortDirection::Asc)],
    capacity: None,
    summary: SummarySpec { numeric: &[], group_by: &["major"], distinct: &[] },
    routed: true,
};

pub static ENROLLMENT: EntitySpec = EntitySpec {
    kind: EntityKind::Enrollment,
    table: "enrollments",
    collection: "enrollments",
    key: &["id"],
    fields: &[
        FieldSpec::new("enrolled_on", ColumnType::Date).not_null().default_to(FieldDefault::Today),
        FieldSpec::text("status")
            .not_null()
            .default_to(FieldDefault::Text("Pending"))
            .one_of(ENROLLMENT_STATUSES),
        FieldSpec::integer("assigned_seat"),
        FieldSpec::integer("student_id").required().immutable(),
        FieldSpec::integer("session_id").required().immutable(),
    ],
    parents: &[
        ParentLink::required(EntityKind::Student, "student_id").blocking_when("status", "Active"),
        ParentLink::required(EntityKind::TutoringSession, "session_id"),
    ],
    unique: &[&["student_id", "session_id"]],
    search: &[],
    filters: &["status", "student_id", "session_id"],
    ranges: &["enrolled_on"],
    order: &[("enrolled_on", SortDirection::Desc), ("id", SortDirection::Desc)],
    capacity: Some(CapacityRule {
        column: "session_id",
        parent_field: "capacity",
        counted_when: ("status", "Active"),
    }),
    summary: SummarySpec { numeric: &["assigned_seat"], group_by: &["status"], distinct: &[] },
    routed: true,
};

pub static ROOM_ASSIGNMENT: EntitySpec = EntitySpec {
    kind: EntityKind::RoomAssignment,
    table: "room_assignments",
    collection: "room_assignments",
    key: &["classroom_id", "session_id", "tutor_id"],
    fields: &[
        FieldSpec::integer("classroom_id").required().immutable(),
        FieldSpec::integer("session_id").required().immutable(),
        FieldSpec::integer("tutor_id").required().immutable(),
        FieldSpec::new("starts_at", ColumnType::Time),
        FieldSpec::new("ends_at", ColumnType::Time),
        FieldSpec::text("weekday"),
    ],
    parents: &[
        ParentLink::required(EntityKind::Classroom, "classroom_id"),
        ParentLink::required(EntityKind::TutoringSession, "session_id"),
        ParentLink::required(EntityKind::Tutor, "tutor_id"),
    ],
    unique: &[&["classroom_id", "session_id", "tutor_id"]],
    search: &[],
    filters: &["classroom_id", "session_id", "tutor_id", "weekday"],
    ranges: &[],
    order: &[
        ("classroom_id", SortDirection::Asc),
        ("session_id", SortDirection::Asc),
        ("tutor_id", SortDirection::Asc),
    ],
    capacity: None,
    summary: SummarySpec { numeric: &[], group_by: &["weekday"], distinct: &["session_id", "classroom_id"] },
    routed: true,
};

pub static PAYMENT: EntitySpec = EntitySpec {
    kind: EntityKind::Payment,
    table: "payments",
    collection: "payments",
    key: &["id"],
    fields: &[
        FieldSpec::new("amount", ColumnType::Decimal).required(),
        FieldSpec::new("paid_at", ColumnType::Timestamp).not_null().default_to(FieldDefault::Now),
        FieldSpec::text("qr_code").not_null().default_to(FieldDefault::QrCode),
        FieldSpec::integer("enrollment_id").required().immutable(),
    ],
    parents: &[ParentLink::required(EntityKind::Enrollment, "enrollment_id")],
    unique: &[&["qr_code"]],
    search: &["qr_code"],
    filters: &["enrollment_id", "qr_code"],
    ranges: &["paid_at", "amount"],
    order: &[("paid_at", SortDirection::Desc), ("id", SortDirection::Desc)],
    capacity: None,
    summary: SummarySpec { numeric: &["amount"], group_by: &[], distinct: &["enrollment_id"] },
    routed: true,
};

pub static ACTIVITY: EntitySpec = EntitySpec {
    kind: EntityKind::Activity,
    table: "activities",
    collection: "activities",
    key: &["id"],
    fields: &[
        FieldSpec::text("name").required(),
        FieldSpec::text("description"),
        FieldSpec::new("published_on", ColumnType::Date),
        FieldSpec::new("due_on", ColumnType::Date),
        FieldSpec::new("grade", ColumnType::Decimal),
        FieldSpec::integer("session_id").required().immutable(),
        FieldSpec::integer("tutor_id"),
    ],
    parents: &[
        ParentLink::required(EntityKind::TutoringSession, "session_id"),
        ParentLink::optional(EntityKind::Tutor, "tutor_id"),
    ],
    unique: &[],
    search: &["name", "description"],
    filters: &["session_id", "tutor_id"],
    ranges: &["published_on", "due_on", "grade"],
    order: &[("due_on", SortDirection::Asc), ("id", SortDirection::Asc)],
    capacity: None,
    summary: SummarySpec { numeric: &["grade"], group_by: &[], distinct: &[] },
    routed: true,
};

pub static QUESTION: EntitySpec = EntitySpec {
    kind: EntityKind::Question,
    table: "questions",
    collection: "questions",
    key: &["id"],
    fields: &[
        FieldSpec::text("description").required(),
        FieldSpec::text("question_type"),
        FieldSpec::integer("session_id"),
    ],
    parents: &[ParentLink::optional(EntityKind::TutoringSession, "session_id")],
    unique: &[],
    search: &["description"],
    filters: &["session_id", "question_type"],
    ranges: &[],
    order: BY_ID,
    capacity: None,
    summary: SummarySpec { numeric: &[], group_by: &["question_type"], distinct: &[] },
    routed: true,
};

pub static ANSWER_OPTION: EntitySpec = EntitySpec {
    kind: EntityKind::AnswerOption,
    table: "options",
    collection: "options",
    key: &["id"],
    fields: &[
        FieldSpec::integer("question_id").required().immutable(),
        FieldSpec::text("answer_text").required(),
    ],
    parents: &[ParentLink::required(EntityKind::Question, "question_id")],
    unique: &[],
    search: &["answer_text"],
    filters: &["question_id"],
    ranges: &[],
    order: BY_ID,
    capacity: None,
    summary: SummarySpec { numeric: &[], group_by: &[], distinct: &[] },
    routed: true,
};

pub static SURVEY_RESPONSE: EntitySpec = EntitySpec {
    kind: EntityKind::SurveyResponse,
    table: "survey_responses",
    collection: "responses",
    key: &["id"],
    fields: &[
        FieldSpec::text("selected_options"),
        FieldSpec::text("description"),
        FieldSpec::integer("enrollment_id").required().immutable(),
    ],
    parents: &[ParentLink::required(EntityKind::Enrollment, "enrollment_id")],
    unique: &[],
    search: &["description"],
    filters: &["enrollment_id"],
    ranges: &[],
    order: BY_ID,
    capacity: None,
    summary: SummarySpec { numeric: &[], group_by: &[], distinct: &[] },
    routed: true,
};

/// Accounts are managed by the user service, not the generic routes.
pub static USER: EntitySpec = EntitySpec {
    kind: EntityKind::User,
    table: "users",
    collection: "users",
    key: &["id"],
    fields: &[
        FieldSpec::text("username").required().immutable(),
        FieldSpec::text("password_hash").required().hidden(),
        FieldSpec::text("email").required(),
        FieldSpec::integer("role_id").required(),
        FieldSpec::new("pending_approval", ColumnType::Boolean).not_null().default_to(FieldDefault::Bool(true)),
        FieldSpec::integer("approved_by"),
        FieldSpec::new("approved_at", ColumnType::Timestamp),
        FieldSpec::new("requested_at", ColumnType::Timestamp).not_null().default_to(FieldDefault::Now),
    ],
    parents: &[],
    unique: &[&["username"], &["email"]],
    search: &["username", "email"],
    filters: &["role_id", "pending_approval"],
    ranges: &[],
    order: BY_ID,
    capacity: None,
    summary: SummarySpec { numeric: &[], group_by: &["role_id"], distinct: &[] },
    routed: false,
};

/// A student's payments are reached through their enrollments.
pub static THROUGH_ROUTES: &[ThroughRoute] = &[ThroughRoute {
    parent: EntityKind::Student,
    via: EntityKind::Enrollment,
    child: EntityKind::Payment,
}];

static ALL: [&EntitySpec; 13] = [
    &INSTITUTION,
    &TUTOR,
    &CLASSROOM,
    &TUTORING_SESSION,
    &STUDENT,
    &ENROLLMENT,
    &ROOM_ASSIGNMENT,
    &PAYMENT,
    &ACTIVITY,
    &QUESTION,
    &ANSWER_OPTION,
    &SURVEY_RESPONSE,
    &USER,
];

pub fn all() -> &'static [&'static EntitySpec] {
    &ALL
}

/// Specs served by the generic lifecycle routes.
pub fn routed() -> impl Iterator<Item = &'static EntitySpec> {
    ALL.iter().copied().filter(|s| s.routed)
}

pub fn spec_for(kind: EntityKind) -> &'static EntitySpec {
    match kind {
        EntityKind::Institution => &INSTITUTION,
        EntityKind::Tutor => &TUTOR,
        EntityKind::Classroom => &CLASSROOM,
        EntityKind::TutoringSession => &TUTORING_SESSION,
        EntityKind::Student => &STUDENT,
        EntityKind::Enrollment => &ENROLLMENT,
        EntityKind::RoomAssignment => &ROOM_ASSIGNMENT,
        EntityKind::Payment => &PAYMENT,
        EntityKind::Activity => &ACTIVITY,
        EntityKind::Question => &QUESTION,
        EntityKind::AnswerOption => &ANSWER_OPTION,
        EntityKind::SurveyResponse => &SURVEY_RESPONSE,
        EntityKind::User => &USER,
    }
}

pub fn by_collection(collection: &str) -> Option<&'static EntitySpec> {
    ALL.iter().copied().find(|s| s.collection == collection)
}
