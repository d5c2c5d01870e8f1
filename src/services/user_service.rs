use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::{self, Claims};
use crate::config::SecurityConfig;
use crate::database::record::validate_input;
use crate::database::{DatabaseError, EntityKey, Record, RecordError, RowLock, Store, WriteMode};
use crate::filter::Filter;
use crate::lifecycle::{self, LifecycleError};
use crate::schema::registry::USER;

/// Fields accepted by `POST /users`.
const REGISTRATION_FIELDS: &[&str] = &["username", "password", "email", "role_id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Admin = 1,
    Manager = 2,
    Teacher = 3,
    Student = 4,
}

impl Role {
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::Manager),
            3 => Some(Role::Teacher),
            4 => Some(Role::Student),
            _ => None,
        }
    }

    pub fn id(self) -> i64 {
        self as i64
    }

    /// Roles whose pending accounts this role may approve.
    pub fn approvable(self) -> &'static [Role] {
        match self {
            Role::Admin => &[Role::Manager, Role::Teacher, Role::Student],
            Role::Manager => &[Role::Teacher, Role::Student],
            Role::Teacher => &[Role::Student],
            Role::Student => &[],
        }
    }

    pub fn can_approve(self, other: Role) -> bool {
        self.approvable().contains(&other)
    }
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Account is pending approval")]
    PendingApproval,
    #[error("Account is disabled")]
    Disabled,
    #[error("Role {approver} cannot approve role {target}")]
    NotAllowed { approver: i64, target: i64 },
    #[error("Unknown role: {0}")]
    UnknownRole(i64),
    #[error("User {0} is not pending approval")]
    NotPending(i64),
    #[error("User {0} not found")]
    NotFound(i64),
    #[error("{0}")]
    Token(String),
    #[error("{0}")]
    Hash(String),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl From<DatabaseError> for UserError {
    fn from(err: DatabaseError) -> Self {
        UserError::Lifecycle(err.into())
    }
}

impl From<RecordError> for UserError {
    fn from(err: RecordError) -> Self {
        UserError::Lifecycle(err.into())
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// The caller of an approval operation, as carried by its token.
#[derive(Debug, Clone, Copy)]
pub struct Approver {
    pub user_id: i64,
    pub role: i64,
}

/// Account registration, login and the approval queue.
pub struct UserService {
    store: Arc<dyn Store>,
    security: SecurityConfig,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>, security: SecurityConfig) -> Self {
        Self { store, security }
    }

    /// Registers an account. The first account, when it asks for Admin, is
    /// active immediately; every other one waits for approval.
    pub async fn register(&self, input: Value) -> Result<Value, UserError> {
        let mut body = Record::try_from(input)?;
        if let Some((unknown, _)) = body.iter().find(|(k, _)| !REGISTRATION_FIELDS.contains(&k.as_str())) {
            return Err(RecordError::UnknownField(unknown.clone()).into());
        }

        let password = match body.remove("password") {
            Some(Value::String(p)) if !p.trim().is_empty() => p,
            Some(Value::String(_)) | Some(Value::Null) | None => {
                return Err(RecordError::MissingRequiredField("password".into()).into())
            }
            Some(_) => {
                return Err(RecordError::InvalidValue {
                    field: "password".into(),
                    message: "expected a string".into(),
                }
                .into())
            }
        };

        let mut record = validate_input(&USER, body.into_value(), WriteMode::Create)?;
        let role_id = record.get_i64("role_id").unwrap_or_default();
        let role = Role::from_id(role_id).ok_or(UserError::UnknownRole(role_id))?;

        let cost = self.security.bcrypt_cost;
        let hash = tokio::task::spawn_blocking(move || auth::hash_password(&password, cost))
            .await
            .map_err(|e| UserError::Hash(e.to_string()))?
            .map_err(|e| UserError::Hash(e.to_string()))?;
        record.insert("password_hash", Value::String(hash));

        let mut tx = self.store.begin().await?;
        let bootstrap = role == Role::Admin && tx.count(&USER, &[]).await? == 0;
        lifecycle::check_unique(tx.as_mut(), &USER, &record, None).await?;

        record.insert("active", Value::Bool(bootstrap));
        record.insert("pending_approval", Value::Bool(!bootstrap));
        if bootstrap {
            record.insert("approved_at", Value::String(now()));
        }

        let created = tx.insert(&USER, &record).await?;
        tx.commit().await?;

        info!(
            user_id = created.get_i64("id").unwrap_or_default(),
            role = ?role,
            pending = !bootstrap,
            "user registered"
        );
        Ok(created.redacted(&USER))
    }

    pub async fn login(&self, request: LoginRequest) -> Result<Value, UserError> {
        let mut tx = self.store.begin().await?;
        let filter = Filter::new(&USER)
            .with_inactive()
            .where_eq("username", request.username.as_str())
            .limit(1);
        let found = tx.select(&filter).await?.into_iter().next();
        tx.commit().await?;

        let user = found.ok_or(UserError::InvalidCredentials)?;
        let hash = user.get_str("password_hash").unwrap_or_default().to_string();
        let password = request.password;
        let matches = tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
            .await
            .map_err(|e| UserError::Hash(e.to_string()))?
            .unwrap_or(false);
        if !matches {
            warn!(username = %request.username, "login refused: bad credentials");
            return Err(UserError::InvalidCredentials);
        }
        if user.get("pending_approval").and_then(Value::as_bool).unwrap_or(false) {
            return Err(UserError::PendingApproval);
        }
        if !user.is_active() {
            return Err(UserError::Disabled);
        }

        let claims = Claims::new(
            user.get_i64("id").unwrap_or_default(),
            request.username,
            user.get_i64("role_id").unwrap_or_default(),
            self.security.jwt_expiry_hours,
        );
        let token = auth::generate_jwt(&self.security, &claims).map_err(|e| UserError::Token(e.to_string()))?;

        Ok(json!({
            "token": token,
            "expires_in": self.security.jwt_expiry_hours * 3600,
            "user": user.redacted(&USER),
        }))
    }

    /// Pending accounts the caller's role may approve; empty for a role that
    /// approves nobody.
    pub async fn pending_for(&self, approver: Approver) -> Result<Vec<Value>, UserError> {
        let role = Role::from_id(approver.role).ok_or(UserError::NotAllowed { approver: approver.role, target: 0 })?;
        let roles: Vec<Value> = role.approvable().iter().map(|r| Value::from(r.id())).collect();

        let mut tx = self.store.begin().await?;
        let filter = Filter::new(&USER)
            .with_inactive()
            .where_eq("pending_approval", true)
            .where_in("role_id", roles);
        let rows = tx.select(&filter).await?;
        tx.commit().await?;

        Ok(rows.into_iter().map(|r| r.redacted(&USER)).collect())
    }

    pub async fn approve(&self, approver: Approver, user_id: i64) -> Result<Value, UserError> {
        let role = approver_role(approver)?;
        let key = EntityKey::id(user_id);

        let mut tx = self.store.begin().await?;
        let target = tx
            .fetch(&USER, &key, RowLock::Update)
            .await?
            .ok_or(UserError::NotFound(user_id))?;
        if !target.get("pending_approval").and_then(Value::as_bool).unwrap_or(false) {
            return Err(UserError::NotPending(user_id));
        }
        let target_role = target.get_i64("role_id").unwrap_or_default();
        if !Role::from_id(target_role).is_some_and(|r| role.can_approve(r)) {
            return Err(UserError::NotAllowed { approver: role.id(), target: target_role });
        }

        let changes = Record::try_from(json!({
            "active": true,
            "pending_approval": false,
            "approved_by": approver.user_id,
            "approved_at": now(),
        }))?;
        let approved = tx.update(&USER, &key, &changes).await?.ok_or(UserError::NotFound(user_id))?;
        tx.commit().await?;

        info!(user_id, approved_by = approver.user_id, "user approved");
        Ok(approved.redacted(&USER))
    }
}

fn approver_role(approver: Approver) -> Result<Role, UserError> {
    match Role::from_id(approver.role) {
        Some(role) if !role.approvable().is_empty() => Ok(role),
        _ => Err(UserError::NotAllowed { approver: approver.role, target: 0 }),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::database::MemoryStore;

    fn service() -> UserService {
        UserService::new(Arc::new(MemoryStore::new()), AppConfig::development().security)
    }

    fn registration(username: &str, role_id: i64) -> Value {
        json!({
            "username": username,
            "password": "s3cret",
            "email": format!("{username}@example.com"),
            "role_id": role_id,
        })
    }

    fn login(username: &str) -> LoginRequest {
        LoginRequest { username: username.into(), password: "s3cret".into() }
    }

    #[test]
    fn test_approval_matrix() {
        assert!(Role::Admin.can_approve(Role::Manager));
        assert!(Role::Manager.can_approve(Role::Student));
        assert!(!Role::Manager.can_approve(Role::Admin));
        assert!(Role::Teacher.can_approve(Role::Student));
        assert!(!Role::Teacher.can_approve(Role::Teacher));
        assert!(Role::Student.approvable().is_empty());
    }

    #[tokio::test]
    async fn test_first_admin_is_active() {
        let users = service();
        let admin = users.register(registration("root", 1)).await.unwrap();
        assert_eq!(admin["active"], true);
        assert_eq!(admin["pending_approval"], false);
        assert!(admin.get("password_hash").is_none());

        let second = users.register(registration("root2", 1)).await.unwrap();
        assert_eq!(second["active"], false);
        assert_eq!(second["pending_approval"], true);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let users = service();
        assert!(matches!(
            users.register(registration("x", 9)).await,
            Err(UserError::UnknownRole(9))
        ));
        let mut body = registration("y", 4);
        body["pending_approval"] = json!(false);
        assert!(matches!(users.register(body).await, Err(UserError::Lifecycle(LifecycleError::InvalidInput(_)))));

        users.register(registration("dup", 4)).await.unwrap();
        let err = users.register(registration("dup", 4)).await.unwrap_err();
        match err {
            UserError::Lifecycle(LifecycleError::Conflict(reason)) => assert_eq!(reason.code(), "duplicate"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_and_approval_flow() {
        let users = service();
        let admin = users.register(registration("root", 1)).await.unwrap();
        let student = users.register(registration("kid", 4)).await.unwrap();
        let student_id = student["id"].as_i64().unwrap();

        assert!(matches!(users.login(login("kid")).await, Err(UserError::PendingApproval)));
        assert!(matches!(
            users.login(LoginRequest { username: "root".into(), password: "nope".into() }).await,
            Err(UserError::InvalidCredentials)
        ));
        assert!(matches!(users.login(login("ghost")).await, Err(UserError::InvalidCredentials)));

        let session = users.login(login("root")).await.unwrap();
        assert!(session["token"].as_str().is_some_and(|t| !t.is_empty()));

        let approver = Approver { user_id: admin["id"].as_i64().unwrap(), role: 1 };
        let pending = users.pending_for(approver).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0]["username"], "kid");

        let approved = users.approve(approver, student_id).await.unwrap();
        assert_eq!(approved["active"], true);
        assert_eq!(approved["approved_by"], approver.user_id);

        assert!(matches!(users.approve(approver, student_id).await, Err(UserError::NotPending(_))));
        assert!(matches!(users.approve(approver, 999).await, Err(UserError::NotFound(999))));
        users.login(login("kid")).await.unwrap();
    }

    #[tokio::test]
    async fn test_teacher_cannot_approve_manager() {
        let users = service();
        users.register(registration("root", 1)).await.unwrap();
        let manager = users.register(registration("boss", 2)).await.unwrap();
        let teacher = Approver { user_id: 42, role: 3 };

        let err = users.approve(teacher, manager["id"].as_i64().unwrap()).await.unwrap_err();
        assert!(matches!(err, UserError::NotAllowed { approver: 3, target: 2 }));
        assert!(users.pending_for(teacher).await.unwrap().is_empty());

    }

    #[tokio::test]
    async fn test_student_sees_no_pending_accounts() {
        let users = service();
        users.register(registration("root", 1)).await.unwrap();
        let kid = users.register(registration("kid", 4)).await.unwrap();
        let student = Approver { user_id: 43, role: 4 };

        assert!(users.pending_for(student).await.unwrap().is_empty());
        let err = users.approve(student, kid["id"].as_i64().unwrap()).await.unwrap_err();
        assert!(matches!(err, UserError::NotAllowed { approver: 4, .. }));

        let unknown = Approver { user_id: 44, role: 9 };
        assert!(matches!(users.pending_for(unknown).await, Err(UserError::NotAllowed { .. })));
    }

    #[tokio::test]
    async fn test_register_coerces_string_role() {
        let users = service();
        let mut body = registration("root", 1);
        body["role_id"] = json!("1");
        let admin = users.register(body).await.unwrap();
        assert_eq!(admin["role_id"], 1);
        assert_eq!(admin["active"], true, "string role id still bootstraps the first admin");

        let mut body = registration("kid", 4);
        body["role_id"] = json!("4");
        let kid = users.register(body).await.unwrap();
        assert_eq!(kid["role_id"], 4);
        assert_eq!(kid["pending_approval"], true);

        let mut body = registration("bad", 4);
        body["role_id"] = json!("admin");
        assert!(matches!(users.register(body).await, Err(UserError::Lifecycle(LifecycleError::InvalidInput(_)))));
    }
}
