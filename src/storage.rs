use crate::entities;
use crate::errors::PenumbraError;
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use chrono::Utc;
use migration::MigratorTrait;
use rand::RngCore;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub subject: String,
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub created_at: i64,
    pub enabled: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub priority: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRule {
    pub id: String,
    pub role_id: String,
    pub action: String,
    pub subject: String,
    pub conditions: Option<String>, // JSON-encoded condition map
    pub inverted: i64,
    pub position: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub subject: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// One raw permission row as handed to the rule store, tagged with the
/// role it came from for diagnostics.
#[derive(Debug, Clone)]
pub struct PermissionRow {
    pub role_name: String,
    pub action: String,
    pub subject: String,
    pub conditions: Option<String>,
    pub inverted: i64,
}

/// Connect to the database and bring the schema up to date.
pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, PenumbraError> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

// User management functions

pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
    email: Option<String>,
) -> Result<User, PenumbraError> {
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::{Argon2, PasswordHasher};

    let subject = random_id();
    let created_at = Utc::now().timestamp();

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PenumbraError::Other(format!("Password hashing failed: {}", e)))?
        .to_string();

    let user = entities::user::ActiveModel {
        subject: Set(subject.clone()),
        username: Set(username.to_string()),
        password_hash: Set(password_hash.clone()),
        email: Set(email.clone()),
        created_at: Set(created_at),
        enabled: Set(1),
    };

    user.insert(db).await?;

    Ok(User {
        subject,
        username: username.to_string(),
        password_hash,
        email,
        created_at,
        enabled: 1,
    })
}

pub async fn get_user_by_username(
    db: &DatabaseConnection,
    username: &str,
) -> Result<Option<User>, PenumbraError> {
    use entities::user::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::Username.eq(username))
        .one(db)
        .await?
    {
        Ok(Some(User {
            subject: model.subject,
            username: model.username,
            password_hash: model.password_hash,
            email: model.email,
            created_at: model.created_at,
            enabled: model.enabled,
        }))
    } else {
        Ok(None)
    }
}

pub async fn get_user_by_subject(
    db: &DatabaseConnection,
    subject: &str,
) -> Result<Option<User>, PenumbraError> {
    use entities::user::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::Subject.eq(subject))
        .one(db)
        .await?
    {
        Ok(Some(User {
            subject: model.subject,
            username: model.username,
            password_hash: model.password_hash,
            email: model.email,
            created_at: model.created_at,
            enabled: model.enabled,
        }))
    } else {
        Ok(None)
    }
}

pub async fn verify_user_password(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> Result<Option<String>, PenumbraError> {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let user = match get_user_by_username(db, username).await? {
        Some(u) if u.enabled == 1 => u,
        _ => return Ok(None),
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| PenumbraError::Other(format!("Invalid password hash: {}", e)))?;

    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
    {
        Ok(Some(user.subject))
    } else {
        Ok(None)
    }
}

pub async fn set_user_enabled(
    db: &DatabaseConnection,
    subject: &str,
    enabled: bool,
) -> Result<(), PenumbraError> {
    use entities::user::{Column, Entity};

    let user = Entity::find()
        .filter(Column::Subject.eq(subject))
        .one(db)
        .await?
        .ok_or_else(|| PenumbraError::Other(format!("User not found: {}", subject)))?;

    let mut active: entities::user::ActiveModel = user.into();
    active.enabled = Set(if enabled { 1 } else { 0 });
    active.update(db).await?;

    Ok(())
}

// Role management functions

pub async fn create_role(
    db: &DatabaseConnection,
    name: &str,
    description: Option<String>,
    priority: i64,
) -> Result<Role, PenumbraError> {
    let id = random_id();
    let created_at = Utc::now().timestamp();

    let role = entities::role::ActiveModel {
        id: Set(id.clone()),
        name: Set(name.to_string()),
        description: Set(description.clone()),
        priority: Set(priority),
        created_at: Set(created_at),
    };

    role.insert(db).await?;

    Ok(Role {
        id,
        name: name.to_string(),
        description,
        priority,
        created_at,
    })
}

pub async fn get_role(db: &DatabaseConnection, id: &str) -> Result<Option<Role>, PenumbraError> {
    use entities::role::{Column, Entity};

    if let Some(model) = Entity::find().filter(Column::Id.eq(id)).one(db).await? {
        Ok(Some(Role {
            id: model.id,
            name: model.name,
            description: model.description,
            priority: model.priority,
            created_at: model.created_at,
        }))
    } else {
        Ok(None)
    }
}

pub async fn get_role_by_name(
    db: &DatabaseConnection,
    name: &str,
) -> Result<Option<Role>, PenumbraError> {
    use entities::role::{Column, Entity};

    if let Some(model) = Entity::find().filter(Column::Name.eq(name)).one(db).await? {
        Ok(Some(Role {
            id: model.id,
            name: model.name,
            description: model.description,
            priority: model.priority,
            created_at: model.created_at,
        }))
    } else {
        Ok(None)
    }
}

pub async fn list_roles(db: &DatabaseConnection) -> Result<Vec<Role>, PenumbraError> {
    use entities::role::{Column, Entity};

    let models = Entity::find()
        .order_by_asc(Column::Priority)
        .order_by_asc(Column::Name)
        .all(db)
        .await?;

    Ok(models
        .into_iter()
        .map(|model| Role {
            id: model.id,
            name: model.name,
            description: model.description,
            priority: model.priority,
            created_at: model.created_at,
        })
        .collect())
}

// Permission rules

pub async fn add_role_rule(
    db: &DatabaseConnection,
    role_id: &str,
    action: &str,
    subject: &str,
    conditions: Option<&serde_json::Value>,
    inverted: bool,
) -> Result<RoleRule, PenumbraError> {
    use entities::role_rule::{Column, Entity};

    let id = random_id();
    let created_at = Utc::now().timestamp();
    let conditions_json = match conditions {
        Some(value) => Some(serde_json::to_string(value)?),
        None => None,
    };

    // Append after the role's current last rule
    let last = Entity::find()
        .filter(Column::RoleId.eq(role_id))
        .order_by_desc(Column::Position)
        .one(db)
        .await?;
    let position = last.map(|m| m.position + 1).unwrap_or(1);

    let rule = entities::role_rule::ActiveModel {
        id: Set(id.clone()),
        role_id: Set(role_id.to_string()),
        action: Set(action.to_string()),
        subject: Set(subject.to_string()),
        conditions: Set(conditions_json.clone()),
        inverted: Set(if inverted { 1 } else { 0 }),
        position: Set(position),
        created_at: Set(created_at),
    };

    rule.insert(db).await?;

    Ok(RoleRule {
        id,
        role_id: role_id.to_string(),
        action: action.to_string(),
        subject: subject.to_string(),
        conditions: conditions_json,
        inverted: if inverted { 1 } else { 0 },
        position,
        created_at,
    })
}

pub async fn list_role_rules(
    db: &DatabaseConnection,
    role_id: &str,
) -> Result<Vec<RoleRule>, PenumbraError> {
    use entities::role_rule::{Column, Entity};

    let models = Entity::find()
        .filter(Column::RoleId.eq(role_id))
        .order_by_asc(Column::Position)
        .all(db)
        .await?;

    Ok(models
        .into_iter()
        .map(|model| RoleRule {
            id: model.id,
            role_id: model.role_id,
            action: model.action,
            subject: model.subject,
            conditions: model.conditions,
            inverted: model.inverted,
            position: model.position,
            created_at: model.created_at,
        })
        .collect())
}

// Role assignment functions

pub async fn assign_role(
    db: &DatabaseConnection,
    user_subject: &str,
    role_id: &str,
) -> Result<(), PenumbraError> {
    use entities::user_role::{Column, Entity};

    // Assigning an already-held role is a no-op
    let existing = Entity::find()
        .filter(Column::UserSubject.eq(user_subject))
        .filter(Column::RoleId.eq(role_id))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let assignment = entities::user_role::ActiveModel {
        user_subject: Set(user_subject.to_string()),
        role_id: Set(role_id.to_string()),
        assigned_at: Set(Utc::now().timestamp()),
    };

    assignment.insert(db).await?;

    Ok(())
}

pub async fn revoke_role(
    db: &DatabaseConnection,
    user_subject: &str,
    role_id: &str,
) -> Result<bool, PenumbraError> {
    use entities::user_role::{Column, Entity};

    let result = Entity::delete_many()
        .filter(Column::UserSubject.eq(user_subject))
        .filter(Column::RoleId.eq(role_id))
        .exec(db)
        .await?;

    Ok(result.rows_affected > 0)
}

/// Subjects of every user currently holding the role.
pub async fn users_with_role(
    db: &DatabaseConnection,
    role_id: &str,
) -> Result<Vec<String>, PenumbraError> {
    use entities::user_role::{Column, Entity};

    let assignments = Entity::find()
        .filter(Column::RoleId.eq(role_id))
        .all(db)
        .await?;

    Ok(assignments.into_iter().map(|a| a.user_subject).collect())
}

/// Roles held by a user, ordered so that higher-priority roles come last.
/// During rule evaluation later rules win, so this ordering lets a
/// higher-priority role override what a lower-priority role granted.
/// Ties are broken by assignment time, then name.
pub async fn roles_for_user(
    db: &DatabaseConnection,
    subject: &str,
) -> Result<Vec<Role>, PenumbraError> {
    use entities::user_role::{Column, Entity};

    let assignments = Entity::find()
        .filter(Column::UserSubject.eq(subject))
        .all(db)
        .await?;

    let mut roles = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        if let Some(role) = get_role(db, &assignment.role_id).await? {
            roles.push((role, assignment.assigned_at));
        }
    }

    roles.sort_by(|a, b| {
        a.0.priority
            .cmp(&b.0.priority)
            .then(a.1.cmp(&b.1))
            .then(a.0.name.cmp(&b.0.name))
    });

    Ok(roles.into_iter().map(|(role, _)| role).collect())
}

/// All permission rows for a user in evaluation order: roles as ordered by
/// [`roles_for_user`], rules within each role by stored position.
pub async fn load_permission_rows(
    db: &DatabaseConnection,
    subject: &str,
) -> Result<Vec<PermissionRow>, PenumbraError> {
    let roles = roles_for_user(db, subject).await?;

    let mut rows = Vec::new();
    for role in roles {
        for rule in list_role_rules(db, &role.id).await? {
            rows.push(PermissionRow {
                role_name: role.name.clone(),
                action: rule.action,
                subject: rule.subject,
                conditions: rule.conditions,
                inverted: rule.inverted,
            });
        }
    }

    Ok(rows)
}

// Session management functions

pub async fn create_session(
    db: &DatabaseConnection,
    subject: &str,
    ttl_secs: i64,
    user_agent: Option<String>,
    ip_address: Option<String>,
) -> Result<Session, PenumbraError> {
    let session_id = random_id();
    let now = Utc::now().timestamp();
    let expires_at = now + ttl_secs;

    let session = entities::session::ActiveModel {
        session_id: Set(session_id.clone()),
        subject: Set(subject.to_string()),
        created_at: Set(now),
        expires_at: Set(expires_at),
        user_agent: Set(user_agent.clone()),
        ip_address: Set(ip_address.clone()),
    };

    session.insert(db).await?;

    Ok(Session {
        session_id,
        subject: subject.to_string(),
        created_at: now,
        expires_at,
        user_agent,
        ip_address,
    })
}

pub async fn get_session(
    db: &DatabaseConnection,
    session_id: &str,
) -> Result<Option<Session>, PenumbraError> {
    use entities::session::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::SessionId.eq(session_id))
        .one(db)
        .await?
    {
        // Check if session is expired
        let now = Utc::now().timestamp();
        if now > model.expires_at {
            return Ok(None);
        }

        Ok(Some(Session {
            session_id: model.session_id,
            subject: model.subject,
            created_at: model.created_at,
            expires_at: model.expires_at,
            user_agent: model.user_agent,
            ip_address: model.ip_address,
        }))
    } else {
        Ok(None)
    }
}

pub async fn delete_session(db: &DatabaseConnection, session_id: &str) -> Result<(), PenumbraError> {
    use entities::session::{Column, Entity};

    Entity::delete_many()
        .filter(Column::SessionId.eq(session_id))
        .exec(db)
        .await?;

    Ok(())
}

pub async fn cleanup_expired_sessions(db: &DatabaseConnection) -> Result<u64, PenumbraError> {
    use entities::session::{Column, Entity};

    let now = Utc::now().timestamp();
    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}
