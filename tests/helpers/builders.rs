use penumbra::storage;
use sea_orm::DatabaseConnection;
use serde_json::Value;

/// Builder for creating test users
pub struct UserBuilder {
    username: String,
    password: String,
    email: Option<String>,
    enabled: bool,
}

impl UserBuilder {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            password: "password123".to_string(),
            email: None,
            enabled: true,
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> storage::User {
        let user = storage::create_user(db, &self.username, &self.password, self.email)
            .await
            .expect("Failed to create test user");

        if !self.enabled {
            storage::set_user_enabled(db, &user.subject, false)
                .await
                .expect("Failed to disable test user");

            // Retrieve updated user
            storage::get_user_by_subject(db, &user.subject)
                .await
                .expect("Failed to get updated user")
                .expect("User not found")
        } else {
            user
        }
    }
}

/// Builder for creating test roles with their rules in order
pub struct RoleBuilder {
    name: String,
    description: Option<String>,
    priority: i64,
    rules: Vec<(String, String, Option<Value>, bool)>,
}

impl RoleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            priority: 0,
            rules: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn grant(mut self, action: &str, subject: &str) -> Self {
        self.rules
            .push((action.to_string(), subject.to_string(), None, false));
        self
    }

    pub fn grant_where(mut self, action: &str, subject: &str, conditions: Value) -> Self {
        self.rules
            .push((action.to_string(), subject.to_string(), Some(conditions), false));
        self
    }

    pub fn forbid(mut self, action: &str, subject: &str) -> Self {
        self.rules
            .push((action.to_string(), subject.to_string(), None, true));
        self
    }

    pub fn forbid_where(mut self, action: &str, subject: &str, conditions: Value) -> Self {
        self.rules
            .push((action.to_string(), subject.to_string(), Some(conditions), true));
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> storage::Role {
        let role = storage::create_role(db, &self.name, self.description, self.priority)
            .await
            .expect("Failed to create test role");

        for (action, subject, conditions, inverted) in self.rules {
            storage::add_role_rule(db, &role.id, &action, &subject, conditions.as_ref(), inverted)
                .await
                .expect("Failed to add test rule");
        }

        role
    }
}
