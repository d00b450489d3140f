use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::DatabaseConnection;

use crate::ability::conditions;
use crate::ability::errors::AbilityError;
use crate::ability::rule::{Action, Rule};
use crate::storage;

/// Source of the ordered permission rules for a user.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Load every rule that applies to `subject`, already in evaluation
    /// order. A user without roles yields an empty list, not an error.
    async fn load_rules(&self, subject: &str) -> Result<Vec<Rule>, AbilityError>;
}

/// Rule store backed by the roles and role_rules tables.
pub struct DbRuleStore {
    db: DatabaseConnection,
    timeout: Duration,
}

impl DbRuleStore {
    pub fn new(db: DatabaseConnection, timeout: Duration) -> Self {
        Self { db, timeout }
    }
}

#[async_trait]
impl RuleStore for DbRuleStore {
    async fn load_rules(&self, subject: &str) -> Result<Vec<Rule>, AbilityError> {
        let rows = tokio::time::timeout(
            self.timeout,
            storage::load_permission_rows(&self.db, subject),
        )
        .await
        .map_err(|_| {
            AbilityError::DataUnavailable(format!(
                "rule loading timed out after {}ms",
                self.timeout.as_millis()
            ))
        })?
        .map_err(|e| AbilityError::DataUnavailable(e.to_string()))?;

        rows.into_iter().map(normalize_row).collect()
    }
}

/// Turn one stored row into a rule.
///
/// A malformed row fails the whole load: skipping it could silently widen
/// (or narrow) a user's permissions, so rule loading is all-or-nothing.
fn normalize_row(row: storage::PermissionRow) -> Result<Rule, AbilityError> {
    let action = Action::from_str(&row.action).map_err(|_| {
        AbilityError::DataUnavailable(format!(
            "role `{}` has a rule with unknown action `{}`",
            row.role_name, row.action
        ))
    })?;

    let conditions = match row.conditions.as_deref() {
        None => None,
        Some(raw) => {
            let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
                AbilityError::DataUnavailable(format!(
                    "role `{}` has a rule with unparseable conditions: {e}",
                    row.role_name
                ))
            })?;
            match value {
                serde_json::Value::Object(map) => {
                    conditions::validate(&map).map_err(|e| {
                        AbilityError::DataUnavailable(format!(
                            "role `{}` has a rule with invalid conditions: {e}",
                            row.role_name
                        ))
                    })?;
                    Some(map)
                }
                _ => {
                    return Err(AbilityError::DataUnavailable(format!(
                        "role `{}` has a rule whose conditions are not a JSON object",
                        row.role_name
                    )));
                }
            }
        }
    };

    Ok(Rule {
        action,
        subject: row.subject,
        conditions,
        inverted: row.inverted != 0,
    })
}
