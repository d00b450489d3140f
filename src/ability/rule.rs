use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ability::conditions;
use crate::ability::errors::AbilityError;

/// Subject name that matches every resource type.
pub const SUBJECT_ALL: &str = "all";

/// What a rule permits or forbids on a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    /// Wildcard covering every other action.
    #[serde(alias = "all")]
    Manage,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Manage => "manage",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AbilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "read" => Ok(Action::Read),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "manage" | "all" => Ok(Action::Manage),
            other => Err(AbilityError::UnknownAction(other.to_string())),
        }
    }
}

/// A single permission rule.
///
/// Rules are ordered: during evaluation the last rule that matches a query
/// decides it, so a rule later in the list overrides earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub action: Action,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub inverted: bool,
}

impl Rule {
    /// Rule granting `action` on `subject`.
    pub fn grant(action: Action, subject: impl Into<String>) -> Self {
        Self {
            action,
            subject: subject.into(),
            conditions: None,
            inverted: false,
        }
    }

    /// Inverted rule taking `action` on `subject` away again.
    pub fn forbid(action: Action, subject: impl Into<String>) -> Self {
        Self {
            action,
            subject: subject.into(),
            conditions: None,
            inverted: true,
        }
    }

    /// Restrict the rule to instances matching `conditions`.
    pub fn with_conditions(
        mut self,
        conditions: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn matches_action(&self, action: Action) -> bool {
        self.action == Action::Manage || self.action == action
    }

    pub fn matches_subject(&self, subject: &str) -> bool {
        self.subject == SUBJECT_ALL || self.subject == subject
    }

    /// Whether the rule applies to the queried instance, if one was given.
    ///
    /// A rule without conditions applies to everything. A conditional rule
    /// checked without an instance (a type-level query) applies only when it
    /// grants: a conditional grant means some instances are allowed, while a
    /// conditional denial says nothing about the type as a whole.
    pub fn matches_instance(&self, instance: Option<&serde_json::Value>) -> bool {
        let Some(conditions) = &self.conditions else {
            return true;
        };
        match instance {
            Some(value) => conditions::matches(conditions, value),
            None => !self.inverted,
        }
    }
}
