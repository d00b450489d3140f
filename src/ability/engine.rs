use serde_json::Value;

use crate::ability::rule::{Action, Rule};

/// An ordered set of permission rules for one user.
///
/// Immutable after construction, so a built ability can be shared across
/// tasks and queried concurrently without locking. Every query runs against
/// the same rule snapshot.
#[derive(Debug, Clone, Default)]
pub struct Ability {
    rules: Vec<Rule>,
}

impl Ability {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Ability with no rules. Denies everything.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Read-only view of the rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Whether `action` on `subject` is allowed, optionally for a concrete
    /// instance.
    ///
    /// Rules are scanned in order and each matching rule flips the running
    /// decision to its own polarity, so the last matching rule wins. With no
    /// matching rule the answer is `false`: unknown actions, unknown
    /// subjects, and empty rule sets all deny.
    pub fn can(&self, action: Action, subject: &str, instance: Option<&Value>) -> bool {
        let mut allowed = false;
        for rule in &self.rules {
            if rule.matches_action(action)
                && rule.matches_subject(subject)
                && rule.matches_instance(instance)
            {
                allowed = !rule.inverted;
            }
        }
        allowed
    }

    pub fn cannot(&self, action: Action, subject: &str, instance: Option<&Value>) -> bool {
        !self.can(action, subject, instance)
    }
}
