use std::sync::Arc;

use crate::ability::builder::AbilityBuilder;
use crate::ability::errors::AbilityError;
use crate::ability::rule::Action;

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The user may perform the action.
    Granted,
    /// The user is known but the action is not allowed.
    Denied,
    /// No usable identity was presented.
    Unauthenticated,
}

/// The single decision point for "may this user do this?".
///
/// Every failure mode collapses into one of the three decisions, so callers
/// never branch on rule loading internals. The gate never authenticates;
/// whoever calls it resolves the identity first.
pub struct PermissionGate {
    builder: Arc<AbilityBuilder>,
}

impl PermissionGate {
    pub fn new(builder: Arc<AbilityBuilder>) -> Self {
        Self { builder }
    }

    /// Decide whether `user` may perform `action` on `subject`.
    ///
    /// An unknown account gets the same answer as a missing identity, so
    /// callers cannot enumerate which accounts exist. Rule loading failures
    /// are logged and fail closed to [`Decision::Denied`].
    pub async fn authorize(&self, user: Option<&str>, action: Action, subject: &str) -> Decision {
        let Some(user) = user else {
            return Decision::Unauthenticated;
        };

        match self.builder.build(user).await {
            Ok(ability) => {
                if ability.can(action, subject, None) {
                    Decision::Granted
                } else {
                    Decision::Denied
                }
            }
            Err(AbilityError::UserNotFound(_)) => Decision::Unauthenticated,
            Err(e) => {
                tracing::error!(user, error = %e, "Authorization check failed, denying");
                Decision::Denied
            }
        }
    }
}
