//! Rule-based authorization engine.
//!
//! Permissions are ordered lists of [`Rule`]s: each rule grants or takes
//! away an [`Action`] on a subject type, optionally restricted to instances
//! matching a condition map. An [`Ability`] evaluates queries against one
//! user's rules with last-match-wins semantics. The [`AbilityBuilder`]
//! assembles abilities from a [`RuleStore`], and the [`PermissionGate`]
//! turns the whole pipeline into a three-way [`Decision`] for request
//! handlers.

pub mod builder;
pub mod conditions;
pub mod engine;
pub mod errors;
pub mod gate;
pub mod rule;
pub mod store;

pub use builder::{AbilityBuilder, AbilityCache};
pub use engine::Ability;
pub use errors::AbilityError;
pub use gate::{Decision, PermissionGate};
pub use rule::{Action, Rule, SUBJECT_ALL};
pub use store::{DbRuleStore, RuleStore};
