use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use sea_orm::DatabaseConnection;

use crate::ability::engine::Ability;
use crate::ability::errors::AbilityError;
use crate::ability::store::RuleStore;
use crate::storage;

/// Cache of built abilities, keyed by user subject.
///
/// Two concurrent builds for the same subject may both load rules; whichever
/// finishes last leaves its ability in the cache. Entries never expire on
/// their own, they are dropped explicitly when a user's roles change.
#[derive(Default)]
pub struct AbilityCache {
    inner: RwLock<HashMap<String, Arc<Ability>>>,
}

impl AbilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, subject: &str) -> Option<Arc<Ability>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject)
            .cloned()
    }

    fn insert(&self, subject: String, ability: Arc<Ability>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subject, ability);
    }

    /// Drop the cached ability for `subject`; the next build reloads rules.
    pub fn invalidate(&self, subject: &str) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(subject);
    }
}

/// Builds one [`Ability`] per user from stored rules.
pub struct AbilityBuilder {
    db: DatabaseConnection,
    store: Arc<dyn RuleStore>,
    cache: Option<AbilityCache>,
}

impl AbilityBuilder {
    pub fn new(db: DatabaseConnection, store: Arc<dyn RuleStore>, cache_enabled: bool) -> Self {
        Self {
            db,
            store,
            cache: cache_enabled.then(AbilityCache::new),
        }
    }

    /// Build the ability for `subject`, loading its rules through the store
    /// exactly once.
    ///
    /// Fails with [`AbilityError::UserNotFound`] when no account exists. A
    /// user without roles gets an empty ability that denies everything. On
    /// any failure nothing is cached, so a later build starts clean.
    pub async fn build(&self, subject: &str) -> Result<Arc<Ability>, AbilityError> {
        if let Some(cache) = &self.cache {
            if let Some(ability) = cache.get(subject) {
                return Ok(ability);
            }
        }

        let user = storage::get_user_by_subject(&self.db, subject)
            .await
            .map_err(|e| AbilityError::DataUnavailable(e.to_string()))?;
        if user.is_none() {
            return Err(AbilityError::UserNotFound(subject.to_string()));
        }

        let rules = self.store.load_rules(subject).await?;
        let ability = Arc::new(Ability::new(rules));

        if let Some(cache) = &self.cache {
            cache.insert(subject.to_string(), Arc::clone(&ability));
        }

        Ok(ability)
    }

    /// Forget any cached ability for `subject`. Called after a role change
    /// so the next authorization check sees fresh rules.
    pub fn invalidate(&self, subject: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(subject);
        }
    }
}
