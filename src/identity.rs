use async_trait::async_trait;
use axum::http::HeaderMap;
use sea_orm::DatabaseConnection;

use crate::session::SessionCookie;
use crate::storage;

/// Resolves the authenticated user, if any, from request headers.
///
/// Handlers depend on this trait rather than on a particular session or
/// token mechanism, so the scheme can be swapped without touching them.
/// Resolution never fails a request: it yields an identity or nothing.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// The user subject the request authenticates as, or `None`.
    async fn resolve(&self, headers: &HeaderMap) -> Option<String>;
}

/// Identity from the session cookie, checked against the sessions table.
pub struct SessionIdentity {
    db: DatabaseConnection,
}

impl SessionIdentity {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdentityResolver for SessionIdentity {
    async fn resolve(&self, headers: &HeaderMap) -> Option<String> {
        let cookie = SessionCookie::from_headers(headers)?;
        match storage::get_session(&self.db, &cookie.session_id).await {
            Ok(Some(session)) => Some(session.subject),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup failed, treating request as unauthenticated");
                None
            }
        }
    }
}
