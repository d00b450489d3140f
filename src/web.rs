//! HTTP surface of the authorization service: session login, the caller's
//! serialized permissions, and role administration guarded by the same
//! permission gate it manages.

use crate::ability::{
    conditions, AbilityBuilder, AbilityError, Action, DbRuleStore, Decision, PermissionGate,
};
use crate::identity::{IdentityResolver, SessionIdentity};
use crate::session::SessionCookie;
use crate::settings::Settings;
use crate::storage;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
    pub builder: Arc<AbilityBuilder>,
    pub gate: Arc<PermissionGate>,
    pub identity: Arc<dyn IdentityResolver>,
}

impl AppState {
    /// Wire the authorization pipeline on top of a database connection.
    pub fn new(settings: Settings, db: DatabaseConnection) -> Self {
        let settings = Arc::new(settings);
        let store = Arc::new(DbRuleStore::new(
            db.clone(),
            Duration::from_millis(settings.auth.store_timeout_ms),
        ));
        let builder = Arc::new(AbilityBuilder::new(
            db.clone(),
            store,
            settings.auth.cache_abilities,
        ));
        let gate = Arc::new(PermissionGate::new(Arc::clone(&builder)));
        let identity: Arc<dyn IdentityResolver> = Arc::new(SessionIdentity::new(db.clone()));

        Self {
            settings,
            db,
            builder,
            gate,
            identity,
        }
    }
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    // X-Frame-Options: Prevent clickjacking
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );

    // X-Content-Type-Options: Prevent MIME sniffing
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    // Content-Security-Policy: the service only speaks JSON
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );

    // Referrer-Policy: Control referrer information
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

/// All routes with shared state applied. Split from [`serve`] so tests can
/// drive the router in process.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me/permissions", get(my_permissions))
        .route("/roles", get(list_roles).post(create_role))
        .route(
            "/roles/{role_id}/rules",
            get(list_role_rules).post(add_role_rule),
        )
        .route(
            "/users/{subject}/roles",
            get(list_user_roles).post(assign_role),
        )
        .route(
            "/users/{subject}/roles/{role_id}",
            axum::routing::delete(revoke_role),
        )
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

pub async fn serve(settings: Settings, db: DatabaseConnection) -> miette::Result<()> {
    let state = AppState::new(settings, db);

    // NOTE: Rate limiting should be implemented at the reverse proxy level
    // (nginx, traefik, etc.) for production deployments.

    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let router = router(state);

    tracing::info!(%addr, "Authorization API listening");
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, router).await.into_diagnostic()?;
    Ok(())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "Unauthorized - Please login"})),
    )
        .into_response()
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"error": "Forbidden - You don't have permission to perform this action"})),
    )
        .into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    tracing::error!(error = %e, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error"})),
    )
        .into_response()
}

fn role_not_found(role_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("Role `{}` not found", role_id)})),
    )
        .into_response()
}

fn user_not_found(subject: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("User `{}` not found", subject)})),
    )
        .into_response()
}

/// Resolve the caller and check one permission, the way every guarded
/// handler shares: a missing identity or unknown account gets the login
/// 401, a denied action the canonical 403. On success the caller's subject
/// is returned.
async fn check_permission(
    state: &AppState,
    headers: &HeaderMap,
    action: Action,
    subject: &str,
) -> Result<String, Response> {
    let Some(user) = state.identity.resolve(headers).await else {
        return Err(unauthorized());
    };

    match state.gate.authorize(Some(&user), action, subject).await {
        Decision::Granted => Ok(user),
        Decision::Denied => Err(forbidden()),
        Decision::Unauthenticated => Err(unauthorized()),
    }
}

/// A rule change affects every user holding the role, so all of their
/// cached abilities must go.
async fn invalidate_role_members(state: &AppState, role_id: &str) {
    match storage::users_with_role(&state.db, role_id).await {
        Ok(subjects) => {
            for subject in subjects {
                state.builder.invalidate(&subject);
            }
        }
        Err(e) => {
            tracing::warn!(role_id, error = %e, "Could not invalidate cached abilities after rule change");
        }
    }
}

async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let subject =
        match storage::verify_user_password(&state.db, &req.username, &req.password).await {
            Ok(Some(subject)) => subject,
            Ok(None) => {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "Invalid username or password"})),
                )
                    .into_response();
            }
            Err(e) => {
                tracing::error!(error = %e, "Login failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Login failed"})),
                )
                    .into_response();
            }
        };

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(String::from);

    // First hop of x-forwarded-for; direct connections carry no client address
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let session = match storage::create_session(
        &state.db,
        &subject,
        state.settings.auth.session_ttl_secs,
        user_agent,
        ip_address,
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create session");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Login failed"})),
            )
                .into_response();
        }
    };

    // Set cookie
    let cookie = SessionCookie::new(session.session_id);
    let cookie_header = cookie.to_cookie_header(&state.settings);

    Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::SET_COOKIE, cookie_header)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"success": true, "subject": subject}).to_string(),
        ))
        .unwrap()
        .into_response()
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(cookie) = SessionCookie::from_headers(&headers) {
        let _ = storage::delete_session(&state.db, &cookie.session_id).await;
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(
            axum::http::header::SET_COOKIE,
            SessionCookie::delete_cookie_header(),
        )
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"success": true}).to_string()))
        .unwrap()
        .into_response()
}

/// GET /me/permissions - the caller's rules in evaluation order, for
/// clients that mirror the server's checks in their UI.
async fn my_permissions(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let Some(user) = state.identity.resolve(&headers).await else {
        return unauthorized();
    };

    match state.builder.build(&user).await {
        Ok(ability) => (
            StatusCode::OK,
            Json(json!({"success": true, "permissions": ability.rules()})),
        )
            .into_response(),
        Err(e @ AbilityError::UserNotFound(_)) => {
            tracing::warn!(user, error = %e, "Session references unknown user");
            unauthorized()
        }
        Err(e) => {
            tracing::error!(user, error = %e, "Failed to fetch permissions");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Failed to fetch permissions"})),
            )
                .into_response()
        }
    }
}

async fn list_roles(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = check_permission(&state, &headers, Action::Read, "Role").await {
        return resp;
    }

    match storage::list_roles(&state.db).await {
        Ok(roles) => (StatusCode::OK, Json(json!({"roles": roles}))).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct CreateRoleRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: i64,
}

async fn create_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRoleRequest>,
) -> Response {
    if let Err(resp) = check_permission(&state, &headers, Action::Create, "Role").await {
        return resp;
    }

    if req.name.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Role name must not be empty"})),
        )
            .into_response();
    }

    match storage::get_role_by_name(&state.db, &req.name).await {
        Ok(Some(_)) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({"error": format!("Role `{}` already exists", req.name)})),
            )
                .into_response();
        }
        Ok(None) => {}
        Err(e) => return internal_error(e),
    }

    match storage::create_role(&state.db, &req.name, req.description, req.priority).await {
        Ok(role) => (StatusCode::CREATED, Json(json!({"role": role}))).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn list_role_rules(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(role_id): Path<String>,
) -> Response {
    if let Err(resp) = check_permission(&state, &headers, Action::Read, "Role").await {
        return resp;
    }

    let role = match storage::get_role(&state.db, &role_id).await {
        Ok(Some(r)) => r,
        Ok(None) => return role_not_found(&role_id),
        Err(e) => return internal_error(e),
    };

    match storage::list_role_rules(&state.db, &role.id).await {
        Ok(rules) => {
            let rules: Vec<_> = rules
                .into_iter()
                .map(|r| {
                    let conditions = r
                        .conditions
                        .as_deref()
                        .and_then(|c| serde_json::from_str::<serde_json::Value>(c).ok());
                    json!({
                        "id": r.id,
                        "action": r.action,
                        "subject": r.subject,
                        "conditions": conditions,
                        "inverted": r.inverted != 0,
                        "position": r.position,
                    })
                })
                .collect();
            (
                StatusCode::OK,
                Json(json!({"role": role.name, "rules": rules})),
            )
                .into_response()
        }
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct AddRuleRequest {
    action: String,
    subject: String,
    #[serde(default)]
    conditions: Option<serde_json::Value>,
    #[serde(default)]
    inverted: bool,
}

async fn add_role_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(role_id): Path<String>,
    Json(req): Json<AddRuleRequest>,
) -> Response {
    if let Err(resp) = check_permission(&state, &headers, Action::Update, "Role").await {
        return resp;
    }

    // Reject unknown actions and malformed conditions at ingest; the rule
    // store refuses to load them, so a bad row would lock the role's users
    // out of everything.
    let action = match Action::from_str(&req.action) {
        Ok(a) => a,
        Err(e) => return e.into_response(),
    };
    if let Some(conditions) = &req.conditions {
        match conditions {
            serde_json::Value::Object(map) => {
                if let Err(e) = conditions::validate(map) {
                    return e.into_response();
                }
            }
            _ => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "conditions must be a JSON object"})),
                )
                    .into_response();
            }
        }
    }

    let role = match storage::get_role(&state.db, &role_id).await {
        Ok(Some(r)) => r,
        Ok(None) => return role_not_found(&role_id),
        Err(e) => return internal_error(e),
    };

    match storage::add_role_rule(
        &state.db,
        &role.id,
        action.as_str(),
        &req.subject,
        req.conditions.as_ref(),
        req.inverted,
    )
    .await
    {
        Ok(rule) => {
            invalidate_role_members(&state, &role.id).await;
            (StatusCode::CREATED, Json(json!({"rule": rule}))).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn list_user_roles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subject): Path<String>,
) -> Response {
    if let Err(resp) = check_permission(&state, &headers, Action::Read, "User").await {
        return resp;
    }

    match storage::get_user_by_subject(&state.db, &subject).await {
        Ok(Some(_)) => {}
        Ok(None) => return user_not_found(&subject),
        Err(e) => return internal_error(e),
    }

    match storage::roles_for_user(&state.db, &subject).await {
        Ok(roles) => (
            StatusCode::OK,
            Json(json!({"subject": subject, "roles": roles})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct AssignRoleRequest {
    role_id: String,
}

async fn assign_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(subject): Path<String>,
    Json(req): Json<AssignRoleRequest>,
) -> Response {
    if let Err(resp) = check_permission(&state, &headers, Action::Update, "User").await {
        return resp;
    }

    match storage::get_user_by_subject(&state.db, &subject).await {
        Ok(Some(_)) => {}
        Ok(None) => return user_not_found(&subject),
        Err(e) => return internal_error(e),
    }
    let role = match storage::get_role(&state.db, &req.role_id).await {
        Ok(Some(r)) => r,
        Ok(None) => return role_not_found(&req.role_id),
        Err(e) => return internal_error(e),
    };

    match storage::assign_role(&state.db, &subject, &role.id).await {
        Ok(()) => {
            state.builder.invalidate(&subject);
            (StatusCode::OK, Json(json!({"success": true}))).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn revoke_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((subject, role_id)): Path<(String, String)>,
) -> Response {
    if let Err(resp) = check_permission(&state, &headers, Action::Update, "User").await {
        return resp;
    }

    match storage::revoke_role(&state.db, &subject, &role_id).await {
        Ok(true) => {
            state.builder.invalidate(&subject);
            (StatusCode::OK, Json(json!({"success": true}))).into_response()
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Role assignment not found"})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}
