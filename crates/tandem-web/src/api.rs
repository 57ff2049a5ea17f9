//! REST API route handlers.
//!
//! Management endpoints around the streaming chat route: status, role
//! CRUD, scheduled-job CRUD, OAuth token registration, and the provider
//! listing. These are thin translations between HTTP and the stores.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use tandem_store::{OAuthToken, StoreError};

use crate::state::AppState;

/// Error envelope for the management API.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Rejected(_) | StoreError::InvalidCacheId(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "cached_adapters": state.factory.cached_count(),
        "providers": state.factory.registry().descriptors().len(),
    }))
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

pub async fn list_providers(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "providers": state.factory.registry().descriptors() }))
}

/// Store a per-user provider config blob (API keys and the like).
pub async fn set_provider_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider): Path<String>,
    Json(config): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    let user_id = state.user_id(&headers);
    state
        .provider_configs
        .upsert(&user_id, &provider, &config)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Remove a per-user provider config and evict its adapter.
pub async fn delete_provider_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user_id = state.user_id(&headers);
    state.provider_configs.delete(&user_id, &provider).await?;
    state
        .factory
        .close_adapter(&user_id, &provider, None, None)
        .await;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    pub role_id: Option<String>,
    #[serde(default = "default_message_limit")]
    pub limit: u32,
}

fn default_message_limit() -> u32 {
    50
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    axum::extract::Query(query): axum::extract::Query<MessagesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = state.user_id(&headers);
    let messages = state
        .messages
        .recent(&user_id, query.role_id.as_deref(), query.limit)
        .await?;
    Ok(Json(json!({ "messages": messages })))
}

pub async fn clear_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    axum::extract::Query(query): axum::extract::Query<MessagesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = state.user_id(&headers);
    let removed = state
        .messages
        .clear(&user_id, query.role_id.as_deref())
        .await?;
    Ok(Json(json!({ "removed": removed })))
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RoleBody {
    pub name: String,
    #[serde(default)]
    pub job_description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = state.user_id(&headers);
    let roles = state.roles.list_for_user(&user_id).await?;
    Ok(Json(json!({ "roles": roles })))
}

pub async fn create_role(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RoleBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("role name must not be empty"));
    }
    let user_id = state.user_id(&headers);
    let role = state
        .roles
        .create(
            &user_id,
            &body.name,
            &body.job_description,
            &body.system_prompt,
            body.model.as_deref(),
        )
        .await?;
    Ok(Json(json!({ "role": role })))
}

pub async fn update_role(
    State(state): State<Arc<AppState>>,
    Path(role_id): Path<String>,
    Json(body): Json<RoleBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .roles
        .update(
            &role_id,
            &body.name,
            &body.job_description,
            &body.system_prompt,
            body.model.as_deref(),
        )
        .await?;
    let role = state.roles.get(&role_id).await?;
    Ok(Json(json!({ "role": role })))
}

pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(role_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user_id = state.user_id(&headers);
    state.roles.delete(&role_id).await?;
    // The role's memory adapter owns its graph file exclusively; close it
    // so the file can be removed.
    state
        .factory
        .close_adapter(&user_id, "memory", Some(&role_id), None)
        .await;
    info!(role_id, "role deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Scheduled jobs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct JobBody {
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub role_id: Option<String>,
    /// Unix timestamp, for one-shot jobs. Defaults to now.
    #[serde(default)]
    pub run_at: Option<i64>,
    /// Cron expression, required for recurring jobs.
    #[serde(default)]
    pub schedule: Option<String>,
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = state.user_id(&headers);
    let jobs = state.jobs.list_for_user(&user_id).await?;
    Ok(Json(json!({ "jobs": jobs })))
}

pub async fn create_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<JobBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.description.trim().is_empty() {
        return Err(ApiError::bad_request("job description must not be empty"));
    }
    let user_id = state.user_id(&headers);

    let job = match body.kind.as_str() {
        "once" => {
            let run_at = body.run_at.unwrap_or_else(|| Utc::now().timestamp());
            state
                .jobs
                .create_once(&user_id, body.role_id.as_deref(), &body.description, run_at)
                .await?
        }
        "recurring" => {
            let schedule = body
                .schedule
                .as_deref()
                .ok_or_else(|| ApiError::bad_request("recurring jobs require a schedule"))?;
            // Validate at creation; the stored expression is only
            // re-parsed on explicit edit.
            let first_run = tandem_jobs::next_run_timestamp(schedule, Utc::now().timestamp())
                .map_err(|e| ApiError::bad_request(e.to_string()))?;
            state
                .jobs
                .create_recurring(
                    &user_id,
                    body.role_id.as_deref(),
                    &body.description,
                    schedule,
                    first_run,
                )
                .await?
        }
        other => {
            return Err(ApiError::bad_request(format!(
                "unknown job kind `{other}`"
            )));
        }
    };

    Ok(Json(json!({ "job": job })))
}

pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user_id = state.user_id(&headers);
    state.jobs.cancel(&job_id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Skills
// ---------------------------------------------------------------------------

pub async fn list_skills(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let skills = state.skills.list().await?;
    Ok(Json(json!({ "skills": skills })))
}

// ---------------------------------------------------------------------------
// OAuth token registration
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct TokenBody {
    pub provider: String,
    pub account_email: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

pub async fn register_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TokenBody>,
) -> Result<StatusCode, ApiError> {
    let user_id = state.user_id(&headers);
    state
        .tokens
        .upsert(&OAuthToken {
            user_id,
            provider: body.provider,
            account_email: body.account_email,
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at: body.expires_at,
            updated_at: 0,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
