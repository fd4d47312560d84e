use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::error;
use uuid::Uuid;

use lumina_keys::{CreateKeyRequest, KeyError, KeyService, ProviderKind};
use lumina_logs::{Overview, Pipeline, SearchParams};
use lumina_storage::entities::virtual_keys;
use lumina_storage::{DbErr, Store, VirtualKeyPatch};

use crate::jwt::JwtManager;
use crate::password;

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;
const SESSION_COOKIE_MAX_AGE: i64 = 24 * 60 * 60;

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
    pub keys: Arc<KeyService>,
    pub logs: Option<Arc<Pipeline>>,
    pub jwt: JwtManager,
}

pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/keys", get(list_keys).post(create_key))
        .route(
            "/api/keys/{id}",
            get(get_key).put(update_key).delete(revoke_key),
        )
        .route("/api/providers", get(list_providers).post(set_provider))
        .route("/api/providers/{provider}", delete(remove_provider))
        .route("/api/stats/overview", get(stats_overview))
        .route("/api/stats/daily", get(stats_daily))
        .route("/api/logs", get(search_logs))
        .route("/api/logs/{id}", get(get_log))
        .with_state(state)
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        error!(error = %err, "storage error");
        ApiError::internal("internal error")
    }
}

impl From<KeyError> for ApiError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::NotFound => ApiError::new(StatusCode::NOT_FOUND, "key not found"),
            KeyError::Unauthorized => ApiError::new(StatusCode::FORBIDDEN, "forbidden"),
            other => {
                error!(error = %other, "key service error");
                ApiError::internal("internal error")
            }
        }
    }
}

struct AuthedUser {
    user_id: Uuid,
}

fn authenticate(state: &ApiState, headers: &HeaderMap) -> Result<AuthedUser, ApiError> {
    let token = session_token(headers).ok_or_else(ApiError::unauthorized)?;
    let claims = state
        .jwt
        .validate(&token)
        .map_err(|_| ApiError::unauthorized())?;
    Ok(AuthedUser {
        user_id: claims.user_id,
    })
}

/// Session token from the `token` cookie, falling back to a bearer header.
fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(cookies) = headers.get(COOKIE).and_then(|value| value.to_str().ok()) {
        for pair in cookies.split(';') {
            if let Some(token) = pair.trim().strip_prefix("token=") {
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn session_cookie(token: &str) -> String {
    format!("token={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_COOKIE_MAX_AGE}")
}

fn clear_session_cookie() -> &'static str {
    "token=; Path=/; HttpOnly; Max-Age=0"
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// Auth

#[derive(Debug, Deserialize)]
struct CredentialsBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
struct ApiUser {
    id: Uuid,
    email: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl From<lumina_storage::entities::users::Model> for ApiUser {
    fn from(user: lumina_storage::entities::users::Model) -> Self {
        ApiUser {
            id: user.id,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    user: ApiUser,
    token: String,
}

async fn register(
    State(state): State<ApiState>,
    Json(body): Json<CredentialsBody>,
) -> Result<Response, ApiError> {
    if body.email.is_empty() || body.password.is_empty() {
        return Err(ApiError::bad_request("email and password required"));
    }
    if state.store.get_user_by_email(&body.email).await?.is_some() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "email already registered",
        ));
    }

    let password_hash = password::hash_password(&body.password)
        .map_err(|_| ApiError::internal("internal error"))?;
    let user = state.store.create_user(&body.email, &password_hash).await?;

    let token = state
        .jwt
        .issue(user.id, &user.email)
        .map_err(|_| ApiError::internal("failed to generate token"))?;
    session_response(StatusCode::CREATED, user.into(), token)
}

async fn login(
    State(state): State<ApiState>,
    Json(body): Json<CredentialsBody>,
) -> Result<Response, ApiError> {
    let Some(user) = state.store.get_user_by_email(&body.email).await? else {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid credentials",
        ));
    };
    if !password::verify_password(&body.password, &user.password_hash) {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "invalid credentials",
        ));
    }

    let token = state
        .jwt
        .issue(user.id, &user.email)
        .map_err(|_| ApiError::internal("failed to generate token"))?;
    session_response(StatusCode::OK, user.into(), token)
}

fn session_response(
    status: StatusCode,
    user: ApiUser,
    token: String,
) -> Result<Response, ApiError> {
    let cookie = HeaderValue::from_str(&session_cookie(&token))
        .map_err(|_| ApiError::internal("internal error"))?;
    let mut response = (status, Json(AuthResponse { user, token })).into_response();
    response.headers_mut().insert(SET_COOKIE, cookie);
    Ok(response)
}

async fn logout() -> Response {
    let mut response = Json(json!({ "message": "logged out" })).into_response();
    response
        .headers_mut()
        .insert(SET_COOKIE, HeaderValue::from_static(clear_session_cookie()));
    response
}

async fn me(State(state): State<ApiState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;
    let Some(record) = state.store.get_user_by_id(user.user_id).await? else {
        return Err(ApiError::unauthorized());
    };
    Ok(Json(ApiUser::from(record)).into_response())
}

// Virtual keys

#[derive(Debug, Serialize)]
struct ApiKey {
    id: Uuid,
    user_id: Uuid,
    name: String,
    allowed_models: Vec<String>,
    budget_limit: Option<f64>,
    current_spend: f64,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    revoked_at: Option<OffsetDateTime>,
}

impl From<virtual_keys::Model> for ApiKey {
    fn from(key: virtual_keys::Model) -> Self {
        // key_hash is deliberately dropped here.
        ApiKey {
            id: key.id,
            user_id: key.user_id,
            name: key.name,
            allowed_models: key.allowed_models,
            budget_limit: key.budget_limit,
            current_spend: key.current_spend,
            created_at: key.created_at,
            revoked_at: key.revoked_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateKeyBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    allowed_models: Vec<String>,
    budget_limit: Option<f64>,
}

#[derive(Debug, Serialize)]
struct CreatedKeyBody {
    id: Uuid,
    name: String,
    allowed_models: Vec<String>,
    virtual_key: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

async fn list_keys(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;
    let keys = state.keys.list_keys(user.user_id).await?;
    let keys: Vec<ApiKey> = keys.into_iter().map(ApiKey::from).collect();
    Ok(Json(keys).into_response())
}

async fn create_key(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateKeyBody>,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;
    if body.name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let created = state
        .keys
        .create_key(
            user.user_id,
            CreateKeyRequest {
                name: body.name,
                allowed_models: body.allowed_models,
                budget_limit: body.budget_limit,
            },
        )
        .await?;
    let body = CreatedKeyBody {
        id: created.id,
        name: created.name,
        allowed_models: created.allowed_models,
        virtual_key: created.virtual_key,
        created_at: created.created_at,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn get_key(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;
    let key = state.keys.get_key(id, user.user_id).await?;
    Ok(Json(ApiKey::from(key)).into_response())
}

#[derive(Debug, Deserialize)]
struct UpdateKeyBody {
    name: Option<String>,
    allowed_models: Option<Vec<String>>,
    budget_limit: Option<f64>,
}

async fn update_key(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateKeyBody>,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;
    let patch = VirtualKeyPatch {
        name: body.name,
        allowed_models: body.allowed_models,
        budget_limit: body.budget_limit,
    };
    state.keys.update_key(id, user.user_id, patch).await?;
    Ok(Json(json!({ "message": "key updated" })).into_response())
}

async fn revoke_key(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;
    state.keys.revoke_key(id, user.user_id).await?;
    Ok(Json(json!({ "message": "key revoked" })).into_response())
}

// Provider credentials

#[derive(Debug, Deserialize)]
struct SetProviderBody {
    #[serde(default)]
    provider: String,
    #[serde(default)]
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ApiProvider {
    provider: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
}

async fn list_providers(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;
    let providers = state.keys.user_providers(user.user_id).await?;
    let providers: Vec<ApiProvider> = providers
        .into_iter()
        .map(|info| ApiProvider {
            provider: info.provider,
            created_at: info.created_at,
            updated_at: info.updated_at,
        })
        .collect();
    Ok(Json(providers).into_response())
}

async fn set_provider(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<SetProviderBody>,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;
    let provider: ProviderKind = body
        .provider
        .parse()
        .map_err(|_| ApiError::bad_request("provider must be 'openai' or 'anthropic'"))?;
    if body.api_key.is_empty() {
        return Err(ApiError::bad_request("api_key is required"));
    }
    state
        .keys
        .set_user_provider(user.user_id, provider, &body.api_key)
        .await?;
    Ok(Json(json!({ "message": "provider configured" })).into_response())
}

async fn remove_provider(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;
    let provider: ProviderKind = provider
        .parse()
        .map_err(|_| ApiError::bad_request("invalid provider"))?;
    state
        .keys
        .remove_user_provider(user.user_id, provider)
        .await?;
    Ok(Json(json!({ "message": "provider removed" })).into_response())
}

// Stats

async fn stats_overview(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;

    let total_spend = state.store.get_user_spend_total(user.user_id).await?;
    let mut overview = Overview {
        total_spend,
        ..Default::default()
    };

    // Request counts and latency come from the search backend over the
    // last 30 days; omitted silently when the backend is unavailable.
    if let Some(logs) = &state.logs {
        let to_ts = OffsetDateTime::now_utc();
        let from_ts = to_ts - time::Duration::days(30);
        if let Ok(stats) = logs.get_stats(user.user_id, from_ts, to_ts).await {
            overview.total_requests = stats.total_requests;
            overview.avg_latency = stats.avg_latency;
            overview.success_rate = stats.success_rate;
        }
    }

    Ok(Json(overview).into_response())
}

#[derive(Debug, Deserialize)]
struct DailyRangeQuery {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiDailyStat {
    id: Uuid,
    key_id: Uuid,
    date: String,
    total_tokens: i64,
    total_cost: f64,
}

async fn stats_daily(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(range): Query<DailyRangeQuery>,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers)?;

    let today = OffsetDateTime::now_utc().date();
    let to = parse_date(range.end.as_deref()).unwrap_or(today);
    let from = parse_date(range.start.as_deref()).unwrap_or(to - time::Duration::days(7));

    let stats = state.store.get_daily_stats(user.user_id, from, to).await?;
    let stats: Vec<ApiDailyStat> = stats
        .into_iter()
        .map(|stat| ApiDailyStat {
            id: stat.id,
            key_id: stat.key_id,
            date: stat.date.to_string(),
            total_tokens: stat.total_tokens,
            total_cost: stat.total_cost,
        })
        .collect();
    Ok(Json(stats).into_response())
}

fn parse_date(value: Option<&str>) -> Option<Date> {
    Date::parse(value?, format_description!("[year]-[month]-[day]")).ok()
}

// Logs

#[derive(Debug, Deserialize)]
struct LogsQuery {
    q: Option<String>,
    model: Option<String>,
    status: Option<i64>,
    start: Option<String>,
    end: Option<String>,
    page: Option<u64>,
    size: Option<u64>,
}

fn clamp_page_size(requested: Option<u64>) -> u64 {
    requested.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE)
}

async fn search_logs(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers)?;
    let Some(logs) = &state.logs else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "logging not available",
        ));
    };

    let page = query.page.unwrap_or(0);
    let size = clamp_page_size(query.size);
    let params = SearchParams {
        query: query.q,
        model: query.model,
        status: query.status,
        from_ts: query
            .start
            .as_deref()
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok()),
        to_ts: query
            .end
            .as_deref()
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok()),
        offset: page * size,
        size,
    };

    let (entries, total) = logs
        .search(&params)
        .await
        .map_err(|_| ApiError::internal("search failed"))?;
    Ok(Json(json!({
        "entries": entries,
        "total": total,
        "page": page,
        "size": size,
    }))
    .into_response())
}

async fn get_log(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers)?;
    let Some(logs) = &state.logs else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "logging not available",
        ));
    };

    let entry = logs
        .get_log(id)
        .await
        .map_err(|_| ApiError::internal("failed to get log"))?;
    match entry {
        Some(entry) => Ok(Json(entry).into_response()),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "log not found")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_token_prefers_the_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; token=cookie-jwt"),
        );
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-jwt"));
        assert_eq!(session_token(&headers).as_deref(), Some("cookie-jwt"));
    }

    #[test]
    fn session_token_falls_back_to_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-jwt"));
        assert_eq!(session_token(&headers).as_deref(), Some("header-jwt"));

        let mut empty_cookie = HeaderMap::new();
        empty_cookie.insert(COOKIE, HeaderValue::from_static("token="));
        empty_cookie.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-jwt"));
        assert_eq!(session_token(&empty_cookie).as_deref(), Some("header-jwt"));
    }

    #[test]
    fn session_token_absent_when_no_credentials() {
        assert_eq!(session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn page_size_is_clamped_to_100() {
        assert_eq!(clamp_page_size(None), 20);
        assert_eq!(clamp_page_size(Some(50)), 50);
        assert_eq!(clamp_page_size(Some(100)), 100);
        assert_eq!(clamp_page_size(Some(500)), 100);
    }

    #[test]
    fn dates_parse_as_year_month_day() {
        let date = parse_date(Some("2024-06-01")).unwrap();
        assert_eq!(date.to_string(), "2024-06-01");
        assert!(parse_date(Some("06/01/2024")).is_none());
        assert!(parse_date(None).is_none());
    }

    #[test]
    fn session_cookie_is_http_only_with_24h_expiry() {
        let cookie = session_cookie("abc");
        assert!(cookie.starts_with("token=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=86400"));
        assert!(clear_session_cookie().contains("Max-Age=0"));
    }
}
