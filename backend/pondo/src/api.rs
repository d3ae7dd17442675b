//! Axum REST API handlers.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::errors::PondoError;
use crate::funds::{parse_document, FundsDocument};
use crate::rate_limit::RateLimiter;
use crate::session::SessionManager;
use crate::store::{self, FundStore, Version};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn FundStore>,
    pub sessions: Arc<SessionManager>,
    pub limiter: Arc<RateLimiter>,
    pub admin_key: String,
    pub trust_proxy: bool,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/funds", get(get_funds).post(update_funds))
        .route("/api/admin/login", post(login))
        .route("/api/admin/verify", post(verify_session))
        .route("/api/admin/logout", post(logout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub admin_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFundsRequest {
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub data: Value,
    /// Version the client last read (the `ETag` of `GET /api/funds`).
    #[serde(default)]
    pub expected_version: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub session_token: String,
    /// Session lifetime in milliseconds.
    pub expires_in: u64,
}

#[derive(Serialize, Deserialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub version: String,
}

#[derive(Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub active_sessions: usize,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Client identity
// ─────────────────────────────────────────────────────────

/// Who is calling: the peer IP, or the last `X-Forwarded-For` hop when the
/// server sits behind a trusted proxy. Earlier hops are written by the client
/// and cannot identify it.
pub struct ClientIdentity(pub String);

#[async_trait]
impl FromRequestParts<Arc<ApiState>> for ClientIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> Result<Self, Self::Rejection> {
        let forwarded = state
            .trust_proxy
            .then(|| {
                parts
                    .headers
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.rsplit(',').next())
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
            .flatten();

        let identity = forwarded
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ClientIdentity(identity))
    }
}

// ─────────────────────────────────────────────────────────
// Error mapping
// ─────────────────────────────────────────────────────────

impl IntoResponse for PondoError {
    fn into_response(self) -> Response {
        let (status, error, field) = match &self {
            Self::StorageUnavailable(_) | Self::CorruptData(_) | Self::Config(_) => {
                error!("Request failed: {self}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
            Self::InvalidDocument { field, reason } => (
                StatusCode::BAD_REQUEST,
                format!("Invalid funds data: {field} {reason}"),
                Some(field.clone()),
            ),
            Self::VersionConflict { .. } => (
                StatusCode::CONFLICT,
                "Funds were changed by another editor; reload and try again".to_string(),
                None,
            ),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), None),
            Self::InvalidCredential => (
                StatusCode::UNAUTHORIZED,
                "Invalid admin key".to_string(),
                None,
            ),
            Self::RateLimited { retry_after_secs } => {
                let body = ErrorResponse {
                    error: self.to_string(),
                    field: None,
                };
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    Json(body),
                )
                    .into_response();
            }
        };

        (status, Json(ErrorResponse { error, field })).into_response()
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /api/health`
pub async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        active_sessions: state.sessions.active_count(),
    })
}

/// `GET /api/funds`
///
/// Public. Returns the whole document with its version in the `ETag` header.
pub async fn get_funds(
    State(state): State<Arc<ApiState>>,
) -> Result<impl IntoResponse, PondoError> {
    let current = state.store.read().await?;
    Ok((
        [(header::ETAG, format!("\"{}\"", current.version))],
        Json(current.value),
    ))
}

/// `POST /api/funds`
///
/// Replaces the whole document. Requires a live session token.
pub async fn update_funds(
    State(state): State<Arc<ApiState>>,
    ClientIdentity(client): ClientIdentity,
    Json(req): Json<UpdateFundsRequest>,
) -> Result<Json<UpdateResponse>, PondoError> {
    let token = req.session_token.unwrap_or_default();
    if !state.sessions.verify(&token) {
        warn!("Rejected funds update from {client}: no valid session");
        return Err(PondoError::Unauthorized);
    }

    let document: FundsDocument = parse_document(req.data)?;

    let version = match req.expected_version {
        Some(expected) => {
            let expected = Version(expected.trim_matches('"').to_string());
            state.store.write(&document, Some(&expected)).await?
        }
        None => store::write_with_retry(state.store.as_ref(), &document).await?,
    };

    info!("Funds updated by {client} (version {version})");
    Ok(Json(UpdateResponse {
        success: true,
        version: version.0,
    }))
}

/// `POST /api/admin/login`
pub async fn login(
    State(state): State<Arc<ApiState>>,
    ClientIdentity(client): ClientIdentity,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, PondoError> {
    if !state.limiter.allow(&client) {
        let retry_after_secs = state
            .limiter
            .retry_after(&client)
            .map_or(1, |wait| (wait.as_millis() as u64).div_ceil(1000))
            .max(1);
        return Err(PondoError::RateLimited { retry_after_secs });
    }

    let submitted = req.admin_key.unwrap_or_default();
    if !constant_time_eq(submitted.as_bytes(), state.admin_key.as_bytes()) {
        warn!("Failed admin login from {client}");
        return Err(PondoError::InvalidCredential);
    }

    let session_token = state.sessions.create_session(&client);
    info!("Admin login from {client}");
    Ok(Json(LoginResponse {
        success: true,
        session_token,
        expires_in: state.sessions.timeout().as_millis() as u64,
    }))
}

/// `POST /api/admin/verify`
pub async fn verify_session(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<TokenRequest>,
) -> (StatusCode, Json<VerifyResponse>) {
    let valid = req
        .session_token
        .is_some_and(|token| state.sessions.verify(&token));
    let status = if valid {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    (status, Json(VerifyResponse { valid }))
}

/// `POST /api/admin/logout`
///
/// Always succeeds, whether or not the token was live.
pub async fn logout(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<TokenRequest>,
) -> Json<SuccessResponse> {
    if let Some(token) = req.session_token {
        state.sessions.destroy(&token);
    }
    Json(SuccessResponse { success: true })
}

/// Constant-time comparison to prevent timing attacks on the admin key.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
