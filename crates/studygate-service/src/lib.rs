#![deny(unsafe_code)]

pub mod auth;

use auth::{AuthError, PrincipalRegistry, SessionAuthenticator};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use studygate_core::{
    BillingConnector, CoreError, EngineConfig, ReconcileOutcome, SubscriptionEngine,
    SubscriptionStatus,
};
use thiserror::Error;

/// Header carrying the provider's signature over the raw webhook body.
pub const SIGNATURE_HEADER: &str = "studygate-signature";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub engine: EngineConfig,
    pub auth_secret: String,
    pub session_ttl: chrono::Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            auth_secret: "studygate-local-auth-secret".to_string(),
            session_ttl: chrono::Duration::days(7),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<SubscriptionEngine>,
    pub principals: Arc<PrincipalRegistry>,
    pub sessions: Arc<SessionAuthenticator>,
}

impl ServiceState {
    pub async fn bootstrap(
        config: ServiceConfig,
        billing: Arc<dyn BillingConnector>,
    ) -> Result<Self, CoreError> {
        let ServiceConfig {
            engine,
            auth_secret,
            session_ttl,
        } = config;

        let engine = SubscriptionEngine::bootstrap(engine, billing).await?;

        Ok(Self {
            engine: Arc::new(engine),
            principals: Arc::new(PrincipalRegistry::new(&auth_secret)),
            sessions: Arc::new(SessionAuthenticator::new(session_ttl)),
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/checkout", post(checkout))
        .route("/api/subscription", get(subscription_status))
        .route("/api/subscription/cancel", post(cancel_subscription))
        .route("/api/webhooks/billing", post(billing_webhook))
        .route("/api/content", get(protected_content))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("active subscription required")]
    NotEntitled,
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::EmailTaken => Self::bad_request("account already exists"),
            AuthError::InvalidCredentials => Self::bad_request("invalid credentials"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Callers get generic messages; causes go to the log only.
        let (status, message) = match &self {
            ApiError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "authentication required".to_string())
            }
            ApiError::NotEntitled => (
                StatusCode::FORBIDDEN,
                "active subscription required".to_string(),
            ),
            ApiError::Http { status, message } => (*status, message.clone()),
            ApiError::Core(err) => {
                let mapped = match err {
                    CoreError::SignatureVerification(_) => (
                        StatusCode::BAD_REQUEST,
                        "webhook signature verification failed".to_string(),
                    ),
                    CoreError::MalformedEvent(_) => {
                        (StatusCode::BAD_REQUEST, "malformed event".to_string())
                    }
                    CoreError::ProviderUnavailable { .. } => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "billing provider unavailable, retry later".to_string(),
                    ),
                    CoreError::SubscriptionNotFound(_) => (
                        StatusCode::NOT_FOUND,
                        "no subscription found".to_string(),
                    ),
                    CoreError::Storage(_) | CoreError::Serialization(_) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal error".to_string(),
                    ),
                };
                tracing::warn!(error = %err, "request failed");
                mapped
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

async fn authenticated_principal(
    state: &ServiceState,
    headers: &HeaderMap,
) -> Result<String, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Unauthenticated)?;
    state
        .sessions
        .authenticate(token)
        .await
        .ok_or(ApiError::Unauthenticated)
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "studygate-service",
        storage_backend: state.engine.storage_label(),
    })
}

#[derive(Debug, Clone, Deserialize)]
struct CredentialsRequest {
    email: String,
    password: String,
}

#[derive(Debug, Clone, Serialize)]
struct SessionResponse {
    principal_id: String,
    token: String,
}

async fn register(
    State(state): State<ServiceState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::bad_request("email and password are required"));
    }

    let principal_id = state
        .principals
        .register(&request.email, &request.password)
        .await?;
    let token = state.sessions.issue(&principal_id).await;

    Ok(Json(SessionResponse {
        principal_id,
        token,
    }))
}

async fn login(
    State(state): State<ServiceState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let principal_id = state
        .principals
        .verify_credentials(&request.email, &request.password)
        .await?;
    let token = state.sessions.issue(&principal_id).await;

    Ok(Json(SessionResponse {
        principal_id,
        token,
    }))
}

async fn logout(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(token) = bearer_token(&headers) {
        state.sessions.revoke(token).await;
    }
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Clone, Serialize)]
struct CheckoutResponse {
    url: String,
}

async fn checkout(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let principal_id = authenticated_principal(&state, &headers).await?;
    // A session can outlive its account; re-check the directory before
    // creating anything at the provider.
    if !state.principals.exists(&principal_id).await {
        return Err(ApiError::Unauthenticated);
    }
    let session = state.engine.begin_checkout(&principal_id).await?;

    Ok(Json(CheckoutResponse { url: session.url }))
}

#[derive(Debug, Clone, Serialize)]
struct SubscriptionView {
    provider_subscription_id: String,
    status: SubscriptionStatus,
    period_start: Option<DateTime<Utc>>,
    period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
struct SubscriptionStatusResponse {
    has_active_subscription: bool,
    status: SubscriptionStatus,
    checked_at: DateTime<Utc>,
    subscription: Option<SubscriptionView>,
}

async fn subscription_status(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<SubscriptionStatusResponse>, ApiError> {
    let principal_id = authenticated_principal(&state, &headers).await?;
    let report = state.engine.entitlement(&principal_id).await?;
    let subscription = state.engine.subscription(&principal_id).await?;

    Ok(Json(SubscriptionStatusResponse {
        has_active_subscription: report.entitled,
        status: report.status,
        checked_at: report.checked_at,
        subscription: subscription.map(|record| SubscriptionView {
            provider_subscription_id: record.provider_subscription_id,
            status: record.status,
            period_start: record.period_start,
            period_end: record.period_end,
        }),
    }))
}

#[derive(Debug, Clone, Serialize)]
struct CancelResponse {
    status: &'static str,
    cancel_at_period_end: bool,
    message: &'static str,
}

async fn cancel_subscription(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<CancelResponse>, ApiError> {
    let principal_id = authenticated_principal(&state, &headers).await?;
    let ack = state.engine.request_cancellation(&principal_id).await?;

    Ok(Json(CancelResponse {
        status: "cancellation_requested",
        cancel_at_period_end: ack.cancel_at_period_end,
        message: "Access continues until the end of the current billing period.",
    }))
}

#[derive(Debug, Clone, Serialize)]
struct WebhookAck {
    received: bool,
    outcome: &'static str,
}

async fn billing_webhook(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing signature header"))?;

    // Acceptance is distinct from processing: stale, duplicate, and
    // unrecognized events all acknowledge so the provider stops retrying.
    let outcome = state.engine.ingest_webhook(&body, signature).await?;
    if let ReconcileOutcome::Applied {
        principal_id,
        status,
    } = &outcome
    {
        tracing::info!(%principal_id, status = status.as_str(), "subscription event applied");
    }

    Ok(Json(WebhookAck {
        received: true,
        outcome: outcome.label(),
    }))
}

#[derive(Debug, Clone, Serialize)]
struct ContentSection {
    title: &'static str,
    slug: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ContentResponse {
    sections: Vec<ContentSection>,
}

async fn protected_content(
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<ContentResponse>, ApiError> {
    let principal_id = authenticated_principal(&state, &headers).await?;
    let report = state.engine.entitlement(&principal_id).await?;
    if !report.entitled {
        return Err(ApiError::NotEntitled);
    }

    Ok(Json(ContentResponse {
        sections: vec![
            ContentSection {
                title: "Licensing Fundamentals",
                slug: "licensing-fundamentals",
            },
            ContentSection {
                title: "Procedure and Practice",
                slug: "procedure-and-practice",
            },
            ContentSection {
                title: "Practice Examinations",
                slug: "practice-examinations",
            },
        ],
    }))
}
