//! Management handlers for webhook subscriptions.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ports::Actor;
use crate::outbound::webhook::{
    AuditQuery, DeliveryAttempt, DeliveryResult, NewSubscription, SubscriptionStatus,
    SubscriptionUpdate, WebhookSubscription,
};
use crate::server::AppState;
use crate::server::responses::{ApiError, ApiResult};

pub const ACCOUNT_HEADER: &str = "x-account-id";
pub const ROLE_HEADER: &str = "x-actor-role";

const DEFAULT_DELIVERY_LIMIT: usize = 20;
const MAX_DELIVERY_LIMIT: usize = 100;

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        match (header(ACCOUNT_HEADER), header(ROLE_HEADER)) {
            (Some(account_id), Some(role)) => Ok(Actor::new(account_id, role)),
            _ => Err(ApiError::Unauthorized),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct RotateSecretRequest {
    pub secret: Option<String>,
}

/// The only response that ever contains a secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct RotateSecretResponse {
    pub id: Uuid,
    pub secret: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ToggleRequest {
    /// Explicit state; flips the current one when absent
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DeliveriesQuery {
    pub limit: Option<usize>,
    pub event: Option<String>,
    pub session_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn authorize(state: &AppState, actor: &Actor) -> ApiResult<()> {
    if state.access_control.can_manage_webhooks(actor).await {
        Ok(())
    } else {
        tracing::warn!(
            account_id = %actor.account_id,
            role = %actor.role,
            "Webhook management denied"
        );
        Err(ApiError::Forbidden)
    }
}

/// Fetch a live subscription owned by the caller's account. Other accounts'
/// subscriptions are reported as missing.
async fn owned_subscription(
    state: &AppState,
    actor: &Actor,
    id: Uuid,
) -> ApiResult<WebhookSubscription> {
    let subscription = state.registry.get(id).await?;
    if subscription.account_id != actor.account_id
        || subscription.status != SubscriptionStatus::Active
    {
        return Err(ApiError::NotFound);
    }
    Ok(subscription)
}

/// Parse an optional JSON body; an empty body yields the default.
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::Validation(e.to_string()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn create_subscription(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<NewSubscription>,
) -> ApiResult<(StatusCode, Json<WebhookSubscription>)> {
    authorize(&state, &actor).await?;

    let subscription = state.registry.register(&actor.account_id, request).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    actor: Actor,
) -> ApiResult<Json<Vec<WebhookSubscription>>> {
    authorize(&state, &actor).await?;

    Ok(Json(state.registry.list(&actor.account_id).await))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WebhookSubscription>> {
    authorize(&state, &actor).await?;

    Ok(Json(owned_subscription(&state, &actor, id).await?))
}

pub async fn update_subscription(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(update): Json<SubscriptionUpdate>,
) -> ApiResult<Json<WebhookSubscription>> {
    authorize(&state, &actor).await?;
    owned_subscription(&state, &actor, id).await?;

    Ok(Json(state.registry.update(id, update).await?))
}

pub async fn delete_subscription(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    authorize(&state, &actor).await?;
    owned_subscription(&state, &actor, id).await?;

    state.registry.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn rotate_secret(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Json<RotateSecretResponse>> {
    authorize(&state, &actor).await?;
    owned_subscription(&state, &actor, id).await?;
    let request: RotateSecretRequest = optional_json(&body)?;

    let secret = state.registry.rotate_secret(id, request.secret).await?;
    Ok(Json(RotateSecretResponse { id, secret }))
}

pub async fn toggle_subscription(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Json<WebhookSubscription>> {
    authorize(&state, &actor).await?;
    let current = owned_subscription(&state, &actor, id).await?;
    let request: ToggleRequest = optional_json(&body)?;

    let enabled = request.enabled.unwrap_or(!current.enabled);
    Ok(Json(state.registry.set_enabled(id, enabled).await?))
}

pub async fn test_subscription(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeliveryResult>> {
    authorize(&state, &actor).await?;
    owned_subscription(&state, &actor, id).await?;

    Ok(Json(state.dispatcher.send_test(id).await?))
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Query(query): Query<DeliveriesQuery>,
) -> ApiResult<Json<Vec<DeliveryAttempt>>> {
    authorize(&state, &actor).await?;
    owned_subscription(&state, &actor, id).await?;

    let filter = AuditQuery {
        subscription_id: Some(id),
        session_id: query.session_id,
        event: query.event,
        limit: Some(
            query
                .limit
                .unwrap_or(DEFAULT_DELIVERY_LIMIT)
                .clamp(1, MAX_DELIVERY_LIMIT),
        ),
    };
    Ok(Json(state.audit_store.query(&filter).await?))
}
