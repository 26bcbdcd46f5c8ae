//! Subscription API handlers.
//!
//! All endpoints require [`AdminAuth`].
//!
//! # Endpoints
//!
//! - `POST   /subscriptions`                   – add a subscription
//! - `GET    /subscriptions?recipient_id=...`  – list a recipient's subscriptions
//! - `DELETE /subscriptions/{id}`              – remove a subscription

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
};
use chainbell_core::entities::RecipientId;
use chainbell_core::entities::subscriptions::NewSubscription;
use chainbell_core::registry::RegistryError;
use chainbell_sdk::objects::{CreateSubscriptionRequest, SubscriptionResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/subscriptions",
            get(list_subscriptions).post(create_subscription),
        )
        .route("/subscriptions/{id}", delete(delete_subscription))
}

#[derive(Debug, Deserialize)]
pub struct ListSubscriptionsQuery {
    pub recipient_id: String,
}

/// `POST /subscriptions`
async fn create_subscription(
    state: State<AppState>,
    _auth: AdminAuth,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let subscription = state
        .registry
        .add(NewSubscription {
            recipient_id: RecipientId::new(request.recipient_id),
            filter: request.filter.into(),
            display: request.display.into(),
        })
        .await?;

    tracing::info!(
        subscription_id = %subscription.id,
        recipient_id = %subscription.recipient_id,
        "Subscription added"
    );
    Ok((
        StatusCode::CREATED,
        Json(SubscriptionResponse::from(subscription)),
    ))
}

/// `GET /subscriptions?recipient_id=...`
async fn list_subscriptions(
    state: State<AppState>,
    _auth: AdminAuth,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let subscriptions = state
        .registry
        .list(&RecipientId::new(query.recipient_id))
        .await?;
    let response: Vec<SubscriptionResponse> =
        subscriptions.into_iter().map(Into::into).collect();
    Ok(Json(response))
}

/// `DELETE /subscriptions/{id}`
async fn delete_subscription(
    state: State<AppState>,
    _auth: AdminAuth,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    if !state.registry.remove(id).await? {
        return Err(SubscriptionApiError::NotFound);
    }
    tracing::info!(subscription_id = %id, "Subscription removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Errors that can occur in subscription API handlers.
#[derive(Debug)]
pub enum SubscriptionApiError {
    Registry(RegistryError),
    NotFound,
}

impl From<RegistryError> for SubscriptionApiError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

impl IntoResponse for SubscriptionApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            SubscriptionApiError::Registry(RegistryError::Invalid(reason)) => {
                (StatusCode::BAD_REQUEST, reason).into_response()
            }
            SubscriptionApiError::Registry(e) => {
                tracing::error!(error = %e, "Subscription API registry error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
            SubscriptionApiError::NotFound => {
                (StatusCode::NOT_FOUND, "subscription not found").into_response()
            }
        }
    }
}
