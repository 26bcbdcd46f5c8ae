//! HTTP API.
//!
//! - `/api/v1/subscriptions`: admin API for the subscription registry

pub mod extractors;
pub mod subscriptions;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` router.
pub fn router() -> Router<AppState> {
    Router::new().merge(subscriptions::router())
}
