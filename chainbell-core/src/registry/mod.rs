//! Subscription registry: which recipients want which events.
//!
//! The registry is read fresh on every dispatcher tick, so added or removed
//! subscriptions take effect for events matched afterwards.

mod memory;
mod postgres;

pub use memory::MemoryRegistry;
pub use postgres::PgRegistry;

use crate::entities::RecipientId;
use crate::entities::chain_events::ChainEvent;
use crate::entities::subscriptions::{NewSubscription, Subscription};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// One recipient that should be notified about an event, and the
/// subscription that selected it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionMatch {
    pub recipient_id: RecipientId,
    pub subscription_id: Uuid,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid subscription: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    async fn add(&self, subscription: NewSubscription) -> Result<Subscription, RegistryError>;

    /// Returns `true` if the subscription existed.
    async fn remove(&self, id: Uuid) -> Result<bool, RegistryError>;

    async fn list(&self, recipient_id: &RecipientId) -> Result<Vec<Subscription>, RegistryError>;

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>, RegistryError>;

    /// Recipients to notify about `event`, at most one entry per recipient.
    async fn match_event(&self, event: &ChainEvent)
    -> Result<Vec<SubscriptionMatch>, RegistryError>;
}

pub(crate) fn validate(subscription: &NewSubscription) -> Result<(), RegistryError> {
    let recipient = subscription.recipient_id.as_str();
    if recipient.is_empty() || recipient.chars().any(char::is_whitespace) {
        return Err(RegistryError::Invalid(format!(
            "recipient id {recipient:?} is not a chat id or @channel"
        )));
    }
    if subscription
        .filter
        .min_amount
        .is_some_and(|m| m.is_sign_negative())
    {
        return Err(RegistryError::Invalid("min_amount must not be negative".into()));
    }
    if subscription
        .display
        .buy_step
        .is_some_and(|s| s.is_sign_negative())
    {
        return Err(RegistryError::Invalid("buy_step must not be negative".into()));
    }
    let display = &subscription.display;
    let chart = display.chart_url.as_deref().map(|url| ("chart_url", url));
    for (field, link) in display.links().chain(chart) {
        let is_web = url::Url::parse(link).is_ok_and(|u| matches!(u.scheme(), "http" | "https"));
        if !is_web {
            return Err(RegistryError::Invalid(format!(
                "{field} link {link:?} is not an http(s) URL"
            )));
        }
    }
    if display.media.as_deref().is_some_and(|m| m.trim().is_empty()) {
        return Err(RegistryError::Invalid("media must not be blank".into()));
    }
    Ok(())
}

/// Reduce matching subscriptions to one entry per recipient. The
/// subscription with the lowest id wins; ids are time-ordered, so that is
/// the oldest one.
pub(crate) fn pick_matches<'a>(
    subscriptions: impl IntoIterator<Item = &'a Subscription>,
    event: &ChainEvent,
) -> Vec<SubscriptionMatch> {
    let mut winners: BTreeMap<&RecipientId, Uuid> = BTreeMap::new();
    for sub in subscriptions {
        if !sub.filter.matches(event) {
            continue;
        }
        winners
            .entry(&sub.recipient_id)
            .and_modify(|id| *id = (*id).min(sub.id))
            .or_insert(sub.id);
    }
    winners
        .into_iter()
        .map(|(recipient_id, subscription_id)| SubscriptionMatch {
            recipient_id: recipient_id.clone(),
            subscription_id,
        })
        .collect()
}
