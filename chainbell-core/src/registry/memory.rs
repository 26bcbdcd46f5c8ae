use super::{RegistryError, SubscriptionMatch, SubscriptionRegistry, pick_matches, validate};
use crate::entities::RecipientId;
use crate::entities::chain_events::ChainEvent;
use crate::entities::subscriptions::{NewSubscription, Subscription};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process [`SubscriptionRegistry`], keyed by subscription id.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    subscriptions: RwLock<BTreeMap<Uuid, Subscription>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a subscription with a caller-chosen id.
    pub async fn insert(&self, subscription: Subscription) {
        self.subscriptions
            .write()
            .await
            .insert(subscription.id, subscription);
    }
}

#[async_trait]
impl SubscriptionRegistry for MemoryRegistry {
    async fn add(&self, subscription: NewSubscription) -> Result<Subscription, RegistryError> {
        validate(&subscription)?;
        let created = Subscription {
            id: Uuid::now_v7(),
            recipient_id: subscription.recipient_id,
            filter: subscription.filter,
            display: subscription.display,
            created_at: time::OffsetDateTime::now_utc(),
        };
        self.insert(created.clone()).await;
        Ok(created)
    }

    async fn remove(&self, id: Uuid) -> Result<bool, RegistryError> {
        Ok(self.subscriptions.write().await.remove(&id).is_some())
    }

    async fn list(&self, recipient_id: &RecipientId) -> Result<Vec<Subscription>, RegistryError> {
        Ok(self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| &s.recipient_id == recipient_id)
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>, RegistryError> {
        Ok(self.subscriptions.read().await.get(&id).cloned())
    }

    async fn match_event(
        &self,
        event: &ChainEvent,
    ) -> Result<Vec<SubscriptionMatch>, RegistryError> {
        let subscriptions = self.subscriptions.read().await;
        Ok(pick_matches(subscriptions.values(), event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::subscriptions::{SubscriptionDisplay, SubscriptionFilter};
    use crate::testing::buy_event;

    fn new_sub(recipient: &str) -> NewSubscription {
        NewSubscription {
            recipient_id: RecipientId::new(recipient),
            filter: SubscriptionFilter::default(),
            display: SubscriptionDisplay::default(),
        }
    }

    #[tokio::test]
    async fn test_add_list_remove() {
        let registry = MemoryRegistry::new();
        let a = registry.add(new_sub("-1001")).await.unwrap();
        let b = registry.add(new_sub("-1001")).await.unwrap();
        registry.add(new_sub("@other")).await.unwrap();

        let listed = registry.list(&RecipientId::new("-1001")).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&a) && listed.contains(&b));

        let event = buy_event("sui", 1, 0, "1");
        let matches = registry.match_event(&event).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert!(
            matches
                .iter()
                .any(|m| m.recipient_id.as_str() == "-1001" && m.subscription_id == a.id.min(b.id))
        );

        assert!(registry.remove(a.id).await.unwrap());
        assert!(!registry.remove(a.id).await.unwrap());
        let matches = registry.match_event(&event).await.unwrap();
        assert!(matches.iter().any(|m| m.subscription_id == b.id));
        assert_eq!(registry.get(a.id).await.unwrap(), None);
    }
}
