use super::{RegistryError, SubscriptionMatch, SubscriptionRegistry, pick_matches, validate};
use crate::entities::RecipientId;
use crate::entities::chain_events::ChainEvent;
use crate::entities::subscriptions::{
    DeleteSubscription, GetSubscription, InsertSubscription, ListCandidateSubscriptions,
    ListRecipientSubscriptions, NewSubscription, Subscription,
};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;
use uuid::Uuid;

/// PostgreSQL-backed [`SubscriptionRegistry`].
#[derive(Debug, Clone)]
pub struct PgRegistry {
    db: DatabaseProcessor,
}

impl PgRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor { pool },
        }
    }
}

#[async_trait]
impl SubscriptionRegistry for PgRegistry {
    async fn add(&self, subscription: NewSubscription) -> Result<Subscription, RegistryError> {
        validate(&subscription)?;
        Ok(self.db.process(InsertSubscription { subscription }).await?)
    }

    async fn remove(&self, id: Uuid) -> Result<bool, RegistryError> {
        Ok(self.db.process(DeleteSubscription { id }).await?)
    }

    async fn list(&self, recipient_id: &RecipientId) -> Result<Vec<Subscription>, RegistryError> {
        Ok(self
            .db
            .process(ListRecipientSubscriptions {
                recipient_id: recipient_id.clone(),
            })
            .await?)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>, RegistryError> {
        Ok(self.db.process(GetSubscription { id }).await?)
    }

    async fn match_event(
        &self,
        event: &ChainEvent,
    ) -> Result<Vec<SubscriptionMatch>, RegistryError> {
        let candidates = self
            .db
            .process(ListCandidateSubscriptions {
                package: event.payload.package().to_string(),
                kind: event.payload.kind(),
            })
            .await?;
        Ok(pick_matches(&candidates, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::subscriptions::{SubscriptionDisplay, SubscriptionFilter};
    use crate::testing::buy_event;

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_subscription_round_trip(pool: PgPool) {
        let registry = PgRegistry::new(pool);
        let display = SubscriptionDisplay {
            symbol: Some("MOON".to_string()),
            telegram: Some("https://t.me/moon".to_string()),
            chart_url: Some("https://dexscreener.com/sui/0xpool".to_string()),
            media: Some("AgACAgQ".to_string()),
            ..Default::default()
        };
        let added = registry
            .add(NewSubscription {
                recipient_id: RecipientId::new("@alerts"),
                filter: SubscriptionFilter {
                    package: Some("0x7b88".to_string()),
                    ..Default::default()
                },
                display: display.clone(),
            })
            .await
            .unwrap();

        let stored = registry.get(added.id).await.unwrap().unwrap();
        assert_eq!(stored.display, display);
        assert_eq!(
            registry.list(&RecipientId::new("@alerts")).await.unwrap().len(),
            1
        );

        let matches = registry
            .match_event(&buy_event("sui", 1, 0, "1"))
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].subscription_id, added.id);

        assert!(registry.remove(added.id).await.unwrap());
        assert!(!registry.remove(added.id).await.unwrap());
    }
}
