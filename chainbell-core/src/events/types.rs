use crate::entities::RecipientId;
use crate::entities::chain_events::EventKey;
use crate::entities::delivery_status::DeliveryPair;
use uuid::Uuid;

/// Request to deliver one event to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTask {
    pub key: EventKey,
    pub recipient_id: RecipientId,
    pub subscription_id: Option<Uuid>,
}

impl From<&DeliveryPair> for DeliveryTask {
    fn from(pair: &DeliveryPair) -> Self {
        Self {
            key: pair.key.clone(),
            recipient_id: pair.recipient_id.clone(),
            subscription_id: pair.subscription_id,
        }
    }
}
