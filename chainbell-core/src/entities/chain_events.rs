use crate::entities::EventKind;
use crate::framework::{DatabaseAccessor, DatabaseProcessor};
use kanau::processor::Processor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

/// Globally unique identity of a chain event.
///
/// Ordered by block height first so that sorting keys yields chain order;
/// chain id and log index break ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub chain_id: String,
    pub block_height: u64,
    pub log_index: u32,
}

impl EventKey {
    pub fn new(chain_id: impl Into<String>, block_height: u64, log_index: u32) -> Self {
        Self {
            chain_id: chain_id.into(),
            block_height,
            log_index,
        }
    }
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.block_height
            .cmp(&other.block_height)
            .then_with(|| self.chain_id.cmp(&other.chain_id))
            .then_with(|| self.log_index.cmp(&other.log_index))
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.chain_id, self.block_height, self.log_index)
    }
}

/// A purchase on a launchpad or DEX.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyFields {
    pub package: String,
    /// Coin type or object id of the token bought.
    pub token: String,
    pub buyer: String,
    /// SUI spent.
    pub amount: Decimal,
    pub token_amount: Decimal,
    pub tx_digest: String,
}

/// Any other Move event, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherFields {
    pub package: String,
    pub event_type: String,
    pub tx_digest: String,
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// Event body, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Buy(BuyFields),
    Other(OtherFields),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Buy(_) => EventKind::Buy,
            EventPayload::Other(_) => EventKind::Other,
        }
    }

    pub fn package(&self) -> &str {
        match self {
            EventPayload::Buy(buy) => &buy.package,
            EventPayload::Other(other) => &other.package,
        }
    }

    pub fn tx_digest(&self) -> &str {
        match self {
            EventPayload::Buy(buy) => &buy.tx_digest,
            EventPayload::Other(other) => &other.tx_digest,
        }
    }
}

/// An observed chain event. Immutable once ledgered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub key: EventKey,
    pub emitted_at: time::OffsetDateTime,
    pub payload: EventPayload,
    pub observed_at: time::OffsetDateTime,
}

impl ChainEvent {
    pub fn block_height(&self) -> u64 {
        self.key.block_height
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ChainEventRow {
    chain_id: String,
    block_height: i64,
    log_index: i32,
    emitted_at: time::OffsetDateTime,
    payload: Json<EventPayload>,
    observed_at: time::OffsetDateTime,
}

impl TryFrom<ChainEventRow> for ChainEvent {
    type Error = sqlx::Error;

    fn try_from(row: ChainEventRow) -> Result<Self, Self::Error> {
        Ok(ChainEvent {
            key: EventKey {
                chain_id: row.chain_id,
                block_height: u64::try_from(row.block_height)
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                log_index: u32::try_from(row.log_index)
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            },
            emitted_at: row.emitted_at,
            payload: row.payload.0,
            observed_at: row.observed_at,
        })
    }
}

/// Convert a height into the `BIGINT` column representation.
pub(crate) fn height_to_db(height: u64) -> Result<i64, sqlx::Error> {
    i64::try_from(height).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

pub(crate) fn log_index_to_db(log_index: u32) -> Result<i32, sqlx::Error> {
    i32::try_from(log_index).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

#[derive(Debug, Clone)]
/// Insert an event unless its key is already present.
///
/// Returns `true` if a row was inserted.
pub struct InsertChainEvent {
    pub event: ChainEvent,
}

impl Processor<InsertChainEvent> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertChainEvent")]
    async fn process(&self, insert: InsertChainEvent) -> Result<bool, sqlx::Error> {
        let ChainEvent {
            key,
            emitted_at,
            payload,
            observed_at,
        } = insert.event;
        let kind = payload.kind();
        let result = sqlx::query(
            r#"
            INSERT INTO chain_events
                (chain_id, block_height, log_index, kind, emitted_at, payload, observed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (chain_id, block_height, log_index) DO NOTHING
            "#,
        )
        .bind(key.chain_id)
        .bind(height_to_db(key.block_height)?)
        .bind(log_index_to_db(key.log_index)?)
        .bind(kind)
        .bind(emitted_at)
        .bind(Json(payload))
        .bind(observed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone)]
/// Fetch a single event by key.
pub struct GetChainEvent {
    pub key: EventKey,
}

impl Processor<GetChainEvent> for DatabaseProcessor {
    type Output = Option<ChainEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetChainEvent")]
    async fn process(&self, query: GetChainEvent) -> Result<Option<ChainEvent>, sqlx::Error> {
        let row = sqlx::query_as::<_, ChainEventRow>(
            r#"
            SELECT chain_id, block_height, log_index, emitted_at, payload, observed_at
            FROM chain_events
            WHERE chain_id = $1 AND block_height = $2 AND log_index = $3
            "#,
        )
        .bind(&query.key.chain_id)
        .bind(height_to_db(query.key.block_height)?)
        .bind(log_index_to_db(query.key.log_index)?)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ChainEvent::try_from).transpose()
    }
}

#[derive(Debug, Clone)]
/// Events that have not been run through subscription matching yet,
/// in chain order.
pub struct ListUnmatchedChainEvents {
    pub limit: i64,
}

impl Processor<ListUnmatchedChainEvents> for DatabaseProcessor {
    type Output = Vec<ChainEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListUnmatchedChainEvents")]
    async fn process(
        &self,
        query: ListUnmatchedChainEvents,
    ) -> Result<Vec<ChainEvent>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ChainEventRow>(
            r#"
            SELECT chain_id, block_height, log_index, emitted_at, payload, observed_at
            FROM chain_events
            WHERE matched_at IS NULL
            ORDER BY block_height ASC, chain_id ASC, log_index ASC
            LIMIT $1
            "#,
        )
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ChainEvent::try_from).collect()
    }
}

impl ChainEvent {
    /// Return the subset of `keys` that is missing from the ledger.
    pub async fn find_missing(
        db: &mut impl DatabaseAccessor,
        keys: &[EventKey],
    ) -> Result<Vec<EventKey>, sqlx::Error> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let chain_ids: Vec<String> = keys.iter().map(|k| k.chain_id.clone()).collect();
        let heights = keys
            .iter()
            .map(|k| height_to_db(k.block_height))
            .collect::<Result<Vec<i64>, _>>()?;
        let log_indexes = keys
            .iter()
            .map(|k| log_index_to_db(k.log_index))
            .collect::<Result<Vec<i32>, _>>()?;

        let rows: Vec<(String, i64, i32)> = sqlx::query_as(
            r#"
            SELECT k.chain_id, k.block_height, k.log_index
            FROM UNNEST($1::text[], $2::bigint[], $3::int[]) AS k(chain_id, block_height, log_index)
            LEFT JOIN chain_events AS e
              ON e.chain_id = k.chain_id
             AND e.block_height = k.block_height
             AND e.log_index = k.log_index
            WHERE e.chain_id IS NULL
            "#,
        )
        .bind(chain_ids)
        .bind(heights)
        .bind(log_indexes)
        .fetch_all(db.acquire())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(chain_id, block_height, log_index)| EventKey {
                chain_id,
                block_height: block_height as u64,
                log_index: log_index as u32,
            })
            .collect())
    }

    /// Flag an event as matched against the subscription registry.
    pub async fn mark_matched(
        db: &mut impl DatabaseAccessor,
        key: &EventKey,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE chain_events
            SET matched_at = NOW()
            WHERE chain_id = $1 AND block_height = $2 AND log_index = $3
              AND matched_at IS NULL
            "#,
        )
        .bind(&key.chain_id)
        .bind(height_to_db(key.block_height)?)
        .bind(log_index_to_db(key.log_index)?)
        .execute(db.acquire())
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_event_key_orders_by_height_first() {
        let mut keys = vec![
            EventKey::new("sui", 101, 0),
            EventKey::new("sui", 100, 10),
            EventKey::new("sui", 100, 9),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                EventKey::new("sui", 100, 9),
                EventKey::new("sui", 100, 10),
                EventKey::new("sui", 101, 0),
            ]
        );
        assert_eq!(keys[0].to_string(), "sui:100:9");
    }

    #[test]
    fn test_payload_is_tagged_by_kind() {
        let payload = EventPayload::Buy(BuyFields {
            package: "0x7b88".to_string(),
            token: "0xcafe::moon::MOON".to_string(),
            buyer: "0xbuyer".to_string(),
            amount: Decimal::from_str("2.5").unwrap(),
            token_amount: Decimal::from(1000),
            tx_digest: "9xQ7".to_string(),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "buy");
        let back: EventPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), EventKind::Buy);
        assert_eq!(back.package(), "0x7b88");
    }

    #[test]
    fn test_key_columns_reject_out_of_range_values() {
        assert_eq!(log_index_to_db(7).unwrap(), 7);
        assert!(matches!(
            log_index_to_db(u32::MAX),
            Err(sqlx::Error::Encode(_))
        ));
        assert!(matches!(height_to_db(u64::MAX), Err(sqlx::Error::Encode(_))));
    }
}
