use crate::entities::chain_events::{EventKey, height_to_db, log_index_to_db};
use crate::entities::{ProcessingStatus, RecipientId};
use crate::framework::{DatabaseAccessor, DatabaseProcessor};
use kanau::processor::Processor;
use uuid::Uuid;

/// Delivery record of one (event, recipient) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPair {
    pub key: EventKey,
    pub recipient_id: RecipientId,
    /// Subscription that produced the match. `None` once the subscription
    /// was removed.
    pub subscription_id: Option<Uuid>,
    pub status: ProcessingStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: time::OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct DeliveryPairRow {
    chain_id: String,
    block_height: i64,
    log_index: i32,
    recipient_id: String,
    subscription_id: Option<Uuid>,
    status: ProcessingStatus,
    attempts: i32,
    last_error: Option<String>,
    updated_at: time::OffsetDateTime,
}

impl TryFrom<DeliveryPairRow> for DeliveryPair {
    type Error = sqlx::Error;

    fn try_from(row: DeliveryPairRow) -> Result<Self, Self::Error> {
        Ok(DeliveryPair {
            key: EventKey {
                chain_id: row.chain_id,
                block_height: u64::try_from(row.block_height)
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                log_index: u32::try_from(row.log_index)
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            },
            recipient_id: RecipientId(row.recipient_id),
            subscription_id: row.subscription_id,
            status: row.status,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            last_error: row.last_error,
            updated_at: row.updated_at,
        })
    }
}

const PAIR_COLUMNS: &str = "chain_id, block_height, log_index, recipient_id, subscription_id, \
                            status, attempts, last_error, updated_at";

#[derive(Debug, Clone)]
/// Pairs in a given status, oldest event first.
pub struct ListPairsByStatus {
    pub status: ProcessingStatus,
    pub limit: i64,
}

impl Processor<ListPairsByStatus> for DatabaseProcessor {
    type Output = Vec<DeliveryPair>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListPairsByStatus")]
    async fn process(&self, query: ListPairsByStatus) -> Result<Vec<DeliveryPair>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {PAIR_COLUMNS}
            FROM delivery_status
            WHERE status = $1
            ORDER BY block_height ASC, chain_id ASC, log_index ASC, recipient_id ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, DeliveryPairRow>(&sql)
            .bind(query.status)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DeliveryPair::try_from).collect()
    }
}

#[derive(Debug, Clone)]
pub struct GetDeliveryPair {
    pub key: EventKey,
    pub recipient_id: RecipientId,
}

impl Processor<GetDeliveryPair> for DatabaseProcessor {
    type Output = Option<DeliveryPair>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDeliveryPair")]
    async fn process(&self, query: GetDeliveryPair) -> Result<Option<DeliveryPair>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {PAIR_COLUMNS}
            FROM delivery_status
            WHERE chain_id = $1 AND block_height = $2 AND log_index = $3 AND recipient_id = $4
            "#
        );
        let row = sqlx::query_as::<_, DeliveryPairRow>(&sql)
            .bind(&query.key.chain_id)
            .bind(height_to_db(query.key.block_height)?)
            .bind(log_index_to_db(query.key.log_index)?)
            .bind(query.recipient_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(DeliveryPair::try_from).transpose()
    }
}

#[derive(Debug, Clone)]
/// Bump the attempt counter and remember the last failure.
///
/// Only applies to pairs that are not terminal. Returns the new count, or
/// `None` when nothing was updated.
pub struct IncrementDeliveryAttempts {
    pub key: EventKey,
    pub recipient_id: RecipientId,
    pub error: String,
}

impl Processor<IncrementDeliveryAttempts> for DatabaseProcessor {
    type Output = Option<u32>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:IncrementDeliveryAttempts")]
    async fn process(&self, cmd: IncrementDeliveryAttempts) -> Result<Option<u32>, sqlx::Error> {
        let attempts: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE delivery_status
            SET attempts = attempts + 1, last_error = $5, updated_at = NOW()
            WHERE chain_id = $1 AND block_height = $2 AND log_index = $3 AND recipient_id = $4
              AND status IN ('pending', 'dispatched')
            RETURNING attempts
            "#,
        )
        .bind(&cmd.key.chain_id)
        .bind(height_to_db(cmd.key.block_height)?)
        .bind(log_index_to_db(cmd.key.log_index)?)
        .bind(cmd.recipient_id.as_str())
        .bind(&cmd.error)
        .fetch_optional(&self.pool)
        .await?;
        Ok(attempts.map(|(n,)| u32::try_from(n).unwrap_or_default()))
    }
}

#[derive(Debug, Clone, Copy)]
/// Number of pairs not yet in a terminal state.
pub struct CountBacklog;

impl Processor<CountBacklog> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CountBacklog")]
    async fn process(&self, _: CountBacklog) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM delivery_status
            WHERE status IN ('pending', 'dispatched')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

impl DeliveryPair {
    /// Create a `Pending` pair. Returns `false` if the pair already existed.
    pub async fn insert_pending(
        db: &mut impl DatabaseAccessor,
        key: &EventKey,
        recipient_id: &RecipientId,
        subscription_id: Option<Uuid>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO delivery_status
                (chain_id, block_height, log_index, recipient_id, subscription_id, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            ON CONFLICT (chain_id, block_height, log_index, recipient_id) DO NOTHING
            "#,
        )
        .bind(&key.chain_id)
        .bind(height_to_db(key.block_height)?)
        .bind(log_index_to_db(key.log_index)?)
        .bind(recipient_id.as_str())
        .bind(subscription_id)
        .execute(db.acquire())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move the pair to `to` if its current status is one of `to`'s
    /// predecessors. Returns the number of rows changed (0 or 1).
    pub async fn compare_and_set_status(
        db: &mut impl DatabaseAccessor,
        key: &EventKey,
        recipient_id: &RecipientId,
        to: ProcessingStatus,
    ) -> Result<u64, sqlx::Error> {
        let from: Vec<String> = to.predecessors().iter().map(|s| s.to_string()).collect();
        let result = sqlx::query(
            r#"
            UPDATE delivery_status
            SET status = $5, updated_at = NOW()
            WHERE chain_id = $1 AND block_height = $2 AND log_index = $3 AND recipient_id = $4
              AND status::text = ANY($6::text[])
            "#,
        )
        .bind(&key.chain_id)
        .bind(height_to_db(key.block_height)?)
        .bind(log_index_to_db(key.log_index)?)
        .bind(recipient_id.as_str())
        .bind(to)
        .bind(from)
        .execute(db.acquire())
        .await?;
        Ok(result.rows_affected())
    }
}
