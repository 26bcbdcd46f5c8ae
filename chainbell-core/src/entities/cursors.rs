use crate::entities::chain_events::height_to_db;
use crate::framework::{DatabaseAccessor, DatabaseProcessor};
use kanau::processor::Processor;

/// Per-chain bookmark of the highest block whose events are durably ledgered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainCursor {
    pub chain_id: String,
    pub last_confirmed_height: u64,
    /// Set when ingestion for the chain was halted (reorg). Ingestion stays
    /// stopped until an operator clears it.
    pub halted_reason: Option<String>,
    pub updated_at: time::OffsetDateTime,
}

impl ChainCursor {
    /// Height the stream should resume from.
    pub fn resume_height(&self) -> u64 {
        self.last_confirmed_height.saturating_add(1)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ChainCursorRow {
    chain_id: String,
    last_confirmed_height: i64,
    halted_reason: Option<String>,
    updated_at: time::OffsetDateTime,
}

impl TryFrom<ChainCursorRow> for ChainCursor {
    type Error = sqlx::Error;

    fn try_from(row: ChainCursorRow) -> Result<Self, Self::Error> {
        Ok(ChainCursor {
            chain_id: row.chain_id,
            last_confirmed_height: u64::try_from(row.last_confirmed_height)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            halted_reason: row.halted_reason,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
/// Get the cursor of a chain, if one was ever written.
pub struct GetChainCursor {
    pub chain_id: String,
}

impl Processor<GetChainCursor> for DatabaseProcessor {
    type Output = Option<ChainCursor>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetChainCursor")]
    async fn process(&self, query: GetChainCursor) -> Result<Option<ChainCursor>, sqlx::Error> {
        let row = sqlx::query_as::<_, ChainCursorRow>(
            r#"
            SELECT chain_id, last_confirmed_height, halted_reason, updated_at
            FROM chain_cursors
            WHERE chain_id = $1
            "#,
        )
        .bind(&query.chain_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ChainCursor::try_from).transpose()
    }
}

#[derive(Debug, Clone)]
/// Record that ingestion for a chain is halted.
///
/// Creates the cursor row at height 0 if the chain never confirmed a block.
pub struct HaltChainCursor {
    pub chain_id: String,
    pub reason: String,
}

impl Processor<HaltChainCursor> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:HaltChainCursor")]
    async fn process(&self, cmd: HaltChainCursor) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO chain_cursors (chain_id, last_confirmed_height, halted_reason, updated_at)
            VALUES ($1, 0, $2, NOW())
            ON CONFLICT (chain_id)
            DO UPDATE SET halted_reason = EXCLUDED.halted_reason, updated_at = NOW()
            "#,
        )
        .bind(&cmd.chain_id)
        .bind(&cmd.reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl ChainCursor {
    /// Read the cursor and lock its row for the rest of the transaction.
    pub async fn lock_for_update(
        db: &mut impl DatabaseAccessor,
        chain_id: &str,
    ) -> Result<Option<ChainCursor>, sqlx::Error> {
        let row = sqlx::query_as::<_, ChainCursorRow>(
            r#"
            SELECT chain_id, last_confirmed_height, halted_reason, updated_at
            FROM chain_cursors
            WHERE chain_id = $1
            FOR UPDATE
            "#,
        )
        .bind(chain_id)
        .fetch_optional(db.acquire())
        .await?;
        row.map(ChainCursor::try_from).transpose()
    }

    /// Insert or move the cursor. Callers check monotonicity first.
    pub async fn upsert(
        db: &mut impl DatabaseAccessor,
        chain_id: &str,
        height: u64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO chain_cursors (chain_id, last_confirmed_height, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (chain_id)
            DO UPDATE SET last_confirmed_height = EXCLUDED.last_confirmed_height, updated_at = NOW()
            "#,
        )
        .bind(chain_id)
        .bind(height_to_db(height)?)
        .execute(db.acquire())
        .await?;
        Ok(())
    }
}
