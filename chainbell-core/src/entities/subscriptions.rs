use crate::entities::chain_events::{ChainEvent, EventPayload};
use crate::entities::{EventKind, RecipientId};
use crate::framework::DatabaseProcessor;
use chainbell_sdk::objects::{
    SubscriptionDisplayBody, SubscriptionFilterBody, SubscriptionResponse,
};
use kanau::processor::Processor;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Which events a subscription wants. Every set criterion must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub package: Option<String>,
    pub kind: Option<EventKind>,
    pub token: Option<String>,
    /// Minimum SUI spent. Only buys can satisfy it.
    pub min_amount: Option<Decimal>,
}

impl SubscriptionFilter {
    pub fn matches(&self, event: &ChainEvent) -> bool {
        let payload = &event.payload;
        if self.package.as_deref().is_some_and(|p| p != payload.package()) {
            return false;
        }
        if self.kind.is_some_and(|k| k != payload.kind()) {
            return false;
        }
        if self.token.is_none() && self.min_amount.is_none() {
            return true;
        }
        let EventPayload::Buy(buy) = payload else {
            return false;
        };
        if self.token.as_deref().is_some_and(|t| t != buy.token) {
            return false;
        }
        self.min_amount.is_none_or(|min| buy.amount >= min)
    }
}

/// How alerts for a subscription are rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDisplay {
    pub symbol: Option<String>,
    pub emoji: Option<String>,
    pub buy_step: Option<Decimal>,
    pub website: Option<String>,
    pub telegram: Option<String>,
    pub x: Option<String>,
    pub chart_url: Option<String>,
    /// Photo URL or Telegram `file_id` attached to buy alerts.
    pub media: Option<String>,
}

impl SubscriptionDisplay {
    /// `(label, url)` of each set project link, in display order.
    pub fn links(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("Website", self.website.as_deref()),
            ("Telegram", self.telegram.as_deref()),
            ("X", self.x.as_deref()),
        ]
        .into_iter()
        .filter_map(|(label, url)| url.map(|url| (label, url)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: Uuid,
    pub recipient_id: RecipientId,
    pub filter: SubscriptionFilter,
    pub display: SubscriptionDisplay,
    pub created_at: time::OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub recipient_id: RecipientId,
    pub filter: SubscriptionFilter,
    pub display: SubscriptionDisplay,
}

impl From<SubscriptionFilterBody> for SubscriptionFilter {
    fn from(body: SubscriptionFilterBody) -> Self {
        Self {
            package: body.package,
            kind: body.kind.map(EventKind::from),
            token: body.token,
            min_amount: body.min_amount,
        }
    }
}

impl From<SubscriptionFilter> for SubscriptionFilterBody {
    fn from(filter: SubscriptionFilter) -> Self {
        Self {
            package: filter.package,
            kind: filter.kind.map(Into::into),
            token: filter.token,
            min_amount: filter.min_amount,
        }
    }
}

impl From<SubscriptionDisplayBody> for SubscriptionDisplay {
    fn from(body: SubscriptionDisplayBody) -> Self {
        Self {
            symbol: body.symbol,
            emoji: body.emoji,
            buy_step: body.buy_step,
            website: body.website,
            telegram: body.telegram,
            x: body.x,
            chart_url: body.chart_url,
            media: body.media,
        }
    }
}

impl From<SubscriptionDisplay> for SubscriptionDisplayBody {
    fn from(display: SubscriptionDisplay) -> Self {
        Self {
            symbol: display.symbol,
            emoji: display.emoji,
            buy_step: display.buy_step,
            website: display.website,
            telegram: display.telegram,
            x: display.x,
            chart_url: display.chart_url,
            media: display.media,
        }
    }
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        Self {
            id: sub.id,
            recipient_id: sub.recipient_id.0,
            filter: sub.filter.into(),
            display: sub.display.into(),
            created_at: sub.created_at.unix_timestamp(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    recipient_id: String,
    package: Option<String>,
    kind: Option<EventKind>,
    token: Option<String>,
    min_amount: Option<Decimal>,
    symbol: Option<String>,
    emoji: Option<String>,
    buy_step: Option<Decimal>,
    website: Option<String>,
    telegram: Option<String>,
    x: Option<String>,
    chart_url: Option<String>,
    media: Option<String>,
    created_at: time::OffsetDateTime,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            id: row.id,
            recipient_id: RecipientId(row.recipient_id),
            filter: SubscriptionFilter {
                package: row.package,
                kind: row.kind,
                token: row.token,
                min_amount: row.min_amount,
            },
            display: SubscriptionDisplay {
                symbol: row.symbol,
                emoji: row.emoji,
                buy_step: row.buy_step,
                website: row.website,
                telegram: row.telegram,
                x: row.x,
                chart_url: row.chart_url,
                media: row.media,
            },
            created_at: row.created_at,
        }
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, recipient_id, package, kind, token, min_amount, \
                                    symbol, emoji, buy_step, website, telegram, x, chart_url, \
                                    media, created_at";

#[derive(Debug, Clone)]
pub struct InsertSubscription {
    pub subscription: NewSubscription,
}

impl Processor<InsertSubscription> for DatabaseProcessor {
    type Output = Subscription;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertSubscription")]
    async fn process(&self, insert: InsertSubscription) -> Result<Subscription, sqlx::Error> {
        let NewSubscription {
            recipient_id,
            filter,
            display,
        } = insert.subscription;
        let sql = format!(
            r#"
            INSERT INTO subscriptions
                (id, recipient_id, package, kind, token, min_amount, symbol, emoji, buy_step,
                 website, telegram, x, chart_url, media)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(Uuid::now_v7())
            .bind(recipient_id.0)
            .bind(filter.package)
            .bind(filter.kind)
            .bind(filter.token)
            .bind(filter.min_amount)
            .bind(display.symbol)
            .bind(display.emoji)
            .bind(display.buy_step)
            .bind(display.website)
            .bind(display.telegram)
            .bind(display.x)
            .bind(display.chart_url)
            .bind(display.media)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }
}

#[derive(Debug, Clone, Copy)]
/// Returns `true` if a subscription was removed.
pub struct DeleteSubscription {
    pub id: Uuid,
}

impl Processor<DeleteSubscription> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeleteSubscription")]
    async fn process(&self, cmd: DeleteSubscription) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(cmd.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GetSubscription {
    pub id: Uuid,
}

impl Processor<GetSubscription> for DatabaseProcessor {
    type Output = Option<Subscription>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetSubscription")]
    async fn process(&self, query: GetSubscription) -> Result<Option<Subscription>, sqlx::Error> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1");
        let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(query.id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Subscription::from))
    }
}

#[derive(Debug, Clone)]
/// Subscriptions of one recipient, oldest first.
pub struct ListRecipientSubscriptions {
    pub recipient_id: RecipientId,
}

impl Processor<ListRecipientSubscriptions> for DatabaseProcessor {
    type Output = Vec<Subscription>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListRecipientSubscriptions")]
    async fn process(
        &self,
        query: ListRecipientSubscriptions,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE recipient_id = $1 ORDER BY id"
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(query.recipient_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Subscription::from).collect())
    }
}

#[derive(Debug, Clone)]
/// Subscriptions that could match an event of `package` and `kind`.
///
/// Narrows by the indexed columns only; the caller applies the full
/// [`SubscriptionFilter::matches`].
pub struct ListCandidateSubscriptions {
    pub package: String,
    pub kind: EventKind,
}

impl Processor<ListCandidateSubscriptions> for DatabaseProcessor {
    type Output = Vec<Subscription>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListCandidateSubscriptions")]
    async fn process(
        &self,
        query: ListCandidateSubscriptions,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE (package IS NULL OR package = $1)
              AND (kind IS NULL OR kind = $2)
            ORDER BY id
            "#
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(&query.package)
            .bind(query.kind)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Subscription::from).collect())
    }
}
