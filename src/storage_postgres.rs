use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Client, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::insights::{DealOutcome, DealRecord, DealSource};
use crate::storage::{DeliveryLogStore, SubscriptionRegistry};
use crate::types::{AttemptId, AttemptQuery, DeliveryAttempt, Subscription, SubscriptionId};

/// PostgreSQL-backed registry, delivery log and deal source.
///
/// Payloads are stored as TEXT, not JSONB, so the logged body stays
/// byte-identical to what was signed.
pub struct PostgresStorage {
    client: Client,
}

impl PostgresStorage {
    pub async fn new(client: Client) -> Result<Self, StoreError> {
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS webhook_subscriptions (
                    id TEXT PRIMARY KEY,
                    url TEXT NOT NULL,
                    secret TEXT,
                    events TEXT[] NOT NULL DEFAULT '{}',
                    active BOOLEAN NOT NULL DEFAULT TRUE
                );
                CREATE TABLE IF NOT EXISTS webhook_deliveries (
                    id TEXT PRIMARY KEY,
                    subscription_id TEXT NOT NULL,
                    event TEXT NOT NULL,
                    status_code INTEGER,
                    success BOOLEAN NOT NULL,
                    payload TEXT NOT NULL,
                    response TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS webhook_deliveries_subscription_idx
                    ON webhook_deliveries (subscription_id, created_at DESC);
                CREATE TABLE IF NOT EXISTS deals (
                    id BIGSERIAL PRIMARY KEY,
                    category TEXT,
                    outcome TEXT NOT NULL,
                    value DOUBLE PRECISION NOT NULL DEFAULT 0,
                    owner TEXT,
                    created_at TIMESTAMPTZ NOT NULL,
                    closed_at TIMESTAMPTZ
                );",
            )
            .await?;

        Ok(Self { client })
    }

    /// Insert or replace a subscription.
    pub async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let events: Vec<String> = subscription.events.iter().cloned().collect();
        self.client
            .execute(
                "INSERT INTO webhook_subscriptions (id, url, secret, events, active)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (id) DO UPDATE SET
                    url = EXCLUDED.url,
                    secret = EXCLUDED.secret,
                    events = EXCLUDED.events,
                    active = EXCLUDED.active",
                &[
                    &subscription.id.0,
                    &subscription.url,
                    &subscription.secret,
                    &events,
                    &subscription.active,
                ],
            )
            .await?;
        Ok(())
    }

    fn row_to_subscription(row: &Row) -> Result<Subscription, StoreError> {
        let events: Vec<String> = row.try_get("events")?;
        Ok(Subscription {
            id: SubscriptionId(row.try_get("id")?),
            url: row.try_get("url")?,
            secret: row.try_get("secret")?,
            events: events.into_iter().collect(),
            active: row.try_get("active")?,
        })
    }

    fn row_to_attempt(row: &Row) -> Result<DeliveryAttempt, StoreError> {
        let id: String = row.try_get("id")?;
        let id = Uuid::parse_str(&id).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let status_code: Option<i32> = row.try_get("status_code")?;
        let status_code = status_code
            .map(u16::try_from)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(DeliveryAttempt {
            id: AttemptId(id),
            subscription_id: SubscriptionId(row.try_get("subscription_id")?),
            event: row.try_get("event")?,
            status_code,
            success: row.try_get("success")?,
            payload: row.try_get("payload")?,
            response: row.try_get("response")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_deal(row: &Row) -> Result<DealRecord, StoreError> {
        let outcome: String = row.try_get("outcome")?;
        let outcome = match outcome.as_str() {
            "won" => DealOutcome::Won,
            "lost" => DealOutcome::Lost,
            "open" => DealOutcome::Open,
            other => return Err(StoreError::Serialization(format!("unknown deal outcome {other:?}"))),
        };
        Ok(DealRecord {
            category: row.try_get("category")?,
            outcome,
            value: row.try_get("value")?,
            owner: row.try_get("owner")?,
            created_at: row.try_get("created_at")?,
            closed_at: row.try_get("closed_at")?,
        })
    }
}

const ATTEMPT_COLUMNS: &str =
    "id, subscription_id, event, status_code, success, payload, response, created_at";

#[async_trait]
impl SubscriptionRegistry for PostgresStorage {
    async fn find_active_subscriptions_for_event(
        &self,
        event: &str,
    ) -> Result<Vec<Subscription>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT id, url, secret, events, active FROM webhook_subscriptions
                 WHERE active AND $1 = ANY(events)",
                &[&event],
            )
            .await?;
        rows.iter().map(Self::row_to_subscription).collect()
    }

    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT id, url, secret, events, active FROM webhook_subscriptions WHERE id = $1",
                &[&id.0],
            )
            .await?;
        row.as_ref().map(Self::row_to_subscription).transpose()
    }
}

#[async_trait]
impl DeliveryLogStore for PostgresStorage {
    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StoreError> {
        let status_code = attempt.status_code.map(i32::from);
        self.client
            .execute(
                "INSERT INTO webhook_deliveries
                    (id, subscription_id, event, status_code, success, payload, response, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &attempt.id.0.to_string(),
                    &attempt.subscription_id.0,
                    &attempt.event,
                    &status_code,
                    &attempt.success,
                    &attempt.payload,
                    &attempt.response,
                    &attempt.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn attempts(&self, query: &AttemptQuery) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let subscription_id = query.subscription_id.as_ref().map(|s| s.0.as_str());
        let limit = query.limit.map(|l| l.min(i64::MAX as usize) as i64);
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM webhook_deliveries
             WHERE ($1::TEXT IS NULL OR subscription_id = $1)
               AND ($2::TEXT IS NULL OR event = $2)
             ORDER BY created_at DESC
             LIMIT $3"
        );
        let rows = self
            .client
            .query(sql.as_str(), &[&subscription_id, &query.event, &limit])
            .await?;
        rows.iter().map(Self::row_to_attempt).collect()
    }

    async fn get_attempt(&self, id: &AttemptId) -> Result<Option<DeliveryAttempt>, StoreError> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM webhook_deliveries WHERE id = $1");
        let row = self.client.query_opt(sql.as_str(), &[&id.0.to_string()]).await?;
        row.as_ref().map(Self::row_to_attempt).transpose()
    }
}

#[async_trait]
impl DealSource for PostgresStorage {
    async fn deals_created_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DealRecord>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT category, outcome, value, owner, created_at, closed_at FROM deals
                 WHERE created_at >= $1 AND created_at <= $2
                 ORDER BY created_at, id",
                &[&since, &until],
            )
            .await?;
        rows.iter().map(Self::row_to_deal).collect()
    }
}
