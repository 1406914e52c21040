use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::StoreError;
use crate::storage::{DeliveryLogStore, SubscriptionRegistry};
use crate::types::{AttemptId, AttemptQuery, DeliveryAttempt, Subscription, SubscriptionId};

/// Redis-backed registry and delivery log.
///
/// Subscriptions live in one hash keyed by id. Attempts are appended to a
/// list and indexed by id in a second hash.
pub struct RedisStorage {
    client: redis::Client,
    prefix: String,
}

impl RedisStorage {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn subscriptions_key(&self) -> String {
        format!("{}:subscriptions", self.prefix)
    }

    fn deliveries_key(&self) -> String {
        format!("{}:deliveries", self.prefix)
    }

    fn delivery_index_key(&self) -> String {
        format!("{}:deliveries:by-id", self.prefix)
    }

    async fn connection(&self) -> Result<redis::aio::Connection, StoreError> {
        Ok(self.client.get_tokio_connection().await?)
    }

    /// Insert or replace a subscription.
    pub async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(subscription)?;
        conn.hset::<_, _, _, ()>(self.subscriptions_key(), &subscription.id.0, payload)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRegistry for RedisStorage {
    async fn find_active_subscriptions_for_event(
        &self,
        event: &str,
    ) -> Result<Vec<Subscription>, StoreError> {
        let mut conn = self.connection().await?;
        let values: Vec<String> = conn.hvals(self.subscriptions_key()).await?;

        let mut matches = Vec::new();
        for value in values {
            let subscription: Subscription = serde_json::from_str(&value)?;
            if subscription.matches_event(event) {
                matches.push(subscription);
            }
        }
        Ok(matches)
    }

    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.hget(self.subscriptions_key(), &id.0).await?;
        value
            .map(|v| serde_json::from_str(&v).map_err(StoreError::from))
            .transpose()
    }
}

#[async_trait]
impl DeliveryLogStore for RedisStorage {
    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(attempt)?;
        redis::pipe()
            .atomic()
            .rpush(self.deliveries_key(), &payload)
            .ignore()
            .hset(self.delivery_index_key(), attempt.id.to_string(), &payload)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn attempts(&self, query: &AttemptQuery) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let mut conn = self.connection().await?;
        let values: Vec<String> = conn.lrange(self.deliveries_key(), 0, -1).await?;
        let limit = query.limit.unwrap_or(usize::MAX);

        let mut out = Vec::new();
        for value in values.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let attempt: DeliveryAttempt = serde_json::from_str(value)?;
            if query.matches(&attempt) {
                out.push(attempt);
            }
        }
        Ok(out)
    }

    async fn get_attempt(&self, id: &AttemptId) -> Result<Option<DeliveryAttempt>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.hget(self.delivery_index_key(), id.to_string()).await?;
        value
            .map(|v| serde_json::from_str(&v).map_err(StoreError::from))
            .transpose()
    }
}
