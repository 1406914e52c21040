use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;
use crate::types::{AttemptId, AttemptQuery, DeliveryAttempt, Subscription, SubscriptionId};

/// Read side of the subscription registry.
///
/// Subscriptions are created and edited elsewhere; the dispatcher only
/// looks them up.
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    /// Active subscriptions whose event set contains `event`. Order is not
    /// significant.
    async fn find_active_subscriptions_for_event(
        &self,
        event: &str,
    ) -> Result<Vec<Subscription>, StoreError>;

    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>, StoreError>;
}

/// Append-only store of delivery attempts.
///
/// Implementations must accept concurrent inserts from sibling deliveries.
#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StoreError>;

    /// Attempts matching `query`, newest first.
    async fn attempts(&self, query: &AttemptQuery) -> Result<Vec<DeliveryAttempt>, StoreError>;

    async fn get_attempt(&self, id: &AttemptId) -> Result<Option<DeliveryAttempt>, StoreError>;
}

/// In-memory registry for lightweight deployments and tests.
#[derive(Default)]
pub struct InMemoryRegistry {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscriptions(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        let map = subscriptions
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        Self {
            subscriptions: RwLock::new(map),
        }
    }

    /// Insert or replace a subscription.
    pub async fn upsert(&self, subscription: Subscription) {
        self.subscriptions
            .write()
            .await
            .insert(subscription.id.clone(), subscription);
    }

    pub async fn remove(&self, id: &SubscriptionId) -> bool {
        self.subscriptions.write().await.remove(id).is_some()
    }

    pub async fn list(&self) -> Vec<Subscription> {
        let mut items: Vec<_> = self.subscriptions.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }
}

#[async_trait]
impl SubscriptionRegistry for InMemoryRegistry {
    async fn find_active_subscriptions_for_event(
        &self,
        event: &str,
    ) -> Result<Vec<Subscription>, StoreError> {
        let guard = self.subscriptions.read().await;
        Ok(guard
            .values()
            .filter(|s| s.matches_event(event))
            .cloned()
            .collect())
    }

    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>, StoreError> {
        Ok(self.subscriptions.read().await.get(id).cloned())
    }
}

/// In-memory delivery log.
#[derive(Default)]
pub struct InMemoryDeliveryLog {
    attempts: Mutex<Vec<DeliveryAttempt>>,
}

impl InMemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.attempts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.attempts.lock().await.is_empty()
    }
}

#[async_trait]
impl DeliveryLogStore for InMemoryDeliveryLog {
    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StoreError> {
        self.attempts.lock().await.push(attempt.clone());
        Ok(())
    }

    async fn attempts(&self, query: &AttemptQuery) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let guard = self.attempts.lock().await;
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(guard
            .iter()
            .rev()
            .filter(|a| query.matches(a))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_attempt(&self, id: &AttemptId) -> Result<Option<DeliveryAttempt>, StoreError> {
        let guard = self.attempts.lock().await;
        Ok(guard.iter().find(|a| &a.id == id).cloned())
    }
}
