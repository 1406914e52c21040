use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::DispatchError;
use crate::signing::DEFAULT_SIGNATURE_HEADER;
use crate::storage::{DeliveryLogStore, SubscriptionRegistry};
use crate::types::{AttemptId, DeliveryAttempt, EventPayload};
use crate::worker::{metric_inc, run_task, DeliveryReport, Task, WorkerContext};

/// Fixed user agent sent with every delivery.
pub const DEFAULT_USER_AGENT: &str = concat!("webhook-relay/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Header carrying the hex HMAC-SHA256 of the body.
    pub signature_header: String,
    pub user_agent: String,

    /// Upper bound for one outbound request, response body included.
    pub request_timeout: Duration,

    /// Maximum simultaneous outbound requests across all dispatches.
    pub max_in_flight: usize,

    /// Longest subscriber reply, in bytes, kept in a log row.
    pub max_response_bytes: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(5),
            max_in_flight: 100,
            max_response_bytes: 64 * 1024,
        }
    }
}

/// Outcome counts for one dispatch call.
///
/// Per-subscription details are only available from the delivery log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub event: String,
    pub deliveries: usize,
    pub succeeded: usize,
    pub failed: usize,

    /// Attempts that were made but could not be written to the log.
    pub unlogged: usize,
}

impl DispatchSummary {
    fn empty(event: &str) -> Self {
        Self {
            event: event.to_string(),
            ..Self::default()
        }
    }

    /// A task that never reported back: no outcome and no row.
    fn add_lost(&mut self) {
        self.deliveries += 1;
        self.failed += 1;
        self.unlogged += 1;
    }

    fn add(&mut self, report: &DeliveryReport) {
        self.deliveries += 1;
        if report.attempt.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        if !report.logged {
            self.unlogged += 1;
        }
    }
}

/// Fans events out to every matching subscription.
///
/// Each dispatch call runs to completion: all deliveries are spawned, then
/// joined, before the call returns. Nothing is retried automatically.
pub struct Dispatcher {
    registry: Arc<dyn SubscriptionRegistry>,
    ctx: Arc<WorkerContext>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        registry: Arc<dyn SubscriptionRegistry>,
        log: Arc<dyn DeliveryLogStore>,
    ) -> Self {
        Self::with_client(config, registry, log, reqwest::Client::new())
    }

    pub fn with_client(
        config: DispatcherConfig,
        registry: Arc<dyn SubscriptionRegistry>,
        log: Arc<dyn DeliveryLogStore>,
        http_client: reqwest::Client,
    ) -> Self {
        let ctx = Arc::new(WorkerContext {
            http_client,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            signature_header: config.signature_header,
            user_agent: config.user_agent,
            request_timeout: config.request_timeout,
            max_response_bytes: config.max_response_bytes,
            log,
        });

        Self { registry, ctx }
    }

    pub fn delivery_log(&self) -> Arc<dyn DeliveryLogStore> {
        self.ctx.log.clone()
    }

    /// Deliver `payload` to every active subscription of its event.
    ///
    /// Returns an error only for invalid input or when the registry cannot
    /// be read; individual delivery failures are logged, not returned.
    pub async fn dispatch(&self, payload: &EventPayload) -> Result<DispatchSummary, DispatchError> {
        let event = payload.event();
        if event.trim().is_empty() {
            return Err(DispatchError::Validation("event name is required".to_string()));
        }
        metric_inc("webhook.dispatch.received");

        let subscriptions = self
            .registry
            .find_active_subscriptions_for_event(event)
            .await?;

        if subscriptions.is_empty() {
            info!(event, "no active subscriptions for event");
            return Ok(DispatchSummary::empty(event));
        }

        let body: Arc<str> = Arc::from(payload.to_canonical_json());
        let mut set = JoinSet::new();
        for subscription in subscriptions {
            let task = Task {
                subscription,
                event: event.to_string(),
                body: body.clone(),
            };
            set.spawn(run_task(task, self.ctx.clone()));
        }

        let mut summary = DispatchSummary::empty(event);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => summary.add(&report),
                Err(err) => {
                    error!(event, "delivery task did not complete: {err}");
                    summary.add_lost();
                }
            }
        }

        info!(
            event,
            deliveries = summary.deliveries,
            succeeded = summary.succeeded,
            failed = summary.failed,
            unlogged = summary.unlogged,
            "dispatch completed"
        );
        Ok(summary)
    }

    /// Re-send the exact payload of a logged attempt.
    ///
    /// The body is re-signed with the subscription's current secret and a
    /// new attempt row is appended; the original row is left untouched.
    pub async fn replay(&self, attempt_id: &AttemptId) -> Result<DeliveryAttempt, DispatchError> {
        let original = self
            .ctx
            .log
            .get_attempt(attempt_id)
            .await?
            .ok_or(DispatchError::UnknownAttempt(*attempt_id))?;

        let subscription = self
            .registry
            .get_subscription(&original.subscription_id)
            .await?
            .filter(|s| s.active)
            .ok_or_else(|| DispatchError::InactiveSubscription(original.subscription_id.to_string()))?;

        metric_inc("webhook.replay.total");
        info!(attempt = %attempt_id, subscription = %subscription.id, "replaying delivery");

        let task = Task {
            subscription,
            event: original.event,
            body: Arc::from(original.payload),
        };
        let report = run_task(task, self.ctx.clone()).await;
        Ok(report.attempt)
    }
}
