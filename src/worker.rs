use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::signing::build_signature_header;
use crate::storage::DeliveryLogStore;
use crate::types::{AttemptId, DeliveryAttempt, Subscription};

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc(_name: &'static str) {}

/// Shared, read-only context for all delivery tasks.
pub struct WorkerContext {
    pub http_client: reqwest::Client,

    /// Global cap on simultaneous outbound requests.
    pub in_flight: Arc<Semaphore>,

    pub signature_header: String,
    pub user_agent: String,
    pub request_timeout: Duration,

    /// Bytes of the subscriber's reply kept in the log row.
    pub max_response_bytes: usize,

    pub log: Arc<dyn DeliveryLogStore>,
}

/// A unit of work: one event body for one subscription.
#[derive(Debug, Clone)]
pub struct Task {
    pub subscription: Subscription,
    pub event: String,

    /// Canonical JSON, signed and sent byte for byte.
    pub body: Arc<str>,
}

/// What happened to one task.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub attempt: DeliveryAttempt,

    /// False when the attempt could not be written to the log.
    pub logged: bool,
}

/// Deliver one task and log its attempt.
///
/// Never fails: transport errors, non-2xx responses and even a panic in the
/// send path all become a failed attempt row. A log store that errors or
/// panics leaves the report marked as unlogged.
pub async fn run_task(task: Task, ctx: Arc<WorkerContext>) -> DeliveryReport {
    let attempt = match AssertUnwindSafe(deliver(&task, &ctx)).catch_unwind().await {
        Ok(attempt) => attempt,
        Err(_) => {
            error!(subscription = %task.subscription.id, event = %task.event, "delivery task panicked");
            failed_attempt(&task, "delivery aborted unexpectedly".to_string())
        }
    };

    if attempt.success {
        metric_inc("webhook.delivery.success");
        debug!(
            subscription = %attempt.subscription_id,
            status = ?attempt.status_code,
            "webhook delivered"
        );
    } else {
        metric_inc("webhook.delivery.failure");
        if let Some(failure) = attempt.failure() {
            warn!(subscription = %attempt.subscription_id, event = %attempt.event, "{failure}");
        }
    }

    let logged = match AssertUnwindSafe(ctx.log.record_attempt(&attempt))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            metric_inc("webhook.log.failure");
            error!(
                attempt = %attempt.id,
                subscription = %attempt.subscription_id,
                "failed to record delivery attempt: {err}"
            );
            false
        }
        Err(_) => {
            metric_inc("webhook.log.failure");
            error!(
                attempt = %attempt.id,
                subscription = %attempt.subscription_id,
                "delivery log panicked while recording attempt"
            );
            false
        }
    };

    DeliveryReport { attempt, logged }
}

/// Sign, send and capture a single delivery.
async fn deliver(task: &Task, ctx: &WorkerContext) -> DeliveryAttempt {
    let signature = build_signature_header(&task.subscription, &ctx.signature_header, task.body.as_bytes());

    let mut request = ctx
        .http_client
        .post(&task.subscription.url)
        .timeout(ctx.request_timeout)
        .header(CONTENT_TYPE, "application/json")
        .header(USER_AGENT, ctx.user_agent.as_str())
        .body(task.body.to_string());

    if let Some((name, value)) = signature {
        request = request.header(name, value);
    }

    let response = {
        // A closed semaphore is never produced; send without a permit if it were.
        let _permit = ctx.in_flight.acquire().await.ok();
        request.send().await
    };

    match response {
        Ok(resp) => {
            let status = resp.status();
            // The exchange only completes once the reply has been read.
            match read_capped(resp, ctx.max_response_bytes).await {
                Ok(body) => DeliveryAttempt {
                    id: AttemptId::new(),
                    subscription_id: task.subscription.id.clone(),
                    event: task.event.clone(),
                    status_code: Some(status.as_u16()),
                    success: status.is_success(),
                    payload: task.body.to_string(),
                    response: body,
                    created_at: Utc::now(),
                },
                Err(err) => failed_attempt(
                    task,
                    format!("failed to read response body: {}", transport_error_message(&err)),
                ),
            }
        }
        Err(err) => failed_attempt(task, transport_error_message(&err)),
    }
}

/// Read at most `limit` bytes of the reply; the rest is discarded unread.
async fn read_capped(mut resp: reqwest::Response, limit: usize) -> Result<String, reqwest::Error> {
    let mut buf: Vec<u8> = Vec::new();
    while buf.len() < limit {
        match resp.chunk().await? {
            Some(chunk) => {
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            None => break,
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn failed_attempt(task: &Task, message: String) -> DeliveryAttempt {
    DeliveryAttempt {
        id: AttemptId::new(),
        subscription_id: task.subscription.id.clone(),
        event: task.event.clone(),
        status_code: None,
        success: false,
        payload: task.body.to_string(),
        response: message,
        created_at: Utc::now(),
    }
}

fn transport_error_message(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_builder() {
        format!("invalid request: {err}")
    } else {
        err.to_string()
    }
}
