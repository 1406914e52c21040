use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::DispatchError;

/// Key under which every payload carries its own event name.
pub const EVENT_FIELD: &str = "event";

/// A registered webhook destination.
///
/// Subscriptions are administered outside this crate; the dispatcher only
/// reads them. The secret is never printed by `Debug`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Logical identifier for the subscription.
    pub id: SubscriptionId,

    /// Target URL for webhook delivery. Treated as an opaque string.
    pub url: String,

    /// Optional shared secret for HMAC signing.
    #[serde(default)]
    pub secret: Option<String>,

    /// Event names this subscription receives.
    #[serde(default)]
    pub events: BTreeSet<String>,

    /// Inactive subscriptions are never dispatched to.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Subscription {
    /// Create an active, unsigned subscription with no events.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: SubscriptionId(id.into()),
            url: url.into(),
            secret: None,
            events: BTreeSet::new(),
            active: true,
        }
    }

    /// Set a secret for HMAC signing.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Subscribe to an additional event name.
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.events.insert(event.into());
        self
    }

    /// Mark the subscription active or inactive.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// True when this subscription should receive `event`.
    pub fn matches_event(&self, event: &str) -> bool {
        self.active && self.events.contains(event)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("events", &self.events)
            .field("active", &self.active)
            .finish()
    }
}

/// Unique identifier for a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a logged delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Self-describing event body.
///
/// A JSON object that always carries its event name under `"event"`.
/// The canonical text sorts object keys at every depth, so it is stable
/// however the map was built and is exactly what gets signed and sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EventPayload(Map<String, Value>);

impl EventPayload {
    /// Build a payload for `event` with the given extra fields.
    ///
    /// An `"event"` entry in `fields` is overwritten by `event`.
    pub fn new(event: impl Into<String>, fields: Map<String, Value>) -> Result<Self, DispatchError> {
        let event = event.into();
        if event.trim().is_empty() {
            return Err(DispatchError::Validation("event name is required".to_string()));
        }
        let mut body = fields;
        body.insert(EVENT_FIELD.to_string(), Value::String(event));
        Ok(Self(body))
    }

    /// Accept an inbound JSON object that names its own event.
    pub fn from_object(body: Map<String, Value>) -> Result<Self, DispatchError> {
        match body.get(EVENT_FIELD) {
            Some(Value::String(name)) if !name.trim().is_empty() => Ok(Self(body)),
            Some(Value::String(_)) | None | Some(Value::Null) => {
                Err(DispatchError::Validation("event name is required".to_string()))
            }
            Some(_) => Err(DispatchError::Validation("event name must be a string".to_string())),
        }
    }

    /// Event name carried by the payload.
    pub fn event(&self) -> &str {
        self.0
            .get(EVENT_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Canonical JSON text of the payload.
    pub fn to_canonical_json(&self) -> String {
        // A map of `Value`s always serializes.
        canonicalize(&Value::Object(self.0.clone())).to_string()
    }
}

/// Rebuild `value` with object keys inserted in sorted order.
///
/// `serde_json::Map` keeps insertion order when the `preserve_order`
/// feature is enabled anywhere in the build, so order is never left to it.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), canonicalize(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// One logged outcome of sending an event to one subscription.
///
/// Attempts are append-only: created once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub id: AttemptId,

    pub subscription_id: SubscriptionId,

    /// Event name dispatched.
    pub event: String,

    /// HTTP status, absent when no response was received.
    pub status_code: Option<u16>,

    /// True only for a completed call with a 2xx status.
    pub success: bool,

    /// Exact JSON body sent.
    pub payload: String,

    /// Response body text, or the transport error message.
    pub response: String,

    pub created_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    /// Classify a delivery failure for logging, if there was one.
    pub fn failure(&self) -> Option<DeliveryError> {
        if self.success {
            return None;
        }
        Some(match self.status_code {
            Some(status) => DeliveryError::Rejected { status },
            None => DeliveryError::Transport(self.response.clone()),
        })
    }
}

/// Why a single delivery did not succeed.
///
/// Recorded in the attempt row; never returned to dispatch callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("endpoint unreachable: {0}")]
    Transport(String),

    #[error("endpoint responded with status {status}")]
    Rejected { status: u16 },
}

/// Filter for reading the delivery log.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttemptQuery {
    pub subscription_id: Option<SubscriptionId>,
    pub event: Option<String>,
    pub limit: Option<usize>,
}

impl AttemptQuery {
    pub fn for_subscription(id: SubscriptionId) -> Self {
        Self {
            subscription_id: Some(id),
            ..Self::default()
        }
    }

    pub fn matches(&self, attempt: &DeliveryAttempt) -> bool {
        self.subscription_id
            .as_ref()
            .map_or(true, |id| id == &attempt.subscription_id)
            && self.event.as_deref().map_or(true, |e| e == attempt.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn payload_requires_event_name() {
        assert!(EventPayload::new("  ", Map::new()).is_err());
        assert!(EventPayload::from_object(object(json!({"id": 1}))).is_err());
        assert!(EventPayload::from_object(object(json!({"event": ""}))).is_err());
        assert!(EventPayload::from_object(object(json!({"event": 7}))).is_err());
    }

    #[test]
    fn payload_embeds_event_name() {
        let payload = EventPayload::new("lead.created", object(json!({"event": "spoofed", "id": 3}))).unwrap();
        assert_eq!(payload.event(), "lead.created");
        assert_eq!(payload.fields()["id"], json!(3));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let payload = EventPayload::from_object(object(json!({
            "zeta": [1, 2.5, null],
            "event": "deal.won",
            "alpha": {"b": true, "a": "x"}
        })))
        .unwrap();

        assert_eq!(
            payload.to_canonical_json(),
            r#"{"alpha":{"a":"x","b":true},"event":"deal.won","zeta":[1,2.5,null]}"#
        );
    }

    #[test]
    fn canonical_json_sorts_keys_inside_arrays() {
        let payload = EventPayload::from_object(object(json!({
            "items": [{"sku": "A-1", "qty": 2}, {"price": 9.5, "id": 3}],
            "event": "order.placed"
        })))
        .unwrap();

        assert_eq!(
            payload.to_canonical_json(),
            r#"{"event":"order.placed","items":[{"qty":2,"sku":"A-1"},{"id":3,"price":9.5}]}"#
        );
    }

    #[test]
    fn inactive_subscription_never_matches() {
        let sub = Subscription::new("s1", "http://example.com")
            .with_event("deal.won")
            .with_active(false);
        assert!(!sub.matches_event("deal.won"));
        assert!(sub.clone().with_active(true).matches_event("deal.won"));
        assert!(!sub.with_active(true).matches_event("deal.lost"));
    }

    #[test]
    fn debug_redacts_secret() {
        let sub = Subscription::new("s1", "http://example.com").with_secret("hunter2");
        let printed = format!("{:?}", sub);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("[REDACTED]"));
    }

    #[test]
    fn failure_classification_keeps_asymmetry() {
        let mut attempt = DeliveryAttempt {
            id: AttemptId::new(),
            subscription_id: SubscriptionId("s1".into()),
            event: "deal.won".into(),
            status_code: Some(503),
            success: false,
            payload: "{}".into(),
            response: "try later".into(),
            created_at: Utc::now(),
        };
        assert_eq!(attempt.failure(), Some(DeliveryError::Rejected { status: 503 }));

        attempt.status_code = None;
        attempt.response = "connection refused".into();
        assert_eq!(
            attempt.failure(),
            Some(DeliveryError::Transport("connection refused".into()))
        );
    }
}
