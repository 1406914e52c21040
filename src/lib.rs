//! Signed multi-endpoint webhook fan-out with durable delivery logs.
//!
//! An event is delivered to every active subscription whose event set
//! contains its name. Each delivery runs as its own task; every attempt,
//! successful or not, is appended to a [`DeliveryLogStore`].
//!
//! ## Guarantees
//! - Exactly one log row per matching subscription per dispatch
//! - The signed bytes are the sent bytes
//! - One failing endpoint never affects its siblings
//!
//! ## Non-Guarantees
//! - Automatic retries (use [`Dispatcher::replay`] or re-emit the event)
//! - Ordering across subscriptions
//! - Cancellation of in-flight deliveries
//!
//! The crate also carries a small [`insights`] module that derives sales
//! metrics over a time window of deal records.

mod dispatcher;
mod worker;
mod types;
mod error;
mod signing;
mod storage;

pub mod config;
pub mod insights;
pub mod server;
pub mod telemetry;

#[cfg(feature = "redis")]
mod storage_redis;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatchSummary, DEFAULT_USER_AGENT};
pub use types::{
    AttemptId,
    AttemptQuery,
    DeliveryAttempt,
    DeliveryError,
    EventPayload,
    Subscription,
    SubscriptionId,
    EVENT_FIELD,
};
pub use error::{DispatchError, InsightError, StoreError};
pub use storage::{DeliveryLogStore, InMemoryDeliveryLog, InMemoryRegistry, SubscriptionRegistry};
pub use signing::{
    compute_signature,
    verify_signature,
    verify_webhook_request,
    VerificationError,
    DEFAULT_SIGNATURE_HEADER,
};

#[cfg(feature = "redis")]
pub use storage_redis::RedisStorage;

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStorage;
