use std::sync::Arc;

use serde_json::json;
use webhook_relay::{
    AttemptQuery, DeliveryLogStore, Dispatcher, DispatcherConfig, EventPayload, InMemoryDeliveryLog,
    InMemoryRegistry, Subscription,
};

#[tokio::main]
async fn main() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry
        .upsert(
            Subscription::new("billing", "https://example.com/webhook")
                .with_secret("supersecret")
                .with_event("invoice.paid"),
        )
        .await;

    let log = Arc::new(InMemoryDeliveryLog::new());
    let dispatcher = Dispatcher::new(DispatcherConfig::default(), registry, log.clone());

    let serde_json::Value::Object(fields) = json!({"invoiceId": 123, "amount": 49.0}) else {
        unreachable!()
    };
    let payload = EventPayload::new("invoice.paid", fields).expect("valid event name");

    match dispatcher.dispatch(&payload).await {
        Ok(summary) => println!("{summary:?}"),
        Err(err) => eprintln!("dispatch failed: {err}"),
    }

    if let Ok(rows) = log.attempts(&AttemptQuery::default()).await {
        for row in rows {
            println!("{} -> {:?} {}", row.subscription_id, row.status_code, row.response);
        }
    }
}
