mod support;

use std::sync::Arc;

use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use webhook_relay::insights::{DealOutcome, DealRecord, InMemoryDealSource, InsightAggregator};
use webhook_relay::server::{self, AppState};
use webhook_relay::{
    Dispatcher, DispatcherConfig, InMemoryDeliveryLog, InMemoryRegistry, Subscription,
};

use support::{unreachable_url, Receiver};

async fn spawn_app(subscriptions: Vec<Subscription>, deals: Vec<DealRecord>) -> String {
    let dispatcher = Dispatcher::new(
        DispatcherConfig::default(),
        Arc::new(InMemoryRegistry::with_subscriptions(subscriptions)),
        Arc::new(InMemoryDeliveryLog::new()),
    );
    let state = AppState {
        dispatcher: Arc::new(dispatcher),
        insights: Arc::new(InsightAggregator::new(Arc::new(InMemoryDealSource::new(deals)))),
    };

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(server::run(listener, state));
    format!("http://127.0.0.1:{port}")
}

fn won(category: &str, owner: &str, value: f64, days_ago: i64, cycle_days: i64) -> DealRecord {
    let created_at = Utc::now() - Duration::days(days_ago);
    DealRecord {
        category: Some(category.to_string()),
        outcome: DealOutcome::Won,
        value,
        owner: Some(owner.to_string()),
        created_at,
        closed_at: Some(created_at + Duration::days(cycle_days)),
    }
}

#[tokio::test]
async fn health_check_works() {
    let address = spawn_app(Vec::new(), Vec::new()).await;
    let response = reqwest::get(format!("{address}/health"))
        .await
        .expect("failed to execute request");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn dispatch_returns_200_even_when_deliveries_fail() {
    let receiver = Receiver::ok().await;
    let address = spawn_app(
        vec![
            Subscription::new("up", &receiver.url).with_event("lead.created"),
            Subscription::new("down", unreachable_url()).with_event("lead.created"),
        ],
        Vec::new(),
    )
    .await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{address}/dispatch"))
        .json(&json!({"event": "lead.created", "leadId": "L-1"}))
        .send()
        .await
        .expect("failed to execute request");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("lead.created"));

    let rows: Vec<Value> = client
        .get(format!("{address}/deliveries"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let down: Vec<Value> = client
        .get(format!("{address}/deliveries?subscription_id=down"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(down.len(), 1);
    assert_eq!(down[0]["success"], false);
    assert_eq!(down[0]["statusCode"], Value::Null);

    let delivered: Value = serde_json::from_slice(&receiver.requests().await[0].body).unwrap();
    assert_eq!(delivered, json!({"event": "lead.created", "leadId": "L-1"}));
}

#[tokio::test]
async fn dispatch_returns_500_for_missing_event() {
    let address = spawn_app(Vec::new(), Vec::new()).await;
    let client = reqwest::Client::new();
    let test_cases = vec![
        (json!({"leadId": 1}), "missing event"),
        (json!({"event": ""}), "empty event"),
        (json!({"event": 12}), "non-string event"),
    ];

    for (body, description) in test_cases {
        let response = client
            .post(format!("{address}/dispatch"))
            .json(&body)
            .send()
            .await
            .expect("failed to execute request");
        assert_eq!(
            response.status(),
            StatusCode::INTERNAL_SERVER_ERROR,
            "should have failed for {description}"
        );
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn insights_report_defined_and_absent_metrics() {
    let deals = vec![
        won("dental", "ana", 500.0, 2, 4),
        won("dental", "bo", 900.0, 3, 6),
        DealRecord {
            outcome: DealOutcome::Lost,
            closed_at: None,
            ..won("dental", "bo", 50.0, 1, 0)
        },
        won("legal", "ana", 100.0, 60, 1),
    ];
    let address = spawn_app(Vec::new(), deals).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{address}/insights"))
        .json(&json!({"period": "30d"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["bestNiche"], json!({"name": "dental", "rate": 66.7}));
    assert_eq!(body["salesCycle"], json!({"days": 5}));
    assert_eq!(body["topRep"], json!({"name": "bo", "value": 900.0}));

    let empty: Value = client
        .post(format!("{address}/insights"))
        .json(&json!({"period": "1d"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(empty, json!({"bestNiche": null, "salesCycle": null, "topRep": null}));

    let bad = client
        .post(format!("{address}/insights"))
        .json(&json!({"period": "thirty"}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn replay_of_unknown_attempt_is_404() {
    let address = spawn_app(Vec::new(), Vec::new()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{address}/deliveries/{}/replay", uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .post(format!("{address}/deliveries/not-a-uuid/replay"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
