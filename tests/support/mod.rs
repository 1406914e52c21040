#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::HeaderMap,
    http::StatusCode,
    routing::post,
    Router,
};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// One request seen by a test receiver.
#[derive(Debug, Clone)]
pub struct Captured {
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone)]
struct ReceiverState {
    status: StatusCode,
    reply: &'static str,
    delay: Duration,
    captured: Arc<Mutex<Vec<Captured>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// A subscriber endpoint running on a random local port.
pub struct Receiver {
    pub url: String,
    captured: Arc<Mutex<Vec<Captured>>>,
    peak: Arc<AtomicUsize>,
}

impl Receiver {
    pub async fn ok() -> Self {
        Self::spawn(StatusCode::OK, "received", Duration::ZERO).await
    }

    pub async fn spawn(status: StatusCode, reply: &'static str, delay: Duration) -> Self {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let peak = Arc::new(AtomicUsize::new(0));
        let state = ReceiverState {
            status,
            reply,
            delay,
            captured: captured.clone(),
            active: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        };
        let app = Router::new()
            .route("/hook", post(handle))
            .route("/stalled", post(stalled))
            .with_state(state);

        Self::serve(app, captured, peak).await
    }

    /// Answers 200 at once, then stalls for `delay` before finishing the body.
    pub async fn stalled_body(delay: Duration) -> Self {
        let receiver = Self::spawn(StatusCode::OK, "", delay).await;
        Self {
            url: receiver.url.replace("/hook", "/stalled"),
            ..receiver
        }
    }

    async fn serve(
        app: Router,
        captured: Arc<Mutex<Vec<Captured>>>,
        peak: Arc<AtomicUsize>,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind receiver");
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://127.0.0.1:{port}/hook"),
            captured,
            peak,
        }
    }

    pub async fn requests(&self) -> Vec<Captured> {
        self.captured.lock().await.clone()
    }

    /// Most requests this receiver was handling at the same moment.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

async fn handle(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let now = state.active.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(now, Ordering::SeqCst);
    state.captured.lock().await.push(Captured { headers, body });
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    state.active.fetch_sub(1, Ordering::SeqCst);
    (state.status, state.reply)
}

async fn stalled(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Body) {
    state.captured.lock().await.push(Captured { headers, body });
    let delay = state.delay;
    let chunks = futures::stream::once(async { Ok::<_, Infallible>(Bytes::from_static(b"partial")) })
        .chain(futures::stream::once(async move {
            tokio::time::sleep(delay).await;
            Ok(Bytes::from_static(b" reply"))
        }));
    (StatusCode::OK, Body::from_stream(chunks))
}

/// URL of a local port with nothing listening on it.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/hook")
}
