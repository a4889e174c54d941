//! Mock HTTP polling backend for integration tests.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Clone, Default)]
struct Hits {
    metrics: Arc<AtomicUsize>,
    broken: Arc<AtomicUsize>,
}

/// Serves `/api/dashboard/metrics` (JSON with a hit counter) and
/// `/api/broken` (always 500).
pub struct MockHttpServer {
    addr: SocketAddr,
    hits: Hits,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockHttpServer {
    pub async fn start() -> Self {
        let hits = Hits::default();
        let app = Router::new()
            .route("/api/dashboard/metrics", get(metrics))
            .route("/api/broken", get(broken))
            .with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            hits,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn metrics_hits(&self) -> usize {
        self.hits.metrics.load(Ordering::SeqCst)
    }

    pub fn broken_hits(&self) -> usize {
        self.hits.broken.load(Ordering::SeqCst)
    }

    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn metrics(State(hits): State<Hits>) -> Json<serde_json::Value> {
    let n = hits.metrics.fetch_add(1, Ordering::SeqCst) + 1;
    Json(serde_json::json!({ "hits": n, "cpu": 0.25 }))
}

async fn broken(State(hits): State<Hits>) -> (StatusCode, &'static str) {
    hits.broken.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}
