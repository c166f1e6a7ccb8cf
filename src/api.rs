// ===============================
// src/api.rs (REST surface)
// ===============================
//
// Thin HTTP layer over the pipeline: order ingestion plus the read-side
// views. Response shapes use the same camelCase JSON as the event wire
// format. Route labels (not raw paths) feed the request counter so symbol
// lookups do not explode metric cardinality.
//
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use chrono::Utc;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use tracing::{error, info};

use crate::analytics;
use crate::broker::Broker;
use crate::domain::SymbolTotals;
use crate::ingest::{self, IngestError, TradeRequest};
use crate::metrics::HTTP_REQUESTS;
use crate::store::PositionStore;
use crate::tradelog::TradeLog;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub store: Arc<PositionStore>,
    pub log: Arc<TradeLog>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct ValidationBody {
    errors: HashMap<&'static str, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DailyAnalyticsResponse {
    daily_analytics: HashMap<String, SymbolTotals>,
}

pub async fn serve(state: AppState, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, state.clone()))) }
    });

    info!(%addr, "api listening");
    if let Err(e) = Server::bind(&addr).serve(make_svc).await {
        error!(?e, "api server error");
    }
}

async fn handle(req: Request<Body>, state: AppState) -> Result<Response<Body>, Infallible> {
    let (route, resp) = route(req, &state).await;
    HTTP_REQUESTS
        .with_label_values(&[route, resp.status().as_str()])
        .inc();
    Ok(resp)
}

async fn route(req: Request<Body>, state: &AppState) -> (&'static str, Response<Body>) {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method, path.as_str()) {
        (Method::POST, "/api/trade") => ("trade", post_trade(req, state).await),
        (Method::GET, "/api/positions") => ("positions", json(StatusCode::OK, &state.store.list_all())),
        (Method::GET, p) if p.starts_with("/api/positions/") => {
            let symbol = p.trim_start_matches("/api/positions/");
            ("position", json(StatusCode::OK, &state.store.get(symbol)))
        }
        (Method::GET, "/api/analytics/daily") => {
            let totals = analytics::daily_totals(&state.log, Utc::now().date_naive()).await;
            (
                "analytics_daily",
                json(StatusCode::OK, &DailyAnalyticsResponse { daily_analytics: totals }),
            )
        }
        (Method::GET, "/api/analytics/trades/today") => {
            let trades = analytics::trades_for_date(&state.log, Utc::now().date_naive()).await;
            ("trades_today", json(StatusCode::OK, &trades))
        }
        _ => (
            "unmatched",
            json(StatusCode::NOT_FOUND, &ErrorBody { error: "not found".into() }),
        ),
    }
}

async fn post_trade(req: Request<Body>, state: &AppState) -> Response<Body> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b,
        Err(e) => {
            return json(
                StatusCode::BAD_REQUEST,
                &ErrorBody { error: format!("unreadable body: {e}") },
            )
        }
    };
    let trade_req: TradeRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return json(
                StatusCode::BAD_REQUEST,
                &ErrorBody { error: format!("invalid json: {e}") },
            )
        }
    };

    match ingest::place_trade(&state.broker, trade_req) {
        Ok(event) => json(StatusCode::CREATED, &event),
        Err(IngestError::Validation(errors)) => {
            let errors: HashMap<&'static str, String> =
                errors.into_iter().map(|e| (e.field, e.message)).collect();
            json(StatusCode::BAD_REQUEST, &ValidationBody { errors })
        }
        Err(IngestError::Publish(e)) => {
            error!(error = %e, "publish failed");
            json(
                StatusCode::SERVICE_UNAVAILABLE,
                &ErrorBody { error: format!("publish failed: {e}") },
            )
        }
    }
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    // serialization of our own response types cannot realistically fail;
    // fall back to an empty object rather than panic in the request path
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeadLetter;
    use tokio::sync::mpsc;

    async fn test_state(dir: &std::path::Path) -> (AppState, mpsc::Receiver<DeadLetter>) {
        let (dead_tx, dead_rx) = mpsc::channel(4);
        let state = AppState {
            broker: Arc::new(Broker::new(1, 16, 3, dead_tx)),
            store: Arc::new(PositionStore::new()),
            log: Arc::new(TradeLog::open(dir.join("trades.jsonl")).await.unwrap()),
        };
        (state, dead_rx)
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    fn post(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response<Body>) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn post_trade_returns_201_with_the_event() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _dead_rx) = test_state(dir.path()).await;

        let req = post("/api/trade", r#"{"symbol":"XYZ","side":"BUY","quantity":10,"price":100.0}"#);
        let (route, resp) = route(req, &state).await;
        assert_eq!(route, "trade");
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body = body_json(resp).await;
        assert_eq!(body["symbol"], "XYZ");
        assert_eq!(body["side"], "BUY");
        assert!(body.get("tradeId").is_some());
    }

    #[tokio::test]
    async fn invalid_trade_gets_400_with_field_messages() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _dead_rx) = test_state(dir.path()).await;

        let req = post("/api/trade", r#"{"symbol":"XYZ","side":"BUY","quantity":0,"price":100.0}"#);
        let (_, resp) = route(req, &state).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert!(body["errors"]["quantity"].as_str().unwrap().contains("positive"));
    }

    #[tokio::test]
    async fn unknown_position_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _dead_rx) = test_state(dir.path()).await;

        let (route, resp) = route(get("/api/positions/NOPE"), &state).await;
        assert_eq!(route, "position");
        let body = body_json(resp).await;
        assert_eq!(body["netQuantity"], 0);
        assert_eq!(body["pnl"], 0.0);
    }

    #[tokio::test]
    async fn full_queue_maps_to_503() {
        let dir = tempfile::tempdir().unwrap();
        let (dead_tx, _dead_rx) = mpsc::channel(4);
        let state = AppState {
            broker: Arc::new(Broker::new(1, 1, 3, dead_tx)),
            store: Arc::new(PositionStore::new()),
            log: Arc::new(TradeLog::open(dir.path().join("trades.jsonl")).await.unwrap()),
        };

        let body = r#"{"symbol":"XYZ","side":"SELL","quantity":1,"price":1.0}"#;
        let (_, resp) = route(post("/api/trade", body), &state).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let (_, resp) = route(post("/api/trade", body), &state).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unmatched_route_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _dead_rx) = test_state(dir.path()).await;
        let (route, resp) = route(get("/api/nope"), &state).await;
        assert_eq!(route, "unmatched");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
