//! End-to-end tests against an in-process monitoring server
//!
//! The server speaks the live-data protocol over a real WebSocket and serves
//! the paginated history endpoints over HTTP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query as UrlQuery};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use enginewatch::{
    Config, ConnectionState, CredentialProvider, ExportFormat, MonitoringService, Query,
    SubscribeOptions,
};

const TOKEN: &str = "secret";

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route("/ws", get(live_socket))
        .route("/ws-closing", get(closing_socket))
        .route("/api/v1/equipment/:id/metrics", get(history))
        .route("/api/v1/equipment/:id/metrics/export", get(export));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn authorized(params: &HashMap<String, String>) -> bool {
    params.get("token").map(String::as_str) == Some(TOKEN)
}

async fn live_socket(
    ws: WebSocketUpgrade,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
) -> Response {
    if !authorized(&params) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(serve_live)
}

async fn serve_live(mut socket: WebSocket) {
    while let Some(Ok(Message::Text(text))) = socket.recv().await {
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        if frame["type"] != "SUBSCRIPTION_REQUEST" {
            continue;
        }
        let Some(device) = frame["payload"]["devices"][0].as_str().map(str::to_string) else {
            continue;
        };

        let ack = json!({
            "type": "SUBSCRIPTION_ACK",
            "timestamp": 1,
            "requestId": frame["requestId"],
            "messageId": "srv-ack",
            "payload": {"subscriptionId": format!("sub-{}", device)}
        });
        let update = json!({
            "type": "DATA_UPDATE",
            "timestamp": 2,
            "messageId": "srv-data",
            "payload": {
                "deviceId": device,
                "data": [
                    {"timestamp": 100, "value": 640.0, "unit": "rpm", "quality": "normal",
                     "equipmentId": device, "metricType": "rpm"},
                    {"timestamp": 101, "value": 642.5, "unit": "rpm", "quality": "questionable",
                     "equipmentId": device, "metricType": "rpm"}
                ]
            }
        });

        for message in [ack, update] {
            if socket.send(Message::Text(message.to_string())).await.is_err() {
                return;
            }
        }
    }
}

async fn closing_socket(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: 1000,
                reason: "maintenance".into(),
            })))
            .await;
    })
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", TOKEN))
        .unwrap_or(false)
}

async fn history(
    Path(id): Path<String>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let metric = params.get("metricType").cloned().unwrap_or_default();
    let start: i64 = params
        .get("startTime")
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();

    Json(json!({
        "items": [
            {"timestamp": start + 10, "value": 380.0, "unit": "C", "quality": "normal",
             "equipmentId": id, "metricType": metric},
            {"timestamp": start + 20, "value": 382.0, "unit": "C", "quality": "estimated",
             "equipmentId": id, "metricType": metric}
        ],
        "total": 2,
        "page": 1,
        "pageSize": 1000,
        "totalPages": 1
    }))
    .into_response()
}

async fn export(
    Path(id): Path<String>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
) -> String {
    format!(
        "equipment,format\n{},{}\n",
        id,
        params.get("format").cloned().unwrap_or_default()
    )
}

async fn service(addr: SocketAddr, path: &str) -> MonitoringService {
    let mut config = Config::default();
    config.connection.url = format!("ws://{}{}", addr, path);
    config.connection.max_reconnect_attempts = 0;
    config.api.base_url = format!("http://{}", addr);

    let credentials: CredentialProvider = Arc::new(|| Some(TOKEN.to_string()));
    MonitoringService::from_config(config, Some(credentials))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_subscribe_and_stream_over_websocket() {
    let addr = spawn_server().await;
    let service = service(addr, "/ws").await;
    let mut updates = service.live().subscribe();

    service.connect(TOKEN).await.unwrap();
    assert_eq!(service.state(), ConnectionState::Connected);

    let subscription = service
        .subscribe(
            &["ME-1".to_string()],
            &["rpm".to_string()],
            SubscribeOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(subscription.subscription_id.as_deref(), Some("sub-ME-1"));

    let update = tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.device_id, "ME-1");
    assert_eq!(update.readings.len(), 2);

    let tally = service.live().quality("ME-1", "rpm").await.unwrap();
    assert_eq!((tally.total, tally.normal, tally.questionable), (2, 1, 1));

    service.shutdown().await;
}

#[tokio::test]
async fn test_history_query_cached_over_http() {
    let addr = spawn_server().await;
    let service = service(addr, "/ws").await;
    let query = Query::new("ME-1", 1_000, 2_000)
        .unwrap()
        .metrics(["exhaust_temp", "cylinder_temp"]);

    let first = service.execute_query(&query).await.unwrap();
    assert!(!first.cached);
    assert_eq!(first.total, 4);
    assert_eq!(first.data_points.len(), 4);
    assert!(first
        .data_points
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));

    let second = service.execute_query(&query).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.data_points, first.data_points);

    let stats = service.cache().stats().await;
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test]
async fn test_export_over_http() {
    let addr = spawn_server().await;
    let service = service(addr, "/ws").await;
    let query = Query::new("ME 1", 1_000, 2_000).unwrap().metric("rpm");

    let blob = service.export(&query, ExportFormat::Excel).await.unwrap();
    assert_eq!(String::from_utf8(blob).unwrap(), "equipment,format\nME 1,xlsx\n");
}

#[tokio::test]
async fn test_server_normal_close_is_not_retried() {
    let addr = spawn_server().await;
    let service = service(addr, "/ws-closing").await;

    service.connect(TOKEN).await.unwrap();

    let mut state = service.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
}
