//! End-to-end checks of the operational surface against an in-process
//! server backed by `MemoryStore`.

#![allow(clippy::panic, missing_docs)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::Message;

use marketplace_reconciler::api;
use marketplace_reconciler::app_state::AppState;
use marketplace_reconciler::domain::events::AuctionCreated;
use marketplace_reconciler::domain::{Auction, EventBus, EventPayload};
use marketplace_reconciler::metadata::HttpMetadataFetcher;
use marketplace_reconciler::persistence::memory::MemoryStore;
use marketplace_reconciler::scheduler::{Pipeline, ReconcileScheduler};

async fn spawn_server(store: MemoryStore) -> SocketAddr {
    let event_bus = EventBus::new(64);
    let fetcher = assert_ok!(HttpMetadataFetcher::new(
        Duration::from_secs(1),
        "https://ipfs.io"
    ));
    let pipeline = Pipeline::standard(fetcher, 100, &event_bus);
    let scheduler = Arc::new(ReconcileScheduler::new(store, pipeline));
    let app = api::build_app(AppState {
        reconciler: scheduler,
        event_bus,
    });

    let listener = assert_ok!(tokio::net::TcpListener::bind("127.0.0.1:0").await);
    let addr = assert_ok!(listener.local_addr());
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

async fn get_json(url: String) -> (reqwest::StatusCode, Value) {
    let response = assert_ok!(reqwest::get(url).await);
    let status = response.status();
    (status, assert_ok!(response.json::<Value>().await))
}

#[tokio::test]
async fn health_reports_version() {
    let addr = spawn_server(MemoryStore::new()).await;
    let (status, body) = get_json(format!("http://{addr}/health")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body.get("status"), Some(&json!("healthy")));
    assert_eq!(body.get("version"), Some(&json!(env!("CARGO_PKG_VERSION"))));
}

#[tokio::test]
async fn manual_run_confirms_auction_and_streams_change() {
    let store = MemoryStore::new();
    let auction_id = store.add_auction(Auction::pending(0, "Spring drop", "0xabc")).await;
    store
        .append_event(
            AuctionCreated::TABLE,
            "0xabc",
            json!({
                "auctionId": 42,
                "auctionOwner": "0xOwNeR",
                "numberOfSlots": 1,
                "startTime": 1_700_000_000,
                "endTime": 1_700_086_400,
            }),
        )
        .await;
    let addr = spawn_server(store.clone()).await;

    let (mut ws, _) = assert_ok!(tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await);
    assert_ok!(
        ws.send(Message::text(
            r#"{"command":"subscribe","kinds":["auction"]}"#
        ))
        .await
    );
    let Ok(Some(Ok(Message::Text(ack)))) =
        tokio::time::timeout(Duration::from_secs(5), ws.next()).await
    else {
        panic!("no subscribe response");
    };
    let ack: Value = assert_ok!(serde_json::from_str(ack.as_str()));
    assert_eq!(ack.get("type"), Some(&json!("response")));

    let client = reqwest::Client::new();
    let response = assert_ok!(
        client
            .post(format!("http://{addr}/api/v1/reconciler/run"))
            .send()
            .await
    );
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let report: Value = assert_ok!(response.json().await);
    let Some(stages) = report.get("stages").and_then(Value::as_array) else {
        panic!("report has no stages: {report}");
    };
    assert_eq!(stages.len(), 6);
    let Some(created) = stages
        .iter()
        .find(|s| s.get("stage") == Some(&json!("auction_created"))) else {
        panic!("auction_created stage missing");
    };
    assert_eq!(created.pointer("/report/applied"), Some(&json!(1)));

    let Ok(Some(Ok(Message::Text(event)))) =
        tokio::time::timeout(Duration::from_secs(5), ws.next()).await
    else {
        panic!("no change streamed");
    };
    let event: Value = assert_ok!(serde_json::from_str(event.as_str()));
    assert_eq!(event.get("type"), Some(&json!("event")));
    assert_eq!(event.pointer("/payload/change_type"), Some(&json!("auction_confirmed")));
    assert_eq!(event.pointer("/payload/auction_id"), Some(&json!(auction_id)));
    assert_eq!(event.pointer("/payload/owner"), Some(&json!("0xowner")));

    let auctions = store.auctions().await;
    let Some(auction) = auctions.first() else {
        panic!("auction missing");
    };
    assert!(auction.on_chain);
    assert_eq!(auction.on_chain_id, Some(42));

    let (status, body) = get_json(format!("http://{addr}/api/v1/reconciler/status")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body.get("passes_completed"), Some(&json!(1)));
    assert_eq!(body.get("running"), Some(&json!(false)));
}

#[tokio::test]
async fn unmatched_event_survives_manual_run() {
    let store = MemoryStore::new();
    let event_id = store
        .append_event(
            AuctionCreated::TABLE,
            "0xnobody",
            json!({
                "auctionId": 7,
                "auctionOwner": "0xowner",
                "startTime": 1,
                "endTime": 2,
            }),
        )
        .await;
    let addr = spawn_server(store.clone()).await;

    let response = assert_ok!(
        reqwest::Client::new()
            .post(format!("http://{addr}/api/v1/reconciler/run"))
            .send()
            .await
    );
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let processed = store
        .event(AuctionCreated::TABLE, event_id)
        .await
        .map(|e| e.processed);
    assert_eq!(processed, Some(false));
    assert!(store.auctions().await.is_empty());
}
