use std::collections::VecDeque;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use lexicon_sync::server::{self, AppState};
use lexicon_sync::sync::protocol::{EventAction, ServerEvent, SseParser};
use lexicon_sync::ContentStore;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;

async fn spawn_server() -> (String, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let state = AppState::new(ContentStore::in_memory());

    tokio::spawn(server::serve(listener, state.clone()));
    (base, state)
}

async fn version(http: &reqwest::Client, base: &str) -> u64 {
    let body: Value = http
        .get(format!("{base}/snapshot"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["data"]["version"].as_u64().unwrap()
}

/// Reads typed frames off an open `/events` response
struct EventReader {
    body: BoxStream<'static, reqwest::Result<axum::body::Bytes>>,
    parser: SseParser,
    pending: VecDeque<ServerEvent>,
}

impl EventReader {
    async fn open(http: &reqwest::Client, base: &str) -> Self {
        let response = http.get(format!("{base}/events")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );

        Self {
            body: response.bytes_stream().boxed(),
            parser: SseParser::new(),
            pending: VecDeque::new(),
        }
    }

    async fn next(&mut self) -> ServerEvent {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some(event) = self.pending.pop_front() {
                    return event;
                }
                let chunk = self.body.next().await.expect("stream ended").unwrap();
                self.pending.extend(
                    self.parser
                        .push(&chunk)
                        .iter()
                        .filter_map(ServerEvent::from_frame),
                );
            }
        })
        .await
        .expect("no event within 5s")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_assigns_id_bumps_version_and_notifies_listeners() {
    let (base, _state) = spawn_server().await;
    let http = reqwest::Client::new();
    let before = version(&http, &base).await;

    let mut listener = EventReader::open(&http, &base).await;
    assert_eq!(listener.next().await.version(), before);

    let response = http
        .post(format!("{base}/words"))
        .json(&json!({ "id": "", "term": "ado", "language": "chakma" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    let id = body["data"]["entry"]["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(body["data"]["version"].as_u64(), Some(before + 1));
    assert_eq!(version(&http, &base).await, before + 1);

    match listener.next().await {
        ServerEvent::ContentUpdated(event) => {
            assert_eq!(event.id, id);
            assert_eq!(event.version, before + 1);
            assert_eq!(event.action, EventAction::Created);
            assert_eq!(event.collection.as_str(), "words");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_natural_key_is_rejected_without_version_change() {
    let (base, state) = spawn_server().await;
    let http = reqwest::Client::new();
    let before = version(&http, &base).await;
    let mut listener = EventReader::open(&http, &base).await;
    listener.next().await;

    // Seeded as "mui"; keys ignore case and surrounding whitespace
    let response = http
        .post(format!("{base}/words"))
        .json(&json!({ "term": " MUI ", "language": "Chakma" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("conflict"));

    assert_eq!(version(&http, &base).await, before);
    assert_eq!(state.broadcaster.channel_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_requests_never_touch_the_store() {
    let (base, _state) = spawn_server().await;
    let http = reqwest::Client::new();
    let before = version(&http, &base).await;

    let unknown = http.get(format!("{base}/quizzes")).send().await.unwrap();
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let missing = http.get(format!("{base}/words/nope")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let malformed = http
        .post(format!("{base}/characters"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let blank = http
        .post(format!("{base}/words"))
        .json(&json!({ "term": "   ", "language": "chakma" }))
        .send()
        .await
        .unwrap();
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let delete_missing = http
        .delete(format!("{base}/words/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(delete_missing.status(), StatusCode::NOT_FOUND);

    assert_eq!(version(&http, &base).await, before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_and_delete_bump_the_version() {
    let (base, _state) = spawn_server().await;
    let http = reqwest::Client::new();

    let list: Value = http
        .get(format!("{base}/words"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let pani = list["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|w| w["term"] == "pani")
        .unwrap()
        .clone();
    let id = pani["id"].as_str().unwrap();
    let before = version(&http, &base).await;

    let updated: Value = http
        .put(format!("{base}/words/{id}"))
        .json(&json!({ "id": id, "term": "pani", "language": "chakma", "definition": "water, drinking water" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["data"]["version"].as_u64(), Some(before + 1));
    assert_eq!(updated["data"]["entry"]["definition"], "water, drinking water");
    assert_eq!(updated["data"]["entry"]["createdAt"], pani["createdAt"]);

    let mismatched = http
        .put(format!("{base}/words/{id}"))
        .json(&json!({ "id": "other", "term": "pani", "language": "chakma" }))
        .send()
        .await
        .unwrap();
    assert_eq!(mismatched.status(), StatusCode::BAD_REQUEST);

    let deleted: Value = http
        .delete(format!("{base}/words/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["data"]["id"], id);
    assert_eq!(deleted["data"]["version"].as_u64(), Some(before + 2));

    let gone = http.get(format!("{base}/words/{id}")).send().await.unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    assert_eq!(version(&http, &base).await, before + 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn search_and_cache_headers() {
    let (base, _state) = spawn_server().await;
    let http = reqwest::Client::new();

    let response = http
        .get(format!("{base}/words?query=WATER"))
        .send()
        .await
        .unwrap();
    let headers = response.headers().clone();
    assert_eq!(
        headers["cache-control"].to_str().unwrap(),
        "no-store, no-cache, must-revalidate"
    );
    assert_eq!(headers["pragma"].to_str().unwrap(), "no-cache");
    assert_eq!(headers["expires"].to_str().unwrap(), "0");

    let body: Value = response.json().await.unwrap();
    let hits = body["data"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["term"], "pani");

    let health: Value = http
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["data"], "OK");
}
