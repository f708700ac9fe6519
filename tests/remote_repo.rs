//! Remote backend against a local stand-in for the contents API

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use lexicon_sync::storage::{
    BackendError, HttpRepository, RepoBackend, RepoConfig, RevisionedFiles,
};
use lexicon_sync::{ContentStore, Entry, Word};

const TOKEN: &str = "test-token";
const PATH: &str = "data/content.json";

#[derive(Default)]
struct MockRepo {
    /// (sha, raw bytes) of the single stored file
    file: Mutex<Option<(String, Vec<u8>)>>,
    writes: Mutex<u32>,
}

#[derive(Deserialize)]
struct PutBody {
    content: String,
    branch: String,
    sha: Option<String>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some(format!("Bearer {TOKEN}").as_str())
}

async fn read_file(
    State(repo): State<Arc<MockRepo>>,
    Path((_owner, _repo, path)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    assert_eq!(path, PATH);

    match repo.file.lock().clone() {
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response(),
        Some((sha, bytes)) => {
            // Line-wrapped like the real API
            let encoded = BASE64.encode(bytes);
            let wrapped: Vec<String> = encoded
                .as_bytes()
                .chunks(60)
                .map(|line| String::from_utf8_lossy(line).into_owned())
                .collect();
            Json(json!({ "sha": sha, "content": wrapped.join("\n") })).into_response()
        }
    }
}

async fn write_file(
    State(repo): State<Arc<MockRepo>>,
    headers: HeaderMap,
    Json(body): Json<PutBody>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    assert_eq!(body.branch, "main");

    let mut file = repo.file.lock();
    let current = file.as_ref().map(|(sha, _)| sha.clone());
    match (&current, &body.sha) {
        (Some(current), Some(given)) if current != given => {
            return StatusCode::CONFLICT.into_response();
        }
        (Some(_), None) => return StatusCode::UNPROCESSABLE_ENTITY.into_response(),
        (None, Some(_)) => return StatusCode::CONFLICT.into_response(),
        _ => {}
    }

    let bytes = BASE64.decode(body.content).unwrap();
    let mut writes = repo.writes.lock();
    *writes += 1;
    let sha = format!("sha-{}", *writes);
    *file = Some((sha.clone(), bytes));

    Json(json!({ "content": { "sha": sha } })).into_response()
}

async fn spawn_mock() -> (String, Arc<MockRepo>) {
    let repo = Arc::new(MockRepo::default());
    let app = Router::new()
        .route(
            "/repos/{owner}/{repo}/contents/{*path}",
            get(read_file).put(write_file),
        )
        .with_state(repo.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (base, repo)
}

fn config(base: &str, token: &str) -> RepoConfig {
    RepoConfig {
        api_base: base.to_string(),
        owner: "lexicon".to_string(),
        repo: "content".to_string(),
        branch: "main".to_string(),
        path: PATH.to_string(),
        token: token.to_string(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn revisions_guard_remote_writes() {
    let (base, _mock) = spawn_mock().await;
    let files = HttpRepository::new(config(&base, TOKEN)).unwrap();

    assert!(files.read_file(PATH).await.unwrap().is_none());

    let first = files.write_file(PATH, b"{\"v\":1}", None).await.unwrap();
    let stored = files.read_file(PATH).await.unwrap().unwrap();
    assert_eq!(stored.revision, first);
    assert_eq!(stored.content, b"{\"v\":1}");

    // Creating over an existing file and writing from a stale sha both lose
    assert!(matches!(
        files.write_file(PATH, b"{}", None).await,
        Err(BackendError::RevisionConflict(_))
    ));
    assert!(matches!(
        files.write_file(PATH, b"{}", Some("sha-0")).await,
        Err(BackendError::RevisionConflict(_))
    ));

    let second = files.write_file(PATH, b"{\"v\":2}", Some(&first)).await.unwrap();
    assert_ne!(second, first);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_credentials_report_unavailable() {
    let (base, _mock) = spawn_mock().await;
    let files = HttpRepository::new(config(&base, "wrong")).unwrap();

    assert!(matches!(
        files.read_file(PATH).await,
        Err(BackendError::Unavailable(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stores_share_one_remote_document() {
    let (base, mock) = spawn_mock().await;
    let open = || {
        let files = Arc::new(HttpRepository::new(config(&base, TOKEN)).unwrap());
        ContentStore::new(Arc::new(RepoBackend::new(files, PATH)))
    };
    let a = open();
    let b = open();

    assert_eq!(a.load().await.unwrap().version, 1);
    let (ado, snapshot) = a.upsert_entry(Entry::draft(Word::new("ado", "chakma"))).await.unwrap();
    assert_eq!(snapshot.version, 2);

    let (_, snapshot) = b.upsert_entry(Entry::draft(Word::new("tui", "chakma"))).await.unwrap();
    assert_eq!(snapshot.version, 3);
    assert!(snapshot.words.iter().any(|w| w.id == ado.id));

    assert_eq!(a.load().await.unwrap().version, 3);
    assert_eq!(*mock.writes.lock(), 3);
}
