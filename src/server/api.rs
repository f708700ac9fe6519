use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use super::events;
use crate::content::{Character, Collection, Entry, Record, Word};
use crate::error::ContentError;
use crate::storage::ContentStore;
use crate::sync::protocol::{ContentEvent, Deletion, Envelope, EventAction, Mutation};
use crate::sync::Broadcaster;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ContentStore>,
    pub broadcaster: Broadcaster,
}

impl AppState {
    pub fn new(store: ContentStore) -> Self {
        Self {
            store: Arc::new(store),
            broadcaster: Broadcaster::new(),
        }
    }

    /// Notify listeners of a committed change
    fn announce(&self, collection: Collection, action: EventAction, id: &str, version: u64) {
        self.broadcaster
            .publish(&ContentEvent::new(collection, action, id, version));
    }
}

/// Error half of every handler
pub struct ApiError(ContentError);

impl From<ContentError> for ApiError {
    fn from(err: ContentError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(Envelope::<()>::err(self.0.to_string()))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn ok<T: Serialize>(data: T) -> Response {
    Json(Envelope::ok(data)).into_response()
}

/// Run a generic handler for the collection named in the path
macro_rules! for_collection {
    ($collection:expr, $handler:ident ( $($arg:expr),* )) => {
        match $collection.parse::<Collection>()? {
            Collection::Words => $handler::<Word>($($arg),*).await,
            Collection::Characters => $handler::<Character>($($arg),*).await,
        }
    };
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Lexicon content server" }))
        .route("/health", get(|| async { Json(Envelope::ok("OK")) }))
        .route("/snapshot", get(get_snapshot))
        .route("/events", get(events::stream_events))
        .route(
            "/{collection}",
            get(list_entries).post(create_entry),
        )
        .route(
            "/{collection}/{id}",
            get(get_entry).put(update_entry).delete(delete_entry),
        )
        // Staleness is handled by the sync layer, never by HTTP caches
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct ListQuery {
    query: Option<String>,
}

async fn get_snapshot(State(state): State<AppState>) -> ApiResult {
    Ok(ok(state.store.load().await?))
}

async fn list_entries(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(params): Query<ListQuery>,
) -> ApiResult {
    for_collection!(collection, list(&state, params.query.as_deref()))
}

async fn list<T: Record>(state: &AppState, query: Option<&str>) -> ApiResult {
    let entries = match query {
        Some(query) => state.store.search::<T>(query).await?,
        None => state.store.list::<T>().await?,
    };
    Ok(ok(entries))
}

async fn get_entry(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> ApiResult {
    for_collection!(collection, get_one(&state, &id))
}

async fn get_one<T: Record>(state: &AppState, id: &str) -> ApiResult {
    Ok(ok(state.store.get::<T>(id).await?))
}

async fn create_entry(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    body: Bytes,
) -> ApiResult {
    for_collection!(collection, create(&state, &body))
}

async fn create<T: Record>(state: &AppState, body: &[u8]) -> ApiResult {
    let mut entry: Entry<T> = parse_body(body)?;
    // Ids are always assigned by the store on create
    entry.id.clear();

    let (entry, snapshot) = state.store.upsert_entry(entry).await?;
    state.announce(T::COLLECTION, EventAction::Created, &entry.id, snapshot.version);

    let body = Mutation {
        entry,
        version: snapshot.version,
    };
    Ok((StatusCode::CREATED, Json(Envelope::ok(body))).into_response())
}

async fn update_entry(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    for_collection!(collection, update(&state, &id, &body))
}

async fn update<T: Record>(state: &AppState, id: &str, body: &[u8]) -> ApiResult {
    let entry: Entry<T> = parse_body(body)?;
    if !entry.id.is_empty() && entry.id != id {
        return Err(ContentError::Validation("body id does not match path id".into()).into());
    }

    let (entry, snapshot) = state.store.update_entry(id, entry.data).await?;
    state.announce(T::COLLECTION, EventAction::Updated, &entry.id, snapshot.version);

    Ok(ok(Mutation {
        entry,
        version: snapshot.version,
    }))
}

async fn delete_entry(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> ApiResult {
    for_collection!(collection, delete(&state, &id))
}

async fn delete<T: Record>(state: &AppState, id: &str) -> ApiResult {
    let (removed, snapshot) = state.store.delete_entry::<T>(id).await?;
    if !removed {
        return Err(ContentError::NotFound(format!("{} entry {id}", T::COLLECTION)).into());
    }

    state.announce(T::COLLECTION, EventAction::Deleted, id, snapshot.version);
    Ok(ok(Deletion {
        id: id.to_string(),
        version: snapshot.version,
    }))
}

fn parse_body<T: Record>(body: &[u8]) -> Result<Entry<T>, ContentError> {
    serde_json::from_slice(body)
        .map_err(|err| ContentError::Validation(format!("invalid {} body: {err}", T::COLLECTION)))
}
