//! `GET /events`: one-directional change stream

use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{stream, Stream, StreamExt};

use super::api::{ApiError, AppState};
use crate::sync::protocol::{ReadyEvent, CONTENT_UPDATED, READY};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub async fn stream_events(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    // Register before reading the version so no change slips between the two
    let channel = state.broadcaster.open_channel();
    let version = state.store.load().await?.version;
    tracing::debug!(channel = channel.id(), version, "event stream opened");

    let ready = Event::default().event(READY).json_data(ReadyEvent { version });
    let updates = channel.map(|event| Event::default().event(CONTENT_UPDATED).json_data(&event));

    let events = stream::once(async move { ready }).chain(updates);

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}
