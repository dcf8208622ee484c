//! Server-Sent Events for submission progress and record changes

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;

use reboot_common::sse::event_bus_sse_stream;

use crate::AppState;

/// GET /events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_bus_sse_stream(&state.event_bus, "reboot-intake")
}

pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
