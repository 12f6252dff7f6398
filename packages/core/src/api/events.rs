use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};

use super::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// `GET /events`: Server-Sent Events stream of newly discovered candidates.
///
/// The subscription is released when the client disconnects and the stream
/// is dropped.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.subscribe();
    tracing::debug!(subscriber = subscription.id(), "event stream opened");

    let stream = subscription.into_stream().filter_map(|candidate| async move {
        match Event::default().json_data(&candidate) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                tracing::warn!(code = %candidate.code, error = %err, "failed to encode event");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping"))
}
