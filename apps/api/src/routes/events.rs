//! Server-sent events transport for the status broadcaster.
//!
//! One long-lived stream per connection, carrying every `resume:status`
//! event for the authenticated user. Delivery is at-most-once with no
//! replay: events emitted before the stream is open are not resent, and a
//! reader that lags far enough behind the channel buffer skips ahead.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::auth::{verify_bearer, verify_token};
use crate::errors::AppError;
use crate::state::AppState;

const KEEP_ALIVE_SECS: u64 = 15;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Channel token in the query string, for `EventSource` clients that
    /// cannot set an Authorization header.
    token: Option<String>,
}

/// GET /api/v1/evaluations/events
///
/// Subscribes the authenticated user to their status channel and streams
/// `resume:status` SSE events until the client disconnects or the service
/// shuts down.
pub async fn handle_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let user_id = match &query.token {
        Some(token) => verify_token(token, &state.config.channel_secret)?,
        None => verify_bearer(&headers, &state.config.channel_secret)?,
    };

    let mut rx = state.broadcaster.subscribe(user_id).await;
    debug!(%user_id, "Event stream opened");

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(status) => {
                    match serde_json::to_string(&status) {
                        Ok(json) => {
                            yield Ok::<_, Infallible>(
                                Event::default().event("resume:status").data(json),
                            );
                        }
                        Err(e) => warn!(error = %e, "Failed to serialize status event"),
                    }
                }
                // The reader fell behind the channel buffer; skip ahead
                // rather than closing the stream (at-most-once delivery).
                Err(RecvError::Lagged(missed)) => {
                    warn!(%user_id, missed, "Event subscriber lagged; events skipped");
                }
                Err(RecvError::Closed) => {
                    debug!(%user_id, "Event channel closed");
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keep-alive"),
    ))
}
