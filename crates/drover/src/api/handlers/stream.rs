//! SSE stream endpoint.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};
use tracing::{debug, instrument};

use crate::api::{ApiResult, AppState};

/// Keep-alive comment interval.
const KEEP_ALIVE_SECS: u64 = 15;

/// Query parameters for `GET /events`.
#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Restrict the stream to one session's events.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `GET /events` — subscribe to lifecycle events as `text/event-stream`.
///
/// Cleanup is passive: when the client goes away the receiver drops, the
/// next broadcast fails to enqueue, and the manager discards the
/// subscriber.
#[instrument(skip(state))]
pub async fn events(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> ApiResult<Response> {
    let subscription = state.sse.register(params.session_id);
    debug!(
        connection_id = %subscription.connection_id,
        subscribers = state.sse.connection_count(),
        "SSE stream opened"
    );

    let frames = ReceiverStream::new(subscription.frames).map(Ok::<_, Infallible>);
    let keep_alive = IntervalStream::new(tokio::time::interval(
        std::time::Duration::from_secs(KEEP_ALIVE_SECS),
    ))
    .map(|_| Ok::<_, Infallible>(": keep-alive\n\n".to_string()));

    let merged = futures::stream::select(frames, keep_alive);

    let response = (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(merged),
    );
    Ok(response.into_response())
}
