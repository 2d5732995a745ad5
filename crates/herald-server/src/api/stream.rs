use std::convert::Infallible;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use super::{ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamQuery {
    pub app_key: Option<String>,
}

/// `GET /api/notifications/stream?appKey=`
///
/// Sends a `connected` event, then one `notification` event per published
/// notification. The subscription lives exactly as long as the response body,
/// so a client disconnect unregisters it from the hub.
pub async fn notification_stream(
    State(state): State<AppState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Query(query) = query?;
    let subscription = state.dispatcher.hub().subscribe(query.app_key.as_deref());

    info!(
        subscriber = subscription.id(),
        app_key = ?query.app_key,
        "Live stream opened"
    );

    let connected = Event::default()
        .event("connected")
        .data(json!({ "subscriberId": subscription.id() }).to_string());

    let events = subscription.map(|event| {
        let data = serde_json::to_string(&*event).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().event("notification").data(data))
    });

    let stream = tokio_stream::once(Ok(connected)).chain(events);

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive)))
}
