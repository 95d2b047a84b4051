//! HTTP handlers for the relay engine

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{sse, IntoResponse, Json, Redirect, Response, Sse},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::StreamExt;

use crate::auth::{AuthFn, AuthRequest};
use crate::error::Error;
use crate::event::{decode_resume, Event, Message, ResumePoint};
use crate::history::EventHistory;
use crate::relay::Relay;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct RelayState<H: EventHistory> {
    pub relay: Relay<H>,
    /// Channel authorization supplied by the embedding application
    pub auth: Option<AuthFn>,
}

/// Query parameters of the stream and redirect endpoints
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(rename = "lastEventId")]
    pub last_event_id: Option<String>,
    pub polling: Option<String>,
}

fn parse_channels(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

/// The resume point of a request: the `Last-Event-ID` header a
/// reconnecting EventSource sends wins over the `lastEventId` query
/// parameter the redirect resolver appended
fn resume_point(
    headers: &HeaderMap,
    params: &StreamParams,
    channels: &[String],
) -> Option<ResumePoint> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| params.last_event_id.clone())
        .map(|raw| decode_resume(channels, &raw))
}

fn polling_requested(params: &StreamParams) -> bool {
    matches!(params.polling.as_deref(), Some("1") | Some("true"))
}

fn to_sse_event(event: &Event) -> sse::Event {
    sse::Event::default()
        .event(&event.event_type)
        .id(event.wire_id())
        .data(&event.data)
}

fn error_response(err: Error) -> Response {
    let status = match err {
        Error::ReservedChannelName(_) | Error::EmptyChannelSet => StatusCode::BAD_REQUEST,
        Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

/// Internal stream endpoint: replay then live SSE, or a replay batch in
/// polling mode
pub async fn stream<H: EventHistory>(
    State(state): State<RelayState<H>>,
    Path(channels): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Response {
    let channels = parse_channels(&channels);
    let client_ip = client_ip(&headers);

    if let Some(auth) = &state.auth {
        let request = AuthRequest {
            headers: headers.clone(),
            channels: channels.clone(),
            client_ip: client_ip.clone(),
        };
        if let Some(denied) = auth(request).await {
            tracing::warn!(?channels, client_ip = ?client_ip, "stream denied");
            return denied;
        }
    }

    let resume = resume_point(&headers, &params, &channels);

    tracing::info!(
        ?channels,
        client_ip = ?client_ip,
        resumed = resume.is_some(),
        polling = polling_requested(&params),
        "new stream connection"
    );

    if polling_requested(&params) {
        let resume = resume.unwrap_or_default();
        return match state.relay.replay(&channels, &resume).await {
            Ok((events, _partial)) => {
                let batch = tokio_stream::iter(
                    events
                        .into_iter()
                        .map(|event| Ok::<_, Infallible>(to_sse_event(&event))),
                );
                Sse::new(batch).into_response()
            }
            Err(e) => error_response(e),
        };
    }

    match state.relay.subscribe(&channels, resume).await {
        Ok(events) => {
            let stream = events.map(|event| Ok::<_, Infallible>(to_sse_event(&event)));
            Sse::new(stream)
                .keep_alive(
                    sse::KeepAlive::new()
                        .interval(Duration::from_secs(10))
                        .text("keep-alive"),
                )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Offload entry point: answer with the internal stream URL instead of
/// holding the long-lived connection at the origin
pub async fn redirect<H: EventHistory>(
    State(state): State<RelayState<H>>,
    Path(channels): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Response {
    let channels = parse_channels(&channels);
    let resume = resume_point(&headers, &params, &channels);

    match state
        .relay
        .resolve_redirect(&channels, resume.as_ref(), polling_requested(&params))
    {
        // 303 so the edge proxy re-requests the internal URL with GET
        Ok(url) => Redirect::to(&url).into_response(),
        Err(e) => error_response(e),
    }
}

/// Publish request body
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub channel: String,
    pub message: serde_json::Value,
}

/// Publish endpoint: normalize the message and hand it to the engine
pub async fn publish<H: EventHistory>(
    State(state): State<RelayState<H>>,
    Json(request): Json<PublishRequest>,
) -> Response {
    let message = Message::from_json(&request.message);
    match state.relay.publish(&request.channel, message).await {
        Ok(event) => (StatusCode::OK, Json(event)).into_response(),
        Err(e) => error_response(e),
    }
}

// Stats endpoint
#[derive(Serialize)]
pub struct StatsResponse {
    pub total_subscriptions: usize,
    pub channels: HashMap<String, usize>,
    pub subscriptions: Vec<SubscriptionStats>,
}

#[derive(Serialize)]
pub struct SubscriptionStats {
    pub id: String,
    pub connected_at: String,
    pub is_active: bool,
}

pub async fn stats<H: EventHistory>(State(state): State<RelayState<H>>) -> Json<StatsResponse> {
    let hub = state.relay.hub();
    let subscriptions: Vec<SubscriptionStats> = hub
        .subscribers()
        .into_iter()
        .map(|s| SubscriptionStats {
            id: s.id.clone(),
            connected_at: s.connected_at.to_rfc3339(),
            is_active: s.is_active(),
        })
        .collect();

    Json(StatsResponse {
        total_subscriptions: subscriptions.len(),
        channels: hub.channel_counts(),
        subscriptions,
    })
}
