use crate::ingest::hit::{EventOptions, HitOptions};
use crate::ingest::request::RequestMeta;
use crate::ingest::tracker::Tracker;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Largest accepted event body in bytes.
pub const MAX_EVENT_BODY: usize = 65_536;

/// Inbound event payload from the tracking script.
#[derive(Debug, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "event_name")]
    pub name: String,
    #[serde(rename = "event_duration", default)]
    pub duration: u32,
    #[serde(rename = "event_meta", default)]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub client_id: i64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub referrer: String,
    #[serde(default)]
    pub screen_width: i64,
    #[serde(default)]
    pub screen_height: i64,
}

impl EventPayload {
    fn hit_options(&self) -> HitOptions {
        HitOptions {
            client_id: self.client_id,
            url: self.url.clone(),
            path: String::new(),
            title: self.title.clone(),
            referrer: self.referrer.clone(),
            screen_width: self.screen_width,
            screen_height: self.screen_height,
        }
    }

    fn event_options(&self) -> EventOptions {
        EventOptions {
            name: self.name.clone(),
            duration_seconds: self.duration,
            meta: self
                .meta
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Shared application state for the ingestion handlers.
pub struct AppState {
    pub tracker: Tracker,
}

/// GET /hit: Page view endpoint. Hit options are read from the query string.
pub async fn track_hit(State(state): State<Arc<AppState>>, request: Request) -> StatusCode {
    let peer = peer_ip(&request);
    let meta = RequestMeta::new(request.headers(), request.uri(), peer);
    let options = HitOptions::from_query(&meta);

    match state.tracker.track_hit(&meta, &options) {
        Some(_) => StatusCode::ACCEPTED,
        None => StatusCode::NO_CONTENT,
    }
}

/// POST /event: Custom event endpoint.
pub async fn track_event(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> impl IntoResponse {
    let peer = peer_ip(&request);
    let (parts, body) = request.into_parts();
    let Some(payload) = read_payload(body).await else {
        return StatusCode::BAD_REQUEST;
    };
    if payload.name.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }

    let meta = RequestMeta::new(&parts.headers, &parts.uri, peer);
    match state
        .tracker
        .track_event(&meta, &payload.hit_options(), &payload.event_options())
    {
        Some(_) => StatusCode::ACCEPTED,
        None => StatusCode::NO_CONTENT,
    }
}

async fn read_payload(body: Body) -> Option<EventPayload> {
    let bytes = axum::body::to_bytes(body, MAX_EVENT_BODY).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::debug!(error = %e, "Invalid event payload");
            None
        }
    }
}

fn peer_ip(request: &Request) -> Option<std::net::IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}
