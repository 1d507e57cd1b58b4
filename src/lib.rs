pub mod cache;
pub mod channels;
pub mod checker;
pub mod epg;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod loader;
pub mod metrics;
pub mod player;
pub mod writer;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use channels::{Channel, ChannelSet};
use fetch::{Fetcher, Source};
use filter::{ChannelFilter, FilterConfig};
use loader::PlaylistSource;
use std::sync::Arc;
use tracing::{info, warn};

struct AppState {
    channels: ChannelSet,
    monitoring_enabled: bool,
}

/// Loads and merges every playlist, then marks EPG availability from the
/// guides. A guide failure only costs the EPG flags; playlists must load.
pub async fn load_channels(
    fetcher: &Fetcher,
    playlists: &[PlaylistSource],
    epg_sources: &[Source],
) -> anyhow::Result<ChannelSet> {
    let mut channels = loader::load_all(fetcher, playlists).await?;

    if !epg_sources.is_empty() {
        match epg::build_index_all(fetcher, epg_sources).await {
            Ok(index) => epg::annotate(&mut channels, &index),
            Err(e) => warn!("No EPG data available: {}", e),
        }
    }

    metrics::CHANNELS_LOADED.set(channels.len() as i64);
    Ok(channels)
}

pub fn create_app(channels: ChannelSet, monitoring_enabled: bool) -> Router {
    let state = Arc::new(AppState {
        channels,
        monitoring_enabled,
    });

    Router::new()
        .route("/api/channels", get(channels_api_handler))
        .route("/playlist.m3u", get(playlist_handler))
        .route("/epg.xml", get(epg_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(fallback_handler)
        .with_state(state)
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

async fn fallback_handler(method: Method, uri: Uri, headers: HeaderMap) -> Response {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("<none>");
    info!("HTTP 404: method={} uri={} UA=\"{}\"", method, uri, user_agent);
    not_found()
}

fn select<'a>(state: &'a AppState, query: &FilterConfig) -> Vec<&'a Channel> {
    filter::filter(&state.channels, &ChannelFilter::from(query))
}

async fn channels_api_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FilterConfig>,
) -> Json<Vec<Channel>> {
    Json(select(&state, &query).into_iter().cloned().collect())
}

async fn playlist_handler(State(state): State<Arc<AppState>>, Query(query): Query<FilterConfig>) -> Response {
    let selection = select(&state, &query);
    info!("Serving playlist with {} channels", selection.len());
    (
        [(header::CONTENT_TYPE, "audio/x-mpegurl")],
        writer::render_m3u(&selection, Some("epg.xml")),
    )
        .into_response()
}

async fn epg_handler(State(state): State<Arc<AppState>>, Query(query): Query<FilterConfig>) -> Response {
    let selection = select(&state, &query);
    ([(header::CONTENT_TYPE, "application/xml")], writer::render_epg(&selection)).into_response()
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    if !state.monitoring_enabled {
        return not_found();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
        .into_response()
}
