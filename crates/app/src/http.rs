//! HTTP surface: the live stream endpoint and the status page.
//!
//! `/stream.wav` admits a client through the registry, sends the streaming
//! WAV header, and bridges the client's delivery task to the response body
//! over a bounded channel. `/status` renders a read-only snapshot of the
//! pipeline counters as JSON, or as a small HTML page for browsers.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use wavecast_audio::capture::CaptureStats;
use wavecast_audio::delivery::{spawn_delivery, DeliveryConfig};
use wavecast_audio::registry::ClientRegistry;
use wavecast_audio::ring_buffer::RingHandle;
use wavecast_audio::wav::streaming_wav_header;
use wavecast_foundation::StreamFormat;
use wavecast_telemetry::PipelineMetrics;

/// Chunks buffered between a delivery task and its HTTP body before the
/// delivery loop experiences backpressure.
const STREAM_CHANNEL_DEPTH: usize = 32;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub ring: RingHandle,
    pub capture_running: Arc<AtomicBool>,
    pub capture_stats: Arc<CaptureStats>,
    pub metrics: Arc<PipelineMetrics>,
    pub format: StreamFormat,
    pub delivery: DeliveryConfig,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream.wav", get(handle_stream))
        .route("/status", get(handle_status))
        .with_state(state)
}

async fn handle_stream(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let lease = match state.registry.connect(peer) {
        Ok(lease) => lease,
        Err(e) => {
            tracing::warn!(%peer, "Stream rejected: {}", e);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, "5")],
                "Maximum clients reached. Please try again later.\n",
            )
                .into_response();
        }
    };

    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_DEPTH);

    // Header first, then the unbounded PCM body from the delivery task.
    let header_bytes = streaming_wav_header(&state.format);
    if tx.send(Bytes::copy_from_slice(&header_bytes)).await.is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    lease
        .slot()
        .bytes_delivered
        .fetch_add(header_bytes.len() as u64, Ordering::Relaxed);

    spawn_delivery(
        lease,
        state.ring.clone(),
        Arc::clone(&state.capture_running),
        tx,
        state.delivery.clone(),
        Arc::clone(&state.metrics),
    );

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, "audio/wav"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::CONTENT_DISPOSITION, "inline"),
            (header::CONNECTION, "close"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response()
}

#[derive(Serialize)]
struct StatusSnapshot {
    audio: AudioStatus,
    system: SystemStatus,
    network: NetworkStatus,
}

#[derive(Serialize)]
struct AudioStatus {
    sample_rate: u32,
    bit_depth: u16,
    channels: u16,
    buffer_fill_pct: f32,
    total_frames: u64,
    underrun_count: u64,
    overrun_count: u64,
    clipping: bool,
    streaming: bool,
}

#[derive(Serialize)]
struct SystemStatus {
    uptime_seconds: u64,
    source_restarts: u64,
    starvation_events: u64,
    capture_chunks_per_sec: f64,
}

#[derive(Serialize)]
struct NetworkStatus {
    active_clients: usize,
    max_clients: usize,
    clients: Vec<ClientStatus>,
    stream_path: &'static str,
}

#[derive(Serialize)]
struct ClientStatus {
    id: usize,
    peer: Option<String>,
    bytes_sent: u64,
    connected_secs: u64,
}

fn snapshot(state: &AppState) -> StatusSnapshot {
    let clients = state
        .registry
        .snapshot()
        .into_iter()
        .map(|c| ClientStatus {
            id: c.id,
            peer: c.peer.map(|p| p.to_string()),
            bytes_sent: c.bytes_delivered,
            connected_secs: c.connected_secs,
        })
        .collect::<Vec<_>>();

    StatusSnapshot {
        audio: AudioStatus {
            sample_rate: state.format.sample_rate,
            bit_depth: state.format.bits_per_sample,
            channels: state.format.channels,
            buffer_fill_pct: state.ring.fill_percentage(),
            total_frames: state.capture_stats.total_frames.load(Ordering::Acquire),
            underrun_count: state.capture_stats.underruns.load(Ordering::Relaxed),
            overrun_count: state.ring.overrun_count(),
            clipping: state.capture_stats.clipping.load(Ordering::Acquire),
            streaming: state.capture_running.load(Ordering::Acquire),
        },
        system: SystemStatus {
            uptime_seconds: state.started_at.elapsed().as_secs(),
            source_restarts: state.capture_stats.source_restarts.load(Ordering::Relaxed),
            starvation_events: state.metrics.starvation_events.load(Ordering::Relaxed),
            capture_chunks_per_sec: state
                .metrics
                .capture_chunks_per_sec
                .load(Ordering::Relaxed) as f64
                / 10.0,
        },
        network: NetworkStatus {
            active_clients: state.registry.active_count(),
            max_clients: state.registry.max_clients(),
            clients,
            stream_path: "/stream.wav",
        },
    }
}

async fn handle_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let snap = snapshot(&state);

    let wants_html = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false);

    if wants_html {
        Html(render_status_html(&snap)).into_response()
    } else {
        Json(snap).into_response()
    }
}

fn render_status_html(snap: &StatusSnapshot) -> String {
    let audio = &snap.audio;
    let net = &snap.network;
    format!(
        concat!(
            "<!DOCTYPE html><html><head><meta charset='UTF-8'>",
            "<meta http-equiv='refresh' content='5'>",
            "<title>WaveCast</title>",
            "<style>body{{font-family:system-ui,sans-serif;max-width:480px;margin:0 auto;",
            "padding:12px;background:#1a1a2e;color:#e0e0e0}}",
            "h1{{font-size:18px;text-align:center}}",
            ".r{{display:flex;justify-content:space-between;padding:3px 0;font-size:13px}}",
            ".l{{color:#888}}.ok{{color:#4caf50}}.err{{color:#f44336}}</style></head><body>",
            "<h1>WaveCast Audio Streamer</h1>",
            "<div class='r'><span class='l'>Sample Rate</span><span>{} Hz</span></div>",
            "<div class='r'><span class='l'>Format</span><span>{}-bit / {} ch</span></div>",
            "<div class='r'><span class='l'>Buffer Fill</span><span>{:.1}%</span></div>",
            "<div class='r'><span class='l'>Frames Captured</span><span>{}</span></div>",
            "<div class='r'><span class='l'>Underruns</span><span>{}</span></div>",
            "<div class='r'><span class='l'>Overruns</span><span>{}</span></div>",
            "<div class='r'><span class='l'>Clipping</span><span class='{}'>{}</span></div>",
            "<div class='r'><span class='l'>Status</span><span class='{}'>{}</span></div>",
            "<div class='r'><span class='l'>Clients</span><span>{} / {}</span></div>",
            "<div class='r'><span class='l'>Uptime</span><span>{}s</span></div>",
            "<p style='font-size:11px;color:#555;text-align:center'>",
            "Stream: {} &middot; auto-refreshes every 5 seconds</p>",
            "</body></html>"
        ),
        audio.sample_rate,
        audio.bit_depth,
        audio.channels,
        audio.buffer_fill_pct,
        audio.total_frames,
        audio.underrun_count,
        audio.overrun_count,
        if audio.clipping { "err" } else { "ok" },
        if audio.clipping { "CLIPPING" } else { "OK" },
        if audio.streaming { "ok" } else { "err" },
        if audio.streaming { "Streaming" } else { "Stopped" },
        net.active_clients,
        net.max_clients,
        snap.system.uptime_seconds,
        net.stream_path,
    )
}
