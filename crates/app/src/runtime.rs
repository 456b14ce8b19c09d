//! Runtime wiring: ring buffer, capture engine, client registry, and the
//! HTTP server, assembled from the loaded configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;

use wavecast_audio::capture::{CaptureConfig, CaptureEngine};
use wavecast_audio::delivery::DeliveryConfig;
use wavecast_audio::registry::ClientRegistry;
use wavecast_audio::ring_buffer::{AudioRingBuffer, RingHandle};
use wavecast_audio::source::{SampleSource, ToneSource};
use wavecast_audio::CpalSource;
use wavecast_foundation::clock::real_clock;
use wavecast_foundation::{AppConfig, SourceKind, StateManager, StreamFormat};
use wavecast_telemetry::PipelineMetrics;

use crate::http::{self, AppState};

pub struct AppRuntime {
    engine: CaptureEngine,
    ring: RingHandle,
    metrics: Arc<PipelineMetrics>,
    pub local_addr: SocketAddr,
}

impl AppRuntime {
    pub async fn start(cfg: AppConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let format = StreamFormat::new(cfg.sample_rate)?;

        let (writer, ring) = AudioRingBuffer::for_format(&format, cfg.max_clients).split();
        tracing::info!(
            capacity = ring.capacity(),
            lead = ring.lead_bytes(),
            "Ring buffer initialized"
        );

        let source: Box<dyn SampleSource> = match cfg.source {
            SourceKind::Cpal => Box::new(CpalSource::new(None)),
            SourceKind::Tone => Box::new(ToneSource::default()),
        };

        let metrics = Arc::new(PipelineMetrics::default());
        let state = Arc::new(StateManager::new());
        let engine = CaptureEngine::start(
            source,
            writer,
            CaptureConfig::new(format),
            Arc::clone(&state),
            Arc::clone(&metrics),
            real_clock(),
        )?;

        let registry = ClientRegistry::new(ring.clone(), cfg.max_clients, Arc::clone(&metrics));

        let app_state = AppState {
            registry,
            ring: ring.clone(),
            capture_running: engine.running_flag(),
            capture_stats: engine.stats(),
            metrics: Arc::clone(&metrics),
            format,
            delivery: DeliveryConfig::default(),
            started_at: Instant::now(),
        };

        let listener =
            tokio::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, cfg.http_port))
                .await
                .with_context(|| format!("bind HTTP port {}", cfg.http_port))?;
        let local_addr = listener.local_addr()?;
        tracing::info!("HTTP server listening on http://{}/", local_addr);
        tracing::info!("Stream endpoint: http://{}/stream.wav", local_addr);

        let router = http::router(app_state)
            .into_make_service_with_connect_info::<SocketAddr>();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("HTTP server terminated: {}", e);
            }
        });

        // Keep the shared fill/overrun telemetry fresh for external readers.
        let fill_ring = ring.clone();
        let fill_metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                fill_metrics.update_buffer_fill(fill_ring.fill_percentage() as usize);
                fill_metrics
                    .ring_overruns
                    .store(fill_ring.overrun_count(), std::sync::atomic::Ordering::Relaxed);
            }
        });

        Ok(Self {
            engine,
            ring,
            metrics,
            local_addr,
        })
    }

    pub fn shutdown(mut self) {
        self.engine.stop();
        tracing::info!(
            frames = self
                .metrics
                .frames_captured
                .load(std::sync::atomic::Ordering::Relaxed),
            overruns = self.ring.overrun_count(),
            "Runtime stopped"
        );
    }
}
