use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use wavecast_app::runtime::AppRuntime;
use wavecast_foundation::{AppConfig, ShutdownHandler};

fn init_logging(log_dir: &str) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "wavecast.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional first argument: path to a TOML config file.
    let cfg = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&PathBuf::from(path))?,
        None => AppConfig::default(),
    };

    let _log_guard = init_logging(&cfg.log_dir)?;
    tracing::info!(
        device = %cfg.device_name,
        sample_rate = cfg.sample_rate,
        port = cfg.http_port,
        max_clients = cfg.max_clients,
        "Starting WaveCast"
    );

    let shutdown = ShutdownHandler::new().install();
    let runtime = AppRuntime::start(cfg).await?;

    shutdown.wait().await;
    tracing::info!("Shutting down");
    runtime.shutdown();
    Ok(())
}
