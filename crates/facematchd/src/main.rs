use anyhow::Result;
use facematch_capture::OnnxPipeline;
use facematch_core::{FileStorage, MatchingService};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{FaceMatchService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facematchd starting");

    let config = Config::load()?;
    tracing::info!(
        snapshot = %config.snapshot_path.display(),
        detector = %config.capture.detector_model.display(),
        embedder = %config.capture.embedder_model.display(),
        threshold = config.matcher.threshold,
        dimension = config.matcher.dimension,
        bus = ?config.bus,
        "configuration loaded"
    );

    let matcher = MatchingService::initialize(
        config.matcher.clone(),
        FileStorage::new(&config.snapshot_path),
    )?;
    if matcher.registry().is_empty() {
        tracing::warn!("registry is empty; register identities or run `facematch import`");
    }

    let pipeline = OnnxPipeline::load(&config.capture)?;
    let engine = engine::spawn_engine(pipeline, config.request_timeout());

    let service = FaceMatchService::new(engine, Arc::new(matcher), config.max_image_bytes);
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus_name = BUS_NAME, path = OBJECT_PATH, "facematchd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facematchd shutting down");

    Ok(())
}
