use anyhow::{Context, Result};
use rollcall_core::{Gallery, GalleryHandle};
use rollcall_store::AttendanceLedger;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod orchestrator;

use config::Config;
use dbus_interface::RollcallInterface;
use orchestrator::AttendanceService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();

    // Gallery load failure is the one fatal startup condition — there is
    // nothing to match against without it.
    let mut gallery = Gallery::load(&config.gallery_path).with_context(|| {
        format!(
            "failed to load gallery snapshot from {}",
            config.gallery_path.display()
        )
    })?;
    if let Some(threshold) = config.threshold_override {
        tracing::info!(
            snapshot = gallery.threshold,
            threshold,
            "matching threshold overridden via ROLLCALL_THRESHOLD"
        );
        // Same validation the snapshot's own threshold gets: a non-finite
        // or non-positive override would push confidence outside [0, 1].
        gallery
            .set_threshold(threshold)
            .context("invalid ROLLCALL_THRESHOLD")?;
    }

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data dir {}", parent.display()))?;
    }
    let ledger = Arc::new(
        AttendanceLedger::open(&config.db_path).with_context(|| {
            format!("failed to open attendance db at {}", config.db_path.display())
        })?,
    );

    let service = Arc::new(
        AttendanceService::new(GalleryHandle::new(gallery), ledger, config.suffix_width)
            .with_threshold_override(config.threshold_override),
    );

    let _conn = zbus::connection::Builder::session()?
        .name("org.rollcall.Attendance1")?
        .serve_at(
            "/org/rollcall/Attendance1",
            RollcallInterface::new(Arc::clone(&service), config.gallery_path.clone()),
        )?
        .build()
        .await
        .context("failed to claim org.rollcall.Attendance1 on the session bus")?;

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
