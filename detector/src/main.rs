mod analysis;
mod api;
mod db;
mod intake;
mod observer;
mod source;
mod stats;
mod storage;
mod worker;

use radiograph_common::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::intake::Mailbox;
use crate::observer::{EventSink, Observer};
use crate::stats::PipelineStats;
use crate::storage::DiskStore;
use crate::worker::{Control, FramePipeline, PipelineSettings};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        mode = config.source.mode,
        url = config.source.url,
        fps = config.source.fps,
        capture_cooldown_ms = config.capture.cooldown_ms,
        notify_cooldown_ms = config.notify.cooldown_ms,
        output_dir = %config.capture.output_dir.display(),
        monitoring = config.monitoring.start_enabled,
        "starting radiograph detector"
    );

    let store = DiskStore::new(
        config.capture.output_dir.clone(),
        config.capture.jpeg_quality,
        config.capture.write_raw,
    );
    if let Err(e) = store.ensure_root() {
        error!(error = %e, "failed to prepare capture directory");
        std::process::exit(1);
    }

    let capture_db = match db::CaptureDb::open(&config.database.path) {
        Ok(d) => Some(Arc::new(d)),
        Err(e) => {
            error!(error = %e, "failed to open capture database; captures will not be logged");
            None
        }
    };

    let stats = Arc::new(PipelineStats::default());
    let control = Arc::new(Control::new(config.monitoring.start_enabled));
    let mailbox = Arc::new(Mailbox::new());

    // Observer task
    let (event_tx, event_rx) = mpsc::channel(config.notify.channel_capacity);
    let (observer, observer_view) = Observer::new(capture_db.clone());
    let observer_task = tokio::spawn(observer.run(event_rx));

    // Frame worker
    let (preview_tx, preview_rx) = watch::channel(None);
    let pipeline = FramePipeline::new(
        PipelineSettings {
            capture_cooldown_ms: config.capture.cooldown_ms,
            notify_cooldown_ms: config.notify.cooldown_ms,
            file_prefix: config.capture.file_prefix.clone(),
        },
        Arc::clone(&control),
        Box::new(store),
        EventSink::new(event_tx, Arc::clone(&stats)),
        preview_tx,
        Arc::clone(&stats),
    );
    let worker = match worker::spawn_worker(Arc::clone(&mailbox), pipeline) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to spawn frame worker");
            std::process::exit(1);
        }
    };

    // Frame source
    let source_task = tokio::spawn(source::run_source(
        config.source.clone(),
        Arc::clone(&mailbox),
        Arc::clone(&stats),
    ));

    // HTTP API
    let state = Arc::new(api::AppState {
        control,
        observer: observer_view,
        preview: preview_rx,
        db: capture_db,
        stats: Arc::clone(&stats),
    });
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.api.port);
    info!(addr, "radiograph API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "API server failed");
    }

    // Stop intake; the worker finishes its current frame and drains the slot.
    info!("shutting down");
    mailbox.close();
    source_task.abort();
    match tokio::task::spawn_blocking(move || worker.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!("frame worker panicked"),
        Err(e) => error!(error = %e, "failed to join frame worker"),
    }
    // The worker held the last event sender, so the observer drains and exits.
    if let Err(e) = observer_task.await {
        error!(error = %e, "observer task failed");
    }

    info!(stats = ?stats.snapshot(), "radiograph detector stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received");
}
