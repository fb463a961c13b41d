//! Frame sources. Each one turns its input into [`LumaFrame`]s and posts
//! them, as leases, into the worker's mailbox.

pub mod mjpeg;
pub mod replay;

use std::sync::Arc;

use radiograph_common::config::SourceConfig;
use radiograph_common::frame::{FrameError, LumaFrame};
use tracing::error;

use crate::intake::{FrameLease, Mailbox, PostOutcome};
use crate::stats::PipelineStats;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("JPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to read replay file {0}: {1}")]
    ReplayRead(String, std::io::Error),
    #[error("bad replay record: {0}")]
    Record(#[from] FrameError),
    #[error("mailbox closed")]
    Closed,
}

/// Wrap a frame in a lease that counts its release, then post it.
pub fn deliver(mailbox: &Mailbox, stats: &Arc<PipelineStats>, frame: LumaFrame) -> PostOutcome {
    let released = Arc::clone(stats);
    let lease = FrameLease::new(frame, move || {
        PipelineStats::bump(&released.frames_released);
    });
    let outcome = mailbox.post(lease);
    stats.record_post(outcome);
    outcome
}

/// Decode a JPEG into its 8-bit luminance plane.
pub fn decode_luma(jpeg: &[u8]) -> Result<(Vec<u8>, u32), SourceError> {
    let gray = image::load_from_memory(jpeg)?.to_luma8();
    let width = gray.width();
    Ok((gray.into_raw(), width))
}

/// Run the configured source until the mailbox closes or the source gives up.
pub async fn run_source(config: SourceConfig, mailbox: Arc<Mailbox>, stats: Arc<PipelineStats>) {
    let result = match config.mode.as_str() {
        "mjpeg" => {
            let url = format!("{}?quality={}&fps={}", config.url, config.quality, config.fps);
            mjpeg::run_mjpeg_source(&url, &mailbox, &stats).await
        }
        "polling" => {
            let url = format!(
                "{}?quality={}",
                config.url.replace("/stream", "/frame"),
                config.quality
            );
            let interval = std::time::Duration::from_secs_f64(1.0 / config.fps);
            mjpeg::run_polling_source(&url, interval, &mailbox, &stats).await
        }
        _ => replay::run_replay_source(&config, &mailbox, &stats).await,
    };
    if let Err(e) = result {
        error!(error = %e, mode = config.mode, "frame source stopped");
    }
}
