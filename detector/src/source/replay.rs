use std::sync::Arc;
use std::time::Duration;

use radiograph_common::config::SourceConfig;
use radiograph_common::frame::LumaFrame;
use tracing::{debug, info};

use super::{deliver, SourceError};
use crate::intake::{Mailbox, PostOutcome};
use crate::stats::PipelineStats;

/// Feed a recorded session back through the pipeline at `fps`.
///
/// Frames keep their recorded timestamps, so cooldown decisions replay
/// exactly. When looping, each pass is shifted forward by the length of the
/// recording plus one frame interval so time keeps moving forward.
pub async fn run_replay_source(
    config: &SourceConfig,
    mailbox: &Mailbox,
    stats: &Arc<PipelineStats>,
) -> Result<(), SourceError> {
    let path = config.replay_path.display().to_string();
    let data = tokio::fs::read(&config.replay_path)
        .await
        .map_err(|e| SourceError::ReplayRead(path.clone(), e))?;
    let frames = LumaFrame::deserialize_all(&data)?;

    let interval = Duration::from_secs_f64(1.0 / config.fps);
    info!(path, frames = frames.len(), ?interval, looping = config.replay_loop, "replaying session");

    let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
        info!("replay file is empty");
        return Ok(());
    };
    let span_ms = last
        .captured_at_ms
        .saturating_sub(first.captured_at_ms)
        .saturating_add(interval.as_millis() as i64);
    let count = frames.len() as u64;

    let mut ticker = tokio::time::interval(interval);
    let mut pass: u64 = 0;
    loop {
        for recorded in &frames {
            ticker.tick().await;
            let frame = shifted(recorded, span_ms, count, pass);
            match deliver(mailbox, stats, frame) {
                PostOutcome::Closed => {
                    info!("mailbox closed, replay stopping");
                    return Ok(());
                }
                PostOutcome::Replaced => debug!(seq = recorded.seq, "replay outran the worker"),
                PostOutcome::Delivered => {}
            }
        }
        if !config.replay_loop {
            info!(passes = pass + 1, "replay finished");
            return Ok(());
        }
        pass += 1;
    }
}

/// Copy of `recorded` moved forward by `pass` whole recordings. Saturates
/// instead of wrapping on extreme timestamps.
fn shifted(recorded: &LumaFrame, span_ms: i64, count: u64, pass: u64) -> LumaFrame {
    let offset_ms = span_ms.saturating_mul(i64::try_from(pass).unwrap_or(i64::MAX));
    LumaFrame::new(
        recorded.samples.clone(),
        recorded.width,
        recorded.captured_at_ms.saturating_add(offset_ms),
        recorded.seq.saturating_add(count.saturating_mul(pass)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn replay_config(path: PathBuf, replay_loop: bool) -> SourceConfig {
        SourceConfig {
            mode: "replay".into(),
            url: String::new(),
            quality: 80,
            fps: 1000.0,
            replay_path: path,
            replay_loop,
        }
    }

    fn write_session(frames: &[LumaFrame]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for frame in frames {
            file.write_all(&frame.serialize()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn replays_every_record_in_order() {
        let file = write_session(&[
            LumaFrame::new(vec![1; 4], 2, 1000, 0),
            LumaFrame::new(vec![2; 4], 2, 1100, 1),
            LumaFrame::new(vec![3; 4], 2, 1200, 2),
        ]);
        let mailbox = Mailbox::new();
        let stats = Arc::new(PipelineStats::default());

        run_replay_source(&replay_config(file.path().into(), false), &mailbox, &stats)
            .await
            .unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_received, 3);
        assert_eq!(snap.frames_replaced + 1, 3);
        let lease = mailbox.take().unwrap();
        assert_eq!(lease.frame().seq, 2);
        assert_eq!(lease.frame().captured_at_ms, 1200);
    }

    #[tokio::test]
    async fn looping_stops_when_mailbox_closes() {
        let file = write_session(&[LumaFrame::new(vec![9; 2], 1, 500, 0)]);
        let mailbox = Arc::new(Mailbox::new());
        let stats = Arc::new(PipelineStats::default());

        let closer = Arc::clone(&mailbox);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            closer.close();
        });

        run_replay_source(&replay_config(file.path().into(), true), &mailbox, &stats)
            .await
            .unwrap();
        assert!(stats.snapshot().frames_received >= 2);
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let mailbox = Mailbox::new();
        let stats = Arc::new(PipelineStats::default());
        let err = run_replay_source(
            &replay_config("/nonexistent/session.luma".into(), false),
            &mailbox,
            &stats,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SourceError::ReplayRead(..)));
    }

    #[tokio::test]
    async fn truncated_record_is_reported() {
        let mut bytes = LumaFrame::new(vec![1; 8], 4, 0, 0).serialize();
        bytes.truncate(bytes.len() - 3);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();

        let mailbox = Mailbox::new();
        let stats = Arc::new(PipelineStats::default());
        let err = run_replay_source(&replay_config(file.path().into(), false), &mailbox, &stats)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Record(_)));
    }

    #[test]
    fn shift_moves_each_pass_forward() {
        let recorded = LumaFrame::new(vec![5; 2], 2, 1000, 3);
        let first = shifted(&recorded, 300, 4, 0);
        assert_eq!((first.captured_at_ms, first.seq), (1000, 3));
        let third = shifted(&recorded, 300, 4, 2);
        assert_eq!((third.captured_at_ms, third.seq), (1600, 11));
    }

    #[test]
    fn shift_saturates_on_extreme_timestamps() {
        let recorded = LumaFrame::new(vec![5; 2], 2, i64::MAX - 10, u64::MAX - 1);
        let frame = shifted(&recorded, i64::MAX, 4, 3);
        assert_eq!(frame.captured_at_ms, i64::MAX);
        assert_eq!(frame.seq, u64::MAX);
    }

    #[tokio::test]
    async fn extreme_recorded_timestamps_replay_without_overflow() {
        let file = write_session(&[
            LumaFrame::new(vec![1; 4], 2, i64::MIN, 0),
            LumaFrame::new(vec![2; 4], 2, i64::MAX, 1),
        ]);
        let mailbox = Mailbox::new();
        let stats = Arc::new(PipelineStats::default());

        run_replay_source(&replay_config(file.path().into(), false), &mailbox, &stats)
            .await
            .unwrap();
        assert_eq!(stats.snapshot().frames_received, 2);
        assert_eq!(mailbox.take().unwrap().frame().captured_at_ms, i64::MAX);
    }
}
