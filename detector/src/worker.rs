use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use radiograph_common::frame::LumaFrame;
use radiograph_common::report::PreviewStats;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::analysis::aggregator::SessionAggregator;
use crate::analysis::analyzer::{analyze, InvalidFrameError};
use crate::analysis::capture::CaptureGate;
use crate::analysis::throttle::NotificationThrottle;
use crate::intake::Mailbox;
use crate::observer::{CaptureEvent, EventSink, ObserverEvent};
use crate::stats::PipelineStats;
use crate::storage::ImageStore;

/// Monitoring switch and session reset requests, shared with the API.
/// Changes take effect from the next frame the worker picks up.
#[derive(Debug, Default)]
pub struct Control {
    monitoring: AtomicBool,
    reset_requested: AtomicBool,
}

impl Control {
    pub fn new(start_enabled: bool) -> Self {
        Self {
            monitoring: AtomicBool::new(start_enabled),
            reset_requested: AtomicBool::new(false),
        }
    }

    pub fn start_monitoring(&self) {
        if !self.monitoring.swap(true, Ordering::AcqRel) {
            info!("monitoring started");
        }
    }

    pub fn stop_monitoring(&self) {
        if self.monitoring.swap(false, Ordering::AcqRel) {
            info!("monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Acquire)
    }

    /// Ask the worker to zero the session totals before its next frame.
    pub fn reset_session(&self) {
        self.reset_requested.store(true, Ordering::Release);
        info!("session reset requested");
    }

    fn take_reset(&self) -> bool {
        self.reset_requested.swap(false, Ordering::AcqRel)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub capture_cooldown_ms: i64,
    pub notify_cooldown_ms: i64,
    pub file_prefix: String,
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Not monitoring: only the preview was updated.
    Preview,
    /// Monitored, but the throttle held the result back.
    Suppressed { saved: bool },
    /// A session report went to the observer.
    Emitted { saved: bool },
}

/// Everything the worker does with a frame, in order: analyze, gate the
/// capture, persist, throttle, aggregate, notify. All state lives here and is
/// only touched from the worker thread.
pub struct FramePipeline {
    control: Arc<Control>,
    capture: CaptureGate,
    throttle: NotificationThrottle,
    aggregator: SessionAggregator,
    store: Box<dyn ImageStore>,
    events: EventSink,
    preview: watch::Sender<Option<PreviewStats>>,
    stats: Arc<PipelineStats>,
    file_prefix: String,
}

impl FramePipeline {
    pub fn new(
        settings: PipelineSettings,
        control: Arc<Control>,
        store: Box<dyn ImageStore>,
        events: EventSink,
        preview: watch::Sender<Option<PreviewStats>>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            control,
            capture: CaptureGate::new(settings.capture_cooldown_ms),
            throttle: NotificationThrottle::new(settings.notify_cooldown_ms),
            aggregator: SessionAggregator::new(),
            store,
            events,
            preview,
            stats,
            file_prefix: settings.file_prefix,
        }
    }

    /// Process one frame. The frame's own capture time is the clock for every
    /// cooldown, so replayed sessions gate exactly as they did live.
    pub fn process(&mut self, frame: &LumaFrame) -> Result<FrameOutcome, InvalidFrameError> {
        if self.control.take_reset() {
            let cleared = self.aggregator.reset_session();
            self.events.post(ObserverEvent::SessionReset(cleared));
        }

        let monitoring = self.control.is_monitoring();
        let mut result = match analyze(&frame.samples, frame.width as usize, monitoring) {
            Ok(r) => r,
            Err(e) => {
                PipelineStats::bump(&self.stats.frames_invalid);
                warn!(seq = frame.seq, error = %e, "skipping frame");
                self.events.post(ObserverEvent::Diagnostic {
                    seq: frame.seq,
                    message: e.to_string(),
                });
                return Err(e);
            }
        };
        PipelineStats::bump(&self.stats.frames_analyzed);
        self.preview
            .send_replace(Some(result.preview(frame.captured_at_ms)));

        if !monitoring {
            return Ok(FrameOutcome::Preview);
        }

        let now_ms = frame.captured_at_ms;
        let save_requested = self.capture.should_save(&result, now_ms);
        if save_requested {
            let suggested = frame.file_name(&self.file_prefix, "jpg");
            match self.store.save(frame, &suggested) {
                Ok(stored) => {
                    PipelineStats::bump(&self.stats.saves);
                    info!(
                        seq = frame.seq,
                        file = stored,
                        max = result.max_luminosity,
                        bright_pixels = result.bright_pixels.len(),
                        store = self.store.name(),
                        "frame captured"
                    );
                    result.mark_saved(stored);
                }
                Err(e) => {
                    PipelineStats::bump(&self.stats.save_failures);
                    error!(seq = frame.seq, error = %e, file = suggested, "capture failed");
                    self.events.post(ObserverEvent::Diagnostic {
                        seq: frame.seq,
                        message: format!("capture failed: {e}"),
                    });
                }
            }
        }

        if !self.throttle.should_emit(&result, save_requested, now_ms) {
            debug!(seq = frame.seq, "report throttled");
            return Ok(FrameOutcome::Suppressed {
                saved: result.saved,
            });
        }

        let report = self.aggregator.ingest(&result);
        let capture = result.saved.then(|| CaptureEvent {
            captured_at_ms: frame.captured_at_ms,
            file_name: result.file_name.clone(),
            max_luminosity: result.max_luminosity,
            average_luminosity: result.average_luminosity,
            bright_pixels: result.bright_pixels.clone(),
        });
        if self.events.post(ObserverEvent::Report { report, capture }) {
            PipelineStats::bump(&self.stats.reports_emitted);
        }
        Ok(FrameOutcome::Emitted {
            saved: result.saved,
        })
    }
}

/// Take frames until the mailbox closes. Each lease is dropped, and so
/// released, at the end of its iteration whatever `process` returned.
pub fn run_worker(mailbox: Arc<Mailbox>, mut pipeline: FramePipeline) {
    info!("frame worker started");
    while let Some(lease) = mailbox.take() {
        let _ = pipeline.process(lease.frame());
    }
    info!("frame worker stopped");
}

pub fn spawn_worker(
    mailbox: Arc<Mailbox>,
    pipeline: FramePipeline,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("frame-worker".into())
        .spawn(move || run_worker(mailbox, pipeline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::FrameLease;
    use crate::storage::PersistError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Records every save; fails when told to.
    #[derive(Clone, Default)]
    struct MemoryStore {
        saved: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl ImageStore for MemoryStore {
        fn save(&self, _frame: &LumaFrame, suggested_name: &str) -> Result<String, PersistError> {
            if self.fail {
                return Err(PersistError::Shape { width: 0, len: 0 });
            }
            self.saved.lock().unwrap().push(suggested_name.to_string());
            Ok(suggested_name.to_string())
        }
    }

    struct Harness {
        pipeline: FramePipeline,
        control: Arc<Control>,
        events: mpsc::Receiver<ObserverEvent>,
        preview: watch::Receiver<Option<PreviewStats>>,
        stats: Arc<PipelineStats>,
    }

    fn harness(store: MemoryStore, monitoring: bool) -> Harness {
        let control = Arc::new(Control::new(monitoring));
        let stats = Arc::new(PipelineStats::default());
        let (tx, events) = mpsc::channel(64);
        let (preview_tx, preview) = watch::channel(None);
        let pipeline = FramePipeline::new(
            PipelineSettings {
                capture_cooldown_ms: 5000,
                notify_cooldown_ms: 3000,
                file_prefix: "radiograph_".into(),
            },
            Arc::clone(&control),
            Box::new(store),
            EventSink::new(tx, Arc::clone(&stats)),
            preview_tx,
            Arc::clone(&stats),
        );
        Harness {
            pipeline,
            control,
            events,
            preview,
            stats,
        }
    }

    /// 8x8 dark frame; `strike` puts one bright pixel in it.
    fn frame(ts: i64, strike: Option<u8>) -> LumaFrame {
        let mut samples = vec![12u8; 64];
        if let Some(lum) = strike {
            samples[9] = lum;
        }
        LumaFrame::new(samples, 8, ts, ts as u64)
    }

    #[test]
    fn idle_only_updates_preview() {
        let mut h = harness(MemoryStore::default(), false);
        let outcome = h.pipeline.process(&frame(10_000, Some(200))).unwrap();
        assert_eq!(outcome, FrameOutcome::Preview);
        assert!(h.events.try_recv().is_err());

        let preview = h.preview.borrow().unwrap();
        assert!(preview.blackout);
        assert_eq!(preview.max_luminosity, 200);
        assert_eq!(preview.captured_at_ms, 10_000);
    }

    #[test]
    fn strike_is_saved_and_reported() {
        let store = MemoryStore::default();
        let mut h = harness(store.clone(), true);
        let outcome = h.pipeline.process(&frame(10_000, Some(200))).unwrap();
        assert_eq!(outcome, FrameOutcome::Emitted { saved: true });

        let saved = store.saved.lock().unwrap().clone();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].ends_with("radiograph_10000.jpg"));

        match h.events.try_recv().unwrap() {
            ObserverEvent::Report { report, capture } => {
                assert_eq!(report.report_sequence, 1);
                assert_eq!(report.totals[0], 63);
                assert_eq!(report.totals[6], 1);
                let capture = capture.unwrap();
                assert_eq!(capture.file_name, saved[0]);
                assert_eq!(capture.bright_pixels.len(), 1);
                assert_eq!((capture.bright_pixels[0].x, capture.bright_pixels[0].y), (1, 1));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn quiet_frames_are_throttled() {
        let mut h = harness(MemoryStore::default(), true);
        assert_eq!(
            h.pipeline.process(&frame(10_000, None)).unwrap(),
            FrameOutcome::Emitted { saved: false }
        );
        assert_eq!(
            h.pipeline.process(&frame(11_000, None)).unwrap(),
            FrameOutcome::Suppressed { saved: false }
        );
        // a save forces an update inside the cooldown
        assert_eq!(
            h.pipeline.process(&frame(11_500, Some(90))).unwrap(),
            FrameOutcome::Emitted { saved: true }
        );
        assert_eq!(
            h.pipeline.process(&frame(14_600, None)).unwrap(),
            FrameOutcome::Emitted { saved: false }
        );

        let mut sequences = Vec::new();
        while let Ok(ObserverEvent::Report { report, .. }) = h.events.try_recv() {
            sequences.push(report.report_sequence);
        }
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(h.stats.snapshot().reports_emitted, 3);
    }

    #[test]
    fn failed_save_is_not_marked_and_still_cools_down() {
        let store = MemoryStore {
            fail: true,
            ..Default::default()
        };
        let mut h = harness(store, true);
        let outcome = h.pipeline.process(&frame(10_000, Some(200))).unwrap();
        assert_eq!(outcome, FrameOutcome::Emitted { saved: false });
        assert_eq!(h.pipeline.capture.state().last_save_time_ms, 10_000);

        let mut saw_diagnostic = false;
        while let Ok(event) = h.events.try_recv() {
            match event {
                ObserverEvent::Diagnostic { message, .. } => {
                    assert!(message.starts_with("capture failed"));
                    saw_diagnostic = true;
                }
                ObserverEvent::Report { capture, .. } => assert!(capture.is_none()),
                ObserverEvent::SessionReset(_) => panic!("no reset requested"),
            }
        }
        assert!(saw_diagnostic);

        // same brightness one second later: gate stays closed, no retry
        let outcome = h.pipeline.process(&frame(11_000, Some(200))).unwrap();
        assert_eq!(outcome, FrameOutcome::Suppressed { saved: false });
        let snap = h.stats.snapshot();
        assert_eq!(snap.save_failures, 1);
        assert_eq!(snap.saves, 0);
    }

    #[test]
    fn invalid_frame_is_reported_and_skipped() {
        let mut h = harness(MemoryStore::default(), true);
        let bad = LumaFrame::new(Vec::new(), 8, 1000, 5);
        assert_eq!(h.pipeline.process(&bad), Err(InvalidFrameError::Empty));
        match h.events.try_recv().unwrap() {
            ObserverEvent::Diagnostic { seq, .. } => assert_eq!(seq, 5),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(h.stats.snapshot().frames_invalid, 1);
        assert!(h.preview.borrow().is_none());
    }

    #[test]
    fn reset_applies_before_next_frame() {
        let mut h = harness(MemoryStore::default(), true);
        h.pipeline.process(&frame(10_000, None)).unwrap();
        h.control.reset_session();
        h.pipeline.process(&frame(20_000, None)).unwrap();

        let events: Vec<ObserverEvent> = std::iter::from_fn(|| h.events.try_recv().ok()).collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[1], ObserverEvent::SessionReset(r) if r.report_sequence == 0));
        match &events[2] {
            ObserverEvent::Report { report, .. } => {
                assert_eq!(report.report_sequence, 1);
                assert_eq!(report.totals[0], 64);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn stopping_keeps_accumulated_state() {
        let mut h = harness(MemoryStore::default(), true);
        h.pipeline.process(&frame(10_000, None)).unwrap();
        h.control.stop_monitoring();
        assert!(!h.control.is_monitoring());
        h.pipeline.process(&frame(20_000, None)).unwrap();
        h.control.start_monitoring();
        h.pipeline.process(&frame(30_000, None)).unwrap();

        let last = std::iter::from_fn(|| h.events.try_recv().ok()).last().unwrap();
        match last {
            ObserverEvent::Report { report, .. } => {
                assert_eq!(report.report_sequence, 2);
                assert_eq!(report.totals[0], 128);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    /// Block until the worker has finished `n` frames, valid or not.
    fn wait_for_processed(stats: &PipelineStats, n: u64) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let snap = stats.snapshot();
            if snap.frames_analyzed + snap.frames_invalid >= n {
                return;
            }
            assert!(std::time::Instant::now() < deadline, "worker stalled at {snap:?}");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    #[test]
    fn worker_releases_every_frame() {
        let h = harness(MemoryStore::default(), true);
        let stats = Arc::clone(&h.stats);
        let mailbox = Arc::new(Mailbox::new());
        let handle = spawn_worker(Arc::clone(&mailbox), h.pipeline).unwrap();

        let released = Arc::new(AtomicUsize::new(0));
        let frames = vec![
            frame(1_000, None),
            LumaFrame::new(Vec::new(), 8, 2_000, 2),
            frame(3_000, Some(77)),
            LumaFrame::new(vec![1, 2, 3], 0, 4_000, 4),
            LumaFrame::new(vec![1, 2, 3], 2, 5_000, 5),
            frame(6_000, None),
        ];
        let total = frames.len();
        // one at a time, so every frame reaches `process` instead of being
        // replaced in the slot
        for (i, f) in frames.into_iter().enumerate() {
            let counter = Arc::clone(&released);
            let outcome = mailbox.post(FrameLease::new(f, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
            assert_eq!(outcome, crate::intake::PostOutcome::Delivered);
            wait_for_processed(&stats, i as u64 + 1);
        }
        mailbox.close();
        handle.join().unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_invalid, 3);
        assert_eq!(snap.frames_analyzed, 3);
        assert_eq!(released.load(Ordering::SeqCst), total);
    }

    #[test]
    fn extreme_timestamps_do_not_stop_the_pipeline() {
        let mut h = harness(MemoryStore::default(), true);
        let early = LumaFrame::new(vec![12; 64], 8, i64::MIN, 1);
        let mut late = LumaFrame::new(vec![12; 64], 8, i64::MAX, 2);
        late.samples[9] = 200;

        assert!(h.pipeline.process(&frame(10_000, Some(200))).is_ok());
        assert!(h.pipeline.process(&early).is_ok());
        assert_eq!(
            h.pipeline.process(&late).unwrap(),
            FrameOutcome::Emitted { saved: true }
        );
    }
}
