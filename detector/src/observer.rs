use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Local};
use radiograph_common::report::{BrightPixel, SessionReport, BUCKET_LABELS};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::db::{CaptureDb, NewCapture};
use crate::stats::PipelineStats;

/// Number of capture log lines kept in memory for the API.
pub const LOG_HISTORY: usize = 200;

/// A confirmed save, as seen by the observer.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureEvent {
    pub captured_at_ms: i64,
    pub file_name: String,
    pub max_luminosity: u8,
    pub average_luminosity: f64,
    pub bright_pixels: Vec<BrightPixel>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Report {
        report: SessionReport,
        capture: Option<CaptureEvent>,
    },
    SessionReset(SessionReport),
    /// A non-fatal per-frame problem (bad frame, failed save).
    Diagnostic { seq: u64, message: String },
}

/// Worker-side end of the observer channel. Posting never blocks: when the
/// observer falls behind, events are dropped and counted.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ObserverEvent>,
    stats: Arc<PipelineStats>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ObserverEvent>, stats: Arc<PipelineStats>) -> Self {
        Self { tx, stats }
    }

    pub fn post(&self, event: ObserverEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                PipelineStats::bump(&self.stats.observer_drops);
                warn!("observer channel full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("observer gone, event dropped");
                false
            }
        }
    }
}

/// What the HTTP API reads.
#[derive(Clone)]
pub struct ObserverView {
    pub report: watch::Receiver<Option<SessionReport>>,
    pub log: Arc<Mutex<VecDeque<String>>>,
}

pub struct Observer {
    db: Option<Arc<CaptureDb>>,
    report_tx: watch::Sender<Option<SessionReport>>,
    log: Arc<Mutex<VecDeque<String>>>,
}

impl Observer {
    pub fn new(db: Option<Arc<CaptureDb>>) -> (Self, ObserverView) {
        let (report_tx, report_rx) = watch::channel(None);
        let log = Arc::new(Mutex::new(VecDeque::with_capacity(LOG_HISTORY)));
        let view = ObserverView {
            report: report_rx,
            log: Arc::clone(&log),
        };
        (
            Self {
                db,
                report_tx,
                log,
            },
            view,
        )
    }

    /// Drain events until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ObserverEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        info!("observer channel closed");
    }

    async fn handle(&mut self, event: ObserverEvent) {
        match event {
            ObserverEvent::Report { report, capture } => {
                debug!(
                    seq = report.report_sequence,
                    blackout = report.blackout,
                    avg = format!("{:.1}", report.average_luminosity),
                    min = report.min_luminosity,
                    max = report.max_luminosity,
                    "session report"
                );
                if let Some(capture) = capture {
                    let summary = summary_text(&report);
                    let line = log_line(&capture, capture_time(capture.captured_at_ms));
                    info!(summary, line, "capture");
                    self.record_capture(&capture, report.report_sequence);
                    let mut log = self.log.lock().await;
                    log.push_front(line);
                    log.truncate(LOG_HISTORY);
                }
                self.report_tx.send_replace(Some(report));
            }
            ObserverEvent::SessionReset(report) => {
                info!("session totals reset");
                self.report_tx.send_replace(Some(report));
            }
            ObserverEvent::Diagnostic { seq, message } => {
                warn!(seq, "frame diagnostic: {message}");
            }
        }
    }

    fn record_capture(&self, capture: &CaptureEvent, report_sequence: u64) {
        let Some(db) = &self.db else {
            return;
        };
        let row = NewCapture {
            captured_at_ms: capture.captured_at_ms,
            file_name: &capture.file_name,
            max_luminosity: capture.max_luminosity,
            average_luminosity: capture.average_luminosity,
            bright_pixels: &capture.bright_pixels,
            report_sequence,
        };
        if let Err(e) = db.insert_capture(&row) {
            error!(error = %e, file_name = capture.file_name, "failed to log capture to SQLite");
        }
    }
}

/// Human-readable session summary.
pub fn summary_text(report: &SessionReport) -> String {
    let mut text = format!(
        "luminosity avg-min-max: {:.1} - {} - {}\npixels: {}\n",
        report.average_luminosity,
        report.min_luminosity,
        report.max_luminosity,
        report.pixel_count
    );
    if !report.blackout {
        text.push_str("cover the camera lens\n");
        return text;
    }
    text.push_str("cumulative counts:\n");
    for (label, total) in BUCKET_LABELS.iter().zip(report.totals.iter()) {
        let _ = writeln!(text, "{label}: {total}");
    }
    text
}

/// Local wall-clock time of a capture. Falls back to now for timestamps
/// chrono cannot represent.
pub fn capture_time(captured_at_ms: i64) -> DateTime<Local> {
    DateTime::from_timestamp_millis(captured_at_ms)
        .map(|t| t.with_timezone(&Local))
        .unwrap_or_else(Local::now)
}

/// One line per capture: time, peak, every bright pixel as `x-y-luminosity`,
/// then the stored file name.
pub fn log_line(capture: &CaptureEvent, at: DateTime<Local>) -> String {
    let pixels = capture
        .bright_pixels
        .iter()
        .map(|p| format!("{}-{}-{}", p.x, p.y, p.luminosity))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} - max luminosity: {}, bright pixels: {}, {}",
        at.format("%H:%M:%S"),
        capture.max_luminosity,
        pixels,
        capture.file_name
    )
}
