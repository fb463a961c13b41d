use radiograph_common::report::{FrameResult, SessionReport, BUCKET_COUNT};

/// Cumulative session statistics. Every ingest returns an owned snapshot, so
/// readers on other threads never see a half-updated report.
#[derive(Debug, Default)]
pub struct SessionAggregator {
    report: SessionReport,
}

impl SessionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, result: &FrameResult) -> SessionReport {
        let report = &mut self.report;

        report.blackout = result.blackout;
        report.average_luminosity = result.average_luminosity;
        report.min_luminosity = result.min_luminosity;
        report.max_luminosity = result.max_luminosity;
        report.pixel_count = result.pixel_count;

        for bucket in 0..BUCKET_COUNT {
            report.totals[bucket] += u64::from(result.histogram.counts[bucket]);
        }

        report.session_min_luminosity = Some(match report.session_min_luminosity {
            Some(min) => min.min(result.min_luminosity),
            None => result.min_luminosity,
        });
        report.session_max_luminosity = Some(match report.session_max_luminosity {
            Some(max) => max.max(result.max_luminosity),
            None => result.max_luminosity,
        });

        report.report_sequence += 1;
        report.clone()
    }

    /// Zero every total and the sequence counter.
    pub fn reset_session(&mut self) -> SessionReport {
        self.report = SessionReport::default();
        self.report.clone()
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> SessionReport {
        self.report.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiograph_common::report::Histogram;

    fn result(counts: [u32; BUCKET_COUNT], min: u8, max: u8) -> FrameResult {
        FrameResult {
            blackout: true,
            average_luminosity: f64::from(min),
            min_luminosity: min,
            max_luminosity: max,
            pixel_count: 1000,
            histogram: Histogram { counts },
            bright_pixels: Vec::new(),
            saved: false,
            file_name: String::new(),
        }
    }

    #[test]
    fn totals_are_exact_sums() {
        let mut agg = SessionAggregator::new();
        let frames = [
            result([1, 2, 3, 4, 5, 6, 7], 0, 40),
            result([10, 0, 0, 0, 0, 0, 1], 1, 200),
            result([0, 0, 0, 0, 0, 0, 0], 2, 9),
        ];
        let mut last = SessionReport::default();
        for (i, frame) in frames.iter().enumerate() {
            last = agg.ingest(frame);
            assert_eq!(last.report_sequence, i as u64 + 1);
        }
        assert_eq!(last.totals, [11, 2, 3, 4, 5, 6, 8]);
    }

    #[test]
    fn latest_fields_reflect_only_last_frame() {
        let mut agg = SessionAggregator::new();
        agg.ingest(&result([0; BUCKET_COUNT], 3, 250));
        let report = agg.ingest(&result([0; BUCKET_COUNT], 7, 60));
        assert_eq!(report.min_luminosity, 7);
        assert_eq!(report.max_luminosity, 60);
        assert_eq!(report.average_luminosity, 7.0);
        // the session-wide extremes are tracked separately
        assert_eq!(report.session_min_luminosity, Some(3));
        assert_eq!(report.session_max_luminosity, Some(250));
    }

    #[test]
    fn snapshots_are_independent() {
        let mut agg = SessionAggregator::new();
        let first = agg.ingest(&result([1, 0, 0, 0, 0, 0, 0], 0, 10));
        agg.ingest(&result([1, 0, 0, 0, 0, 0, 0], 0, 10));
        assert_eq!(first.totals[0], 1);
        assert_eq!(first.report_sequence, 1);
        assert_eq!(agg.snapshot().totals[0], 2);
    }

    #[test]
    fn reset_zeroes_totals_and_sequence() {
        let mut agg = SessionAggregator::new();
        agg.ingest(&result([5; BUCKET_COUNT], 0, 99));
        agg.ingest(&result([5; BUCKET_COUNT], 0, 99));
        let cleared = agg.reset_session();
        assert_eq!(cleared.totals, [0; BUCKET_COUNT]);
        assert_eq!(cleared.report_sequence, 0);
        assert_eq!(cleared.session_max_luminosity, None);

        let next = agg.ingest(&result([1; BUCKET_COUNT], 0, 20));
        assert_eq!(next.report_sequence, 1);
        assert_eq!(next.totals, [1; BUCKET_COUNT]);
    }
}
