use serde::{Deserialize, Serialize};

/// Number of luminosity histogram buckets.
pub const BUCKET_COUNT: usize = 7;

/// Inclusive lower bound of each bucket. Each bucket ends where the next one
/// starts; the last one is open-ended. Pixels below 10 are not counted.
pub const BUCKET_FLOORS: [u8; BUCKET_COUNT] = [10, 20, 30, 40, 50, 100, 150];

pub const BUCKET_LABELS: [&str; BUCKET_COUNT] =
    ["10-20", "20-30", "30-40", "40-50", "50-100", "100-150", "150+"];

/// A pixel bright enough to be a candidate particle strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrightPixel {
    pub x: u32,
    pub y: u32,
    pub luminosity: u8,
}

/// Per-frame luminosity histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Histogram {
    pub counts: [u32; BUCKET_COUNT],
}

impl Histogram {
    /// Index of the bucket holding `luminosity`, matching from the highest
    /// bucket down. `None` for pixels below the first floor.
    pub fn bucket_for(luminosity: u8) -> Option<usize> {
        BUCKET_FLOORS.iter().rposition(|&floor| luminosity >= floor)
    }

    pub fn record(&mut self, luminosity: u8) {
        if let Some(bucket) = Self::bucket_for(luminosity) {
            self.counts[bucket] += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }
}

/// Analysis output for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameResult {
    pub blackout: bool,
    pub average_luminosity: f64,
    pub min_luminosity: u8,
    pub max_luminosity: u8,
    pub pixel_count: usize,
    pub histogram: Histogram,
    pub bright_pixels: Vec<BrightPixel>,
    pub saved: bool,
    pub file_name: String,
}

impl FrameResult {
    /// Record a confirmed save. Only call once persistence has succeeded.
    pub fn mark_saved(&mut self, stored_name: String) {
        debug_assert!(!self.saved, "frame result marked saved twice");
        self.saved = true;
        self.file_name = stored_name;
    }

    pub fn preview(&self, captured_at_ms: i64) -> PreviewStats {
        PreviewStats {
            blackout: self.blackout,
            average_luminosity: self.average_luminosity,
            min_luminosity: self.min_luminosity,
            max_luminosity: self.max_luminosity,
            pixel_count: self.pixel_count,
            captured_at_ms,
        }
    }
}

/// Live view of the most recent analyzed frame, published whether or not
/// monitoring is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PreviewStats {
    pub blackout: bool,
    pub average_luminosity: f64,
    pub min_luminosity: u8,
    pub max_luminosity: u8,
    pub pixel_count: usize,
    pub captured_at_ms: i64,
}

/// Snapshot of the session handed to observers.
///
/// `blackout`, `average_luminosity`, `min_luminosity`, `max_luminosity` and
/// `pixel_count` describe only the latest forwarded frame. `totals` and the
/// `session_*` extremes accumulate until the session is reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionReport {
    pub blackout: bool,
    pub average_luminosity: f64,
    pub min_luminosity: u8,
    pub max_luminosity: u8,
    pub pixel_count: usize,
    pub totals: [u64; BUCKET_COUNT],
    pub session_min_luminosity: Option<u8>,
    pub session_max_luminosity: Option<u8>,
    pub report_sequence: u64,
}
