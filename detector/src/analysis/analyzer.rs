use radiograph_common::report::{BrightPixel, FrameResult, Histogram};

/// Pixels strictly above this luminosity are reported as bright pixels.
pub const BRIGHT_THRESHOLD: u8 = 30;

/// A frame whose average luminosity is below this is considered blacked out.
pub const BLACKOUT_THRESHOLD: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidFrameError {
    #[error("invalid frame: empty sample buffer")]
    Empty,
    #[error("invalid frame: width must be positive")]
    ZeroWidth,
    #[error("invalid frame: {len} samples is not a whole number of {width}-pixel rows")]
    Ragged { len: usize, width: usize },
}

/// Classify one row-major luminance plane.
///
/// Min, max, average and blackout are always computed. The histogram and the
/// bright-pixel list are only filled in while `monitoring` is set; otherwise
/// they stay empty and the pass costs little more than a sum.
pub fn analyze(
    samples: &[u8],
    width: usize,
    monitoring: bool,
) -> Result<FrameResult, InvalidFrameError> {
    if samples.is_empty() {
        return Err(InvalidFrameError::Empty);
    }
    if width == 0 {
        return Err(InvalidFrameError::ZeroWidth);
    }
    if samples.len() % width != 0 {
        return Err(InvalidFrameError::Ragged {
            len: samples.len(),
            width,
        });
    }

    let mut sum: u64 = 0;
    let mut min_luminosity = u8::MAX;
    let mut max_luminosity = 0u8;
    let mut histogram = Histogram::default();
    let mut bright_pixels = Vec::new();

    for (index, &luminosity) in samples.iter().enumerate() {
        sum += u64::from(luminosity);
        min_luminosity = min_luminosity.min(luminosity);
        max_luminosity = max_luminosity.max(luminosity);

        if monitoring {
            histogram.record(luminosity);
            if luminosity > BRIGHT_THRESHOLD {
                bright_pixels.push(BrightPixel {
                    x: (index % width) as u32,
                    y: (index / width) as u32,
                    luminosity,
                });
            }
        }
    }

    let pixel_count = samples.len();
    let average_luminosity = sum as f64 / pixel_count as f64;

    Ok(FrameResult {
        blackout: average_luminosity < BLACKOUT_THRESHOLD,
        average_luminosity,
        min_luminosity,
        max_luminosity,
        pixel_count,
        histogram,
        bright_pixels,
        saved: false,
        file_name: String::new(),
    })
}
