use radiograph_common::report::FrameResult;
use tracing::debug;

/// Cooldown bookkeeping for evidence captures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureState {
    pub last_save_time_ms: i64,
    pub last_saved_max_luminosity: u8,
}

/// Decide whether the current frame should be persisted.
///
/// Only blacked-out frames with at least one bright pixel qualify. A
/// qualifying frame is saved when the cooldown has elapsed, or earlier if it
/// is brighter than anything saved so far. The brightness watermark is raised
/// by any brighter qualifying frame, saved or not.
pub fn decide(
    result: &FrameResult,
    state: CaptureState,
    now_ms: i64,
    cooldown_ms: i64,
) -> (bool, CaptureState) {
    if !result.blackout || result.bright_pixels.is_empty() {
        return (false, state);
    }

    let cooldown_elapsed = now_ms.saturating_sub(state.last_save_time_ms) > cooldown_ms;
    let is_brighter = result.max_luminosity > state.last_saved_max_luminosity;

    let mut next = state;
    if is_brighter {
        next.last_saved_max_luminosity = result.max_luminosity;
    }

    let should_save = cooldown_elapsed || is_brighter;
    if should_save {
        next.last_save_time_ms = now_ms;
    }

    debug!(
        cooldown_elapsed,
        is_brighter,
        should_save,
        max = result.max_luminosity,
        bright_pixels = result.bright_pixels.len(),
        "capture gate"
    );

    (should_save, next)
}

/// Owns a [`CaptureState`] across frames.
pub struct CaptureGate {
    state: CaptureState,
    cooldown_ms: i64,
}

impl CaptureGate {
    pub fn new(cooldown_ms: i64) -> Self {
        Self {
            state: CaptureState::default(),
            cooldown_ms,
        }
    }

    /// Returns `true` if the caller should persist this frame. The cooldown
    /// is consumed immediately, so a failed save is not retried on the next
    /// frame.
    pub fn should_save(&mut self, result: &FrameResult, now_ms: i64) -> bool {
        let (save, next) = decide(result, self.state, now_ms, self.cooldown_ms);
        self.state = next;
        save
    }

    #[cfg(test)]
    pub fn state(&self) -> CaptureState {
        self.state
    }
}
