use radiograph_common::report::FrameResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleState {
    pub last_emit_time_ms: i64,
}

/// Rate-limit observer updates. A frame that was just saved always goes
/// through; anything else waits for the cooldown. Suppressed results are
/// dropped, not queued.
pub fn decide(
    _result: &FrameResult,
    just_saved: bool,
    state: ThrottleState,
    now_ms: i64,
    cooldown_ms: i64,
) -> (bool, ThrottleState) {
    let should_emit = just_saved || now_ms.saturating_sub(state.last_emit_time_ms) > cooldown_ms;
    if should_emit {
        (
            true,
            ThrottleState {
                last_emit_time_ms: now_ms,
            },
        )
    } else {
        (false, state)
    }
}

pub struct NotificationThrottle {
    state: ThrottleState,
    cooldown_ms: i64,
}

impl NotificationThrottle {
    pub fn new(cooldown_ms: i64) -> Self {
        Self {
            state: ThrottleState::default(),
            cooldown_ms,
        }
    }

    pub fn should_emit(&mut self, result: &FrameResult, just_saved: bool, now_ms: i64) -> bool {
        let (emit, next) = decide(result, just_saved, self.state, now_ms, self.cooldown_ms);
        self.state = next;
        emit
    }
}
