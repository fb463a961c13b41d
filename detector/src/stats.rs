use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::intake::PostOutcome;

/// Counters shared by the sources, the worker and the observer sink.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_received: AtomicU64,
    pub frames_released: AtomicU64,
    pub frames_replaced: AtomicU64,
    pub frames_analyzed: AtomicU64,
    pub frames_invalid: AtomicU64,
    pub saves: AtomicU64,
    pub save_failures: AtomicU64,
    pub reports_emitted: AtomicU64,
    pub observer_drops: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_released: u64,
    pub frames_replaced: u64,
    pub frames_analyzed: u64,
    pub frames_invalid: u64,
    pub saves: u64,
    pub save_failures: u64,
    pub reports_emitted: u64,
    pub observer_drops: u64,
}

impl PipelineStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_post(&self, outcome: PostOutcome) {
        Self::bump(&self.frames_received);
        if outcome == PostOutcome::Replaced {
            Self::bump(&self.frames_replaced);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_received: get(&self.frames_received),
            frames_released: get(&self.frames_released),
            frames_replaced: get(&self.frames_replaced),
            frames_analyzed: get(&self.frames_analyzed),
            frames_invalid: get(&self.frames_invalid),
            saves: get(&self.saves),
            save_failures: get(&self.save_failures),
            reports_emitted: get(&self.reports_emitted),
            observer_drops: get(&self.observer_drops),
        }
    }
}
