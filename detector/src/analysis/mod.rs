//! Per-frame analysis and the decision units that run after it on the worker.

pub mod aggregator;
pub mod analyzer;
pub mod capture;
pub mod throttle;
