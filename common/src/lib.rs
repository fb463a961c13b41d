pub mod config;
pub mod frame;
pub mod report;
