//! certwatch-collector — 저장된 이벤트에서 메트릭을 도출합니다.
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`CollectorError`)
//! - [`stats`]: Duration summaries (`DurationStats`)
//! - [`collector`]: Timelines, stage durations, counts (`MetricsCollector`)

pub mod collector;
pub mod error;
pub mod stats;

pub use collector::{
    CountPeaks, EntityTimeline, MetricsCollector, RunMetrics, Stage, TestCaseMetrics,
};
pub use error::CollectorError;
pub use stats::DurationStats;
