pub mod service;
pub mod threshold;

pub use service::{DeviceOutcome, PassSummary, TelemetryPipeline, TelemetryWatcher, WatcherHandle};
pub use threshold::{AlertDecision, PhEvaluator};
