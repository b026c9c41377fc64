pub mod metrics;
pub mod monitor;
pub mod outcome;
pub mod payload;
pub mod runner;
pub mod scheduler;
pub mod stages;
pub mod target;
pub mod thresholds;
pub mod worker;

pub use metrics::{MetricsCollector, MetricsSnapshot, RunSummary};
pub use monitor::{MonitorMode, PerformanceMonitor};
pub use payload::{IdentifierPool, Mutation, Payload, PayloadProvider, PayloadSource};
pub use runner::{LoadTestRunner, RunReport};
pub use scheduler::StageScheduler;
pub use stages::{RampTimeline, Stage};
pub use target::{Connector, Session};
pub use thresholds::{evaluate_all, RunVerdict, ThresholdSpec, Verdict};
