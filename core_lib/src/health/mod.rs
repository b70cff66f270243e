pub mod aggregator;
pub mod cache;
pub mod collector;
pub mod engine;
pub mod model;
pub mod registry;
pub mod runner;
pub mod spec;

#[cfg(test)]
mod tests;

pub use aggregator::Aggregator;
pub use cache::{CacheEntry, CommitStats, ResultCache};
pub use collector::{CollectedRun, Collector, DEFAULT_GLOBAL_TIMEOUT};
pub use engine::{CheckerEngine, EngineSettings};
pub use model::{CheckResult, CheckStatus, HealthReport, HealthStatus};
pub use registry::{RegisterMode, Registration, Registry};
pub use runner::ProbeRunner;
pub use spec::{
    AsyncProbe, CheckCategory, CheckSpec, Comparator, Probe, ProbeContext, ProbeOutput, RetryPolicy, Threshold,
    DEFAULT_CHECK_TIMEOUT,
};
