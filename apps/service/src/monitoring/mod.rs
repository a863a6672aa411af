/// Monitoring engine module - decides which monitors are due, probes them
/// and records the outcome
///
/// This module is responsible for:
/// - Executing HTTP health checks (`checker`)
/// - Turning a probe into a stored observation (`executor`)
/// - Bounding concurrent probes with a lossy job queue (`workers`)
/// - Periodically dispatching due monitors (`scheduler`)
pub mod checker;
pub mod executor;
pub mod scheduler;
pub mod types;
pub mod workers;

pub use checker::{Checker, HttpChecker};
pub use executor::JobExecutor;
pub use scheduler::{MonitoringScheduler, TickReport};
pub use types::{Job, ProbeOutcome, Submission};
pub use workers::{JobQueue, WorkerPool};
