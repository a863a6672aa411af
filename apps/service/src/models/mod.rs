pub mod monitor;

pub use monitor::{Monitor, MonitorError, Observation, is_healthy_status};
