pub mod heartbeat;
pub mod status_monitor;

pub use heartbeat::LivenessTracker;
pub use status_monitor::{CACHE_COMPONENT, HealthEvent, STORE_COMPONENT, StatusMonitor};
