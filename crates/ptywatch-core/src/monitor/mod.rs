mod machine;
mod scheduler;
mod session;
mod stability;

pub use machine::{Outcome, SessionMachine, REMOVED_SUMMARY};
pub use scheduler::{DiscoveryReport, Scheduler};
pub use session::{MonitorContext, MonitorSignal, PollOutcome, SessionMonitor};
pub use stability::{Observation, Snapshot, StabilityTracker};
