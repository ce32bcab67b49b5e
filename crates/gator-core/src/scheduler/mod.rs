mod clock;
mod cycle;
mod service;

pub use clock::{Clock, SystemClock};
pub use cycle::{run_cycle, CycleError, CycleReport, CycleStage};
pub use service::{SchedulerEvent, SchedulerService};
