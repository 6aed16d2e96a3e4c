pub mod queries;
pub mod scheduler;

pub use queries::ServerQueries;
pub use scheduler::{PollScheduler, SchedulerStats};
