pub mod job;
pub mod pool;
pub mod scheduler;
pub mod store;

pub use job::{Deadline, JobId, JobRecord, JobStatus};
pub use pool::{JobContext, JobHandler, JobQueue};
pub use scheduler::{DelayedTask, Scheduler, TaskId};
pub use store::{JobEvent, JobStore};

// Re-export crossbeam_channel for embedders driving their own loops
pub use crossbeam_channel;
