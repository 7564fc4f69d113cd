pub mod job;
pub mod update_queue;

pub use job::{Job, JobStatus, JobTarget};
pub use update_queue::{JobRunner, UpdateQueue, DEFAULT_QUEUE_CAPACITY};
