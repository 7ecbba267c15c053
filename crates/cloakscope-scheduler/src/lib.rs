pub mod jobs;
pub mod scheduler;

pub use jobs::{
    JobStatus, Recurrence, RunTally, ScheduleType, TaskType, UnknownVariant, ERROR_SUMMARY_LIMIT,
};
pub use scheduler::{is_job_due, next_run_after, RUN_HOUR_UTC};
