pub mod config;
pub mod job;
pub mod progress;

pub use config::{CoordinatorConfig, RetryPolicy, SubmissionLimits};
pub use job::{JobId, JobInfo, JobRecord, JobSummary, NewJob, StorageKind, UploadJobRequest};
pub use progress::{
    JobStatus, Phase, PhaseDuration, ProgressEvent, ProgressRecord, ProgressState, TaskType,
    TerminationStatus,
};
