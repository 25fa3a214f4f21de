pub mod jobs;
pub mod memory;
pub mod progress;

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{JobId, JobRecord, NewJob, ProgressRecord};

pub use jobs::JsonJobStore;
pub use memory::{InMemoryJobStore, InMemoryProgressStore};
pub use progress::FsProgressStore;

/// The job registry: owns job records, issues ids.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// All records in insertion order.
    async fn list_jobs(&self) -> Result<Vec<JobRecord>>;
    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>>;
    async fn create_job(&self, new: NewJob) -> Result<JobRecord>;
    /// `NotFound` when the id is absent, including on a repeated delete.
    async fn delete_job(&self, id: JobId) -> Result<()>;
}

/// Durable copies of tracker state, one per job.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<ProgressRecord>>;
    async fn save(&self, record: &ProgressRecord) -> Result<()>;
    async fn remove(&self, id: JobId) -> Result<()>;
}
