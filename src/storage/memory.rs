//! Process-local stores for `serve --in-memory` and for tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::errors::{CoordinatorError, Result};
use crate::models::{JobId, JobRecord, NewJob, ProgressRecord, SubmissionLimits};
use crate::storage::{JobStore, ProgressStore};

struct Registry {
    next_id: u64,
    jobs: Vec<JobRecord>,
}

pub struct InMemoryJobStore {
    limits: SubmissionLimits,
    inner: RwLock<Registry>,
}

impl InMemoryJobStore {
    pub fn new(limits: SubmissionLimits) -> Self {
        Self {
            limits,
            inner: RwLock::new(Registry {
                next_id: 1,
                jobs: Vec::new(),
            }),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(SubmissionLimits::default())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        Ok(self.inner.read().await.jobs.clone())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn create_job(&self, new: NewJob) -> Result<JobRecord> {
        new.check(&self.limits)?;
        let mut inner = self.inner.write().await;
        let record = new.into_record(JobId(inner.next_id), Utc::now());
        inner.next_id += 1;
        inner.jobs.push(record.clone());
        Ok(record)
    }

    async fn delete_job(&self, id: JobId) -> Result<()> {
        let mut inner = self.inner.write().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|j| j.id != id);
        if inner.jobs.len() == before {
            return Err(CoordinatorError::NotFound(format!("Job {} not found", id)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProgressStore {
    records: RwLock<BTreeMap<JobId, ProgressRecord>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn load_all(&self) -> Result<Vec<ProgressRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn save(&self, record: &ProgressRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.job_id, record.clone());
        Ok(())
    }

    async fn remove(&self, id: JobId) -> Result<()> {
        self.records.write().await.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_new_job(name: &str) -> NewJob {
        NewJob {
            name: name.to_string(),
            job_path: None,
            job_storage_connection_string: "local".to_string(),
            data_storage_connection_string: "local".to_string(),
            inputs_path: "/in".to_string(),
            mappers_outputs_path: "/map".to_string(),
            reducers_outputs_path: "/out".to_string(),
            mappers_count: 1,
            reducers_count: 1,
            sorter_in_memory_records: 10_000,
        }
    }

    #[tokio::test]
    async fn test_in_memory_registry_matches_file_semantics() {
        let store = InMemoryJobStore::default();
        let a = store.create_job(make_new_job("a")).await.expect("create");
        store.delete_job(a.id).await.expect("delete");
        assert!(matches!(
            store.delete_job(a.id).await,
            Err(CoordinatorError::NotFound(_))
        ));
        let b = store.create_job(make_new_job("b")).await.expect("create");
        assert_eq!(b.id, JobId(2));
        assert_eq!(store.list_jobs().await.expect("list"), vec![b]);
    }

    #[tokio::test]
    async fn test_in_memory_progress_store() {
        let store = InMemoryProgressStore::new();
        store
            .save(&ProgressRecord::new(JobId(3), 1, 1))
            .await
            .expect("save");
        store
            .save(&ProgressRecord::new(JobId(1), 1, 1))
            .await
            .expect("save");
        let ids: Vec<JobId> = store
            .load_all()
            .await
            .expect("load")
            .into_iter()
            .map(|r| r.job_id)
            .collect();
        assert_eq!(ids, vec![JobId(1), JobId(3)]);
        store.remove(JobId(1)).await.expect("remove");
        assert_eq!(store.load_all().await.expect("load").len(), 1);
    }
}
