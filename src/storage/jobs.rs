use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::{CoordinatorError, Result};
use crate::models::{JobId, JobRecord, NewJob, SubmissionLimits};
use crate::storage::JobStore;

/// On-disk layout of `jobs.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Registry {
    next_id: u64,
    jobs: Vec<JobRecord>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            next_id: 1,
            jobs: Vec::new(),
        }
    }
}

pub struct JsonJobStore {
    file_path: PathBuf,
    limits: SubmissionLimits,
    cache: RwLock<Registry>,
}

impl JsonJobStore {
    /// Open the registry under `data_dir`, loading `jobs.json` if present.
    ///
    /// A corrupted file is copied to `jobs.json.bak` and opening fails:
    /// starting empty would restart id issuance.
    pub async fn new(data_dir: PathBuf, limits: SubmissionLimits) -> Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let file_path = data_dir.join("jobs.json");

        let registry = if file_path.exists() {
            let content = tokio::fs::read_to_string(&file_path).await?;
            match serde_json::from_str::<Registry>(&content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    let backup_path = data_dir.join("jobs.json.bak");
                    if let Err(backup_err) = tokio::fs::copy(&file_path, &backup_path).await {
                        tracing::error!(
                            "Failed to back up corrupted jobs.json: {}",
                            backup_err
                        );
                    }
                    tracing::error!(
                        "jobs.json is corrupted ({}); backup written to {}",
                        e,
                        backup_path.display()
                    );
                    return Err(CoordinatorError::Fatal(format!(
                        "Job registry {} is corrupted: {}",
                        file_path.display(),
                        e
                    )));
                }
            }
        } else {
            Registry::default()
        };

        tracing::debug!(
            "Loaded {} job(s) from {} (next id {})",
            registry.jobs.len(),
            file_path.display(),
            registry.next_id
        );

        Ok(Self {
            file_path,
            limits,
            cache: RwLock::new(registry),
        })
    }

    /// Write the registry to a .tmp file, then rename over `jobs.json`.
    async fn persist(&self, registry: &Registry) -> Result<()> {
        let tmp_path = self.file_path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(registry)?;
        tokio::fs::write(&tmp_path, json.as_bytes()).await?;
        tokio::fs::rename(&tmp_path, &self.file_path).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for JsonJobStore {
    async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let cache = self.cache.read().await;
        Ok(cache.jobs.clone())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        let cache = self.cache.read().await;
        Ok(cache.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn create_job(&self, new: NewJob) -> Result<JobRecord> {
        new.check(&self.limits)?;

        let mut cache = self.cache.write().await;

        let mut next = cache.clone();
        let record = new.into_record(JobId(next.next_id), Utc::now());
        next.next_id += 1;
        next.jobs.push(record.clone());

        self.persist(&next).await?;
        *cache = next;

        Ok(record)
    }

    async fn delete_job(&self, id: JobId) -> Result<()> {
        let mut cache = self.cache.write().await;

        let idx = cache
            .jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| CoordinatorError::NotFound(format!("Job {} not found", id)))?;

        let mut next = cache.clone();
        next.jobs.remove(idx);
        self.persist(&next).await?;
        *cache = next;

        Ok(())
    }
}
