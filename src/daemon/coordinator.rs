use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::daemon::events::JobEvent;
use crate::daemon::tracker::{ProgressTracker, RestoreSummary, StatusCounts};
use crate::errors::{CoordinatorError, Result};
use crate::models::{
    JobId, JobInfo, JobRecord, JobSummary, NewJob, ProgressEvent, ProgressState,
    SubmissionLimits, UploadJobRequest,
};
use crate::storage::JobStore;

/// Mediates between the HTTP layer, the registry and the tracker. Keeps the
/// 1:1 pairing of job records and progress states across submit and remove.
pub struct JobCoordinator {
    store: Arc<dyn JobStore>,
    tracker: Arc<ProgressTracker>,
    limits: SubmissionLimits,
    event_tx: broadcast::Sender<JobEvent>,
}

impl JobCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        tracker: Arc<ProgressTracker>,
        limits: SubmissionLimits,
        event_tx: broadcast::Sender<JobEvent>,
    ) -> Self {
        Self {
            store,
            tracker,
            limits,
            event_tx,
        }
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Validate, register, and start tracking a job.
    ///
    /// If progress cannot be initialized the new record is deleted again.
    pub async fn submit(&self, request: UploadJobRequest) -> Result<JobRecord> {
        let new_job = request.validate(&self.limits)?;
        let store = Arc::clone(&self.store);
        let tracker = Arc::clone(&self.tracker);
        let event_tx = self.event_tx.clone();
        run_detached(register(store, tracker, event_tx, new_job)).await
    }

    pub async fn list(&self) -> Result<Vec<JobSummary>> {
        let jobs = self.store.list_jobs().await?;
        Ok(jobs.iter().map(JobRecord::summary).collect())
    }

    pub async fn info(&self, id: JobId) -> Result<JobInfo> {
        let record = self
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound(format!("Job {} not found", id)))?;
        let progress = self.tracker.get(id).await?;
        Ok(JobInfo::new(record, progress))
    }

    pub async fn progress(&self, id: JobId) -> Result<ProgressState> {
        self.tracker.get(id).await
    }

    /// Apply a worker's progress report.
    pub async fn report(&self, id: JobId, event: ProgressEvent) -> Result<ProgressState> {
        if let ProgressEvent::Aborted {
            reason: Some(reason),
        } = &event
        {
            tracing::warn!("Worker aborted job {}: {}", id, reason);
        }
        let tracker = Arc::clone(&self.tracker);
        run_detached(async move { tracker.advance(id, &event).await }).await
    }

    /// Abort a job without waiting for its workers.
    pub async fn cancel(&self, id: JobId) -> Result<ProgressState> {
        let tracker = Arc::clone(&self.tracker);
        let state = run_detached(async move { tracker.cancel(id).await }).await?;
        tracing::info!("Cancelled job {}", id);
        Ok(state)
    }

    /// Delete a job and its progress. Running jobs must be cancelled first.
    pub async fn remove(&self, id: JobId) -> Result<()> {
        let store = Arc::clone(&self.store);
        let tracker = Arc::clone(&self.tracker);
        let event_tx = self.event_tx.clone();
        run_detached(unregister(store, tracker, event_tx, id)).await
    }

    /// Rebuild tracker state from storage after a restart.
    pub async fn restore(&self) -> Result<RestoreSummary> {
        let jobs = self.store.list_jobs().await?;
        self.tracker.restore(&jobs).await
    }

    pub async fn status_counts(&self) -> StatusCounts {
        self.tracker.status_counts().await
    }
}

/// Run a multi-step mutation on its own task.
///
/// The caller may be dropped (request timeout, client gone) at any await;
/// the spawned task still runs every step, so a record and its progress are
/// always created or removed together.
async fn run_detached<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    match tokio::spawn(task).await {
        Ok(result) => result,
        Err(e) => Err(CoordinatorError::Fatal(format!("Job task failed: {}", e))),
    }
}

async fn register(
    store: Arc<dyn JobStore>,
    tracker: Arc<ProgressTracker>,
    event_tx: broadcast::Sender<JobEvent>,
    new_job: NewJob,
) -> Result<JobRecord> {
    let record = store.create_job(new_job).await?;

    if let Err(e) = tracker.init(&record).await {
        tracing::error!(
            "Failed to initialize progress for job {}: {}; rolling back",
            record.id,
            e
        );
        if let Err(rollback_err) = store.delete_job(record.id).await {
            tracing::error!("Rollback of job {} failed: {}", record.id, rollback_err);
        }
        return Err(e);
    }

    tracing::info!(
        "Accepted job {} ('{}'): {} mappers, {} reducers",
        record.id,
        record.name,
        record.mappers_count,
        record.reducers_count
    );
    let _ = event_tx.send(JobEvent::Submitted {
        job_id: record.id,
        name: record.name.clone(),
        timestamp: Utc::now(),
    });

    Ok(record)
}

async fn unregister(
    store: Arc<dyn JobStore>,
    tracker: Arc<ProgressTracker>,
    event_tx: broadcast::Sender<JobEvent>,
    id: JobId,
) -> Result<()> {
    if store.get_job(id).await?.is_none() {
        return Err(CoordinatorError::NotFound(format!("Job {} not found", id)));
    }

    // NotFound here means a concurrent remove already took the progress.
    let retired = match tracker.retire(id).await {
        Ok(record) => Some(record),
        Err(CoordinatorError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };

    if let Err(e) = store.delete_job(id).await {
        if !matches!(e, CoordinatorError::NotFound(_)) {
            if let Some(record) = retired {
                if let Err(reinstate_err) = tracker.reinstate(record).await {
                    tracing::error!(
                        "Job {} kept its record but lost its progress: {}",
                        id,
                        reinstate_err
                    );
                }
            }
        }
        return Err(e);
    }

    tracing::info!("Removed job {}", id);
    let _ = event_tx.send(JobEvent::Removed {
        job_id: id,
        timestamp: Utc::now(),
    });
    Ok(())
}
