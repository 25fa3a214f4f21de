use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::daemon::clock::{Clock, SystemClock};
use crate::daemon::events::JobEvent;
use crate::errors::{CoordinatorError, Result};
use crate::models::progress::Applied;
use crate::models::{
    JobId, JobRecord, JobStatus, ProgressEvent, ProgressRecord, ProgressState, RetryPolicy,
    TerminationStatus,
};
use crate::storage::ProgressStore;

struct Slot {
    record: ProgressRecord,
    /// Set once the job is removed so waiters queued on the lock see NotFound.
    retired: bool,
}

impl Slot {
    fn new(record: ProgressRecord) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            record,
            retired: false,
        }))
    }
}

/// Outcome of reloading progress at startup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored: usize,
    /// Progress files with no matching job record; deleted.
    pub orphaned: usize,
    /// Job records that had no progress; given a fresh WAITING state.
    pub recreated: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub waiting: usize,
    pub running: usize,
    pub finished: usize,
}

/// Owns the live progress of every job.
///
/// The outer map lock is only held to look up, insert or drop a job's slot.
/// All mutation happens under that job's own mutex, so reports for different
/// jobs proceed in parallel while reports for one job are applied in order.
pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    event_tx: broadcast::Sender<JobEvent>,
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Slot>>>>,
}

fn not_found(id: JobId) -> CoordinatorError {
    CoordinatorError::NotFound(format!("Job {} not found", id))
}

impl ProgressTracker {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        retry: RetryPolicy,
        event_tx: broadcast::Sender<JobEvent>,
    ) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            retry,
            event_tx,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn slot(&self, id: JobId) -> Result<Arc<Mutex<Slot>>> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Create the WAITING state for a freshly registered job.
    pub async fn init(&self, job: &JobRecord) -> Result<ProgressState> {
        if self.jobs.read().await.contains_key(&job.id) {
            return Err(CoordinatorError::Conflict(format!(
                "Progress for job {} already exists",
                job.id
            )));
        }

        let record = ProgressRecord::for_job(job);
        self.with_retry("save", job.id, || self.store.save(&record))
            .await?;

        let state = record.state.clone();
        self.jobs.write().await.insert(job.id, Slot::new(record));
        Ok(state)
    }

    pub async fn get(&self, id: JobId) -> Result<ProgressState> {
        let slot = self.slot(id).await?;
        let guard = slot.lock().await;
        if guard.retired {
            return Err(not_found(id));
        }
        Ok(guard.record.state.clone())
    }

    /// Apply a worker report.
    pub async fn advance(&self, id: JobId, event: &ProgressEvent) -> Result<ProgressState> {
        self.mutate(id, |record, now| record.apply(event, now))
            .await
    }

    /// Abort a WAITING or RUNNING job. Conflict once finished.
    pub async fn cancel(&self, id: JobId) -> Result<ProgressState> {
        self.mutate(id, |record, now| record.abort(now)).await
    }

    /// Drop a job's progress ahead of deleting its record.
    ///
    /// Refused with Conflict while the job is RUNNING. Returns the dropped
    /// record so the caller can [`reinstate`](Self::reinstate) it if the
    /// registry delete fails.
    pub async fn retire(&self, id: JobId) -> Result<ProgressRecord> {
        let slot = self.slot(id).await?;
        let mut guard = slot.lock().await;
        if guard.retired {
            return Err(not_found(id));
        }
        if guard.record.state.status == JobStatus::Running {
            return Err(CoordinatorError::Conflict(format!(
                "Job {} is running; cancel it before removing",
                id
            )));
        }

        self.with_retry("remove", id, || self.store.remove(id))
            .await?;

        guard.retired = true;
        self.jobs.write().await.remove(&id);
        Ok(guard.record.clone())
    }

    pub async fn reinstate(&self, record: ProgressRecord) -> Result<()> {
        let id = record.job_id;
        self.with_retry("save", id, || self.store.save(&record))
            .await?;
        self.jobs.write().await.insert(id, Slot::new(record));
        Ok(())
    }

    /// Reload persisted progress and reconcile it with the registry so that
    /// every known job has exactly one progress state.
    pub async fn restore(&self, known: &[JobRecord]) -> Result<RestoreSummary> {
        let known_ids: HashSet<JobId> = known.iter().map(|j| j.id).collect();
        let mut summary = RestoreSummary::default();
        let mut loaded = HashMap::new();

        for record in self.store.load_all().await? {
            let id = record.job_id;
            if known_ids.contains(&id) {
                loaded.insert(id, Slot::new(record));
                summary.restored += 1;
            } else {
                tracing::warn!("Removing orphaned progress for unknown job {}", id);
                self.with_retry("remove", id, || self.store.remove(id))
                    .await?;
                summary.orphaned += 1;
            }
        }

        self.jobs.write().await.extend(loaded);

        for job in known {
            if self.jobs.read().await.contains_key(&job.id) {
                continue;
            }
            tracing::warn!(
                "Job {} ('{}') had no stored progress; resetting it to WAITING",
                job.id,
                job.name
            );
            self.init(job).await?;
            summary.recreated += 1;
        }

        Ok(summary)
    }

    pub async fn status_counts(&self) -> StatusCounts {
        let slots: Vec<Arc<Mutex<Slot>>> = self.jobs.read().await.values().cloned().collect();
        let mut counts = StatusCounts::default();
        for slot in slots {
            let guard = slot.lock().await;
            if guard.retired {
                continue;
            }
            match guard.record.state.status {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Finished => counts.finished += 1,
            }
        }
        counts
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Compute the next state on a copy, persist it, then commit.
    async fn mutate<F>(&self, id: JobId, transition: F) -> Result<ProgressState>
    where
        F: FnOnce(&mut ProgressRecord, DateTime<Utc>) -> Result<Applied>,
    {
        let slot = self.slot(id).await?;
        let mut guard = slot.lock().await;
        if guard.retired {
            return Err(not_found(id));
        }

        let now = self.clock.now();
        let mut next = guard.record.clone();
        let applied = transition(&mut next, now)?;
        if !applied.changed {
            return Ok(next.state);
        }

        match self.with_retry("save", id, || self.store.save(&next)).await {
            Ok(()) => {}
            Err(CoordinatorError::Fatal(msg)) => {
                tracing::error!(
                    "Fatal error persisting progress of job {}: {}; marking job failed",
                    id,
                    msg
                );
                guard.record.mark_failed(msg.clone(), now);
                if let Err(e) = self.store.save(&guard.record).await {
                    tracing::error!("Could not record failure of job {}: {}", id, e);
                }
                let _ = self.event_tx.send(JobEvent::Finished {
                    job_id: id,
                    termination_status: TerminationStatus::Aborted,
                    error: Some(msg.clone()),
                    timestamp: now,
                });
                return Err(CoordinatorError::Fatal(msg));
            }
            Err(e) => return Err(e),
        }

        guard.record = next;
        self.publish(&guard.record, &applied, now);
        Ok(guard.record.state.clone())
    }

    fn publish(&self, record: &ProgressRecord, applied: &Applied, now: DateTime<Utc>) {
        let job_id = record.job_id;
        // Send errors only mean nobody is subscribed.
        let _ = self.event_tx.send(JobEvent::Progressed {
            job_id,
            completed_tasks: record.state.completed_tasks,
            total_tasks: record.state.total_tasks,
            timestamp: now,
        });
        if let Some((from, to)) = applied.phase_change {
            tracing::info!("Job {} moved from {:?} to {:?}", job_id, from, to);
            let _ = self.event_tx.send(JobEvent::PhaseChanged {
                job_id,
                from,
                to,
                timestamp: now,
            });
        }
        if let Some(termination_status) = applied.finished {
            tracing::info!("Job {} finished: {:?}", job_id, termination_status);
            let _ = self.event_tx.send(JobEvent::Finished {
                job_id,
                termination_status,
                error: record.state.error.clone(),
                timestamp: now,
            });
        }
    }

    async fn with_retry<F, Fut>(&self, op: &str, id: JobId, mut attempt_op: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_op().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        "Progress {} for job {} failed (attempt {}/{}): {}; retrying in {:?}",
                        op,
                        id,
                        attempt,
                        self.retry.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!(
                            "Progress {} for job {} gave up after {} attempt(s): {}",
                            op,
                            id,
                            attempt,
                            e
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}
