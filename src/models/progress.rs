use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CoordinatorError, Result};
use crate::models::job::{JobId, JobRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Waiting,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Map,
    Reduce,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationStatus {
    Ok,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Map,
    Reduce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDuration {
    pub phase_name: Phase,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Live progress of one job, as served to consoles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub status: JobStatus,
    pub phase: Phase,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    /// Set once `status` is FINISHED.
    pub termination_status: Option<TerminationStatus>,
    pub phase_durations: Vec<PhaseDuration>,
    /// Present only after a fatal error forced the job to stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressState {
    pub fn waiting(total_tasks: u32) -> Self {
        Self {
            status: JobStatus::Waiting,
            phase: Phase::Map,
            total_tasks,
            completed_tasks: 0,
            termination_status: None,
            phase_durations: Vec::new(),
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == JobStatus::Finished
    }
}

/// A report from a worker about a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ProgressEvent {
    /// The first worker picked the job up.
    Started,
    TaskCompleted { task_type: TaskType, task_id: u32 },
    Aborted {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// What a single transition changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub changed: bool,
    pub phase_change: Option<(Phase, Phase)>,
    pub finished: Option<TerminationStatus>,
}

impl Applied {
    fn unchanged() -> Self {
        Self::default()
    }
}

/// Tracker-side progress of a job: the served state plus the bookkeeping
/// needed to keep completions distinct and time the phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub job_id: JobId,
    pub mappers_count: u32,
    pub reducers_count: u32,
    pub state: ProgressState,
    completed_map_tasks: BTreeSet<u32>,
    completed_reduce_tasks: BTreeSet<u32>,
    phase_started_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    pub fn new(job_id: JobId, mappers_count: u32, reducers_count: u32) -> Self {
        Self {
            job_id,
            mappers_count,
            reducers_count,
            state: ProgressState::waiting(mappers_count.saturating_add(reducers_count)),
            completed_map_tasks: BTreeSet::new(),
            completed_reduce_tasks: BTreeSet::new(),
            phase_started_at: None,
        }
    }

    pub fn for_job(record: &JobRecord) -> Self {
        Self::new(record.id, record.mappers_count, record.reducers_count)
    }

    /// Apply a worker report. On error `self` is left untouched.
    pub fn apply(&mut self, event: &ProgressEvent, now: DateTime<Utc>) -> Result<Applied> {
        match event {
            ProgressEvent::Started => self.start(now),
            ProgressEvent::TaskCompleted { task_type, task_id } => {
                self.complete_task(*task_type, *task_id, now)
            }
            ProgressEvent::Aborted { .. } => self.abort(now),
        }
    }

    fn ensure_not_finished(&self) -> Result<()> {
        if self.state.is_finished() {
            return Err(CoordinatorError::Conflict(format!(
                "Job {} has already finished",
                self.job_id
            )));
        }
        Ok(())
    }

    fn start(&mut self, now: DateTime<Utc>) -> Result<Applied> {
        self.ensure_not_finished()?;
        if self.state.status == JobStatus::Running {
            return Ok(Applied::unchanged());
        }
        self.state.status = JobStatus::Running;
        self.phase_started_at = Some(now);
        Ok(Applied {
            changed: true,
            ..Applied::default()
        })
    }

    fn complete_task(
        &mut self,
        task_type: TaskType,
        task_id: u32,
        now: DateTime<Utc>,
    ) -> Result<Applied> {
        self.ensure_not_finished()?;

        let limit = match task_type {
            TaskType::Map => self.mappers_count,
            TaskType::Reduce => self.reducers_count,
        };
        if task_id >= limit {
            return Err(CoordinatorError::invalid(
                "taskId",
                format!(
                    "{:?} task {} is out of range for job {} ({} tasks)",
                    task_type, task_id, self.job_id, limit
                ),
            ));
        }
        if task_type == TaskType::Reduce && self.state.phase == Phase::Map {
            return Err(CoordinatorError::Conflict(format!(
                "Job {} is still in the MAP phase; reduce task {} reported early",
                self.job_id, task_id
            )));
        }

        let mut applied = self.start(now)?;

        let newly_completed = match task_type {
            TaskType::Map => self.completed_map_tasks.insert(task_id),
            TaskType::Reduce => self.completed_reduce_tasks.insert(task_id),
        };
        if !newly_completed {
            return Ok(applied);
        }
        applied.changed = true;
        self.state.completed_tasks = self.completed_count().min(self.state.total_tasks);

        match task_type {
            TaskType::Map if self.completed_map_tasks.len() as u64 == u64::from(self.mappers_count) => {
                self.close_phase(now);
                self.state.phase = Phase::Reduce;
                self.phase_started_at = Some(now);
                applied.phase_change = Some((Phase::Map, Phase::Reduce));
            }
            TaskType::Reduce
                if self.completed_reduce_tasks.len() as u64 == u64::from(self.reducers_count) =>
            {
                self.close_phase(now);
                self.finish(TerminationStatus::Ok);
                applied.phase_change = Some((Phase::Reduce, Phase::Finished));
                applied.finished = Some(TerminationStatus::Ok);
            }
            _ => {}
        }
        Ok(applied)
    }

    /// Stop the job where it stands. Conflict once finished.
    pub fn abort(&mut self, now: DateTime<Utc>) -> Result<Applied> {
        self.ensure_not_finished()?;
        let from = self.state.phase;
        self.close_phase(now);
        self.finish(TerminationStatus::Aborted);
        Ok(Applied {
            changed: true,
            phase_change: Some((from, Phase::Finished)),
            finished: Some(TerminationStatus::Aborted),
        })
    }

    /// Force the job into a visible error state after an internal failure.
    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        if !self.state.is_finished() {
            self.close_phase(now);
            self.finish(TerminationStatus::Aborted);
        }
        self.state.error = Some(error);
    }

    fn completed_count(&self) -> u32 {
        let total = self.completed_map_tasks.len() + self.completed_reduce_tasks.len();
        u32::try_from(total).unwrap_or(u32::MAX)
    }

    fn close_phase(&mut self, now: DateTime<Utc>) {
        if let Some(start) = self.phase_started_at.take() {
            self.state.phase_durations.push(PhaseDuration {
                phase_name: self.state.phase,
                start,
                end: now,
            });
        }
    }

    fn finish(&mut self, termination: TerminationStatus) {
        self.state.phase = Phase::Finished;
        self.state.status = JobStatus::Finished;
        self.state.termination_status = Some(termination);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn completed(task_type: TaskType, task_id: u32) -> ProgressEvent {
        ProgressEvent::TaskCompleted { task_type, task_id }
    }

    #[test]
    fn test_initial_state_is_waiting_in_map() {
        let record = ProgressRecord::new(JobId(1), 2, 1);
        assert_eq!(record.state.status, JobStatus::Waiting);
        assert_eq!(record.state.phase, Phase::Map);
        assert_eq!(record.state.total_tasks, 3);
        assert_eq!(record.state.completed_tasks, 0);
        assert!(record.state.termination_status.is_none());
    }

    #[test]
    fn test_word_count_lifecycle() {
        let t0 = Utc::now();
        let mut record = ProgressRecord::new(JobId(1), 2, 1);

        record.apply(&completed(TaskType::Map, 0), t0).expect("map 0");
        assert_eq!(record.state.status, JobStatus::Running);
        assert_eq!(record.state.phase, Phase::Map);

        let applied = record
            .apply(&completed(TaskType::Map, 1), t0 + Duration::seconds(5))
            .expect("map 1");
        assert_eq!(applied.phase_change, Some((Phase::Map, Phase::Reduce)));
        assert_eq!(record.state.phase, Phase::Reduce);
        assert_eq!(record.state.completed_tasks, 2);

        let applied = record
            .apply(&completed(TaskType::Reduce, 0), t0 + Duration::seconds(9))
            .expect("reduce 0");
        assert_eq!(applied.finished, Some(TerminationStatus::Ok));
        assert_eq!(record.state.status, JobStatus::Finished);
        assert_eq!(record.state.phase, Phase::Finished);
        assert_eq!(record.state.termination_status, Some(TerminationStatus::Ok));
        assert_eq!(record.state.completed_tasks, 3);

        let phases: Vec<Phase> = record
            .state
            .phase_durations
            .iter()
            .map(|d| d.phase_name)
            .collect();
        assert_eq!(phases, vec![Phase::Map, Phase::Reduce]);
        assert!(record.state.phase_durations[0].end <= record.state.phase_durations[1].start);
    }

    #[test]
    fn test_duplicate_completion_is_noop() {
        let now = Utc::now();
        let mut record = ProgressRecord::new(JobId(1), 3, 1);
        record.apply(&completed(TaskType::Map, 1), now).expect("first");
        let applied = record.apply(&completed(TaskType::Map, 1), now).expect("dup");
        assert!(!applied.changed);
        assert_eq!(record.state.completed_tasks, 1);
    }

    #[test]
    fn test_reduce_before_map_phase_done_conflicts() {
        let mut record = ProgressRecord::new(JobId(1), 2, 1);
        let before = record.clone();
        let err = record
            .apply(&completed(TaskType::Reduce, 0), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Conflict(_)));
        assert_eq!(record, before);
    }

    #[test]
    fn test_task_id_out_of_range_rejected() {
        let mut record = ProgressRecord::new(JobId(1), 2, 1);
        match record.apply(&completed(TaskType::Map, 2), Utc::now()) {
            Err(CoordinatorError::Validation(errors)) => {
                assert_eq!(errors.first_field(), Some("taskId"));
            }
            other => panic!("Expected Validation, got: {:?}", other),
        }
    }

    #[test]
    fn test_late_map_report_in_reduce_phase_is_noop() {
        let now = Utc::now();
        let mut record = ProgressRecord::new(JobId(1), 1, 2);
        record.apply(&completed(TaskType::Map, 0), now).expect("map");
        assert_eq!(record.state.phase, Phase::Reduce);
        let applied = record.apply(&completed(TaskType::Map, 0), now).expect("late");
        assert!(!applied.changed);
        assert_eq!(record.state.phase, Phase::Reduce);
    }

    #[test]
    fn test_abort_running_job() {
        let now = Utc::now();
        let mut record = ProgressRecord::new(JobId(1), 2, 1);
        record.apply(&ProgressEvent::Started, now).expect("start");
        record.apply(&completed(TaskType::Map, 0), now).expect("map");

        let applied = record.abort(now + Duration::seconds(1)).expect("abort");
        assert_eq!(applied.finished, Some(TerminationStatus::Aborted));
        assert_eq!(record.state.status, JobStatus::Finished);
        assert_eq!(record.state.phase, Phase::Finished);
        assert_eq!(
            record.state.termination_status,
            Some(TerminationStatus::Aborted)
        );
        assert_eq!(record.state.phase_durations.len(), 1);

        let err = record
            .apply(&completed(TaskType::Map, 1), now)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Conflict(_)));
        assert_eq!(record.state.completed_tasks, 1);
    }

    #[test]
    fn test_abort_waiting_job_records_no_phase() {
        let mut record = ProgressRecord::new(JobId(1), 1, 1);
        record.abort(Utc::now()).expect("abort");
        assert!(record.state.phase_durations.is_empty());
        assert!(record.abort(Utc::now()).is_err());
    }

    #[test]
    fn test_started_is_idempotent() {
        let now = Utc::now();
        let mut record = ProgressRecord::new(JobId(1), 1, 1);
        assert!(record.apply(&ProgressEvent::Started, now).expect("start").changed);
        assert!(!record.apply(&ProgressEvent::Started, now).expect("again").changed);
    }

    #[test]
    fn test_mark_failed_sets_error_visible_state() {
        let mut record = ProgressRecord::new(JobId(1), 1, 1);
        record.mark_failed("progress file unreadable".to_string(), Utc::now());
        assert!(record.state.is_finished());
        assert_eq!(
            record.state.termination_status,
            Some(TerminationStatus::Aborted)
        );
        assert_eq!(
            record.state.error.as_deref(),
            Some("progress file unreadable")
        );
    }

    #[test]
    fn test_progress_state_wire_format() {
        let state = ProgressState::waiting(3);
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["status"], "WAITING");
        assert_eq!(json["phase"], "MAP");
        assert_eq!(json["totalTasks"], 3);
        assert_eq!(json["completedTasks"], 0);
        assert!(json["terminationStatus"].is_null());
        assert!(json["phaseDurations"].as_array().expect("array").is_empty());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_progress_event_wire_format() {
        let event: ProgressEvent =
            serde_json::from_str(r#"{"type":"TASK_COMPLETED","taskType":"MAP","taskId":4}"#)
                .expect("deserialize");
        assert_eq!(event, completed(TaskType::Map, 4));

        let event: ProgressEvent =
            serde_json::from_str(r#"{"type":"STARTED"}"#).expect("deserialize");
        assert_eq!(event, ProgressEvent::Started);

        let event: ProgressEvent =
            serde_json::from_str(r#"{"type":"ABORTED"}"#).expect("deserialize");
        assert_eq!(event, ProgressEvent::Aborted { reason: None });
    }

    #[test]
    fn test_record_roundtrip_keeps_bookkeeping() {
        let now = Utc::now();
        let mut record = ProgressRecord::new(JobId(9), 2, 2);
        record.apply(&completed(TaskType::Map, 1), now).expect("map");
        let json = serde_json::to_string(&record).expect("serialize");
        let mut restored: ProgressRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, record);
        let applied = restored.apply(&completed(TaskType::Map, 1), now).expect("dup");
        assert!(!applied.changed);
    }
}
