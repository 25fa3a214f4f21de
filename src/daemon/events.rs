use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{JobId, Phase, TerminationStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum JobEvent {
    Submitted {
        job_id: JobId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    Progressed {
        job_id: JobId,
        completed_tasks: u32,
        total_tasks: u32,
        timestamp: DateTime<Utc>,
    },
    PhaseChanged {
        job_id: JobId,
        from: Phase,
        to: Phase,
        timestamp: DateTime<Utc>,
    },
    Finished {
        job_id: JobId,
        termination_status: TerminationStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Removed {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Submitted { job_id, .. }
            | JobEvent::Progressed { job_id, .. }
            | JobEvent::PhaseChanged { job_id, .. }
            | JobEvent::Finished { job_id, .. }
            | JobEvent::Removed { job_id, .. } => *job_id,
        }
    }
}
