// CLI events command: follow the coordinator's SSE stream

use futures_util::StreamExt;

use super::describe_error;
use crate::client::CoordinatorClient;
use crate::daemon::events::JobEvent;
use crate::models::JobId;

/// One SSE frame: the `event:` name and the `data:` payload.
#[derive(Debug, Default, PartialEq)]
struct Frame {
    event: String,
    data: String,
}

/// Split complete frames (terminated by a blank line) off the front of
/// `buffer`, leaving any partial frame in place.
fn drain_frames(buffer: &mut String) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos + 2).collect();
        let mut frame = Frame::default();
        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                frame.event = rest.trim_start().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                if !frame.data.is_empty() {
                    frame.data.push('\n');
                }
                frame.data.push_str(rest.trim_start());
            }
        }
        // Comment-only frames (keepalive, lag notices) carry no data.
        if !frame.data.is_empty() {
            frames.push(frame);
        }
    }
    frames
}

fn describe_event(event: &JobEvent) -> String {
    match event {
        JobEvent::Submitted {
            job_id,
            name,
            timestamp,
        } => format!("{} job {} submitted ({})", timestamp.to_rfc3339(), job_id, name),
        JobEvent::Progressed {
            job_id,
            completed_tasks,
            total_tasks,
            timestamp,
        } => format!(
            "{} job {} progressed {}/{}",
            timestamp.to_rfc3339(),
            job_id,
            completed_tasks,
            total_tasks
        ),
        JobEvent::PhaseChanged {
            job_id,
            from,
            to,
            timestamp,
        } => format!(
            "{} job {} phase {:?} -> {:?}",
            timestamp.to_rfc3339(),
            job_id,
            from,
            to
        ),
        JobEvent::Finished {
            job_id,
            termination_status,
            error,
            timestamp,
        } => match error {
            Some(error) => format!(
                "{} job {} finished {:?}: {}",
                timestamp.to_rfc3339(),
                job_id,
                termination_status,
                error
            ),
            None => format!(
                "{} job {} finished {:?}",
                timestamp.to_rfc3339(),
                job_id,
                termination_status
            ),
        },
        JobEvent::Removed { job_id, timestamp } => {
            format!("{} job {} removed", timestamp.to_rfc3339(), job_id)
        }
    }
}

/// mrc events
pub async fn cmd_events(client: &CoordinatorClient, job_id: Option<u64>) -> anyhow::Result<()> {
    let response = client
        .events(job_id.map(JobId))
        .await
        .map_err(describe_error)?;

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| anyhow::anyhow!("SSE stream error: {}", e))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk).replace("\r\n", "\n"));

        for frame in drain_frames(&mut buffer) {
            match serde_json::from_str::<JobEvent>(&frame.data) {
                Ok(event) => println!("{}", describe_event(&event)),
                Err(e) => tracing::debug!("Skipping '{}' event: {}", frame.event, e),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::TerminationStatus;

    #[test]
    fn test_drain_frames_keeps_partial_tail() {
        let mut buffer = String::from(
            "event: removed\ndata: {\"event\":\"Removed\"}\n\n: keepalive\n\nevent: fin",
        );
        let frames = drain_frames(&mut buffer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "removed");
        assert_eq!(frames[0].data, "{\"event\":\"Removed\"}");
        assert_eq!(buffer, "event: fin");
    }

    #[test]
    fn test_drain_frames_parses_server_events() {
        let event = JobEvent::Removed {
            job_id: JobId(4),
            timestamp: Utc::now(),
        };
        let mut buffer = format!(
            "event: removed\ndata: {}\n\n",
            serde_json::to_string(&event).unwrap()
        );
        let frames = drain_frames(&mut buffer);
        let parsed: JobEvent = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(parsed.job_id(), JobId(4));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_describe_finished_with_error() {
        let line = describe_event(&JobEvent::Finished {
            job_id: JobId(2),
            termination_status: TerminationStatus::Aborted,
            error: Some("disk gone".to_string()),
            timestamp: Utc::now(),
        });
        assert!(line.contains("job 2 finished Aborted: disk gone"), "Got: {}", line);
    }
}
