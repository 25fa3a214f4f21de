// CLI job commands: list, submit, show, progress, cancel, remove

use std::io::{self, BufRead, Write};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::describe_error;
use crate::client::CoordinatorClient;
use crate::models::{JobId, ProgressState, UploadJobRequest};

/// Format a relative time string like "2 minutes ago".
fn format_relative_time(dt: &DateTime<Utc>) -> String {
    let secs = Utc::now().signed_duration_since(*dt).num_seconds().max(0);
    if secs < 60 {
        format!("{} seconds ago", secs)
    } else if secs < 3600 {
        format!("{} minutes ago", secs / 60)
    } else if secs < 86400 {
        format!("{} hours ago", secs / 3600)
    } else {
        format!("{} days ago", secs / 86400)
    }
}

/// One-line progress summary, e.g. `RUNNING  REDUCE  7/10 tasks (70%)`.
fn format_progress(progress: &ProgressState) -> String {
    let percent = if progress.total_tasks == 0 {
        0
    } else {
        progress.completed_tasks * 100 / progress.total_tasks
    };
    let mut line = format!(
        "{:<9}{:<8}{}/{} tasks ({}%)",
        format!("{:?}", progress.status).to_uppercase(),
        format!("{:?}", progress.phase).to_uppercase(),
        progress.completed_tasks,
        progress.total_tasks,
        percent
    );
    if let Some(termination) = progress.termination_status {
        line.push_str(&format!("  {:?}", termination).to_uppercase());
    }
    if let Some(error) = &progress.error {
        line.push_str(&format!("  error: {}", error));
    }
    line
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let head: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// mrc list
pub async fn cmd_list(client: &CoordinatorClient, json: bool) -> anyhow::Result<()> {
    let jobs = client.list_jobs().await.map_err(describe_error)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!("{:<8}{:<42}{:<18}", "ID", "NAME", "SUBMITTED");
    for job in &jobs {
        println!(
            "{:<8}{:<42}{:<18}",
            job.id,
            truncate(&job.name, 41),
            format_relative_time(&job.submission_time)
        );
    }

    Ok(())
}

/// mrc submit
pub async fn cmd_submit(
    client: &CoordinatorClient,
    request: &UploadJobRequest,
) -> anyhow::Result<()> {
    let id = client.upload_job(request).await.map_err(describe_error)?;
    println!("Job {} accepted.", id);
    Ok(())
}

/// mrc show
pub async fn cmd_show(client: &CoordinatorClient, id: u64, json: bool) -> anyhow::Result<()> {
    let info = client.job_info(JobId(id)).await.map_err(describe_error)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    let record = &info.record;
    println!("Job {}: {}", record.id, record.name);
    println!("  Submitted:        {}", record.created_at.to_rfc3339());
    println!(
        "  Job storage:      {} ({:?})",
        record.job_storage_connection_string, info.job_storage_type
    );
    if let Some(path) = &record.job_path {
        println!("  Job path:         {}", path);
    }
    println!(
        "  Data storage:     {} ({:?})",
        record.data_storage_connection_string, info.data_storage_type
    );
    println!("  Inputs:           {}", record.inputs_path);
    println!("  Mapper outputs:   {}", record.mappers_outputs_path);
    println!("  Reducer outputs:  {}", record.reducers_outputs_path);
    println!(
        "  Tasks:            {} map / {} reduce",
        record.mappers_count, record.reducers_count
    );
    println!("  Sorter records:   {}", record.sorter_in_memory_records);
    println!("  Progress:         {}", format_progress(&info.progress_info));
    for duration in &info.progress_info.phase_durations {
        println!(
            "    {:<8}{}s",
            format!("{:?}", duration.phase_name).to_uppercase(),
            (duration.end - duration.start).num_seconds()
        );
    }

    Ok(())
}

/// mrc progress
pub async fn cmd_progress(
    client: &CoordinatorClient,
    id: u64,
    watch: bool,
    interval: u64,
) -> anyhow::Result<()> {
    let id = JobId(id);
    let mut last: Option<ProgressState> = None;

    loop {
        let progress = client.job_progress(id).await.map_err(describe_error)?;
        if last.as_ref() != Some(&progress) {
            println!("{}", format_progress(&progress));
        }
        if !watch || progress.is_finished() {
            return Ok(());
        }
        last = Some(progress);
        tokio::time::sleep(Duration::from_secs(interval.max(1))).await;
    }
}

/// mrc cancel
pub async fn cmd_cancel(client: &CoordinatorClient, id: u64) -> anyhow::Result<()> {
    let message = client.cancel_job(JobId(id)).await.map_err(describe_error)?;
    println!("{}.", message.trim_end_matches('.'));
    Ok(())
}

/// mrc remove
pub async fn cmd_remove(client: &CoordinatorClient, id: u64, yes: bool) -> anyhow::Result<()> {
    if !yes {
        print!("Are you sure you want to remove job {}? [y/N] ", id);
        io::stdout().flush()?;
        let stdin = io::stdin();
        let mut line = String::new();
        stdin.lock().read_line(&mut line)?;
        let answer = line.trim().to_lowercase();
        if answer != "y" && answer != "yes" {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let message = client.delete_job(JobId(id)).await.map_err(describe_error)?;
    println!("{}.", message.trim_end_matches('.'));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, Phase, TerminationStatus};

    #[test]
    fn test_format_relative_time_minutes_ago() {
        let past = Utc::now() - chrono::Duration::minutes(5);
        assert!(format_relative_time(&past).contains("minutes ago"));
    }

    #[test]
    fn test_format_relative_time_days_ago() {
        let past = Utc::now() - chrono::Duration::days(3);
        assert_eq!(format_relative_time(&past), "3 days ago");
    }

    #[test]
    fn test_format_relative_time_future_clamps_to_zero() {
        let future = Utc::now() + chrono::Duration::minutes(5);
        assert_eq!(format_relative_time(&future), "0 seconds ago");
    }

    #[test]
    fn test_format_progress_running() {
        let mut progress = ProgressState::waiting(10);
        progress.status = JobStatus::Running;
        progress.phase = Phase::Reduce;
        progress.completed_tasks = 7;
        let line = format_progress(&progress);
        assert!(line.starts_with("RUNNING"), "Got: {}", line);
        assert!(line.contains("REDUCE"));
        assert!(line.contains("7/10 tasks (70%)"));
    }

    #[test]
    fn test_format_progress_finished_with_error() {
        let mut progress = ProgressState::waiting(4);
        progress.status = JobStatus::Finished;
        progress.termination_status = Some(TerminationStatus::Aborted);
        progress.error = Some("storage failure".to_string());
        let line = format_progress(&progress);
        assert!(line.contains("ABORTED"), "Got: {}", line);
        assert!(line.contains("error: storage failure"));
    }

    #[test]
    fn test_format_progress_zero_tasks() {
        assert!(format_progress(&ProgressState::waiting(0)).contains("0/0 tasks (0%)"));
    }

    #[test]
    fn test_truncate_long_names() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[tokio::test]
    async fn test_cmd_list_connection_error() {
        let client = CoordinatorClient::new(Some("http://127.0.0.1:1")).unwrap();
        let err = cmd_list(&client, false).await.unwrap_err().to_string();
        assert!(err.contains("Could not connect"), "Got: {}", err);
    }
}
