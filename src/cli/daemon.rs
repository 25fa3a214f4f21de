// CLI coordinator commands: serve, status

use std::path::PathBuf;

use super::describe_error;
use crate::client::CoordinatorClient;
use crate::daemon::{self, ServeOptions};

/// mrc serve
pub async fn cmd_serve(
    config: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    in_memory: bool,
) -> anyhow::Result<()> {
    daemon::start_coordinator(ServeOptions {
        config_path: config,
        data_dir,
        host,
        port,
        in_memory,
    })
    .await
}

/// mrc status
pub async fn cmd_status(client: &CoordinatorClient, verbose: bool) -> anyhow::Result<()> {
    let body = client.health().await.map_err(describe_error)?;

    let status = body["status"].as_str().unwrap_or("unknown");
    let version = body["version"].as_str().unwrap_or("unknown");
    let uptime = body["uptime_seconds"].as_u64().unwrap_or(0);
    let storage = body["storage"].as_str().unwrap_or("unknown");
    let data_dir = body["data_dir"].as_str().unwrap_or("-");

    println!("Coordinator Status: {}", status);
    println!("  URL:         {}", client.base_url());
    println!("  Storage:     {} ({})", storage, data_dir);
    println!(
        "  Jobs:        {} waiting / {} running / {} finished",
        body["waiting_jobs"].as_u64().unwrap_or(0),
        body["running_jobs"].as_u64().unwrap_or(0),
        body["finished_jobs"].as_u64().unwrap_or(0)
    );
    println!("  Uptime:      {}", format_uptime(uptime));
    println!("  Version:     {}", version);

    if verbose {
        println!("\nRaw response:");
        println!("{}", serde_json::to_string_pretty(&body)?);
    }

    Ok(())
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, mins, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
