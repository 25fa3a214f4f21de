pub mod clock;
pub mod coordinator;
pub mod events;
pub mod tracker;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing_appender::non_blocking::WorkerGuard;

use crate::daemon::coordinator::JobCoordinator;
use crate::daemon::events::JobEvent;
use crate::daemon::tracker::ProgressTracker;
use crate::models::CoordinatorConfig;
use crate::server::{self, AppState};
use crate::storage::{
    FsProgressStore, InMemoryJobStore, InMemoryProgressStore, JobStore, JsonJobStore,
    ProgressStore,
};

const APP_DIR_NAME: &str = "mr-coordinator";

// ---------------------------------------------------------------------------
// PidFile
// ---------------------------------------------------------------------------

/// Keeps two coordinators from sharing one data directory.
///
/// Created with O_EXCL. A file left behind by a dead process is reclaimed.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn acquire(&self) -> Result<()> {
        if self.path.exists() {
            let content =
                std::fs::read_to_string(&self.path).context("Failed to read existing PID file")?;
            let existing_pid: u32 = content
                .trim()
                .parse()
                .context("Failed to parse PID from PID file")?;

            if is_process_alive(existing_pid) {
                return Err(anyhow::anyhow!(
                    "Coordinator is already running (PID {existing_pid}). PID file: {}",
                    self.path.display()
                ));
            }

            tracing::warn!(
                "Removing stale PID file (PID {} is no longer running)",
                existing_pid
            );
            std::fs::remove_file(&self.path).context("Failed to remove stale PID file")?;
        }

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .context("Failed to create PID file")?;

        let pid = std::process::id();
        write!(file, "{}", pid).context("Failed to write PID file")?;
        file.flush().context("Failed to flush PID file")?;

        tracing::debug!("PID file acquired: {} (PID {})", self.path.display(), pid);
        Ok(())
    }

    pub fn release(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove PID file")?;
            tracing::debug!("PID file released: {}", self.path.display());
        }
        Ok(())
    }
}

/// Signal 0 probes for the process without delivering anything.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Without a cheap liveness probe, an existing PID file is treated as held.
#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

fn read_config(path: &Path) -> Result<CoordinatorConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: CoordinatorConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolve the coordinator config, first match wins:
///   1. `--config` path (must exist)
///   2. `$MRC_CONFIG_DIR/config.json`
///   3. platform config dir, e.g. `~/.config/mr-coordinator/config.json`
///   4. `<data_dir>/config.json`
///   5. built-in defaults
pub fn load_config(config_path: Option<&Path>) -> Result<CoordinatorConfig> {
    if let Some(path) = config_path {
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }
        return read_config(path);
    }

    let mut candidates = Vec::new();
    if let Ok(dir) = std::env::var("MRC_CONFIG_DIR") {
        candidates.push(PathBuf::from(dir).join("config.json"));
    }
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(APP_DIR_NAME).join("config.json"));
    }
    candidates.push(resolve_data_dir(None).join("config.json"));

    if let Some(path) = candidates.iter().find(|p| p.exists()) {
        return read_config(path);
    }

    tracing::debug!("No config file found, using defaults");
    Ok(CoordinatorConfig::default())
}

/// `override_dir`, else `$MRC_DATA_DIR`, else the platform data dir.
pub fn resolve_data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    if let Ok(d) = std::env::var("MRC_DATA_DIR") {
        return PathBuf::from(d);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log to stderr and, when a data dir is given, to `<data_dir>/coordinator.log`.
///
/// The returned guard flushes the file writer on drop; hold it until exit.
pub fn init_logging(data_dir: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(dir) = data_dir else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init();
        return None;
    };

    let log_path = dir.join("coordinator.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path);

    match file {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            if result.is_ok() {
                tracing::info!("Logging to stderr and {}", log_path.display());
            }
            Some(guard)
        }
        Err(e) => {
            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .try_init();
            if result.is_ok() {
                tracing::warn!(
                    "Could not open log file {}: {}. Logging to stderr only.",
                    log_path.display(),
                    e
                );
            }
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Wire registry, tracker and controller together and restore saved state.
///
/// `data_dir = None` keeps everything in memory.
pub async fn open_coordinator(
    config: &CoordinatorConfig,
    data_dir: Option<&Path>,
) -> Result<Arc<JobCoordinator>> {
    let limits = config.submission_limits();

    let (job_store, progress_store): (Arc<dyn JobStore>, Arc<dyn ProgressStore>) = match data_dir
    {
        Some(dir) => (
            Arc::new(
                JsonJobStore::new(dir.to_path_buf(), limits)
                    .await
                    .context("Failed to open job registry")?,
            ),
            Arc::new(
                FsProgressStore::new(dir.to_path_buf())
                    .await
                    .context("Failed to open progress store")?,
            ),
        ),
        None => (
            Arc::new(InMemoryJobStore::new(limits)),
            Arc::new(InMemoryProgressStore::new()),
        ),
    };

    let (event_tx, _) = broadcast::channel::<JobEvent>(config.broadcast_capacity.max(1));
    let tracker = Arc::new(ProgressTracker::new(
        progress_store,
        config.retry_policy(),
        event_tx.clone(),
    ));
    let coordinator = Arc::new(JobCoordinator::new(job_store, tracker, limits, event_tx));

    let summary = coordinator
        .restore()
        .await
        .context("Failed to restore job progress")?;
    tracing::info!(
        "Restored {} job(s) ({} orphaned progress removed, {} progress recreated)",
        summary.restored + summary.recreated,
        summary.orphaned,
        summary.recreated
    );

    Ok(coordinator)
}

/// Options of `mrc serve`; each `Some` overrides the config file.
#[derive(Debug, Default, Clone)]
pub struct ServeOptions {
    pub config_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub in_memory: bool,
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C signal"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Received Ctrl+C signal");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received Ctrl+C signal");
    }
}

/// Run the coordinator until Ctrl+C or SIGTERM.
pub async fn start_coordinator(options: ServeOptions) -> Result<()> {
    let mut config = load_config(options.config_path.as_deref())?;
    if let Some(host) = options.host {
        config.host = host;
    }
    if let Some(port) = options.port {
        config.port = port;
    }

    let data_dir = if options.in_memory {
        None
    } else {
        let dir = match options.data_dir.as_deref().or(config.data_dir.as_deref()) {
            Some(d) => d.to_path_buf(),
            None => resolve_data_dir(None),
        };
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        config.data_dir = Some(dir.clone());
        Some(dir)
    };

    let _log_guard = init_logging(data_dir.as_deref());
    match &data_dir {
        Some(dir) => tracing::info!("Data directory: {}", dir.display()),
        None => tracing::warn!("Running in memory; jobs are lost on exit"),
    }

    let pid_file = data_dir
        .as_ref()
        .map(|dir| PidFile::new(dir.join("mrc.pid")));
    if let Some(pid_file) = &pid_file {
        pid_file.acquire()?;
    }

    let result = serve(config, data_dir.as_deref()).await;

    if let Some(pid_file) = &pid_file {
        if let Err(e) = pid_file.release() {
            tracing::error!("Failed to release PID file: {}", e);
        }
    }

    result
}

async fn serve(config: CoordinatorConfig, data_dir: Option<&Path>) -> Result<()> {
    let coordinator = open_coordinator(&config, data_dir).await?;
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(coordinator, Arc::clone(&config)));
    let router = server::create_router(state);

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    tracing::info!("Coordinator listening on http://{}", bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Coordinator exited cleanly.");
    Ok(())
}
