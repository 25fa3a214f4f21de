pub mod daemon;
pub mod events;
pub mod jobs;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::client::{ClientError, CoordinatorClient};

/// MapReduce job coordinator and its command-line console
#[derive(Parser, Debug)]
#[command(
    name = "mrc",
    version,
    about = "MapReduce job coordinator and its command-line console"
)]
pub struct Cli {
    /// Base URL of a running coordinator, e.g. http://127.0.0.1:8390
    #[arg(long = "coordinator-url", env = "MR_COORDINATOR_URL", global = true)]
    pub coordinator_url: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator in the foreground
    Serve {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,

        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short = 'p', long)]
        port: Option<u16>,

        /// Data directory path
        #[arg(long = "data-dir", conflicts_with = "in_memory")]
        data_dir: Option<PathBuf>,

        /// Keep all state in memory; nothing survives a restart
        #[arg(long = "in-memory")]
        in_memory: bool,
    },

    /// Show coordinator health
    Status,

    /// List submitted jobs
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Submit a new job
    Submit {
        /// Job name
        #[arg(short = 'n', long)]
        name: String,

        /// Connection string of the storage holding the job binary
        #[arg(long = "job-storage")]
        job_storage: String,

        /// Connection string of the storage holding inputs and outputs
        #[arg(long = "data-storage")]
        data_storage: String,

        /// Path of the input files
        #[arg(long = "inputs")]
        inputs_path: String,

        /// Path where mappers write their outputs
        #[arg(long = "mappers-outputs")]
        mappers_outputs_path: String,

        /// Path where reducers write their outputs
        #[arg(long = "reducers-outputs")]
        reducers_outputs_path: String,

        /// Number of map tasks
        #[arg(short = 'm', long = "mappers")]
        mappers_count: i64,

        /// Number of reduce tasks
        #[arg(short = 'r', long = "reducers")]
        reducers_count: i64,

        /// Records a sorter keeps in memory before spilling
        #[arg(long = "sorter-records")]
        sorter_in_memory_records: Option<i64>,

        /// Path of the job binary inside the job storage
        #[arg(long = "job-path")]
        job_path: Option<String>,
    },

    /// Show a job's definition and progress
    Show {
        /// Job id
        id: u64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a job's progress
    Progress {
        /// Job id
        id: u64,

        /// Keep polling until the job finishes
        #[arg(short = 'w', long)]
        watch: bool,

        /// Polling interval in seconds when watching
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },

    /// Abort a waiting or running job
    Cancel {
        /// Job id
        id: u64,
    },

    /// Remove a job that is not running
    Remove {
        /// Job id
        id: u64,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Stream coordinator events
    Events {
        /// Only show events of this job
        #[arg(long = "job")]
        job_id: Option<u64>,
    },
}

/// Build the console client, failing before any network call when the
/// coordinator URL is not configured.
pub fn client(cli: &Cli) -> anyhow::Result<CoordinatorClient> {
    Ok(CoordinatorClient::new(cli.coordinator_url.as_deref())?)
}

/// Render a client error for the terminal, one line per invalid field.
pub fn describe_error(err: ClientError) -> anyhow::Error {
    match err {
        ClientError::Api {
            ref message,
            ref fields,
            ..
        } if !fields.is_empty() => {
            let mut text = message.clone();
            for field in fields {
                text.push_str(&format!("\n  {}: {}", field.field, field.message));
            }
            anyhow::anyhow!(text)
        }
        other => other.into(),
    }
}

/// Dispatch the CLI command to the appropriate handler.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Some(Commands::Serve {
            config,
            host,
            port,
            data_dir,
            in_memory,
        }) => {
            daemon::cmd_serve(
                config.clone(),
                host.clone(),
                *port,
                data_dir.clone(),
                *in_memory,
            )
            .await
        }
        Some(Commands::Status) => daemon::cmd_status(&client(cli)?, cli.verbose).await,
        Some(Commands::List { json }) => jobs::cmd_list(&client(cli)?, *json).await,
        Some(Commands::Submit {
            name,
            job_storage,
            data_storage,
            inputs_path,
            mappers_outputs_path,
            reducers_outputs_path,
            mappers_count,
            reducers_count,
            sorter_in_memory_records,
            job_path,
        }) => {
            let request = crate::models::UploadJobRequest {
                job_id: None,
                name: Some(name.clone()),
                job_path: job_path.clone(),
                job_storage_connection_string: Some(job_storage.clone()),
                data_storage_connection_string: Some(data_storage.clone()),
                inputs_path: Some(inputs_path.clone()),
                mappers_outputs_path: Some(mappers_outputs_path.clone()),
                reducers_outputs_path: Some(reducers_outputs_path.clone()),
                mappers_count: Some(*mappers_count),
                reducers_count: Some(*reducers_count),
                sorter_in_memory_records: *sorter_in_memory_records,
            };
            jobs::cmd_submit(&client(cli)?, &request).await
        }
        Some(Commands::Show { id, json }) => jobs::cmd_show(&client(cli)?, *id, *json).await,
        Some(Commands::Progress {
            id,
            watch,
            interval,
        }) => jobs::cmd_progress(&client(cli)?, *id, *watch, *interval).await,
        Some(Commands::Cancel { id }) => jobs::cmd_cancel(&client(cli)?, *id).await,
        Some(Commands::Remove { id, yes }) => jobs::cmd_remove(&client(cli)?, *id, *yes).await,
        Some(Commands::Events { job_id }) => events::cmd_events(&client(cli)?, *job_id).await,
        None => {
            // No subcommand provided -- print help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
