use clap::Parser;

use mr_coordinator::cli::{self, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // `serve` installs its own subscriber with a file layer.
    if cli.verbose && !matches!(cli.command, Some(Commands::Serve { .. })) {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = cli::dispatch(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
