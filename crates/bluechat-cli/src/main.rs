//! BlueChat CLI entry point

use clap::Parser;
use tracing::{error, info};

use bluechat_cli::{
    cli::Cli,
    commands::CommandDispatcher,
    config::{AppConfig, Backend},
    error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let mut config = load_configuration(&cli)?;

    // Backend flag wins over every configuration layer
    if let Some(backend) = &cli.backend {
        config.cli.backend = backend.parse::<Backend>()?;
    }

    // Execute the command
    if let Err(e) = CommandDispatcher::execute(cli.command, config).await {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load layered configuration, including an explicit file when given
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    if let Some(path) = &cli.config {
        info!("Loading configuration from: {}", path.display());
    }
    Ok(AppConfig::load(cli.config.as_deref())?)
}
