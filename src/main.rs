//! LIS Reconciler CLI entry point.

use clap::Parser;

use lis_reconciler::cli::commands;
use lis_reconciler::cli::{handle_error, Cli, Commands};
use lis_reconciler::{ConfigLoader, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };
    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match &cli.command {
        Commands::Migrate => commands::migrate::execute(&config, cli.json).await,
        Commands::Consume => commands::consume::execute(&config, cli.json).await,
        Commands::Process { file } => commands::process::execute(&config, file, cli.json).await,
        Commands::Inspect { order_id } => commands::inspect::execute(&config, order_id, cli.json).await,
        Commands::Config => commands::config::execute(&config, cli.json),
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
