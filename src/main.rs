mod commands;

use clap::Parser;
use commands::Cli;
use fcli::electrum::ElectrumConnector;
use fcli::wallet::{FileWalletStore, SyncConfig, WalletService};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fcli=info")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	if let Err(e) = run(cli).await {
		error!("{}", e);
		std::process::exit(1);
	}
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
	let params = cli.global.params()?;
	let config = SyncConfig::default();
	info!(
		"Network: {}, wallet: {:?}, server: {}",
		params.network, params.path, params.electrum_server
	);

	let store = Arc::new(FileWalletStore::new(&params));
	let connector = Arc::new(ElectrumConnector::new(config.client_config()));
	let service = WalletService::new(store, connector, params, config);

	let result = cli.command.execute(&service).await;
	if let Err(e) = service.shutdown().await {
		warn!("Failed to close wallet: {}", e);
	}
	result
}
