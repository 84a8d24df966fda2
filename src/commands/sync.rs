//! Commands that talk to the Electrum server.

use super::CommandResult;
use fcli::utils::{COIN_DECIMALS, format_coin_amount};
use fcli::wallet::{WalletService, WalletServiceError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Buffered progress counters; further counters are dropped while the printer catches up.
const PROGRESS_BUFFER: usize = 16;

fn log_balance(service: &WalletService) {
	info!(
		"Balance: {}",
		format_coin_amount(service.balance(), COIN_DECIMALS)
	);
}

pub async fn sync(service: &WalletService) -> CommandResult {
	let startup = service.synchronize(true).await?;
	let watch = service.watch();
	let up_to_date = || {
		service
			.current_wallet_block()
			.map(|block| block.height)
			.unwrap_or(0)
			>= startup.height
	};

	info!("Syncing...");
	while !up_to_date() {
		tokio::select! {
			_ = watch.accounts.recv() => {}
			_ = watch.transactions.recv() => {}
			_ = watch.spentness.recv() => {}
			Some(err) = watch.errors.recv() => {
				if !err.is_expected_shutdown() {
					service.stop().await;
					return Err(err.into());
				}
			}
		}
	}

	let address = service.last_address()?;
	info!("Synced to height {} ({})", startup.height, startup.hash);
	info!("Receive address: {}", address);
	log_balance(service);
	service.stop().await;
	Ok(())
}

pub async fn watch(service: &WalletService) -> CommandResult {
	service.synchronize(true).await?;
	let watch = service.watch();
	log_balance(service);

	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);

	info!("Waiting for new updates...");
	loop {
		tokio::select! {
			_ = &mut ctrl_c => break,
			Some(n) = watch.accounts.recv() => {
				debug!("Account {} updated", n.account_number);
				log_balance(service);
			}
			Some(n) = watch.transactions.recv() => {
				for block in &n.attached_blocks {
					info!("Block {} attached with {} wallet transactions", block.height, block.transactions.len());
				}
				for hash in &n.detached_blocks {
					info!("Block {} detached", hash);
				}
				for txid in &n.unmined_transactions {
					info!("New unmined transaction {}", txid);
				}
				log_balance(service);
			}
			Some(n) = watch.spentness.recv() => {
				match n.spender {
					Some(spender) => info!("Output {} spent by {}", n.outpoint, spender),
					None => info!("Output {} is unspent", n.outpoint),
				}
				log_balance(service);
			}
			Some(err) = watch.errors.recv() => {
				if err.is_expected_shutdown() {
					debug!("Server connection closed");
				} else {
					warn!("Server error: {}", err);
				}
			}
		}
	}

	service.stop().await;
	Ok(())
}

pub async fn recover(service: &WalletService) -> CommandResult {
	service.open().await?;

	let (tx, mut rx) = mpsc::channel(PROGRESS_BUFFER);
	let printer = tokio::spawn(async move {
		while let Some(counter) = rx.recv().await {
			info!("Scanned {} addresses", counter);
		}
	});

	let result = service.recover(tx).await;
	printer.abort();

	match result {
		Ok(()) => {
			let address = service.last_address()?;
			info!("Recovery finished, last receive address: {}", address);
			Ok(())
		}
		Err(WalletServiceError::RecoveryNotSupported) => {
			warn!("The server does not support address recovery, skipping");
			Ok(())
		}
		Err(e) => Err(e.into()),
	}
}

pub async fn fee(service: &WalletService, target: u32) -> CommandResult {
	service.synchronize(true).await?;
	let relay = service.relay_fee().await;
	let estimate = service.estimate_fee(target).await;
	service.stop().await;

	info!("Relay fee: {:.8} per kB", relay?);
	info!("Estimated fee for {} blocks: {:.8} per kB", target, estimate?);
	Ok(())
}
