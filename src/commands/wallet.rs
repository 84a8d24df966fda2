//! Wallet management commands.

use super::CommandResult;
use fcli::utils::{COIN_DECIMALS, format_coin_amount};
use fcli::wallet::{WalletService, generate_passphrase};
use tracing::{info, warn};

pub async fn create(
	service: &WalletService,
	name: &str,
	passphrase: Option<String>,
	seed_len: usize,
) -> CommandResult {
	let passphrase = passphrase.unwrap_or_else(|| {
		let generated = generate_passphrase();
		warn!("No passphrase given, generated: {}", generated);
		generated
	});

	let seed = service.create(passphrase.as_bytes(), seed_len, name).await?;
	info!("Wallet created in {:?}", service.params().path);
	info!("Seed: {}", seed.hex);
	info!("Mnemonic: {}", seed.words.join(" "));
	info!("Write the seed down. It is the only way to restore this wallet.");
	Ok(())
}

/// Seed encodings accepted by `restore`.
pub enum SeedInput {
	Hex(String),
	Mnemonic(String),
}

pub async fn restore(
	service: &WalletService,
	seed: SeedInput,
	name: &str,
	passphrase: &str,
) -> CommandResult {
	let seed = match seed {
		SeedInput::Hex(hex) => {
			service
				.restore_by_hex(&hex, passphrase.as_bytes(), name)
				.await?
		}
		SeedInput::Mnemonic(words) => {
			service
				.restore_by_mnemonic(&words, passphrase.as_bytes(), name)
				.await?
		}
	};
	info!(
		"Wallet restored in {:?} from seed {}...",
		service.params().path,
		&seed.hex[..8.min(seed.hex.len())]
	);
	info!("Run `fcli recover` to find addresses used beyond the lookahead window.");
	Ok(())
}

pub async fn balance(service: &WalletService) -> CommandResult {
	service.open().await?;
	let block = service.current_wallet_block()?;
	info!("Height: {}", block.height);
	info!("Blockhash: {}", block.hash);
	info!(
		"Balance: {}",
		format_coin_amount(service.balance(), COIN_DECIMALS)
	);
	Ok(())
}

pub async fn address(service: &WalletService, new: bool) -> CommandResult {
	service.open().await?;
	let address = if new {
		service.next_address().await?
	} else {
		service.last_address()?
	};
	info!("Address: {}", address);
	Ok(())
}

pub async fn list_addresses(service: &WalletService) -> CommandResult {
	service.open().await?;
	let addresses = service.account_addresses()?;
	if addresses.is_empty() {
		info!("No addresses found. The wallet has not generated any addresses yet.");
		return Ok(());
	}
	info!("Addresses:");
	for address in addresses {
		info!("- {} ({})", address, address.path());
	}
	Ok(())
}

/// Addresses shown per account before the rest is summarised.
const LISTED_ADDRESSES: usize = 5;

pub async fn list_accounts(service: &WalletService) -> CommandResult {
	service.open().await?;
	let overview = service.accounts()?;
	info!("Height: {}", overview.block.height);
	info!("Blockhash: {}", overview.block.hash);

	info!("Accounts:");
	for summary in overview.accounts {
		info!(" - {}", summary.account.account_name);
		info!("   ID: {}", summary.account.account_number);
		info!(
			"   Balance: {}",
			format_coin_amount(summary.balance, COIN_DECIMALS)
		);
		if summary.addresses.is_empty() {
			info!("   No addresses found");
			continue;
		}
		info!("   Addresses ({}):", summary.addresses.len());
		for address in summary.addresses.iter().take(LISTED_ADDRESSES) {
			info!("    - {}", address);
		}
		if summary.addresses.len() > LISTED_ADDRESSES {
			info!(
				"    ...and {} more",
				summary.addresses.len() - LISTED_ADDRESSES
			);
		}
	}
	Ok(())
}

pub async fn xpub(service: &WalletService, index: u32, print_address: bool) -> CommandResult {
	service.open().await?;
	let branch = service.xpub(index)?;
	if print_address {
		println!("{}", branch.address);
		return Ok(());
	}
	info!("xpub: {}", branch.xpub);
	info!("Derived address (index {}): {}", index, branch.address);
	Ok(())
}
