//! CLI command definitions and handlers.

mod sync;
mod wallet;

use clap::{Args, Parser, Subcommand};
use fcli::utils::{EndpointError, normalize_endpoint};
use fcli::wallet::{
	DEFAULT_ACCOUNT_ID, DEFAULT_ACCOUNT_NAME, DEFAULT_ELECTRUM_PORT, Network,
	RECOMMENDED_SEED_BYTES, WalletParams, WalletService, default_wallet_dir,
};
use std::path::PathBuf;
use std::time::Duration;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// fcli - command-line wallet synchronized against an Electrum server.
#[derive(Parser)]
#[command(name = "fcli")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
	#[command(flatten)]
	pub global: GlobalArgs,

	#[command(subcommand)]
	pub command: Commands,
}

/// Options shared by every command.
#[derive(Args)]
pub struct GlobalArgs {
	/// Directory holding the wallet (defaults to the user data directory).
	#[arg(short, long, global = true)]
	walletdir: Option<PathBuf>,

	/// Use the test network.
	#[arg(long, global = true, conflicts_with = "regtest")]
	testnet: bool,

	/// Use the regression test network.
	#[arg(long, global = true)]
	regtest: bool,

	/// Seconds to wait when opening the wallet.
	#[arg(short, long, global = true, default_value_t = 10)]
	timeout: u64,

	/// Electrum server, as host[:port].
	#[arg(short, long, global = true, default_value = "127.0.0.1")]
	electserver: String,

	/// Account to operate on.
	#[arg(long, global = true, default_value_t = DEFAULT_ACCOUNT_ID)]
	id: u32,
}

impl GlobalArgs {
	pub fn network(&self) -> Network {
		if self.regtest {
			Network::Regtest
		} else if self.testnet {
			Network::Testnet
		} else {
			Network::Mainnet
		}
	}

	pub fn params(&self) -> Result<WalletParams, EndpointError> {
		let network = self.network();
		let base = self.walletdir.clone().unwrap_or_else(default_wallet_dir);
		Ok(WalletParams {
			network,
			path: base.join(network.name()),
			timeout: Duration::from_secs(self.timeout),
			electrum_server: normalize_endpoint(&self.electserver, DEFAULT_ELECTRUM_PORT)?,
			account_id: self.id,
			..WalletParams::default()
		})
	}
}

/// Available wallet commands.
#[derive(Subcommand)]
pub enum Commands {
	/// Create a new wallet from a random seed.
	Create {
		/// Account name.
		#[arg(long, default_value = DEFAULT_ACCOUNT_NAME)]
		name: String,

		/// Private passphrase (generated when omitted).
		#[arg(short, long)]
		passphrase: Option<String>,

		/// Seed length in bytes (16 to 32, a multiple of 4).
		#[arg(long, default_value_t = RECOMMENDED_SEED_BYTES)]
		seed_len: usize,
	},

	/// Restore a wallet from a hex seed or its mnemonic.
	Restore {
		/// Seed, hex encoded.
		#[arg(long, conflicts_with = "mnemonic", required_unless_present = "mnemonic")]
		hex: Option<String>,

		/// Seed mnemonic, as space separated words.
		#[arg(long)]
		mnemonic: Option<String>,

		/// Account name.
		#[arg(long, default_value = DEFAULT_ACCOUNT_NAME)]
		name: String,

		/// Private passphrase.
		#[arg(short, long)]
		passphrase: String,
	},

	/// Synchronize the wallet with the Electrum server.
	Sync,

	/// Recover addresses used beyond the lookahead window.
	Recover,

	/// Show the account balance.
	Balance,

	/// Show the last receive address, or create a new one.
	Address {
		/// Provision a fresh address.
		#[arg(long)]
		new: bool,
	},

	/// List every provisioned address of the account.
	#[command(name = "listaddresses")]
	ListAddresses,

	/// Show accounts with their balances and addresses.
	#[command(name = "listaccounts")]
	ListAccounts,

	/// Show the receive-branch extended public key.
	Xpub {
		/// Index of the address derived from the key.
		#[arg(long, default_value_t = 1)]
		index: u32,

		/// Print only the derived address.
		#[arg(long)]
		print_address: bool,
	},

	/// Query relay and estimated fees.
	Fee {
		/// Confirmation target in blocks.
		#[arg(long, default_value_t = 6)]
		target: u32,
	},

	/// Follow wallet notifications until interrupted.
	Watch,
}

impl Commands {
	pub async fn execute(self, service: &WalletService) -> CommandResult {
		match self {
			Commands::Create {
				name,
				passphrase,
				seed_len,
			} => wallet::create(service, &name, passphrase, seed_len).await,
			Commands::Restore {
				hex,
				mnemonic,
				name,
				passphrase,
			} => {
				let seed = match (hex, mnemonic) {
					(Some(hex), _) => wallet::SeedInput::Hex(hex),
					(None, Some(words)) => wallet::SeedInput::Mnemonic(words),
					(None, None) => return Err("a seed is required".into()),
				};
				wallet::restore(service, seed, &name, &passphrase).await
			}
			Commands::Sync => sync::sync(service).await,
			Commands::Recover => sync::recover(service).await,
			Commands::Balance => wallet::balance(service).await,
			Commands::Address { new } => wallet::address(service, new).await,
			Commands::ListAddresses => wallet::list_addresses(service).await,
			Commands::ListAccounts => wallet::list_accounts(service).await,
			Commands::Xpub {
				index,
				print_address,
			} => wallet::xpub(service, index, print_address).await,
			Commands::Fee { target } => sync::fee(service, target).await,
			Commands::Watch => sync::watch(service).await,
		}
	}
}
