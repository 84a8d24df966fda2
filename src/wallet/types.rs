use crate::electrum::ClientError;
use crate::utils::EndpointError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default Electrum port appended to server addresses without one.
pub const DEFAULT_ELECTRUM_PORT: u16 = 50001;
pub const DEFAULT_DB_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_APP_NAME: &str = "flcwallet";
pub const DEFAULT_ACCOUNT_ID: u32 = 1;
pub const DEFAULT_ACCOUNT_NAME: &str = "myfloki";
pub const WALLET_FILE_NAME: &str = "wallet.json";

/// Seed length bounds accepted when creating or restoring a wallet, in bytes. Seeds are
/// BIP39 entropy, so lengths also step by `SEED_BYTES_STEP`.
pub const MIN_SEED_BYTES: usize = 16;
pub const MAX_SEED_BYTES: usize = 32;
pub const SEED_BYTES_STEP: usize = 4;
pub const RECOMMENDED_SEED_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
	Mainnet,
	Testnet,
	Regtest,
}

impl Network {
	pub fn name(&self) -> &'static str {
		match self {
			Network::Mainnet => "mainnet",
			Network::Testnet => "testnet",
			Network::Regtest => "regtest",
		}
	}
}

impl fmt::Display for Network {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Derivation scope of an account: BIP43 purpose and coin type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyScope {
	pub purpose: u32,
	pub coin: u32,
}

impl KeyScope {
	pub const BIP0044: KeyScope = KeyScope {
		purpose: 44,
		coin: 0,
	};
	pub const BIP0084: KeyScope = KeyScope {
		purpose: 84,
		coin: 0,
	};
}

impl fmt::Display for KeyScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "m/{}'/{}'", self.purpose, self.coin)
	}
}

/// Address chain within an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Branch {
	/// Receive addresses.
	External,
	/// Change addresses.
	Internal,
}

impl Branch {
	pub fn index(&self) -> u32 {
		match self {
			Branch::External => 0,
			Branch::Internal => 1,
		}
	}
}

/// An address revealed by the wallet together with its derivation position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAddress {
	pub scope: KeyScope,
	pub account: u32,
	pub branch: Branch,
	pub index: u32,
	/// Encoded network address.
	pub address: String,
}

impl DerivedAddress {
	pub fn path(&self) -> String {
		format!(
			"{}/{}'/{}/{}",
			self.scope,
			self.account,
			self.branch.index(),
			self.index
		)
	}
}

impl fmt::Display for DerivedAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.address)
	}
}

/// Properties of the account the client operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
	pub account_number: u32,
	pub account_name: String,
	pub scope: KeyScope,
	/// Extended public key of the account, encoded for the wallet's network.
	pub account_xpub: String,
	/// Number of receive addresses provisioned so far.
	pub external_key_count: u32,
	/// Number of change addresses provisioned so far.
	pub internal_key_count: u32,
	/// Whether the account carries the public key material needed to derive addresses.
	pub can_derive: bool,
}

/// A wallet seed in both of its printable encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSeed {
	pub hex: String,
	/// BIP39 mnemonic of the same bytes.
	pub words: Vec<String>,
}

/// One account with its balance and provisioned addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
	pub account: AccountInfo,
	pub balance: u64,
	pub addresses: Vec<DerivedAddress>,
}

/// Every account of the wallet at the chain position it has caught up to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountsOverview {
	pub block: ChainSnapshot,
	pub accounts: Vec<AccountSummary>,
}

/// Receive-branch extended public key and one address derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchXpub {
	pub xpub: String,
	pub address: DerivedAddress,
}

/// Chain position known to the wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
	pub height: u32,
	pub hash: String,
}

/// Wallet-level parameters, as supplied by the front end.
#[derive(Debug, Clone)]
pub struct WalletParams {
	pub network: Network,
	/// Directory holding the wallet file.
	pub path: PathBuf,
	/// Bound on opening the wallet storage.
	pub timeout: Duration,
	pub address_scope: KeyScope,
	/// Normalised `host:port` of the Electrum server.
	pub electrum_server: String,
	pub account_id: u32,
}

impl Default for WalletParams {
	fn default() -> Self {
		Self {
			network: Network::Mainnet,
			path: default_wallet_dir(),
			timeout: DEFAULT_DB_TIMEOUT,
			address_scope: KeyScope::BIP0044,
			electrum_server: String::new(),
			account_id: DEFAULT_ACCOUNT_ID,
		}
	}
}

/// Per-user application data directory for the wallet.
pub fn default_wallet_dir() -> PathBuf {
	dirs::data_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join(DEFAULT_APP_NAME)
}

/// Errors raised by the wallet storage.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
	#[error("wallet not loaded")]
	NotLoaded,

	#[error("wallet already exists at {0}")]
	AlreadyExists(PathBuf),

	#[error("wallet not found at {0}")]
	NotFound(PathBuf),

	#[error("account {0} not found")]
	AccountNotFound(u32),

	#[error("account {0} can't derive")]
	CannotDerive(u32),

	#[error("invalid seed: {0}")]
	InvalidSeed(String),

	#[error("invalid mnemonic: {0}")]
	InvalidMnemonic(String),

	#[error("key derivation failed: {0}")]
	Derivation(String),

	#[error("wallet backend error: {0}")]
	Backend(String),

	#[error("wallet network {found} does not match {expected}")]
	NetworkMismatch { expected: Network, found: Network },

	#[error("timed out opening wallet after {0:?}")]
	Timeout(Duration),

	#[error("chain backend error: {0}")]
	Chain(#[from] ClientError),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Errors raised by the wallet service.
#[derive(Debug, thiserror::Error)]
pub enum WalletServiceError {
	#[error("Wallet error: {0}")]
	Wallet(#[from] WalletError),

	#[error("failed to open wallet: {0}")]
	OpenFailed(WalletError),

	#[error("Connection error: {0}")]
	Connection(#[from] ClientError),

	/// The connected provider has no address discovery. Callers may skip recovery.
	#[error("recovering not supported by the connected server")]
	RecoveryNotSupported,

	#[error("Recovery error: {0}")]
	Recovery(String),

	#[error("invalid seed: {0}")]
	InvalidSeed(String),

	#[error("invalid electrum server: {0}")]
	InvalidEndpoint(#[from] EndpointError),
}

impl WalletServiceError {
	/// True for the expected-shutdown sentinel raised while a session is being replaced.
	pub fn is_expected_shutdown(&self) -> bool {
		matches!(
			self,
			WalletServiceError::Connection(ClientError::ServerShutdown)
				| WalletServiceError::Wallet(WalletError::Chain(ClientError::ServerShutdown))
		)
	}
}
