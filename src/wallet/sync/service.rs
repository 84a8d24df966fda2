//! Wallet service: lifecycle of sync sessions over a wallet store and a provider connection.
//!
//! A session is started by `synchronize` and ended by `stop`. Session state lives behind one
//! async mutex so start and teardown never interleave. The sync flag is kept outside it and can
//! be read at any time without waiting.

use crate::electrum::{self, ChainClient, ClientError, Connector};
use crate::wallet::keys;
use crate::wallet::store::WalletStore;
use crate::wallet::sync::config::SyncConfig;
use crate::wallet::sync::recovery;
use crate::wallet::sync::state::{ServiceState, SyncState, WatcherGauge};
use crate::wallet::sync::watcher::{Outbound, Watch, Watcher, consumer_channels};
use crate::wallet::types::*;

use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One connection plus, when watching, its watcher task.
struct Session {
	client: Arc<dyn ChainClient>,
	stop: Option<oneshot::Sender<()>>,
	watcher: Option<JoinHandle<()>>,
}

pub struct WalletService {
	store: Arc<dyn WalletStore>,
	connector: Arc<dyn Connector>,
	params: WalletParams,
	config: SyncConfig,
	state: SyncState,
	gauge: Arc<WatcherGauge>,
	session: Mutex<Option<Session>>,
	outbound: Outbound,
	watch: Watch,
}

impl WalletService {
	pub fn new(
		store: Arc<dyn WalletStore>,
		connector: Arc<dyn Connector>,
		params: WalletParams,
		config: SyncConfig,
	) -> Self {
		let (outbound, watch) = consumer_channels();
		Self {
			store,
			connector,
			params,
			config,
			state: SyncState::default(),
			gauge: Arc::new(WatcherGauge::default()),
			session: Mutex::new(None),
			outbound,
			watch,
		}
	}

	pub fn params(&self) -> &WalletParams {
		&self.params
	}

	pub fn is_synced(&self) -> bool {
		self.state.is_synced()
	}

	pub fn state(&self) -> ServiceState {
		self.state.phase()
	}

	pub fn is_opened(&self) -> bool {
		self.store.is_open()
	}

	/// Watcher task counters.
	pub fn gauge(&self) -> Arc<WatcherGauge> {
		self.gauge.clone()
	}

	/// Consumer channels for account, transaction, spentness and error notifications.
	pub fn watch(&self) -> Watch {
		self.watch.clone()
	}

	/// Start a new session, replacing any active one.
	///
	/// The wallet is reopened and connected to the provider. With `watch` set, a watcher is
	/// started and the service is marked synced. Returns the chain position the wallet knows
	/// once the connection is handed over.
	pub async fn synchronize(&self, watch: bool) -> Result<ChainSnapshot, WalletServiceError> {
		let mut session = self.session.lock().await;
		self.start_session(&mut session, watch).await
	}

	/// End the active session. Returns at once when not synced.
	pub async fn stop(&self) {
		if !self.is_synced() {
			return;
		}
		let mut session = self.session.lock().await;
		self.teardown(&mut session).await;
	}

	/// Open the wallet storage without connecting.
	pub async fn open(&self) -> Result<(), WalletServiceError> {
		self.store
			.open()
			.await
			.map_err(WalletServiceError::OpenFailed)
	}

	/// Stop syncing and close the wallet.
	pub async fn shutdown(&self) -> Result<(), WalletServiceError> {
		let mut session = self.session.lock().await;
		self.teardown(&mut session).await;
		self.store.close().await?;
		Ok(())
	}

	async fn start_session(
		&self,
		slot: &mut Option<Session>,
		watch: bool,
	) -> Result<ChainSnapshot, WalletServiceError> {
		self.teardown(slot).await;
		self.state.set_phase(ServiceState::Connecting);

		if self.store.is_open() {
			if let Err(e) = self.store.close().await {
				warn!("Failed to close wallet before reopening: {}", e);
			}
		}
		if let Err(e) = self.store.open().await {
			error!("Failed to open wallet: {}", e);
			self.state.set_phase(ServiceState::Idle);
			return Err(WalletServiceError::OpenFailed(e));
		}
		let account = match self.store.current_account() {
			Ok(account) => account,
			Err(e) => {
				self.state.set_phase(ServiceState::Idle);
				return Err(e.into());
			}
		};

		let client = match electrum::connect(
			self.connector.as_ref(),
			&self.params.electrum_server,
			self.config.connect_timeout,
		)
		.await
		{
			Ok(client) => client,
			Err(e) => {
				self.state.set_phase(ServiceState::Idle);
				return Err(e.into());
			}
		};
		info!("Connected to {}", self.params.electrum_server);

		let mut session = Session {
			client: client.clone(),
			stop: None,
			watcher: None,
		};
		if watch {
			let (stop_tx, stop_rx) = oneshot::channel();
			let notifications = self.store.notifications();
			let watcher = Watcher::new(
				notifications.as_ref(),
				client.health(),
				account.account_number,
				&self.config,
				self.outbound.clone(),
				stop_rx,
			);
			let guard = self.gauge.enter();
			session.watcher = Some(tokio::spawn(async move {
				let _guard = guard;
				watcher.run().await;
			}));
			session.stop = Some(stop_tx);
			self.state.set_synced(true);
			self.state.set_phase(ServiceState::Watching);
		} else {
			self.state.set_phase(ServiceState::Connected);
		}
		*slot = Some(session);

		match self.store.attach_chain(client).await {
			Ok(snapshot) => {
				info!(
					"Wallet synchronizing from height {} ({})",
					snapshot.height, snapshot.hash
				);
				Ok(snapshot)
			}
			Err(e) => {
				error!("Failed to hand the connection to the wallet: {}", e);
				self.teardown(slot).await;
				Err(e.into())
			}
		}
	}

	/// End the session in `slot`, if any: detach the wallet, close the connection, stop the
	/// watcher and wait for it to exit.
	async fn teardown(&self, slot: &mut Option<Session>) {
		let Some(mut session) = slot.take() else {
			return;
		};
		self.state.set_phase(ServiceState::Stopping);
		debug!("Stopping sync session");

		self.store.detach_chain().await;
		session.client.shutdown().await;

		if let Some(stop) = session.stop.take() {
			// The watcher may already be gone.
			let _ = stop.send(());
		}
		if let Some(watcher) = session.watcher.take() {
			if let Err(e) = watcher.await {
				error!("Watcher task failed: {}", e);
			}
		}

		self.state.set_synced(false);
		self.state.set_phase(ServiceState::Idle);
		info!("Sync session stopped");
	}

	/// Scan the provider for addresses used beyond the lookahead window and provision them.
	///
	/// Runs its own session without a watcher, replacing any active one, and ends it before
	/// returning. Progress counters are offered to `counter` and dropped when it is full.
	pub async fn recover(&self, counter: mpsc::Sender<u32>) -> Result<(), WalletServiceError> {
		if !self.store.is_open() {
			return Err(WalletError::NotLoaded.into());
		}

		let mut slot = self.session.lock().await;
		self.start_session(&mut slot, false).await?;

		let result = match slot.as_ref().map(|session| session.client.clone()) {
			Some(client) => match client.discovery() {
				Some(discovery) => recovery::scan_and_provision(
					self.store.as_ref(),
					discovery,
					self.config.recovery_window,
					counter,
				)
				.await
				.map(|_| ()),
				None => {
					warn!("Connected server does not support address discovery");
					Err(WalletServiceError::RecoveryNotSupported)
				}
			},
			None => Err(ClientError::ServerShutdown.into()),
		};

		self.teardown(&mut slot).await;
		result
	}

	/// Create a wallet with a fresh seed and open it, returning the seed. A wallet that fails
	/// to open after creation is destroyed.
	pub async fn create(
		&self,
		passphrase: &[u8],
		seed_len: usize,
		name: &str,
	) -> Result<WalletSeed, WalletServiceError> {
		let seed = self.store.create(passphrase, seed_len, name).await?;
		self.open_or_destroy().await?;
		Ok(wallet_seed(&seed)?)
	}

	/// Restore a wallet from a hex seed and open it.
	pub async fn restore_by_hex(
		&self,
		seed_hex: &str,
		passphrase: &[u8],
		name: &str,
	) -> Result<WalletSeed, WalletServiceError> {
		let seed = hex::decode(seed_hex.trim())
			.map_err(|e| WalletServiceError::InvalidSeed(e.to_string()))?;
		self.restore_seed(&seed, passphrase, name).await
	}

	/// Restore a wallet from its BIP39 mnemonic and open it.
	pub async fn restore_by_mnemonic(
		&self,
		words: &str,
		passphrase: &[u8],
		name: &str,
	) -> Result<WalletSeed, WalletServiceError> {
		let seed = keys::seed_from_words(words)?;
		self.restore_seed(&seed, passphrase, name).await
	}

	async fn restore_seed(
		&self,
		seed: &[u8],
		passphrase: &[u8],
		name: &str,
	) -> Result<WalletSeed, WalletServiceError> {
		match self.store.restore(seed, passphrase, name).await {
			Ok(()) => {}
			Err(e @ WalletError::AlreadyExists(_)) => return Err(e.into()),
			Err(e) => {
				self.destroy_quietly().await;
				return Err(e.into());
			}
		}
		self.open_or_destroy().await?;
		Ok(wallet_seed(seed)?)
	}

	async fn open_or_destroy(&self) -> Result<(), WalletServiceError> {
		if let Err(e) = self.store.open().await {
			error!("Failed to open new wallet: {}", e);
			self.destroy_quietly().await;
			return Err(WalletServiceError::OpenFailed(e));
		}
		Ok(())
	}

	async fn destroy_quietly(&self) {
		if let Err(e) = self.store.destroy().await {
			warn!("Failed to remove incomplete wallet: {}", e);
		}
	}

	/// Confirmed balance of the current account in base units; zero when unavailable.
	pub fn balance(&self) -> u64 {
		if !self.store.is_open() {
			return 0;
		}
		match self
			.store
			.current_account()
			.and_then(|account| self.store.balance(account.account_number))
		{
			Ok(balance) => balance,
			Err(e) => {
				warn!("Failed to query balance: {}", e);
				0
			}
		}
	}

	/// Most recently provisioned receive address.
	pub fn last_address(&self) -> Result<DerivedAddress, WalletServiceError> {
		let account = self.store.current_account()?;
		Ok(self.store.address_at(
			account.account_number,
			Branch::External,
			account.external_key_count.saturating_sub(1),
		)?)
	}

	/// Every provisioned address of the current account.
	pub fn account_addresses(&self) -> Result<Vec<DerivedAddress>, WalletServiceError> {
		let account = self.store.current_account()?;
		Ok(self.store.addresses(account.account_number)?)
	}

	/// Accounts with balances and addresses, at the wallet's chain position.
	pub fn accounts(&self) -> Result<AccountsOverview, WalletServiceError> {
		let account = self.store.current_account()?;
		let summary = AccountSummary {
			balance: self.store.balance(account.account_number)?,
			addresses: self.store.addresses(account.account_number)?,
			account,
		};
		Ok(AccountsOverview {
			block: self.store.current_block()?,
			accounts: vec![summary],
		})
	}

	/// Receive-branch extended public key and the address at `index` below it.
	pub fn xpub(&self, index: u32) -> Result<BranchXpub, WalletServiceError> {
		let account = self.store.current_account()?;
		let xpub = keys::branch_xpub(&account.account_xpub, Branch::External)?;
		let address = self
			.store
			.address_at(account.account_number, Branch::External, index)?;
		Ok(BranchXpub {
			xpub: xpub.to_string(),
			address,
		})
	}

	/// Provision a fresh receive address.
	pub async fn next_address(&self) -> Result<DerivedAddress, WalletServiceError> {
		let account = self.store.current_account()?;
		let addresses = self
			.store
			.provision_addresses(account.account_number, account.scope, Branch::External, 1)
			.await?;
		addresses
			.into_iter()
			.next()
			.ok_or_else(|| WalletError::CannotDerive(account.account_number).into())
	}

	/// Chain position the wallet has caught up to.
	pub fn current_wallet_block(&self) -> Result<ChainSnapshot, WalletServiceError> {
		Ok(self.store.current_block()?)
	}

	/// Minimum relay fee in coins per kilobyte.
	pub async fn relay_fee(&self) -> Result<f64, WalletServiceError> {
		let client = self.active_client().await?;
		let fee = tokio::time::timeout(self.config.request_timeout, client.relay_fee())
			.await
			.map_err(|_| ClientError::RequestTimeout("blockchain.relayfee".to_string()))??;
		Ok(fee)
	}

	/// Fee rate in coins per kilobyte to confirm within `target_blocks`.
	pub async fn estimate_fee(&self, target_blocks: u32) -> Result<f64, WalletServiceError> {
		let client = self.active_client().await?;
		let fee = tokio::time::timeout(
			self.config.request_timeout,
			client.estimate_fee(target_blocks),
		)
		.await
		.map_err(|_| ClientError::RequestTimeout("blockchain.estimatefee".to_string()))??;
		Ok(fee)
	}

	async fn active_client(&self) -> Result<Arc<dyn ChainClient>, WalletServiceError> {
		if !self.store.is_open() {
			return Err(WalletError::NotLoaded.into());
		}
		if !self.is_synced() {
			return Err(ClientError::ServerShutdown.into());
		}
		self.session
			.lock()
			.await
			.as_ref()
			.map(|session| session.client.clone())
			.ok_or_else(|| ClientError::ServerShutdown.into())
	}
}

fn wallet_seed(seed: &[u8]) -> Result<WalletSeed, WalletError> {
	Ok(WalletSeed {
		hex: hex::encode(seed),
		words: keys::seed_words(seed)?,
	})
}
