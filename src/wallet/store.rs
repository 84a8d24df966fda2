//! Wallet storage.
//!
//! `WalletStore` is the surface the sync service needs from the wallet library: open/close,
//! create/restore/destroy, account and chain-position queries, the notification source, the
//! hand-over of a provider connection and local address provisioning.
//!
//! `FileWalletStore` keeps a watch-only `bdk_wallet::Wallet` built from the account's public
//! descriptors. The account record and the wallet's change set live together in one JSON file;
//! private keys never touch it, only a short seed fingerprint is recorded so a restore can be
//! matched against its origin.

use crate::electrum::ChainClient;
use crate::wallet::keys;
use crate::wallet::notifications::{
	AccountNotification, AttachedBlock, NotificationServer, NotificationSource,
	SpentnessNotification, TransactionNotifications,
};
use crate::wallet::types::*;

use bdk_wallet::bitcoin::{OutPoint, Txid};
use bdk_wallet::chain::{BlockId, ChainPosition, Merge};
use bdk_wallet::{ChangeSet, KeychainKind, Update, Wallet};
use futures::StreamExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const WALLET_FILE_VERSION: u32 = 2;

/// Addresses are derived with non-hardened child indices.
const MAX_CHILD_INDEX: u32 = (1 << 31) - 1;

#[async_trait::async_trait]
pub trait WalletStore: Send + Sync {
	async fn exists(&self) -> Result<bool, WalletError>;

	fn is_open(&self) -> bool;

	async fn open(&self) -> Result<(), WalletError>;

	/// Close the storage. The store is considered closed afterwards even on error.
	async fn close(&self) -> Result<(), WalletError>;

	/// Create a wallet from a fresh random seed of `seed_len` bytes, returning the seed.
	async fn create(
		&self,
		passphrase: &[u8],
		seed_len: usize,
		name: &str,
	) -> Result<Vec<u8>, WalletError>;

	async fn restore(&self, seed: &[u8], passphrase: &[u8], name: &str) -> Result<(), WalletError>;

	async fn destroy(&self) -> Result<(), WalletError>;

	fn current_account(&self) -> Result<AccountInfo, WalletError>;

	/// Chain position the wallet has caught up to.
	fn current_block(&self) -> Result<ChainSnapshot, WalletError>;

	fn balance(&self, account: u32) -> Result<u64, WalletError>;

	/// Address at `index` on `branch`, whether or not it was provisioned yet.
	fn address_at(&self, account: u32, branch: Branch, index: u32)
	-> Result<DerivedAddress, WalletError>;

	/// Every provisioned address of `account`, receive branch first.
	fn addresses(&self, account: u32) -> Result<Vec<DerivedAddress>, WalletError>;

	fn notifications(&self) -> Arc<dyn NotificationSource>;

	/// Switch the wallet to provider-backed operation over `client`.
	///
	/// Returns the provider's tip. The wallet catches up in the background and follows every
	/// new tip until `detach_chain`.
	async fn attach_chain(&self, client: Arc<dyn ChainClient>)
	-> Result<ChainSnapshot, WalletError>;

	/// Release the provider connection handed over by `attach_chain`.
	async fn detach_chain(&self);

	/// Record `count` new addresses on `branch` without consulting the provider. Indices continue
	/// contiguously from the branch's current key count.
	async fn provision_addresses(
		&self,
		account: u32,
		scope: KeyScope,
		branch: Branch,
		count: u32,
	) -> Result<Vec<DerivedAddress>, WalletError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRecord {
	number: u32,
	name: String,
	scope: KeyScope,
	xpub: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletFile {
	version: u32,
	network: Network,
	created_at: String,
	seed_fingerprint: String,
	account: AccountRecord,
	/// Accumulated `bdk_wallet` change set: descriptors, revealed indices, chain and graph.
	#[serde(default)]
	chain: ChangeSet,
}

struct LoadedWallet {
	file: WalletFile,
	wallet: Wallet,
}

impl LoadedWallet {
	/// Fold the wallet's staged changes into the file image, returning them.
	fn stage(&mut self) -> ChangeSet {
		let staged = self.wallet.take_staged().unwrap_or_default();
		self.file.chain.merge(staged.clone());
		staged
	}

	fn check_account(&self, account: u32) -> Result<(), WalletError> {
		if self.file.account.number != account {
			return Err(WalletError::AccountNotFound(account));
		}
		Ok(())
	}

	fn key_count(&self, keychain: KeychainKind) -> u32 {
		self.wallet
			.derivation_index(keychain)
			.map_or(0, |index| index + 1)
	}

	fn account_info(&self) -> AccountInfo {
		let record = &self.file.account;
		AccountInfo {
			account_number: record.number,
			account_name: record.name.clone(),
			scope: record.scope,
			account_xpub: record.xpub.clone(),
			external_key_count: self.key_count(KeychainKind::External),
			internal_key_count: self.key_count(KeychainKind::Internal),
			can_derive: true,
		}
	}

	fn account_notification(&self) -> AccountNotification {
		let info = self.account_info();
		AccountNotification {
			account_number: info.account_number,
			account_name: info.account_name,
			external_key_count: info.external_key_count,
			internal_key_count: info.internal_key_count,
		}
	}

	fn derived(&self, branch: Branch, index: u32, address: String) -> DerivedAddress {
		DerivedAddress {
			scope: self.file.account.scope,
			account: self.file.account.number,
			branch,
			index,
			address,
		}
	}

	fn tx_positions(&self) -> BTreeMap<Txid, Option<BlockId>> {
		self.wallet
			.transactions()
			.map(|tx| {
				let block = match tx.chain_position {
					ChainPosition::Confirmed { anchor, .. } => Some(anchor.block_id),
					ChainPosition::Unconfirmed { .. } => None,
				};
				(tx.tx_node.txid, block)
			})
			.collect()
	}

	fn unspent(&self) -> BTreeSet<OutPoint> {
		self.wallet.list_unspent().map(|utxo| utxo.outpoint).collect()
	}
}

/// Notifications produced by applying one chain update.
#[derive(Default)]
struct UpdateEffects {
	transactions: Option<TransactionNotifications>,
	spentness: Vec<SpentnessNotification>,
	account: Option<AccountNotification>,
}

struct Shared {
	path: PathBuf,
	network: Network,
	account_id: u32,
	scope: KeyScope,
	timeout: Duration,
	state: Mutex<Option<LoadedWallet>>,
	/// Serialises file writes so the newest image always lands last.
	write: tokio::sync::Mutex<()>,
	notifications: Arc<NotificationServer>,
}

impl Shared {
	fn state(&self) -> MutexGuard<'_, Option<LoadedWallet>> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn with_loaded<T>(
		&self,
		f: impl FnOnce(&mut LoadedWallet) -> Result<T, WalletError>,
	) -> Result<T, WalletError> {
		let mut guard = self.state();
		let loaded = guard.as_mut().ok_or(WalletError::NotLoaded)?;
		f(loaded)
	}

	/// Write the wallet file through a temporary file so a crash never leaves it truncated.
	async fn write_file(&self, file: &WalletFile) -> Result<(), WalletError> {
		if let Some(dir) = self.path.parent() {
			tokio::fs::create_dir_all(dir).await?;
		}
		let bytes = serde_json::to_vec_pretty(file)?;
		let tmp = self.path.with_extension("json.tmp");
		tokio::fs::write(&tmp, &bytes).await?;
		tokio::fs::rename(&tmp, &self.path).await?;
		debug!("Saved wallet file {:?}", self.path);
		Ok(())
	}

	/// Persist the current in-memory wallet.
	async fn persist(&self) -> Result<(), WalletError> {
		let _write = self.write.lock().await;
		let file = self.with_loaded(|loaded| {
			loaded.stage();
			Ok(loaded.file.clone())
		})?;
		self.write_file(&file).await
	}

	/// Apply a provider update and collect the notifications it causes.
	fn apply_update(&self, update: Update) -> Result<UpdateEffects, WalletError> {
		self.with_loaded(|loaded| {
			let old_tip = loaded.wallet.latest_checkpoint();
			let old_txs = loaded.tx_positions();
			let old_unspent = loaded.unspent();
			let old_balance = loaded.wallet.balance().total();

			loaded
				.wallet
				.apply_update(update)
				.map_err(|e| WalletError::Backend(e.to_string()))?;
			let changes = loaded.stage();

			let detached_blocks: Vec<String> = changes
				.local_chain
				.blocks
				.iter()
				.filter_map(|(height, hash)| {
					let old = old_tip.get(*height)?;
					(Some(old.hash()) != *hash).then(|| old.hash().to_string())
				})
				.collect();

			let mut attached: BTreeMap<BlockId, Vec<String>> = BTreeMap::new();
			let mut unmined = Vec::new();
			let new_txs = loaded.tx_positions();
			for (txid, block) in &new_txs {
				if old_txs.get(txid) == Some(block) {
					continue;
				}
				match block {
					Some(block) => attached.entry(*block).or_default().push(txid.to_string()),
					None => unmined.push(txid.to_string()),
				}
			}

			let mut effects = UpdateEffects::default();
			if !attached.is_empty() || !detached_blocks.is_empty() || !unmined.is_empty() {
				effects.transactions = Some(TransactionNotifications {
					attached_blocks: attached
						.into_iter()
						.map(|(block, transactions)| AttachedBlock {
							height: block.height,
							hash: block.hash.to_string(),
							transactions,
						})
						.collect(),
					detached_blocks,
					unmined_transactions: unmined,
				});
			}

			let new_unspent = loaded.unspent();
			let graph = loaded.wallet.tx_graph();
			effects.spentness = old_unspent
				.difference(&new_unspent)
				.map(|outpoint| SpentnessNotification {
					account: loaded.file.account.number,
					outpoint: outpoint.to_string(),
					spender: graph
						.outspends(*outpoint)
						.iter()
						.next()
						.map(|txid| txid.to_string()),
				})
				.collect();

			if old_txs != new_txs || old_balance != loaded.wallet.balance().total() {
				effects.account = Some(loaded.account_notification());
			}
			Ok(effects)
		})
	}

	fn publish(&self, effects: UpdateEffects) {
		if let Some(transactions) = effects.transactions {
			self.notifications.notify_transactions(transactions);
		}
		for spentness in effects.spentness {
			self.notifications.notify_spentness(spentness);
		}
		if let Some(account) = effects.account {
			self.notifications.notify_account(account);
		}
	}

	/// Pull everything the provider knows about the revealed scripts.
	async fn sync_once(&self, client: &dyn ChainClient) -> Result<(), WalletError> {
		let request =
			self.with_loaded(|loaded| Ok(loaded.wallet.start_sync_with_revealed_spks().build()))?;
		let update = client.sync_wallet(request).await?;
		let effects = self.apply_update(update)?;
		self.persist().await?;
		self.publish(effects);
		Ok(())
	}
}

/// Catch up once, then again on every new tip, until the header stream ends.
async fn follow_chain(shared: Arc<Shared>, client: Arc<dyn ChainClient>) {
	let mut headers = client.headers();
	loop {
		match shared.sync_once(client.as_ref()).await {
			Ok(()) => {
				if let Ok(block) = shared.with_loaded(|loaded| {
					Ok(loaded.wallet.latest_checkpoint().height())
				}) {
					debug!("Wallet synced to height {}", block);
				}
			}
			Err(WalletError::Chain(e)) if e.is_expected_shutdown() => return,
			Err(WalletError::NotLoaded) => return,
			Err(e) => warn!("Wallet sync failed: {}", e),
		}
		match headers.next().await {
			Some(header) => debug!("Syncing wallet to new tip {}", header.height),
			None => return,
		}
	}
}

/// JSON-file backed wallet storage.
pub struct FileWalletStore {
	shared: Arc<Shared>,
	follower: Mutex<Option<JoinHandle<()>>>,
}

impl FileWalletStore {
	pub fn new(params: &WalletParams) -> Self {
		Self {
			shared: Arc::new(Shared {
				path: params.path.join(WALLET_FILE_NAME),
				network: params.network,
				account_id: params.account_id,
				scope: params.address_scope,
				timeout: params.timeout,
				state: Mutex::new(None),
				write: tokio::sync::Mutex::new(()),
				notifications: Arc::new(NotificationServer::new()),
			}),
			follower: Mutex::new(None),
		}
	}

	pub fn path(&self) -> &Path {
		&self.shared.path
	}

	/// Publisher side of the wallet's notifications.
	pub fn notification_server(&self) -> Arc<NotificationServer> {
		self.shared.notifications.clone()
	}

	/// Whether a provider connection is currently attached.
	pub fn is_chain_attached(&self) -> bool {
		self.follower()
			.as_ref()
			.is_some_and(|follower| !follower.is_finished())
	}

	fn follower(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
		self.follower.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn build_wallet(&self, xpub: &str) -> Result<Wallet, WalletError> {
		let scope = self.shared.scope;
		let external = keys::branch_descriptor(scope, xpub, Branch::External)?;
		let internal = keys::branch_descriptor(scope, xpub, Branch::Internal)?;
		Wallet::create(external, internal)
			.network(self.shared.network.chain())
			.create_wallet_no_persist()
			.map_err(|e| WalletError::Backend(e.to_string()))
	}
}

#[async_trait::async_trait]
impl WalletStore for FileWalletStore {
	async fn exists(&self) -> Result<bool, WalletError> {
		Ok(tokio::fs::try_exists(&self.shared.path).await?)
	}

	fn is_open(&self) -> bool {
		self.shared.state().is_some()
	}

	async fn open(&self) -> Result<(), WalletError> {
		if self.is_open() {
			return Ok(());
		}

		let path = &self.shared.path;
		let timeout = self.shared.timeout;
		let bytes = match tokio::time::timeout(timeout, tokio::fs::read(path)).await {
			Err(_) => return Err(WalletError::Timeout(timeout)),
			Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(WalletError::NotFound(path.clone()));
			}
			Ok(result) => result?,
		};

		let file: WalletFile = serde_json::from_slice(&bytes)?;
		if file.network != self.shared.network {
			return Err(WalletError::NetworkMismatch {
				expected: self.shared.network,
				found: file.network,
			});
		}
		if file.account.number != self.shared.account_id {
			return Err(WalletError::AccountNotFound(self.shared.account_id));
		}

		let wallet = Wallet::load()
			.check_network(self.shared.network.chain())
			.load_wallet_no_persist(file.chain.clone())
			.map_err(|e| WalletError::Backend(e.to_string()))?
			.ok_or_else(|| WalletError::Backend("wallet file holds no wallet state".into()))?;

		*self.shared.state() = Some(LoadedWallet { file, wallet });
		info!("Opened wallet {:?}", path);
		Ok(())
	}

	async fn close(&self) -> Result<(), WalletError> {
		self.detach_chain().await;
		if self.shared.state().take().is_some() {
			info!("Closed wallet {:?}", self.shared.path);
		}
		Ok(())
	}

	async fn create(
		&self,
		passphrase: &[u8],
		seed_len: usize,
		name: &str,
	) -> Result<Vec<u8>, WalletError> {
		keys::validate_seed_len(seed_len)?;
		let mut seed = vec![0u8; seed_len];
		rand::rng().fill(seed.as_mut_slice());
		self.restore(&seed, passphrase, name).await?;
		Ok(seed)
	}

	async fn restore(&self, seed: &[u8], passphrase: &[u8], name: &str) -> Result<(), WalletError> {
		keys::validate_seed_len(seed.len())?;
		if passphrase.is_empty() {
			return Err(WalletError::InvalidSeed(
				"a private passphrase is required".to_string(),
			));
		}
		if self.exists().await? {
			return Err(WalletError::AlreadyExists(self.shared.path.clone()));
		}

		let xpub = keys::account_xpub(
			seed,
			self.shared.network,
			self.shared.scope,
			self.shared.account_id,
		)?
		.to_string();
		let mut wallet = self.build_wallet(&xpub)?;

		let fingerprint = Sha256::digest(seed);
		let file = WalletFile {
			version: WALLET_FILE_VERSION,
			network: self.shared.network,
			created_at: chrono::Utc::now().to_rfc3339(),
			seed_fingerprint: hex::encode(&fingerprint[..4]),
			account: AccountRecord {
				number: self.shared.account_id,
				name: name.to_string(),
				scope: self.shared.scope,
				xpub,
			},
			chain: wallet.take_staged().unwrap_or_default(),
		};
		self.shared.write_file(&file).await?;
		info!(
			"Created wallet {:?} with account {} ({})",
			self.shared.path, self.shared.account_id, name
		);
		Ok(())
	}

	async fn destroy(&self) -> Result<(), WalletError> {
		self.close().await?;
		match tokio::fs::remove_file(&self.shared.path).await {
			Ok(()) => {
				info!("Destroyed wallet {:?}", self.shared.path);
				Ok(())
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	fn current_account(&self) -> Result<AccountInfo, WalletError> {
		self.shared.with_loaded(|loaded| Ok(loaded.account_info()))
	}

	fn current_block(&self) -> Result<ChainSnapshot, WalletError> {
		self.shared.with_loaded(|loaded| {
			let tip = loaded.wallet.latest_checkpoint();
			Ok(ChainSnapshot {
				height: tip.height(),
				hash: tip.hash().to_string(),
			})
		})
	}

	fn balance(&self, account: u32) -> Result<u64, WalletError> {
		self.shared.with_loaded(|loaded| {
			loaded.check_account(account)?;
			Ok(loaded.wallet.balance().total().to_sat())
		})
	}

	fn address_at(
		&self,
		account: u32,
		branch: Branch,
		index: u32,
	) -> Result<DerivedAddress, WalletError> {
		if index > MAX_CHILD_INDEX {
			return Err(WalletError::CannotDerive(account));
		}
		self.shared.with_loaded(|loaded| {
			loaded.check_account(account)?;
			let info = loaded.wallet.peek_address(branch.into(), index);
			Ok(loaded.derived(branch, info.index, info.address.to_string()))
		})
	}

	fn addresses(&self, account: u32) -> Result<Vec<DerivedAddress>, WalletError> {
		self.shared.with_loaded(|loaded| {
			loaded.check_account(account)?;
			let mut addresses = Vec::new();
			for branch in [Branch::External, Branch::Internal] {
				for index in 0..loaded.key_count(branch.into()) {
					let info = loaded.wallet.peek_address(branch.into(), index);
					addresses.push(loaded.derived(branch, index, info.address.to_string()));
				}
			}
			Ok(addresses)
		})
	}

	fn notifications(&self) -> Arc<dyn NotificationSource> {
		self.shared.notifications.clone()
	}

	async fn attach_chain(
		&self,
		client: Arc<dyn ChainClient>,
	) -> Result<ChainSnapshot, WalletError> {
		if !self.is_open() {
			return Err(WalletError::NotLoaded);
		}
		let header = client.tip().await?;
		let snapshot = ChainSnapshot {
			height: header.height,
			hash: header.block_hash().to_string(),
		};

		self.detach_chain().await;
		let follower = tokio::spawn(follow_chain(self.shared.clone(), client));
		*self.follower() = Some(follower);
		info!(
			"Wallet attached to chain at height {} ({})",
			snapshot.height, snapshot.hash
		);
		Ok(snapshot)
	}

	async fn detach_chain(&self) {
		let follower = self.follower().take();
		if let Some(follower) = follower {
			follower.abort();
			let _ = follower.await;
			debug!("Wallet detached from chain");
		}
	}

	async fn provision_addresses(
		&self,
		account: u32,
		scope: KeyScope,
		branch: Branch,
		count: u32,
	) -> Result<Vec<DerivedAddress>, WalletError> {
		let (addresses, notification) = self.shared.with_loaded(|loaded| {
			loaded.check_account(account)?;
			if loaded.file.account.scope != scope {
				return Err(WalletError::CannotDerive(account));
			}
			if count == 0 {
				return Ok((Vec::new(), None));
			}

			let keychain = KeychainKind::from(branch);
			let start = loaded.key_count(keychain);
			let end = start
				.checked_add(count)
				.filter(|end| *end <= MAX_CHILD_INDEX)
				.ok_or(WalletError::CannotDerive(account))?;

			let revealed: Vec<(u32, String)> = loaded
				.wallet
				.reveal_addresses_to(keychain, end - 1)
				.map(|info| (info.index, info.address.to_string()))
				.collect();
			let addresses = revealed
				.into_iter()
				.map(|(index, address)| loaded.derived(branch, index, address))
				.collect();
			loaded.stage();
			Ok((addresses, Some(loaded.account_notification())))
		})?;

		let Some(notification) = notification else {
			return Ok(addresses);
		};
		self.shared.persist().await?;
		debug!(
			"Provisioned {} {:?} addresses for account {}",
			count, branch, account
		);
		self.shared.notifications.notify_account(notification);
		Ok(addresses)
	}
}

impl Drop for FileWalletStore {
	fn drop(&mut self) {
		if let Some(follower) = self.follower().take() {
			follower.abort();
		}
	}
}
