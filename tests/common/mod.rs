#![allow(dead_code)]

use bdk_wallet::Update;
use bdk_wallet::bitcoin::block::{Header, Version};
use bdk_wallet::bitcoin::hashes::Hash;
use bdk_wallet::bitcoin::{BlockHash, CompactTarget, TxMerkleNode};
use bdk_wallet::chain::BlockId;
use fcli::electrum::{
	AddressDiscovery, BlockHeader, ChainClient, ClientError, Connector, RecoveryResult,
	WalletSyncRequest,
};
use fcli::utils::Fanout;
use fcli::wallet::{
	AccountInfo, Branch, ChainSnapshot, DEFAULT_ACCOUNT_NAME, DerivedAddress, FileWalletStore,
	KeyScope, Network, NotificationSource, SyncConfig, WalletError, WalletParams, WalletService,
	WalletStore,
};
use futures::stream::BoxStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TIP_HEIGHT: u32 = 120;

pub struct MockDiscovery {
	found: RecoveryResult,
	progress: Fanout<u32>,
}

#[async_trait::async_trait]
impl AddressDiscovery for MockDiscovery {
	fn progress(&self) -> BoxStream<'static, u32> {
		self.progress.subscribe()
	}

	async fn recover_addresses(
		&self,
		_account: &AccountInfo,
		window: u32,
	) -> Result<RecoveryResult, ClientError> {
		for scanned in (window..=window * 4).step_by(window as usize) {
			self.progress.publish(scanned);
		}
		Ok(self.found)
	}
}

pub struct MockChainClient {
	tip: BlockHeader,
	health: Fanout<ClientError>,
	headers: Fanout<BlockHeader>,
	discovery: Option<MockDiscovery>,
	shutdowns: AtomicUsize,
}

impl MockChainClient {
	fn new(discovery: Option<RecoveryResult>) -> Self {
		Self {
			tip: BlockHeader::new(
				TIP_HEIGHT,
				Header {
					version: Version::ONE,
					prev_blockhash: BlockHash::all_zeros(),
					merkle_root: TxMerkleNode::all_zeros(),
					time: 0,
					bits: CompactTarget::from_consensus(0x207fffff),
					nonce: TIP_HEIGHT,
				},
			),
			health: Fanout::new(),
			headers: Fanout::new(),
			discovery: discovery.map(|found| MockDiscovery {
				found,
				progress: Fanout::new(),
			}),
			shutdowns: AtomicUsize::new(0),
		}
	}

	/// Report an asynchronous fault on the health stream.
	pub fn fail(&self, err: ClientError) {
		self.health.publish(err);
	}

	pub fn shutdowns(&self) -> usize {
		self.shutdowns.load(Ordering::SeqCst)
	}

	pub fn tip_snapshot(&self) -> ChainSnapshot {
		ChainSnapshot {
			height: self.tip.height,
			hash: self.tip.block_hash().to_string(),
		}
	}
}

#[async_trait::async_trait]
impl ChainClient for MockChainClient {
	fn health(&self) -> BoxStream<'static, ClientError> {
		self.health.subscribe()
	}

	fn headers(&self) -> BoxStream<'static, BlockHeader> {
		self.headers.subscribe()
	}

	async fn tip(&self) -> Result<BlockHeader, ClientError> {
		Ok(self.tip.clone())
	}

	/// Reports the tip block and nothing else.
	async fn sync_wallet(&self, request: WalletSyncRequest) -> Result<Update, ClientError> {
		let mut update = Update::default();
		update.chain = request.chain_tip().map(|tip| {
			tip.insert(BlockId {
				height: self.tip.height,
				hash: self.tip.block_hash(),
			})
		});
		Ok(update)
	}

	async fn relay_fee(&self) -> Result<f64, ClientError> {
		Ok(0.00001)
	}

	async fn estimate_fee(&self, target_blocks: u32) -> Result<f64, ClientError> {
		Ok(0.0001 / target_blocks.max(1) as f64)
	}

	fn discovery(&self) -> Option<&dyn AddressDiscovery> {
		self.discovery
			.as_ref()
			.map(|discovery| discovery as &dyn AddressDiscovery)
	}

	async fn shutdown(&self) {
		if self.shutdowns.fetch_add(1, Ordering::SeqCst) == 0 {
			self.headers.close();
			self.health.publish(ClientError::ServerShutdown);
			self.health.close();
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
	Succeed,
	Refuse,
	/// Never completes; only the connect timeout ends the attempt.
	Hang,
}

pub struct MockConnector {
	behavior: Mutex<ConnectBehavior>,
	discovery: Option<RecoveryResult>,
	clients: Mutex<Vec<Arc<MockChainClient>>>,
}

impl MockConnector {
	pub fn new() -> Arc<Self> {
		Self::build(None)
	}

	pub fn with_discovery(external: u32, internal: u32) -> Arc<Self> {
		Self::build(Some(RecoveryResult { external, internal }))
	}

	fn build(discovery: Option<RecoveryResult>) -> Arc<Self> {
		Arc::new(Self {
			behavior: Mutex::new(ConnectBehavior::Succeed),
			discovery,
			clients: Mutex::new(Vec::new()),
		})
	}

	pub fn set_behavior(&self, behavior: ConnectBehavior) {
		*self.behavior.lock().unwrap() = behavior;
	}

	pub fn connects(&self) -> usize {
		self.clients.lock().unwrap().len()
	}

	pub fn client(&self, index: usize) -> Arc<MockChainClient> {
		self.clients.lock().unwrap()[index].clone()
	}

	pub fn last_client(&self) -> Arc<MockChainClient> {
		self.clients.lock().unwrap().last().cloned().unwrap()
	}
}

#[async_trait::async_trait]
impl Connector for MockConnector {
	async fn connect(&self, endpoint: &str) -> Result<Arc<dyn ChainClient>, ClientError> {
		let behavior = *self.behavior.lock().unwrap();
		match behavior {
			ConnectBehavior::Succeed => {
				let client = Arc::new(MockChainClient::new(self.discovery));
				self.clients.lock().unwrap().push(client.clone());
				Ok(client as Arc<dyn ChainClient>)
			}
			ConnectBehavior::Refuse => Err(ClientError::Refused(endpoint.to_string())),
			ConnectBehavior::Hang => {
				futures::future::pending::<()>().await;
				Err(ClientError::Refused(endpoint.to_string()))
			}
		}
	}
}

/// Store whose change-address provisioning always fails.
pub struct FailingStore {
	inner: Arc<FileWalletStore>,
}

impl FailingStore {
	pub fn new(inner: Arc<FileWalletStore>) -> Arc<Self> {
		Arc::new(Self { inner })
	}
}

#[async_trait::async_trait]
impl WalletStore for FailingStore {
	async fn exists(&self) -> Result<bool, WalletError> {
		self.inner.exists().await
	}

	fn is_open(&self) -> bool {
		self.inner.is_open()
	}

	async fn open(&self) -> Result<(), WalletError> {
		self.inner.open().await
	}

	async fn close(&self) -> Result<(), WalletError> {
		self.inner.close().await
	}

	async fn create(
		&self,
		passphrase: &[u8],
		seed_len: usize,
		name: &str,
	) -> Result<Vec<u8>, WalletError> {
		self.inner.create(passphrase, seed_len, name).await
	}

	async fn restore(&self, seed: &[u8], passphrase: &[u8], name: &str) -> Result<(), WalletError> {
		self.inner.restore(seed, passphrase, name).await
	}

	async fn destroy(&self) -> Result<(), WalletError> {
		self.inner.destroy().await
	}

	fn current_account(&self) -> Result<AccountInfo, WalletError> {
		self.inner.current_account()
	}

	fn current_block(&self) -> Result<ChainSnapshot, WalletError> {
		self.inner.current_block()
	}

	fn balance(&self, account: u32) -> Result<u64, WalletError> {
		self.inner.balance(account)
	}

	fn address_at(
		&self,
		account: u32,
		branch: Branch,
		index: u32,
	) -> Result<DerivedAddress, WalletError> {
		self.inner.address_at(account, branch, index)
	}

	fn addresses(&self, account: u32) -> Result<Vec<DerivedAddress>, WalletError> {
		self.inner.addresses(account)
	}

	fn notifications(&self) -> Arc<dyn NotificationSource> {
		self.inner.notifications()
	}

	async fn attach_chain(
		&self,
		client: Arc<dyn ChainClient>,
	) -> Result<ChainSnapshot, WalletError> {
		self.inner.attach_chain(client).await
	}

	async fn detach_chain(&self) {
		self.inner.detach_chain().await
	}

	async fn provision_addresses(
		&self,
		account: u32,
		scope: KeyScope,
		branch: Branch,
		count: u32,
	) -> Result<Vec<DerivedAddress>, WalletError> {
		if branch == Branch::Internal {
			return Err(WalletError::CannotDerive(account));
		}
		self.inner
			.provision_addresses(account, scope, branch, count)
			.await
	}
}

pub struct Fixture {
	pub dir: TempDir,
	pub store: Arc<FileWalletStore>,
	pub connector: Arc<MockConnector>,
	pub service: WalletService,
}

impl Fixture {
	pub fn account(&self) -> AccountInfo {
		self.store.current_account().unwrap()
	}
}

pub fn params(dir: &TempDir) -> WalletParams {
	WalletParams {
		network: Network::Regtest,
		path: dir.path().to_path_buf(),
		electrum_server: "127.0.0.1:50001".to_string(),
		..WalletParams::default()
	}
}

/// A service over an empty wallet directory.
pub fn empty_fixture(connector: Arc<MockConnector>) -> Fixture {
	let dir = tempfile::tempdir().unwrap();
	let params = params(&dir);
	let store = Arc::new(FileWalletStore::new(&params));
	let service = WalletService::new(
		store.clone(),
		connector.clone(),
		params,
		SyncConfig::default(),
	);
	Fixture {
		dir,
		store,
		connector,
		service,
	}
}

/// A service over a freshly restored wallet whose change-address provisioning fails.
pub async fn failing_fixture(connector: Arc<MockConnector>) -> Fixture {
	let dir = tempfile::tempdir().unwrap();
	let params = params(&dir);
	let store = Arc::new(FileWalletStore::new(&params));
	store
		.restore(&[7u8; 32], b"secret", DEFAULT_ACCOUNT_NAME)
		.await
		.unwrap();
	let service = WalletService::new(
		FailingStore::new(store.clone()),
		connector.clone(),
		params,
		SyncConfig::default(),
	);
	Fixture {
		dir,
		store,
		connector,
		service,
	}
}

/// A service over a freshly restored wallet.
pub async fn fixture(connector: Arc<MockConnector>) -> Fixture {
	let fixture = empty_fixture(connector);
	fixture
		.store
		.restore(&[7u8; 32], b"secret", DEFAULT_ACCOUNT_NAME)
		.await
		.unwrap();
	fixture
}
