//!
//! Electrum client on top of `bdk_electrum`.
//!
//! `electrum-client` calls block the calling thread, so every request runs on the blocking pool.
//! A poller task pings the server, drains header notifications into the cached tip and the
//! header stream, and reports failures on the health stream. The poller is owned by the client
//! and aborted when it shuts down or is dropped.

use super::types::*;
use super::{AddressDiscovery, ChainClient, Connector, WalletSyncRequest};
use crate::utils::Fanout;
use crate::wallet::keys;
use crate::wallet::{AccountInfo, Branch};

use bdk_electrum::BdkElectrumClient;
use bdk_electrum::electrum_client::{self, ConfigBuilder, ElectrumApi};
use bdk_wallet::chain::SpkIterator;
use bdk_wallet::chain::spk_client::FullScanRequest;
use bdk_wallet::{KeychainKind, Update};
use futures::stream::BoxStream;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Scripts requested from the server per batch.
const BATCH_SIZE: usize = 10;

/// A progress counter is published every this many scanned scripts.
const PROGRESS_STEP: u32 = 25;

type Electrum = BdkElectrumClient<electrum_client::Client>;

/// Timing configuration for an Electrum connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Socket timeout for a single request/response round trip.
	pub request_timeout: Duration,
	/// Interval between keep-alive pings.
	pub ping_interval: Duration,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			request_timeout: Duration::from_secs(10),
			ping_interval: Duration::from_secs(30),
		}
	}
}

impl ClientConfig {
	/// `electrum-client` takes whole seconds in a `u8`.
	fn socket_timeout(&self) -> u8 {
		self.request_timeout.as_secs().clamp(1, u8::MAX as u64) as u8
	}
}

/// Run a blocking `electrum-client` call on the blocking pool.
async fn blocking<T, F>(call: F) -> Result<T, ClientError>
where
	F: FnOnce() -> Result<T, electrum_client::Error> + Send + 'static,
	T: Send + 'static,
{
	tokio::task::spawn_blocking(call)
		.await
		.map_err(|e| ClientError::Io(e.to_string()))?
		.map_err(ClientError::from)
}

/// State shared between the client handle and its poller.
struct Shared {
	electrum: Arc<Electrum>,
	tip: Mutex<BlockHeader>,
	headers: Fanout<BlockHeader>,
	health: Fanout<ClientError>,
	closed: AtomicBool,
}

impl Shared {
	fn tip(&self) -> MutexGuard<'_, BlockHeader> {
		self.tip.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	fn ensure_open(&self) -> Result<Arc<Electrum>, ClientError> {
		if self.is_closed() {
			return Err(ClientError::ServerShutdown);
		}
		Ok(self.electrum.clone())
	}
}

async fn poll_loop(shared: Arc<Shared>, interval: Duration) {
	let mut ticker = tokio::time::interval(interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	// First tick completes immediately.
	ticker.tick().await;

	loop {
		ticker.tick().await;
		if shared.is_closed() {
			return;
		}

		let electrum = shared.electrum.clone();
		let polled = blocking(move || {
			electrum.inner.ping()?;
			let mut latest = None;
			while let Some(notification) = electrum.inner.block_headers_pop()? {
				latest = Some(notification);
			}
			Ok(latest)
		})
		.await;

		if shared.is_closed() {
			return;
		}
		match polled {
			Ok(Some(notification)) => {
				let header = BlockHeader::from(notification);
				debug!("New chain tip at height {}", header.height);
				*shared.tip() = header.clone();
				shared.headers.publish(header);
			}
			Ok(None) => {}
			Err(e) => {
				warn!("Electrum ping failed: {}", e);
				shared.health.publish(ClientError::PingFailed(e.to_string()));
			}
		}
	}
}

/// Address discovery through a gap-limited full scan of both branches.
pub struct ElectrumDiscovery {
	shared: Arc<Shared>,
	progress: Arc<Fanout<u32>>,
}

impl ElectrumDiscovery {
	fn scan_request(
		&self,
		account: &AccountInfo,
	) -> Result<FullScanRequest<KeychainKind>, ClientError> {
		let branch = |branch: Branch| {
			keys::branch_descriptor(account.scope, &account.account_xpub, branch)
				.map(SpkIterator::new)
				.map_err(|e| ClientError::InvalidResponse(format!("account descriptor: {}", e)))
		};

		let progress = self.progress.clone();
		let scanned = AtomicU32::new(0);
		Ok(FullScanRequest::builder()
			.spks_for_keychain(KeychainKind::External, branch(Branch::External)?)
			.spks_for_keychain(KeychainKind::Internal, branch(Branch::Internal)?)
			.inspect(move |_, _, _| {
				let count = scanned.fetch_add(1, Ordering::Relaxed) + 1;
				if count % PROGRESS_STEP == 0 {
					progress.publish(count);
				}
			})
			.build())
	}
}

#[async_trait::async_trait]
impl AddressDiscovery for ElectrumDiscovery {
	fn progress(&self) -> BoxStream<'static, u32> {
		self.progress.subscribe()
	}

	async fn recover_addresses(
		&self,
		account: &AccountInfo,
		window: u32,
	) -> Result<RecoveryResult, ClientError> {
		let electrum = self.shared.ensure_open()?;
		let request = self.scan_request(account)?;
		let stop_gap = window.max(1) as usize;

		let response =
			blocking(move || electrum.full_scan(request, stop_gap, BATCH_SIZE, false)).await?;

		let used = |keychain: KeychainKind| {
			response
				.last_active_indices
				.get(&keychain)
				.map_or(0, |index| index + 1)
		};
		Ok(RecoveryResult {
			external: used(KeychainKind::External).saturating_sub(account.external_key_count),
			internal: used(KeychainKind::Internal).saturating_sub(account.internal_key_count),
		})
	}
}

/// Electrum connection handle.
pub struct ElectrumClient {
	endpoint: String,
	shared: Arc<Shared>,
	discovery: ElectrumDiscovery,
	poller: Mutex<Option<JoinHandle<()>>>,
}

impl ElectrumClient {
	/// Open a connection and subscribe to chain tips.
	pub async fn connect(endpoint: &str, config: ClientConfig) -> Result<Self, ClientError> {
		let url = endpoint.to_string();
		let socket_timeout = config.socket_timeout();
		let connected = tokio::task::spawn_blocking(move || {
			let electrum_config = ConfigBuilder::new().timeout(Some(socket_timeout)).build();
			let client = electrum_client::Client::from_config(&url, electrum_config)?;
			let header = client.block_headers_subscribe()?;
			Ok::<_, electrum_client::Error>((client, header))
		})
		.await
		.map_err(|e| ClientError::Io(e.to_string()))?;

		let (client, notification) = match connected {
			Ok(connected) => connected,
			Err(e) if is_refused(&e) => return Err(ClientError::Refused(endpoint.to_string())),
			Err(e) => return Err(e.into()),
		};
		let tip = BlockHeader::from(notification);
		info!("Connected to {} at height {}", endpoint, tip.height);

		let shared = Arc::new(Shared {
			electrum: Arc::new(BdkElectrumClient::new(client)),
			tip: Mutex::new(tip),
			headers: Fanout::new(),
			health: Fanout::new(),
			closed: AtomicBool::new(false),
		});
		let poller = tokio::spawn(poll_loop(shared.clone(), config.ping_interval));

		Ok(Self {
			endpoint: endpoint.to_string(),
			discovery: ElectrumDiscovery {
				shared: shared.clone(),
				progress: Arc::new(Fanout::new()),
			},
			shared,
			poller: Mutex::new(Some(poller)),
		})
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	fn abort_poller(&self) {
		let poller = self
			.poller
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		if let Some(poller) = poller {
			poller.abort();
		}
	}
}

impl Drop for ElectrumClient {
	fn drop(&mut self) {
		self.shared.closed.store(true, Ordering::Release);
		self.abort_poller();
	}
}

#[async_trait::async_trait]
impl ChainClient for ElectrumClient {
	fn health(&self) -> BoxStream<'static, ClientError> {
		self.shared.health.subscribe()
	}

	fn headers(&self) -> BoxStream<'static, BlockHeader> {
		self.shared.headers.subscribe()
	}

	async fn tip(&self) -> Result<BlockHeader, ClientError> {
		self.shared.ensure_open()?;
		Ok(self.shared.tip().clone())
	}

	async fn sync_wallet(&self, request: WalletSyncRequest) -> Result<Update, ClientError> {
		let electrum = self.shared.ensure_open()?;
		let response = blocking(move || electrum.sync(request, BATCH_SIZE, false)).await?;
		Ok(response.into())
	}

	async fn relay_fee(&self) -> Result<f64, ClientError> {
		let electrum = self.shared.ensure_open()?;
		blocking(move || electrum.inner.relay_fee()).await
	}

	async fn estimate_fee(&self, target_blocks: u32) -> Result<f64, ClientError> {
		let electrum = self.shared.ensure_open()?;
		let fee = blocking(move || electrum.inner.estimate_fee(target_blocks as usize)).await?;
		if fee < 0.0 {
			return Err(ClientError::InvalidResponse(format!(
				"server cannot estimate a fee for {} blocks",
				target_blocks
			)));
		}
		Ok(fee)
	}

	fn discovery(&self) -> Option<&dyn AddressDiscovery> {
		Some(&self.discovery)
	}

	async fn shutdown(&self) {
		if self.shared.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		info!("Shutting down connection to {}", self.endpoint);
		self.abort_poller();
		self.shared.headers.close();
		self.shared.health.publish(ClientError::ServerShutdown);
		self.shared.health.close();
	}
}

/// Connector producing `ElectrumClient`s.
#[derive(Debug, Clone, Default)]
pub struct ElectrumConnector {
	config: ClientConfig,
}

impl ElectrumConnector {
	pub fn new(config: ClientConfig) -> Self {
		Self { config }
	}
}

#[async_trait::async_trait]
impl Connector for ElectrumConnector {
	async fn connect(&self, endpoint: &str) -> Result<Arc<dyn ChainClient>, ClientError> {
		let client = ElectrumClient::connect(endpoint, self.config.clone()).await?;
		Ok(Arc::new(client))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::StreamExt;
	use serde_json::{Value, json};
	use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
	use tokio::net::TcpListener;

	const HEADER_HEX: &str = concat!(
		"0100000000000000000000000000000000000000000000000000000000000000",
		"000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa",
		"4b1e5e4a29ab5f49ffff001d1dac2b7c"
	);

	/// Minimal Electrum server answering the calls the client makes.
	async fn serve_one(listener: TcpListener) {
		let (socket, _) = listener.accept().await.unwrap();
		let (read_half, mut write_half) = socket.into_split();
		let mut lines = BufReader::new(read_half).lines();

		while let Ok(Some(line)) = lines.next_line().await {
			let request: Value = serde_json::from_str(&line).unwrap();
			let id = request["id"].clone();
			let reply = match request["method"].as_str().unwrap() {
				"blockchain.headers.subscribe" => {
					json!({"jsonrpc": "2.0", "id": id, "result": {"height": 120, "hex": HEADER_HEX}})
				}
				"blockchain.relayfee" => json!({"jsonrpc": "2.0", "id": id, "result": 0.00001}),
				"blockchain.estimatefee" => json!({"jsonrpc": "2.0", "id": id, "result": -1}),
				"server.ping" => json!({"jsonrpc": "2.0", "id": id, "result": null}),
				other => json!({
					"jsonrpc": "2.0",
					"id": id,
					"error": {"code": -32601, "message": format!("unknown method {}", other)}
				}),
			};
			let mut bytes = serde_json::to_vec(&reply).unwrap();
			bytes.push(b'\n');
			if write_half.write_all(&bytes).await.is_err() {
				return;
			}
		}
	}

	async fn fake_server() -> String {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let endpoint = listener.local_addr().unwrap().to_string();
		tokio::spawn(serve_one(listener));
		endpoint
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn subscribes_to_tip_and_answers_fee_queries() {
		let endpoint = fake_server().await;
		let client = ElectrumClient::connect(&endpoint, ClientConfig::default())
			.await
			.unwrap();

		let tip = client.tip().await.unwrap();
		assert_eq!(tip.height, 120);
		assert_eq!(
			tip.block_hash().to_string(),
			"000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
		);
		assert_eq!(client.relay_fee().await.unwrap(), 0.00001);
		assert!(matches!(
			client.estimate_fee(6).await,
			Err(ClientError::InvalidResponse(_))
		));
		assert!(client.discovery().is_some());
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn shutdown_emits_sentinel_and_rejects_requests() {
		let endpoint = fake_server().await;
		let client = ElectrumClient::connect(&endpoint, ClientConfig::default())
			.await
			.unwrap();
		let mut health = client.health();
		let mut headers = client.headers();

		client.shutdown().await;
		client.shutdown().await;

		assert_eq!(health.next().await, Some(ClientError::ServerShutdown));
		assert_eq!(health.next().await, None);
		assert_eq!(headers.next().await, None);
		assert_eq!(client.relay_fee().await, Err(ClientError::ServerShutdown));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn closed_port_is_refused() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let endpoint = listener.local_addr().unwrap().to_string();
		drop(listener);

		let result = ElectrumClient::connect(&endpoint, ClientConfig::default()).await;
		assert!(matches!(result, Err(ClientError::Refused(_))));
	}
}
