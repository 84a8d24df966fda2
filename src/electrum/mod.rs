//! Connection manager for the remote chain-data provider.
//!
//! The provider is an Electrum-style server. This module defines the seams the wallet service
//! talks to (`Connector`, `ChainClient`, `AddressDiscovery`), the `electrum-client` backed
//! implementation of them, and the time-bounded `connect` used by the sync lifecycle.

/// Electrum client built on `bdk_electrum`
mod client;
/// Type definitions for provider data and errors
mod types;

pub use client::{ClientConfig, ElectrumClient, ElectrumConnector};
pub use types::*;

use crate::wallet::AccountInfo;
use bdk_wallet::chain::spk_client::SyncRequest;
use bdk_wallet::{KeychainKind, Update};
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Request for chain data about the scripts a wallet has revealed.
pub type WalletSyncRequest = SyncRequest<(KeychainKind, u32)>;

/// A live connection to the chain-data provider.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
	/// Asynchronous faults observed after the connection was established.
	fn health(&self) -> BoxStream<'static, ClientError>;

	/// New best blocks announced after the connection was established.
	fn headers(&self) -> BoxStream<'static, BlockHeader>;

	/// Best block currently known to the server.
	async fn tip(&self) -> Result<BlockHeader, ClientError>;

	/// Fetch transactions and chain updates for the scripts in `request`.
	async fn sync_wallet(&self, request: WalletSyncRequest) -> Result<Update, ClientError>;

	/// Minimum relay fee, in coins per kilobyte.
	async fn relay_fee(&self) -> Result<f64, ClientError>;

	/// Fee rate, in coins per kilobyte, to confirm within `target_blocks`.
	async fn estimate_fee(&self, target_blocks: u32) -> Result<f64, ClientError>;

	/// Address-discovery support, if the provider offers it.
	fn discovery(&self) -> Option<&dyn AddressDiscovery> {
		None
	}

	/// Close the connection. Idempotent.
	async fn shutdown(&self);
}

/// Address-discovery scan used to recover a wallet's address history.
#[async_trait::async_trait]
pub trait AddressDiscovery: Send + Sync {
	/// Scan progress counters emitted while `recover_addresses` runs.
	fn progress(&self) -> BoxStream<'static, u32>;

	/// Count addresses used on-chain beyond the account's current key counts, scanning
	/// `window` unused addresses ahead of the last used one.
	async fn recover_addresses(
		&self,
		account: &AccountInfo,
		window: u32,
	) -> Result<RecoveryResult, ClientError>;
}

/// Opens connections to a provider endpoint.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
	async fn connect(&self, endpoint: &str) -> Result<Arc<dyn ChainClient>, ClientError>;
}

/// Connect through `connector`, giving up after `timeout`.
///
/// On timeout the pending connection future is dropped, which releases whatever it had
/// allocated so far.
pub async fn connect(
	connector: &dyn Connector,
	endpoint: &str,
	timeout: Duration,
) -> Result<Arc<dyn ChainClient>, ClientError> {
	debug!("Connecting to chain-data provider at {}", endpoint);
	match tokio::time::timeout(timeout, connector.connect(endpoint)).await {
		Ok(Ok(client)) => Ok(client),
		Ok(Err(e)) => {
			warn!("Connection to {} failed: {}", endpoint, e);
			Err(e)
		}
		Err(_) => {
			warn!("Connection to {} timed out after {:?}", endpoint, timeout);
			Err(ClientError::ConnectionTimeout(timeout))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicBool, Ordering};

	struct HangingConnector {
		released: Arc<AtomicBool>,
	}

	struct ReleaseOnDrop(Arc<AtomicBool>);

	impl Drop for ReleaseOnDrop {
		fn drop(&mut self) {
			self.0.store(true, Ordering::SeqCst);
		}
	}

	#[async_trait::async_trait]
	impl Connector for HangingConnector {
		async fn connect(&self, _endpoint: &str) -> Result<Arc<dyn ChainClient>, ClientError> {
			let _resource = ReleaseOnDrop(self.released.clone());
			futures::future::pending::<()>().await;
			Err(ClientError::Refused("unreachable".into()))
		}
	}

	#[tokio::test(start_paused = true)]
	async fn timeout_releases_partial_connection() {
		let released = Arc::new(AtomicBool::new(false));
		let connector = HangingConnector {
			released: released.clone(),
		};

		let started = tokio::time::Instant::now();
		let result = connect(&connector, "10.255.255.1:50001", Duration::from_secs(10)).await;

		assert!(matches!(result, Err(ClientError::ConnectionTimeout(_))));
		let elapsed = started.elapsed();
		assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
		assert!(released.load(Ordering::SeqCst));
	}
}
