use crate::electrum::{AddressDiscovery, RecoveryResult};
use crate::wallet::store::WalletStore;
use crate::wallet::types::{AccountInfo, Branch, WalletServiceError};

use futures::FutureExt;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Forwards scan progress counters to a caller's sink without ever waiting on it.
pub(crate) struct ProgressListener {
	done: Option<oneshot::Sender<()>>,
	handle: Option<JoinHandle<()>>,
}

impl ProgressListener {
	pub(crate) fn spawn(mut progress: BoxStream<'static, u32>, sink: mpsc::Sender<u32>) -> Self {
		let (done_tx, mut done_rx) = oneshot::channel();
		let handle = tokio::spawn(async move {
			let forward = |counter: u32| match sink.try_send(counter) {
				Ok(()) => true,
				Err(TrySendError::Full(dropped)) => {
					debug!("Recovery progress sink full, dropped counter {}", dropped);
					true
				}
				Err(TrySendError::Closed(_)) => false,
			};

			loop {
				tokio::select! {
					biased;
					counter = progress.next() => match counter {
						Some(counter) if forward(counter) => {}
						_ => return,
					},
					_ = &mut done_rx => break,
				}
			}
			// Counters published before the scan ended are still forwarded.
			while let Some(Some(counter)) = progress.next().now_or_never() {
				if !forward(counter) {
					return;
				}
			}
		});
		Self {
			done: Some(done_tx),
			handle: Some(handle),
		}
	}

	/// Forward the counters published so far, then stop.
	pub(crate) async fn finish(mut self) {
		if let Some(done) = self.done.take() {
			let _ = done.send(());
		}
		if let Some(handle) = self.handle.take() {
			let _ = handle.await;
		}
	}
}

impl Drop for ProgressListener {
	fn drop(&mut self) {
		if let Some(handle) = self.handle.take() {
			handle.abort();
		}
	}
}

/// Run the discovery scan for the current account and provision what it found.
///
/// External addresses are provisioned before internal ones. A failure of the second step
/// leaves the first in place.
pub(crate) async fn scan_and_provision(
	store: &dyn WalletStore,
	discovery: &dyn AddressDiscovery,
	window: u32,
	sink: mpsc::Sender<u32>,
) -> Result<RecoveryResult, WalletServiceError> {
	let account = store.current_account()?;
	info!(
		"Recovering addresses of account {} with window {}",
		account.account_number, window
	);

	let listener = ProgressListener::spawn(discovery.progress(), sink);
	let found = discovery.recover_addresses(&account, window).await;
	listener.finish().await;
	let found = found?;
	info!(
		"Discovery found {} external and {} internal addresses in use",
		found.external, found.internal
	);

	provision(store, &account, Branch::External, found.external).await?;
	provision(store, &account, Branch::Internal, found.internal).await?;
	Ok(found)
}

async fn provision(
	store: &dyn WalletStore,
	account: &AccountInfo,
	branch: Branch,
	count: u32,
) -> Result<(), WalletServiceError> {
	if count == 0 {
		return Ok(());
	}

	let addresses = store
		.provision_addresses(account.account_number, account.scope, branch, count)
		.await
		.map_err(|e| {
			WalletServiceError::Recovery(format!(
				"failed to provision {} {:?} addresses for account {}: {}",
				count, branch, account.account_number, e
			))
		})?;

	if let (Some(first), Some(last)) = (addresses.first(), addresses.last()) {
		debug!("Provisioned {} through {}", first, last);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::stream;

	#[tokio::test]
	async fn full_sink_drops_counters_instead_of_blocking() {
		let (tx, mut rx) = mpsc::channel(1);
		let listener = ProgressListener::spawn(stream::iter(vec![1, 2, 3]).boxed(), tx);
		listener.finish().await;

		assert_eq!(rx.recv().await, Some(1));
		// The listener finished and released the sink.
		assert_eq!(rx.recv().await, None);
	}

	#[tokio::test]
	async fn finish_forwards_counters_queued_before_it() {
		let progress = crate::utils::Fanout::new();
		let (tx, mut rx) = mpsc::channel(8);
		let listener = ProgressListener::spawn(progress.subscribe(), tx);

		// Published without yielding, so the listener has not run yet.
		progress.publish(10);
		progress.publish(20);
		listener.finish().await;

		assert_eq!(rx.recv().await, Some(10));
		assert_eq!(rx.recv().await, Some(20));
		assert_eq!(rx.recv().await, None);
	}
}
