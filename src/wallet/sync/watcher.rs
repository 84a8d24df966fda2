//! The notification watcher.
//!
//! One watcher task runs per watching session. It is the only writer of the consumer channels:
//! events from the merged upstream queue and the heartbeat are routed by kind, and every send
//! waits for a reader while still observing the stop signal.

use crate::electrum::ClientError;
use crate::wallet::notifications::{
	AccountNotification, NotificationSource, SpentnessNotification, TransactionNotifications,
};
use crate::wallet::sync::config::SyncConfig;
use crate::wallet::sync::events::{Heartbeat, NotificationEvent, upstream_events};

use futures_util::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// An event in flight together with the acknowledgement its reader sends back.
type Handoff<T> = (T, oneshot::Sender<()>);

/// Read side of one consumer channel. Clones share the same queue, so each event is received
/// by exactly one reader.
///
/// Delivery is a rendezvous: the watcher counts an event as delivered only once a reader
/// acknowledged it. An event whose watcher stopped before the acknowledgement is dropped on
/// receipt, so nothing from a finished session reaches a later one.
#[derive(Debug)]
pub struct ConsumerChannel<T> {
	rx: Arc<Mutex<mpsc::Receiver<Handoff<T>>>>,
}

impl<T> Clone for ConsumerChannel<T> {
	fn clone(&self) -> Self {
		Self {
			rx: self.rx.clone(),
		}
	}
}

impl<T> ConsumerChannel<T> {
	fn new(rx: mpsc::Receiver<Handoff<T>>) -> Self {
		Self {
			rx: Arc::new(Mutex::new(rx)),
		}
	}

	/// Wait for the next event. Cancel safe.
	pub async fn recv(&self) -> Option<T> {
		let mut rx = self.rx.lock().await;
		loop {
			let (item, ack) = rx.recv().await?;
			if ack.send(()).is_ok() {
				return Some(item);
			}
			debug!("Dropped an event abandoned by a stopped watcher");
		}
	}
}

/// The four consumer channels handed out to front ends.
#[derive(Debug, Clone)]
pub struct Watch {
	pub accounts: ConsumerChannel<AccountNotification>,
	pub transactions: ConsumerChannel<TransactionNotifications>,
	pub spentness: ConsumerChannel<SpentnessNotification>,
	pub errors: ConsumerChannel<ClientError>,
}

/// Write side of the consumer channels, owned by the service and lent to the watcher.
#[derive(Debug, Clone)]
pub(crate) struct Outbound {
	accounts: mpsc::Sender<Handoff<AccountNotification>>,
	transactions: mpsc::Sender<Handoff<TransactionNotifications>>,
	spentness: mpsc::Sender<Handoff<SpentnessNotification>>,
	errors: mpsc::Sender<Handoff<ClientError>>,
}

pub(crate) fn consumer_channels() -> (Outbound, Watch) {
	let (accounts_tx, accounts_rx) = mpsc::channel(1);
	let (transactions_tx, transactions_rx) = mpsc::channel(1);
	let (spentness_tx, spentness_rx) = mpsc::channel(1);
	let (errors_tx, errors_rx) = mpsc::channel(1);

	let outbound = Outbound {
		accounts: accounts_tx,
		transactions: transactions_tx,
		spentness: spentness_tx,
		errors: errors_tx,
	};
	let watch = Watch {
		accounts: ConsumerChannel::new(accounts_rx),
		transactions: ConsumerChannel::new(transactions_rx),
		spentness: ConsumerChannel::new(spentness_rx),
		errors: ConsumerChannel::new(errors_rx),
	};
	(outbound, watch)
}

pub(crate) struct Watcher {
	events: BoxStream<'static, NotificationEvent>,
	heartbeat: Heartbeat,
	outbound: Outbound,
	stop: oneshot::Receiver<()>,
}

impl Watcher {
	/// Subscribe to every upstream source. Subscriptions are live from this call on, before the
	/// task is spawned.
	pub(crate) fn new(
		source: &dyn NotificationSource,
		health: BoxStream<'static, ClientError>,
		account: u32,
		config: &SyncConfig,
		outbound: Outbound,
		stop: oneshot::Receiver<()>,
	) -> Self {
		Self {
			events: upstream_events(source, health, account),
			heartbeat: Heartbeat::new(
				account,
				Instant::now(),
				config.heartbeat_warmup,
				config.heartbeat_interval,
			),
			outbound,
			stop,
		}
	}

	pub(crate) async fn run(mut self) {
		info!("Notification watcher started");

		loop {
			let event = tokio::select! {
				biased;
				_ = &mut self.stop => break,
				Some(event) = self.events.next() => {
					if let NotificationEvent::AccountUpdate(_) = event {
						self.heartbeat.supersede(Instant::now());
					}
					event
				}
				_ = tokio::time::sleep_until(self.heartbeat.deadline()) => {
					debug!("Heartbeat account update");
					self.heartbeat.fire(Instant::now())
				}
			};

			if !self.deliver(event).await {
				break;
			}
		}

		info!("Notification watcher stopped");
	}

	/// Route an event to its consumer channel. Returns false if stopped while waiting for a
	/// reader.
	async fn deliver(&mut self, event: NotificationEvent) -> bool {
		let kind = event.kind();
		let stop = &mut self.stop;
		let outbound = &self.outbound;

		match event {
			NotificationEvent::AccountUpdate(n) => send(&outbound.accounts, n, stop, kind).await,
			NotificationEvent::TransactionUpdate(n) => {
				send(&outbound.transactions, n, stop, kind).await
			}
			NotificationEvent::SpentnessUpdate(n) => {
				send(&outbound.spentness, n, stop, kind).await
			}
			NotificationEvent::HealthError(err) => {
				if err.is_expected_shutdown() {
					debug!("Provider connection shut down");
				} else {
					warn!("Provider health error: {}", err);
				}
				send(&outbound.errors, err, stop, kind).await
			}
		}
	}
}

/// Hand `item` to a reader. Returns false if stopped before a reader took it.
async fn send<T>(
	tx: &mpsc::Sender<Handoff<T>>,
	item: T,
	stop: &mut oneshot::Receiver<()>,
	kind: &str,
) -> bool {
	let (ack_tx, ack_rx) = oneshot::channel();
	tokio::select! {
		biased;
		_ = &mut *stop => return false,
		result = tx.send((item, ack_tx)) => {
			if result.is_err() {
				debug!("No readers left for {} notifications", kind);
				return true;
			}
		}
	}

	tokio::select! {
		biased;
		_ = stop => false,
		_ = ack_rx => true,
	}
}
