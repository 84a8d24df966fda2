//! Event types for the notification watcher.
//!
//! Every upstream source (account, transaction and spentness subscriptions plus the provider's
//! health stream) is mapped into a single `NotificationEvent` queue. The heartbeat scheduler
//! synthesizes account updates into the same loop so balance consumers stay live when the
//! provider is quiet.

use crate::electrum::ClientError;
use crate::wallet::notifications::{
	AccountNotification, NotificationSource, SpentnessNotification, TransactionNotifications,
};

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::time::Duration;
use tokio::time::Instant;

/// A notification routed to exactly one consumer channel.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
	/// Account key counts changed, or a balance refresh is due
	AccountUpdate(AccountNotification),
	/// Blocks attached or detached, or unmined transactions seen
	TransactionUpdate(TransactionNotifications),
	/// An output of the watched account changed spentness
	SpentnessUpdate(SpentnessNotification),
	/// Asynchronous fault reported by the provider connection
	HealthError(ClientError),
}

impl NotificationEvent {
	pub fn kind(&self) -> &'static str {
		match self {
			NotificationEvent::AccountUpdate(_) => "account",
			NotificationEvent::TransactionUpdate(_) => "transaction",
			NotificationEvent::SpentnessUpdate(_) => "spentness",
			NotificationEvent::HealthError(_) => "error",
		}
	}
}

/// Merge all upstream sources into one event stream.
///
/// Events of a single source keep their order; no order is kept across sources.
pub fn upstream_events(
	source: &dyn NotificationSource,
	health: BoxStream<'static, ClientError>,
	account: u32,
) -> BoxStream<'static, NotificationEvent> {
	stream::select_all(vec![
		source
			.account_updates()
			.map(NotificationEvent::AccountUpdate)
			.boxed(),
		source
			.transaction_updates()
			.map(NotificationEvent::TransactionUpdate)
			.boxed(),
		source
			.spentness_updates(account)
			.map(NotificationEvent::SpentnessUpdate)
			.boxed(),
		health.map(NotificationEvent::HealthError).boxed(),
	])
	.boxed()
}

/// Scheduler entry for synthesized account updates: one after the warm-up delay, then one per
/// interval unless a real account update arrived in the meantime.
#[derive(Debug)]
pub struct Heartbeat {
	account: u32,
	next: Instant,
	interval: Duration,
	warmed_up: bool,
}

impl Heartbeat {
	pub fn new(account: u32, start: Instant, warmup: Duration, interval: Duration) -> Self {
		Self {
			account,
			next: start + warmup,
			interval,
			warmed_up: false,
		}
	}

	pub fn deadline(&self) -> Instant {
		self.next
	}

	/// Produce the synthesized update and schedule the next one.
	pub fn fire(&mut self, now: Instant) -> NotificationEvent {
		self.warmed_up = true;
		self.next = now + self.interval;
		NotificationEvent::AccountUpdate(AccountNotification::refresh(self.account))
	}

	/// A real account update replaces the pending synthesized one. The warm-up update is
	/// always delivered.
	pub fn supersede(&mut self, now: Instant) {
		if self.warmed_up {
			self.next = now + self.interval;
		}
	}
}
