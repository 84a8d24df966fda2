//! Wallet notification payloads and the in-process notification server.
//!
//! The wallet storage publishes account, transaction and spentness changes here. Each
//! subscription is an independent stream that yields notifications in publish order.

use crate::utils::Fanout;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// An account's key counts changed, or a balance refresh is due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountNotification {
	pub account_number: u32,
	pub account_name: String,
	pub external_key_count: u32,
	pub internal_key_count: u32,
}

impl AccountNotification {
	/// Refresh notice carrying only the account number.
	pub fn refresh(account_number: u32) -> Self {
		Self {
			account_number,
			account_name: String::new(),
			external_key_count: 0,
			internal_key_count: 0,
		}
	}
}

/// Block attached to the main chain together with the wallet transactions it mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedBlock {
	pub height: u32,
	pub hash: String,
	pub transactions: Vec<String>,
}

/// Transaction-set changes relevant to the wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionNotifications {
	pub attached_blocks: Vec<AttachedBlock>,
	/// Hashes of blocks removed by a reorganisation.
	pub detached_blocks: Vec<String>,
	/// Transaction ids entering the mempool.
	pub unmined_transactions: Vec<String>,
}

/// A previously unspent output of an account changed spentness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentnessNotification {
	pub account: u32,
	/// Output reference in `txid:vout` form.
	pub outpoint: String,
	/// Spending transaction, `None` when the output became unspent again.
	pub spender: Option<String>,
}

/// Source of wallet notifications.
pub trait NotificationSource: Send + Sync {
	fn account_updates(&self) -> BoxStream<'static, AccountNotification>;

	fn transaction_updates(&self) -> BoxStream<'static, TransactionNotifications>;

	/// Spentness changes for the outputs of `account` only.
	fn spentness_updates(&self, account: u32) -> BoxStream<'static, SpentnessNotification>;
}

/// Notification hub owned by the wallet storage.
#[derive(Default)]
pub struct NotificationServer {
	accounts: Fanout<AccountNotification>,
	transactions: Fanout<TransactionNotifications>,
	spentness: Fanout<SpentnessNotification>,
}

impl NotificationServer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn notify_account(&self, notification: AccountNotification) {
		self.accounts.publish(notification);
	}

	pub fn notify_transactions(&self, notification: TransactionNotifications) {
		self.transactions.publish(notification);
	}

	pub fn notify_spentness(&self, notification: SpentnessNotification) {
		self.spentness.publish(notification);
	}
}

impl NotificationSource for NotificationServer {
	fn account_updates(&self) -> BoxStream<'static, AccountNotification> {
		self.accounts.subscribe()
	}

	fn transaction_updates(&self) -> BoxStream<'static, TransactionNotifications> {
		self.transactions.subscribe()
	}

	fn spentness_updates(&self, account: u32) -> BoxStream<'static, SpentnessNotification> {
		self.spentness
			.subscribe()
			.filter(move |n| futures::future::ready(n.account == account))
			.boxed()
	}
}
