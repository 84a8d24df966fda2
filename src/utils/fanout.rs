//! One-to-many delivery of published items.
//!
//! Every subscriber gets its own unbounded queue, so a slow subscriber never blocks the
//! publisher and items are seen by each subscriber in publish order. Subscribers whose stream
//! has been dropped are pruned on the next publish.

use futures::stream::{self, BoxStream, StreamExt};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

pub struct Fanout<T> {
	subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T> Default for Fanout<T> {
	fn default() -> Self {
		Self {
			subscribers: Mutex::new(Vec::new()),
		}
	}
}

impl<T: Clone + Send + 'static> Fanout<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a new subscriber. The stream ends when the fan-out is closed or dropped.
	pub fn subscribe(&self) -> BoxStream<'static, T> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.lock().push(tx);
		stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
	}

	/// Deliver an item to every live subscriber, returning how many received it.
	pub fn publish(&self, item: T) -> usize {
		let mut subscribers = self.lock();
		subscribers.retain(|tx| tx.send(item.clone()).is_ok());
		subscribers.len()
	}

	/// End every subscriber stream.
	pub fn close(&self) {
		self.lock().clear();
	}

	pub fn subscriber_count(&self) -> usize {
		let mut subscribers = self.lock();
		subscribers.retain(|tx| !tx.is_closed());
		subscribers.len()
	}

	fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<T>>> {
		self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
