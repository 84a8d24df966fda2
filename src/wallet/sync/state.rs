use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// Phase of the sync service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceState {
	Idle = 0,
	Connecting = 1,
	/// Session active with a running watcher
	Watching = 2,
	/// Session active without a watcher, used by recovery
	Connected = 3,
	Stopping = 4,
}

impl ServiceState {
	fn from_u8(value: u8) -> Self {
		match value {
			1 => ServiceState::Connecting,
			2 => ServiceState::Watching,
			3 => ServiceState::Connected,
			4 => ServiceState::Stopping,
			_ => ServiceState::Idle,
		}
	}
}

/// Sync flag and phase. Read from anywhere without blocking; written only by the service's
/// lifecycle code.
#[derive(Debug, Default)]
pub struct SyncState {
	synced: AtomicBool,
	phase: AtomicU8,
}

impl SyncState {
	pub fn is_synced(&self) -> bool {
		self.synced.load(Ordering::Acquire)
	}

	pub fn phase(&self) -> ServiceState {
		ServiceState::from_u8(self.phase.load(Ordering::Acquire))
	}

	pub(crate) fn set_synced(&self, synced: bool) {
		self.synced.store(synced, Ordering::Release);
	}

	pub(crate) fn set_phase(&self, phase: ServiceState) {
		self.phase.store(phase as u8, Ordering::Release);
	}
}

/// Counts watcher tasks. `peak` above one would mean two watchers wrote to the consumer
/// channels at the same time.
#[derive(Debug, Default)]
pub struct WatcherGauge {
	active: AtomicUsize,
	started: AtomicUsize,
	peak: AtomicUsize,
}

impl WatcherGauge {
	pub fn active(&self) -> usize {
		self.active.load(Ordering::SeqCst)
	}

	pub fn started(&self) -> usize {
		self.started.load(Ordering::SeqCst)
	}

	pub fn peak(&self) -> usize {
		self.peak.load(Ordering::SeqCst)
	}

	pub(crate) fn enter(self: &Arc<Self>) -> WatcherGuard {
		let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
		self.started.fetch_add(1, Ordering::SeqCst);
		self.peak.fetch_max(active, Ordering::SeqCst);
		WatcherGuard(self.clone())
	}
}

/// Held by a running watcher task.
pub(crate) struct WatcherGuard(Arc<WatcherGauge>);

impl Drop for WatcherGuard {
	fn drop(&mut self) {
		self.0.active.fetch_sub(1, Ordering::SeqCst);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn gauge_tracks_active_and_peak() {
		let gauge = Arc::new(WatcherGauge::default());
		let first = gauge.enter();
		drop(first);
		let _second = gauge.enter();

		assert_eq!(gauge.active(), 1);
		assert_eq!(gauge.started(), 2);
		assert_eq!(gauge.peak(), 1);
	}

	#[test]
	fn state_starts_idle_and_unsynced() {
		let state = SyncState::default();
		assert!(!state.is_synced());
		assert_eq!(state.phase(), ServiceState::Idle);

		state.set_phase(ServiceState::Watching);
		assert_eq!(state.phase(), ServiceState::Watching);
	}
}
