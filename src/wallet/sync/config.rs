use crate::electrum::ClientConfig;

use std::time::Duration;

/// Lookahead window used by the address-discovery scan.
pub const RECOVERY_WINDOW: u32 = 250;

/// Timings of the sync service.
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Bound on establishing the provider connection
	pub connect_timeout: Duration,
	/// Delay before the first synthesized account update
	pub heartbeat_warmup: Duration,
	/// Interval of synthesized account updates after the warm-up one
	pub heartbeat_interval: Duration,
	/// Bound on each fee query
	pub request_timeout: Duration,
	/// Interval between keep-alive pings on the provider connection
	pub ping_interval: Duration,
	pub recovery_window: u32,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			connect_timeout: Duration::from_secs(10),
			heartbeat_warmup: Duration::from_secs(5),
			heartbeat_interval: Duration::from_secs(10),
			request_timeout: Duration::from_secs(10),
			ping_interval: Duration::from_secs(30),
			recovery_window: RECOVERY_WINDOW,
		}
	}
}

impl SyncConfig {
	/// Provider client settings derived from these timings.
	pub fn client_config(&self) -> ClientConfig {
		ClientConfig {
			request_timeout: self.request_timeout,
			ping_interval: self.ping_interval,
		}
	}
}
