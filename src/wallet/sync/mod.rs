//! Wallet Synchronization Module
//!
//! Keeps a wallet in step with the chain-data provider. It is composed of several submodules:
//!
//! - `service`: The lifecycle controller. Starts and stops sync sessions and exposes the wallet
//!   operations front ends use.
//! - `watcher`: The notification watcher and the consumer channels it writes to.
//! - `events`: Notification event types, the upstream merge and the heartbeat scheduler.
//! - `state`: The sync flag, service phase and watcher counters.
//! - `recovery`: The address-discovery scan and address provisioning.
//! - `config`: Timings of the service.
//!
//! A session pairs one provider connection with at most one watcher. Starting a session always
//! joins the previous watcher first, so the consumer channels only ever have one writer.

/// Service timings
pub mod config;
/// Notification events and heartbeat scheduling
pub mod events;
/// Address recovery
mod recovery;
/// Session lifecycle and wallet operations
pub mod service;
/// Sync flag and watcher counters
pub mod state;
/// Notification watcher and consumer channels
pub mod watcher;

pub use config::{RECOVERY_WINDOW, SyncConfig};
pub use events::NotificationEvent;
pub use service::WalletService;
pub use state::{ServiceState, WatcherGauge};
pub use watcher::{ConsumerChannel, Watch};
