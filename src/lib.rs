//! Command-line wallet client core: Electrum connection management, wallet storage and the
//! sync service that multiplexes wallet notifications to front ends.

/// Connection manager for the Electrum chain-data provider
pub mod electrum;
/// Formatting, endpoint and fan-out helpers
pub mod utils;
/// Wallet storage, notifications and synchronization
pub mod wallet;
