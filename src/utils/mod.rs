//!
//! Utility module for the wallet client.
//!
//! Formatting helpers, endpoint normalisation and the subscription fan-out shared by the
//! notification server and the Electrum client.
/// Fan-out of one publisher to many subscriber streams
pub mod fanout;
/// Utility functions for formatting and endpoint handling
pub mod index;

pub use fanout::Fanout;
pub use index::{COIN_DECIMALS, EndpointError, format_coin_amount, normalize_endpoint};
