pub mod keys;
pub mod notifications;
pub mod store;
pub mod sync;
pub mod types;

pub use notifications::*;
pub use store::{FileWalletStore, WalletStore};
pub use sync::{SyncConfig, WalletService};
pub use types::*;

use rand::Rng;

/// Random private passphrase, hex encoded, for wallets created without one.
pub fn generate_passphrase() -> String {
	let mut bytes = [0u8; 16];
	rand::rng().fill(&mut bytes);
	hex::encode(bytes)
}
