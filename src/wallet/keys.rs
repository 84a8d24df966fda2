//! Key derivation for the wallet's single account.
//!
//! The seed is used directly as the BIP32 master seed. Its BIP39 mnemonic is just another
//! encoding of the same bytes, so restoring from words or from hex yields the same wallet.

use crate::wallet::types::*;

use bdk_wallet::KeychainKind;
use bdk_wallet::bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bdk_wallet::bitcoin::secp256k1::Secp256k1;
use bdk_wallet::descriptor::ExtendedDescriptor;
use bdk_wallet::keys::bip39::{Language, Mnemonic};
use std::str::FromStr;

impl Network {
	pub fn chain(&self) -> bdk_wallet::bitcoin::Network {
		match self {
			Network::Mainnet => bdk_wallet::bitcoin::Network::Bitcoin,
			Network::Testnet => bdk_wallet::bitcoin::Network::Testnet,
			Network::Regtest => bdk_wallet::bitcoin::Network::Regtest,
		}
	}
}

impl From<Branch> for KeychainKind {
	fn from(branch: Branch) -> Self {
		match branch {
			Branch::External => KeychainKind::External,
			Branch::Internal => KeychainKind::Internal,
		}
	}
}

impl From<KeychainKind> for Branch {
	fn from(keychain: KeychainKind) -> Self {
		match keychain {
			KeychainKind::External => Branch::External,
			KeychainKind::Internal => Branch::Internal,
		}
	}
}

/// Reject seeds that are not valid BIP39 entropy.
pub fn validate_seed_len(len: usize) -> Result<(), WalletError> {
	if !(MIN_SEED_BYTES..=MAX_SEED_BYTES).contains(&len) || len % SEED_BYTES_STEP != 0 {
		return Err(WalletError::InvalidSeed(format!(
			"seed length must be a multiple of {} between {} and {} bytes, got {}",
			SEED_BYTES_STEP, MIN_SEED_BYTES, MAX_SEED_BYTES, len
		)));
	}
	Ok(())
}

/// Extended public key of `m/purpose'/coin'/account'`.
pub fn account_xpub(
	seed: &[u8],
	network: Network,
	scope: KeyScope,
	account: u32,
) -> Result<Xpub, WalletError> {
	let secp = Secp256k1::new();
	let derivation = |e: bdk_wallet::bitcoin::bip32::Error| WalletError::Derivation(e.to_string());

	let master = Xpriv::new_master(network.chain(), seed).map_err(derivation)?;
	let path = [
		ChildNumber::from_hardened_idx(scope.purpose).map_err(derivation)?,
		ChildNumber::from_hardened_idx(scope.coin).map_err(derivation)?,
		ChildNumber::from_hardened_idx(account).map_err(derivation)?,
	];
	let account_key = master.derive_priv(&secp, &path).map_err(derivation)?;
	Ok(Xpub::from_priv(&secp, &account_key))
}

/// Extended public key of one branch below an account key.
pub fn branch_xpub(account_xpub: &str, branch: Branch) -> Result<Xpub, WalletError> {
	let secp = Secp256k1::verification_only();
	let xpub = Xpub::from_str(account_xpub).map_err(|e| WalletError::Derivation(e.to_string()))?;
	xpub.derive_pub(
		&secp,
		&[ChildNumber::Normal {
			index: branch.index(),
		}],
	)
	.map_err(|e| WalletError::Derivation(e.to_string()))
}

/// Output descriptor covering every address of `branch`.
///
/// Purpose 84 maps to native segwit, 49 to nested segwit and anything else to legacy P2PKH.
pub fn branch_descriptor(
	scope: KeyScope,
	account_xpub: &str,
	branch: Branch,
) -> Result<ExtendedDescriptor, WalletError> {
	let keys = format!("{}/{}/*", account_xpub, branch.index());
	let descriptor = match scope.purpose {
		84 => format!("wpkh({})", keys),
		49 => format!("sh(wpkh({}))", keys),
		_ => format!("pkh({})", keys),
	};
	ExtendedDescriptor::from_str(&descriptor).map_err(|e| WalletError::Derivation(e.to_string()))
}

/// Mnemonic words encoding `seed`.
pub fn seed_words(seed: &[u8]) -> Result<Vec<String>, WalletError> {
	validate_seed_len(seed.len())?;
	let mnemonic =
		Mnemonic::from_entropy(seed).map_err(|e| WalletError::InvalidSeed(e.to_string()))?;
	Ok(mnemonic
		.to_string()
		.split_whitespace()
		.map(str::to_string)
		.collect())
}

/// Seed bytes encoded by English mnemonic `words`.
pub fn seed_from_words(words: &str) -> Result<Vec<u8>, WalletError> {
	let mnemonic = Mnemonic::parse_in(Language::English, words)
		.map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
	Ok(mnemonic.to_entropy())
}
