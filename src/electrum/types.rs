//! Types for the Electrum chain-data provider integration

use bdk_electrum::electrum_client::{self, HeaderNotification};
use bdk_wallet::bitcoin::BlockHash;
use bdk_wallet::bitcoin::block::Header;
use std::time::Duration;

/// Best block announced by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
	pub height: u32,
	pub header: Header,
}

impl BlockHeader {
	pub fn new(height: u32, header: Header) -> Self {
		Self { height, header }
	}

	pub fn block_hash(&self) -> BlockHash {
		self.header.block_hash()
	}
}

impl From<HeaderNotification> for BlockHeader {
	fn from(notification: HeaderNotification) -> Self {
		Self {
			height: notification.height as u32,
			header: notification.header,
		}
	}
}

/// Addresses found in use beyond the lookahead window by a discovery scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryResult {
	/// Newly discovered receive-chain addresses.
	pub external: u32,
	/// Newly discovered change-chain addresses.
	pub internal: u32,
}

/// Error types for provider connections and requests.
///
/// The type is `Clone` because health errors are fanned out to every subscriber of the
/// health stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
	#[error("IO error: {0}")]
	Io(String),

	#[error("JSON parse error: {0}")]
	Json(String),

	#[error("connection to {0} refused")]
	Refused(String),

	#[error("connection timed out after {0:?}")]
	ConnectionTimeout(Duration),

	#[error("request {0} timed out")]
	RequestTimeout(String),

	#[error("server error {code}: {message}")]
	Rpc { code: i64, message: String },

	#[error("ping failed: {0}")]
	PingFailed(String),

	#[error("connection lost: {0}")]
	Disconnected(String),

	#[error("invalid response: {0}")]
	InvalidResponse(String),

	/// Raised when the connection was closed on purpose. Consumers treat it as part of a
	/// stop or restart, not as an operational fault.
	#[error("server shutdown")]
	ServerShutdown,
}

impl ClientError {
	pub fn is_expected_shutdown(&self) -> bool {
		matches!(self, ClientError::ServerShutdown)
	}
}

impl From<electrum_client::Error> for ClientError {
	fn from(err: electrum_client::Error) -> Self {
		match err {
			electrum_client::Error::IOError(e) => ClientError::Io(e.to_string()),
			electrum_client::Error::SharedIOError(e) => ClientError::Io(e.to_string()),
			electrum_client::Error::JSON(e) => ClientError::Json(e.to_string()),
			electrum_client::Error::Protocol(value) => ClientError::Rpc {
				code: value.get("code").and_then(|code| code.as_i64()).unwrap_or_default(),
				message: value
					.get("message")
					.and_then(|message| message.as_str())
					.map(str::to_string)
					.unwrap_or_else(|| value.to_string()),
			},
			other => ClientError::InvalidResponse(other.to_string()),
		}
	}
}

/// True when the connection attempt behind `err` was actively refused.
pub(crate) fn is_refused(err: &electrum_client::Error) -> bool {
	match err {
		electrum_client::Error::IOError(e) => e.kind() == std::io::ErrorKind::ConnectionRefused,
		electrum_client::Error::AllAttemptsErrored(errors) => errors.iter().any(is_refused),
		_ => false,
	}
}
