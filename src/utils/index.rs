use thiserror::Error;

/// Smallest units per coin.
pub const COIN_DECIMALS: u32 = 8;

pub fn format_coin_amount(amount: u64, decimals: u32) -> String {
	format!(
		"{:.*}",
		decimals as usize,
		amount as f64 / 10f64.powi(decimals as i32)
	)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
	#[error("empty server address")]
	Empty,

	#[error("unsupported scheme '{0}'")]
	UnsupportedScheme(String),

	#[error("invalid port in '{0}'")]
	InvalidPort(String),

	#[error("missing host in '{0}'")]
	MissingHost(String),
}

/// Normalise a server address into `host:port`.
///
/// Accepts `host`, `host:port`, `tcp://host[:port]` and bracketed IPv6 literals. The
/// default port is appended when none is given.
pub fn normalize_endpoint(input: &str, default_port: u16) -> Result<String, EndpointError> {
	let trimmed = input.trim().trim_end_matches('/');
	if trimmed.is_empty() {
		return Err(EndpointError::Empty);
	}

	let rest = match trimmed.split_once("://") {
		Some(("tcp", rest)) => rest,
		Some((scheme, _)) => return Err(EndpointError::UnsupportedScheme(scheme.to_string())),
		None => trimmed,
	};

	let (host, port) = if let Some(stripped) = rest.strip_prefix('[') {
		let (host, tail) = stripped
			.split_once(']')
			.ok_or_else(|| EndpointError::MissingHost(input.to_string()))?;
		let port = match tail.strip_prefix(':') {
			Some(port) => Some(port),
			None if tail.is_empty() => None,
			None => return Err(EndpointError::InvalidPort(input.to_string())),
		};
		(format!("[{}]", host), port)
	} else {
		match rest.rsplit_once(':') {
			Some((host, port)) => (host.to_string(), Some(port)),
			None => (rest.to_string(), None),
		}
	};

	if host.is_empty() || host == "[]" {
		return Err(EndpointError::MissingHost(input.to_string()));
	}

	let port = match port {
		Some(port) => match port.parse::<u16>() {
			Ok(0) | Err(_) => return Err(EndpointError::InvalidPort(input.to_string())),
			Ok(port) => port,
		},
		None => default_port,
	};

	Ok(format!("{}:{}", host, port))
}
