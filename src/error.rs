//! Client-level error types shared across the store, auth, and guard layers.

// self
use crate::_prelude::*;

/// Client-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical client error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, malformed envelopes).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Credentials were rejected or the token is no longer valid.
	#[error("Authentication failed: {reason}.")]
	Authentication {
		/// Server- or client-supplied reason string.
		reason: String,
	},
	/// The per-account request quota was exceeded.
	#[error("Request limit exceeded: {message}")]
	RateLimitExceeded {
		/// Server-supplied message.
		message: String,
	},
	/// The server rejected the request for any other reason.
	#[error("Server rejected the request: {message}")]
	Server {
		/// Server-supplied message, verbatim.
		message: String,
		/// Server-supplied error identifier, when present.
		error_id: Option<String>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The caller cancelled the call while it was waiting to retry.
	#[error("Call was cancelled during rate limit backoff.")]
	Cancelled,
}
impl Error {
	/// Builds a [`Error::Server`] carrying only a message.
	pub fn server(message: impl Into<String>) -> Self {
		Self::Server { message: message.into(), error_id: None, status: None }
	}

	/// Returns the server-supplied message for server-side rejections.
	pub fn server_message(&self) -> Option<&str> {
		match self {
			Self::RateLimitExceeded { message } | Self::Server { message, .. } => Some(message),
			Self::Authentication { reason } => Some(reason),
			_ => None,
		}
	}
}

/// Configuration and validation failures raised by the client.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Host or request URL cannot be parsed.
	#[error("URL `{url}` is invalid.")]
	InvalidUrl {
		/// Offending input.
		url: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A required option was never provided.
	#[error("Missing required option `{0}`.")]
	MissingOption(&'static str),
	/// Request limit quantity must be positive.
	#[error("Request limit quantity must be greater than zero.")]
	NonPositiveQuantity,
	/// Request limit window must be positive.
	#[error("Request limit window must be greater than zero seconds.")]
	NonPositiveWindow,
	/// Token lifetime must be positive when configured.
	#[error("Token lifetime must be positive.")]
	NonPositiveTokenLifetime,
	/// Header name or value cannot be sent.
	#[error("Header `{name}` is invalid.")]
	InvalidHeader {
		/// Offending header name.
		name: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO, envelope decoding).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the API.")]
	Io(#[from] std::io::Error),
	/// The API responded with JSON that does not follow the response envelope.
	#[error("API returned a malformed response envelope.")]
	Envelope {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The login exchange succeeded but carried no token.
	#[error("Login response did not contain a token.")]
	MissingToken,
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
