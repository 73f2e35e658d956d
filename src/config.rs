//! Immutable client configuration: credentials, host, storage selection, and quota policy.

pub mod host;
pub mod policy;

pub use host::Host;
pub use policy::RateLimitPolicy;

// self
use crate::{
	_prelude::*,
	auth::Secret,
	error::ConfigError,
	store::{StorageSettings, StoreKey},
};

/// Account credentials bound to one host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
	/// API username.
	pub username: String,
	/// API password; redacted in debug output.
	pub password: Secret,
	/// API host.
	pub host: Host,
}
impl Credentials {
	/// Creates credentials for the provided account and host.
	pub fn new(username: impl Into<String>, password: impl Into<Secret>, host: Host) -> Self {
		Self { username: username.into(), password: password.into(), host }
	}

	/// Key identifying this account's token in a [`TokenStore`](crate::store::TokenStore).
	pub fn store_key(&self) -> Result<StoreKey, ConfigError> {
		Ok(StoreKey::new(self.username.as_str(), self.host.base_url()?.as_str()))
	}
}

/// Full client configuration; immutable once built.
#[derive(Clone, Debug)]
pub struct ClientConfig {
	/// Account credentials and host.
	pub credentials: Credentials,
	/// Token store selection.
	pub storage: StorageSettings,
	/// Request quota policy.
	pub rate_limit: RateLimitPolicy,
	/// Lifetime stamped on freshly issued tokens; `None` trusts the server alone.
	pub token_lifetime: Option<Duration>,
}
impl ClientConfig {
	/// Tokens issued by the API stay valid for two hours.
	pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::hours(2);

	/// Returns a builder with the documented defaults.
	pub fn builder() -> ClientConfigBuilder {
		ClientConfigBuilder::default()
	}
}

/// Builder for [`ClientConfig`].
#[derive(Clone, Debug)]
pub struct ClientConfigBuilder {
	username: Option<String>,
	password: Option<Secret>,
	host: Host,
	storage: StorageSettings,
	request_limit_quantity: u32,
	request_limit_seconds: u64,
	request_limit_message: Option<String>,
	token_lifetime: Option<Duration>,
}
impl Default for ClientConfigBuilder {
	fn default() -> Self {
		Self {
			username: None,
			password: None,
			host: Host::default(),
			storage: StorageSettings::default(),
			request_limit_quantity: RateLimitPolicy::DEFAULT_QUANTITY,
			request_limit_seconds: RateLimitPolicy::DEFAULT_WINDOW_SECONDS,
			request_limit_message: None,
			token_lifetime: Some(ClientConfig::DEFAULT_TOKEN_LIFETIME),
		}
	}
}
impl ClientConfigBuilder {
	/// Sets the API username.
	pub fn username(mut self, username: impl Into<String>) -> Self {
		self.username = Some(username.into());

		self
	}

	/// Sets the API password.
	pub fn password(mut self, password: impl Into<Secret>) -> Self {
		self.password = Some(password.into());

		self
	}

	/// Sets the API host.
	pub fn host(mut self, host: Host) -> Self {
		self.host = host;

		self
	}

	/// Selects the token store.
	pub fn storage(mut self, storage: StorageSettings) -> Self {
		self.storage = storage;

		self
	}

	/// Requests allowed per window (default 100).
	pub fn request_limit_quantity(mut self, quantity: u32) -> Self {
		self.request_limit_quantity = quantity;

		self
	}

	/// Window length in seconds (default 60).
	pub fn request_limit_seconds(mut self, seconds: u64) -> Self {
		self.request_limit_seconds = seconds;

		self
	}

	/// Overrides the quota rejection template.
	pub fn request_limit_message(mut self, template: impl Into<String>) -> Self {
		self.request_limit_message = Some(template.into());

		self
	}

	/// Overrides the token lifetime; `None` disables local expiry.
	pub fn token_lifetime(mut self, lifetime: Option<Duration>) -> Self {
		self.token_lifetime = lifetime;

		self
	}

	/// Validates the options and produces a [`ClientConfig`].
	pub fn build(self) -> Result<ClientConfig, ConfigError> {
		let username = self.username.ok_or(ConfigError::MissingOption("username"))?;
		let password = self.password.ok_or(ConfigError::MissingOption("password"))?;

		if username.is_empty() {
			return Err(ConfigError::MissingOption("username"));
		}
		if self.token_lifetime.is_some_and(|lifetime| !lifetime.is_positive()) {
			return Err(ConfigError::NonPositiveTokenLifetime);
		}

		// Fail fast on hosts that cannot form a base URL.
		self.host.base_url()?;

		let mut rate_limit =
			RateLimitPolicy::new(self.request_limit_quantity, self.request_limit_seconds)?;

		if let Some(template) = self.request_limit_message {
			rate_limit = rate_limit.with_message_template(template);
		}

		Ok(ClientConfig {
			credentials: Credentials::new(username, password, self.host),
			storage: self.storage,
			rate_limit,
			token_lifetime: self.token_lifetime,
		})
	}
}
