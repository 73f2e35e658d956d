//! Verb-level entry points over the rate limit guard.

// crates.io
use serde_json::Value;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::{AuthClient, LoginMetrics},
	config::ClientConfig,
	error::ConfigError,
	guard::{RateLimitGuard, Sleeper},
	http::{ApiRequest, ApiResponse, HttpMethod, Transport},
	store::TokenStore,
};
#[cfg(feature = "reqwest")] use crate::{guard::TokioSleeper, http::ReqwestTransport};

/// AppNexus API client.
///
/// Every verb logs in lazily, reuses the cached token, refreshes it once when the server rejects
/// it, and retries once after a full window when the request quota is exhausted.
#[derive(Clone, Debug)]
pub struct ApiClient {
	guard: RateLimitGuard,
}
impl ApiClient {
	/// Builds a client that talks to the configured host over reqwest.
	#[cfg(feature = "reqwest")]
	pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
		let transport = ReqwestTransport::new(config.credentials.host.base_url()?)?;

		Self::with_transport(config, Arc::new(transport), Arc::new(TokioSleeper))
	}

	/// Builds a client over custom transport and sleeper implementations.
	pub fn with_transport(
		config: ClientConfig,
		transport: Arc<dyn Transport>,
		sleeper: Arc<dyn Sleeper>,
	) -> Result<Self, ConfigError> {
		let auth = AuthClient::from_config(&config, transport)?;

		Ok(Self { guard: RateLimitGuard::with_sleeper(auth, config.rate_limit, sleeper) })
	}

	/// Builds a client whose tokens live in an explicitly shared store instead of the configured one.
	pub fn with_store(
		config: ClientConfig,
		store: Arc<dyn TokenStore>,
		transport: Arc<dyn Transport>,
		sleeper: Arc<dyn Sleeper>,
	) -> Result<Self, ConfigError> {
		let auth = AuthClient::new(config.credentials, store, transport)?
			.with_token_lifetime(config.token_lifetime);

		Ok(Self { guard: RateLimitGuard::with_sleeper(auth, config.rate_limit, sleeper) })
	}

	/// Issues a `GET` without a body.
	pub async fn get<I, K, V>(&self, url: impl Into<String>, headers: I) -> Result<ApiResponse>
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.send(ApiRequest::new(HttpMethod::Get, url).with_headers(headers)).await
	}

	/// Issues a `POST` with a JSON body.
	pub async fn post<I, K, V>(
		&self,
		url: impl Into<String>,
		body: Value,
		headers: I,
	) -> Result<ApiResponse>
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.send(ApiRequest::new(HttpMethod::Post, url).with_body(body).with_headers(headers)).await
	}

	/// Issues a `PUT` with a JSON body.
	pub async fn put<I, K, V>(
		&self,
		url: impl Into<String>,
		body: Value,
		headers: I,
	) -> Result<ApiResponse>
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.send(ApiRequest::new(HttpMethod::Put, url).with_body(body).with_headers(headers)).await
	}

	/// Issues a `DELETE`; `body` may be [`Value::Null`].
	pub async fn delete<I, K, V>(
		&self,
		url: impl Into<String>,
		body: Value,
		headers: I,
	) -> Result<ApiResponse>
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.send(ApiRequest::new(HttpMethod::Delete, url).with_body(body).with_headers(headers))
			.await
	}

	/// Sends a prepared request through the guard.
	pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
		self.guard.guarded_call(request).await
	}

	/// Sends a prepared request; firing `cancel` during a quota backoff yields [`Error::Cancelled`].
	pub async fn send_with_cancel(
		&self,
		request: ApiRequest,
		cancel: CancellationToken,
	) -> Result<ApiResponse> {
		self.guard.guarded_call_with_cancel(request, cancel).await
	}

	/// Drops the cached token.
	pub async fn logout(&self) -> Result<()> {
		self.guard.auth().logout().await
	}

	/// Login counters for this client and its clones.
	pub fn login_metrics(&self) -> &LoginMetrics {
		&self.guard.auth().login_metrics
	}

	/// Underlying rate limit guard.
	pub fn guard(&self) -> &RateLimitGuard {
		&self.guard
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::{
		_preludet::*,
		auth::TokenRecord,
		config::{Host, RateLimitPolicy},
		http::AUTHORIZATION_HEADER,
		store::{MemoryStore, StoreKey},
	};

	fn config() -> ClientConfig {
		ClientConfig::builder()
			.username("api-user")
			.password("api-pass")
			.request_limit_quantity(5)
			.request_limit_seconds(2)
			.build()
			.expect("Configuration should build.")
	}

	fn client(transport: &ScriptedTransport) -> (ApiClient, RecordingSleeper) {
		let sleeper = RecordingSleeper::default();
		let client = ApiClient::with_transport(
			config(),
			Arc::new(transport.clone()),
			Arc::new(sleeper.clone()),
		)
		.expect("Client should build.");

		(client, sleeper)
	}

	#[tokio::test]
	async fn verbs_forward_method_body_and_headers() {
		let transport = ScriptedTransport::default();
		let (client, _) = client(&transport);

		client.get("campaign?id=1", [("X-Trace", "a")]).await.expect("GET should succeed.");
		client
			.post("campaign", json!({ "campaign": { "name": "x" } }), [("X-Trace", "b")])
			.await
			.expect("POST should succeed.");
		client
			.put(
				"campaign?id=1",
				json!({ "campaign": { "state": "active" } }),
				Vec::<(String, String)>::new(),
			)
			.await
			.expect("PUT should succeed.");
		client
			.delete("campaign?id=1", Value::Null, Vec::<(String, String)>::new())
			.await
			.expect("DELETE should succeed.");

		let requests = transport.requests();
		let calls = &requests[1..];

		assert_eq!(
			calls.iter().map(|r| r.method).collect::<Vec<_>>(),
			vec![HttpMethod::Get, HttpMethod::Post, HttpMethod::Put, HttpMethod::Delete]
		);
		assert!(calls[0].body.is_null());
		assert_eq!(calls[0].headers.get("X-Trace").map(String::as_str), Some("a"));
		assert_eq!(calls[1].body["campaign"]["name"], "x");
		assert_eq!(calls[2].url, "campaign?id=1");
		assert!(calls.iter().all(|r| {
			r.headers.get(AUTHORIZATION_HEADER).map(String::as_str) == Some("token-1")
		}));
		assert_eq!(client.login_metrics().successes(), 1);
	}

	#[tokio::test]
	async fn caller_authorization_headers_are_replaced_by_the_token() {
		let transport = ScriptedTransport::default();
		let (client, _) = client(&transport);
		let response = client
			.get("member", [("authorization", "caller-value")])
			.await
			.expect("GET should succeed.");
		let call = transport.requests().pop().expect("Call should be recorded.");

		assert_eq!(response.str_field("token_seen"), Some("token-1"));
		assert_eq!(call.headers.len(), 1);
		assert_eq!(call.header("Authorization"), Some("token-1"));
	}

	#[tokio::test]
	async fn quota_backoff_uses_the_configured_window() {
		let transport = ScriptedTransport::default();
		let (client, sleeper) = client(&transport);
		let policy = RateLimitPolicy::new(5, 2).expect("Policy should build.");

		transport.push_call(Err(Error::server(policy.detection_message())));
		client.get("member", Vec::<(String, String)>::new()).await.expect("Retry should succeed.");

		assert_eq!(sleeper.waits(), vec![Duration::seconds(2)]);
	}

	#[tokio::test]
	async fn explicit_store_is_shared_between_clients() {
		let transport = ScriptedTransport::default();
		let store = Arc::new(MemoryStore::default());
		let key = StoreKey::new("api-user", Host::TESTING_URL);
		let record = TokenRecord::builder()
			.token("shared")
			.issued_at(OffsetDateTime::now_utc())
			.build()
			.expect("Record should build.");

		store.save(&key, record).await.expect("Seed should succeed.");

		let client = ApiClient::with_store(
			config(),
			store.clone(),
			Arc::new(transport.clone()),
			Arc::new(RecordingSleeper::default()),
		)
		.expect("Client should build.");
		let response = client
			.send(ApiRequest::new(HttpMethod::Get, "member"))
			.await
			.expect("Call should succeed.");

		assert_eq!(response.str_field("token_seen"), Some("shared"));
		assert_eq!(transport.logins(), 0);

		client.logout().await.expect("Logout should succeed.");

		assert!(store.is_empty());
	}
}
