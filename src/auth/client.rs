//! Authenticated calls with lazy login, singleflight guards, and one-shot token refresh.
//!
//! [`AuthClient::call`] guarantees that every outbound request carries a token. The token is read
//! from the shared [`TokenStore`]; when it is missing the client performs the login exchange and
//! publishes the new token with a compare-and-swap so that concurrent clients converge on one
//! token. When the server rejects a cached token the client clears it, logs in once more, and
//! retries the request exactly once. The client never retries anything else.

// crates.io
use serde_json::json;
// self
use crate::{
	_prelude::*,
	auth::{LoginMetrics, TokenRecord, TokenRecordBuilderError, TokenSecret},
	config::{ClientConfig, Credentials},
	error::{ConfigError, TransportError},
	http::{AUTHORIZATION_HEADER, ApiRequest, ApiResponse, HttpMethod, Transport},
	obs::{self, CallOutcome, CallSpan, CallStage},
	store::{CompareAndSwapOutcome, StoreKey, TokenStore},
};

/// Path of the login exchange, relative to the host.
pub const LOGIN_PATH: &str = "auth";

/// Error identifier the API returns for rejected credentials.
const UNAUTH: &str = "UNAUTH";

/// Token obtained for one call and whether it predates the call.
struct AcquiredToken {
	record: TokenRecord,
	cached: bool,
}

/// Client that attaches a valid token to every call.
///
/// Clones share the store, transport, metrics, and login guard.
#[derive(Clone)]
pub struct AuthClient {
	/// Transport used for the login exchange and every call.
	pub transport: Arc<dyn Transport>,
	/// Token cache, possibly shared with other clients.
	pub store: Arc<dyn TokenStore>,
	/// Counters for login exchanges.
	pub login_metrics: Arc<LoginMetrics>,
	credentials: Credentials,
	key: StoreKey,
	token_lifetime: Option<Duration>,
	login_guard: Arc<AsyncMutex<()>>,
}
impl AuthClient {
	/// Creates a client over explicit collaborators.
	pub fn new(
		credentials: Credentials,
		store: Arc<dyn TokenStore>,
		transport: Arc<dyn Transport>,
	) -> Result<Self, ConfigError> {
		let key = credentials.store_key()?;

		Ok(Self {
			transport,
			store,
			login_metrics: Default::default(),
			credentials,
			key,
			token_lifetime: Some(ClientConfig::DEFAULT_TOKEN_LIFETIME),
			login_guard: Default::default(),
		})
	}

	/// Creates a client from a full configuration, building the configured store.
	pub fn from_config(
		config: &ClientConfig,
		transport: Arc<dyn Transport>,
	) -> Result<Self, ConfigError> {
		Ok(Self::new(config.credentials.clone(), config.storage.build(), transport)?
			.with_token_lifetime(config.token_lifetime))
	}

	/// Overrides the lifetime stamped on fresh tokens.
	pub fn with_token_lifetime(mut self, lifetime: Option<Duration>) -> Self {
		self.token_lifetime = lifetime;

		self
	}

	/// Key under which this client's token is cached.
	pub fn store_key(&self) -> &StoreKey {
		&self.key
	}

	/// Account credentials.
	pub fn credentials(&self) -> &Credentials {
		&self.credentials
	}

	/// Performs `request` with a valid token, refreshing a server-rejected cached token once.
	pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse> {
		const STAGE: CallStage = CallStage::Call;

		let span = CallSpan::new(STAGE, "auth_call");

		obs::record_call_outcome(STAGE, CallOutcome::Attempt);

		let result = span
			.instrument(async move {
				let acquired = self.acquire_token(None).await?;

				match self.send(&request, &acquired.record).await {
					Err(Error::Authentication { reason }) if acquired.cached => {
						self.login_metrics.record_invalidation();
						obs::warn_event(STAGE, "Cached token was rejected; logging in again.", &reason);
						obs::record_call_outcome(STAGE, CallOutcome::Retry);

						let fresh = self.acquire_token(Some(&acquired.record.token)).await?;

						self.send(&request, &fresh.record).await
					},
					result => result,
				}
			})
			.await;

		obs::record_result(STAGE, &result);

		result
	}

	/// Returns the cached token, if any, without logging in.
	pub async fn cached_token(&self) -> Result<Option<TokenRecord>> {
		Ok(self.store.load(&self.key).await?)
	}

	/// Drops the cached token so the next call logs in again.
	pub async fn logout(&self) -> Result<()> {
		Ok(self.store.clear(&self.key).await?)
	}

	async fn send(&self, request: &ApiRequest, record: &TokenRecord) -> Result<ApiResponse> {
		let signed = request.clone().with_header(AUTHORIZATION_HEADER, record.token.expose());

		self.transport.call(signed).await
	}

	/// Returns a usable token, logging in when none is cached or `stale` was rejected.
	async fn acquire_token(&self, stale: Option<&TokenSecret>) -> Result<AcquiredToken> {
		if stale.is_none()
			&& let Some(record) = self.store.load(&self.key).await?
		{
			return Ok(AcquiredToken { record, cached: true });
		}

		let guard = Arc::clone(&self.login_guard);
		let _singleflight = guard.lock().await;

		match (self.store.load(&self.key).await?, stale) {
			// Another caller logged in while this one waited for the guard.
			(Some(record), None) => return Ok(AcquiredToken { record, cached: true }),
			(Some(record), Some(stale)) if record.token != *stale =>
				return Ok(AcquiredToken { record, cached: false }),
			(Some(_), Some(_)) => self.store.clear(&self.key).await?,
			(None, _) => {},
		}

		let fresh = self.login().await?;
		let record = match self.store.compare_and_swap(&self.key, None, fresh.clone()).await? {
			CompareAndSwapOutcome::Updated => fresh,
			CompareAndSwapOutcome::TokenMismatch => match self.store.load(&self.key).await? {
				Some(winner) => winner,
				None => {
					self.store.save(&self.key, fresh.clone()).await?;

					fresh
				},
			},
		};

		Ok(AcquiredToken { record, cached: false })
	}

	/// Exchanges the credentials for a new token.
	async fn login(&self) -> Result<TokenRecord> {
		const STAGE: CallStage = CallStage::Login;

		let span = CallSpan::new(STAGE, "login");

		obs::record_call_outcome(STAGE, CallOutcome::Attempt);
		self.login_metrics.record_attempt();

		let result = span
			.instrument(async move {
				if self.token_lifetime.is_some_and(|lifetime| !lifetime.is_positive()) {
					return Err(Error::from(ConfigError::NonPositiveTokenLifetime));
				}

				let request = ApiRequest::new(HttpMethod::Post, LOGIN_PATH).with_body(json!({
					"auth": {
						"username": self.credentials.username,
						"password": self.credentials.password.expose(),
					}
				}));
				let response = self.transport.call(request).await.map_err(classify_login_error)?;
				let token = response.str_field("token").ok_or(TransportError::MissingToken)?;
				let issued_at = OffsetDateTime::now_utc();
				let mut builder = TokenRecord::builder().token(token).issued_at(issued_at);

				if let Some(lifetime) = self.token_lifetime {
					builder = builder.expires_in(lifetime);
				}

				builder.build().map_err(|e| match e {
					TokenRecordBuilderError::MissingToken => Error::from(TransportError::MissingToken),
					TokenRecordBuilderError::ExpiryBeforeIssue =>
						Error::from(ConfigError::NonPositiveTokenLifetime),
				})
			})
			.await;

		match &result {
			Ok(_) => self.login_metrics.record_success(),
			Err(_) => self.login_metrics.record_failure(),
		}

		obs::record_result(STAGE, &result);

		result
	}
}
impl Debug for AuthClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthClient")
			.field("credentials", &self.credentials)
			.field("token_lifetime", &self.token_lifetime)
			.finish()
	}
}

/// Rejected credentials surface as authentication failures; everything else is unchanged.
fn classify_login_error(err: Error) -> Error {
	match err {
		Error::Server { message, error_id: Some(error_id), .. } if error_id == UNAUTH =>
			Error::Authentication { reason: message },
		other => other,
	}
}
