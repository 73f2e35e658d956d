//! AppNexus API access layer: lazy login with a token cached across pluggable stores, quota-aware
//! retries, and transport-aware observability in one crate.
//!
//! [`client::ApiClient`] is the entry point. Each call flows through
//! [`guard::RateLimitGuard`] (one retry after a full window when the request quota is exhausted),
//! then [`auth::AuthClient`] (token from a [`store::TokenStore`], one refresh when the server
//! rejects a cached token), and finally a [`http::Transport`].

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod http;
pub mod obs;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and fixtures for tests; enabled via `cfg(test)` or the `test` crate
	//! feature.

	pub use std::time::Duration as StdDuration;

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::VecDeque,
		sync::atomic::{AtomicUsize, Ordering},
	};
	// crates.io
	use serde_json::json;
	// self
	use crate::{
		auth::{LOGIN_PATH, TokenRecord},
		guard::{SleepFuture, Sleeper},
		http::{AUTHORIZATION_HEADER, ApiRequest, ApiResponse, HttpMethod, Transport, TransportFuture},
	};

	/// In-process [`Transport`] that replays queued replies and records every request.
	///
	/// Without queued replies, logins succeed with `token-1`, `token-2`, ... and calls succeed
	/// with a payload whose `token_seen` field echoes the `Authorization` header.
	#[derive(Clone, Debug, Default)]
	pub struct ScriptedTransport {
		state: Arc<ScriptedState>,
		login_delay: Option<StdDuration>,
	}
	impl ScriptedTransport {
		/// Delays every login exchange, widening race windows in concurrency tests.
		pub fn with_login_delay(mut self, delay: StdDuration) -> Self {
			self.login_delay = Some(delay);

			self
		}

		/// Queues the reply for the next login exchange.
		pub fn push_login(&self, reply: Result<ApiResponse>) {
			self.state.login_replies.lock().push_back(reply);
		}

		/// Queues the reply for the next authenticated call.
		pub fn push_call(&self, reply: Result<ApiResponse>) {
			self.state.call_replies.lock().push_back(reply);
		}

		/// Number of login exchanges observed.
		pub fn logins(&self) -> usize {
			self.state.logins.load(Ordering::SeqCst)
		}

		/// Number of authenticated calls observed.
		pub fn calls(&self) -> usize {
			self.state.calls.load(Ordering::SeqCst)
		}

		/// Every request observed so far, in order.
		pub fn requests(&self) -> Vec<ApiRequest> {
			self.state.requests.lock().clone()
		}
	}
	impl Transport for ScriptedTransport {
		fn call(&self, request: ApiRequest) -> TransportFuture<'_, ApiResponse> {
			Box::pin(async move {
				self.state.requests.lock().push(request.clone());

				if request.method == HttpMethod::Post && request.url == LOGIN_PATH {
					let n = self.state.logins.fetch_add(1, Ordering::SeqCst) + 1;

					if let Some(delay) = self.login_delay {
						tokio::time::sleep(delay).await;
					}

					let queued = self.state.login_replies.lock().pop_front();

					return queued.unwrap_or_else(|| {
						Ok(ApiResponse(json!({ "status": "OK", "token": format!("token-{n}") })))
					});
				}

				self.state.calls.fetch_add(1, Ordering::SeqCst);

				let queued = self.state.call_replies.lock().pop_front();

				queued.unwrap_or_else(|| {
					Ok(ApiResponse(json!({
						"status": "OK",
						"token_seen": request.header(AUTHORIZATION_HEADER),
					})))
				})
			})
		}
	}

	#[derive(Debug, Default)]
	struct ScriptedState {
		login_replies: Mutex<VecDeque<Result<ApiResponse>>>,
		call_replies: Mutex<VecDeque<Result<ApiResponse>>>,
		requests: Mutex<Vec<ApiRequest>>,
		logins: AtomicUsize,
		calls: AtomicUsize,
	}

	/// [`Sleeper`] that returns immediately and records every requested wait.
	///
	/// When built with [`RecordingSleeper::observing`], each wait also records how many
	/// authenticated calls the transport had seen when the wait began.
	#[derive(Clone, Debug, Default)]
	pub struct RecordingSleeper {
		waits: Arc<Mutex<Vec<Duration>>>,
		calls_at_wait: Arc<Mutex<Vec<usize>>>,
		transport: Option<ScriptedTransport>,
	}
	impl RecordingSleeper {
		/// Records waits along with the call count of `transport` at each wait.
		pub fn observing(transport: &ScriptedTransport) -> Self {
			Self { transport: Some(transport.clone()), ..Default::default() }
		}

		/// Requested waits, in order.
		pub fn waits(&self) -> Vec<Duration> {
			self.waits.lock().clone()
		}

		/// Authenticated calls observed when each wait began; empty unless observing.
		pub fn calls_at_wait(&self) -> Vec<usize> {
			self.calls_at_wait.lock().clone()
		}
	}
	impl Sleeper for RecordingSleeper {
		fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
			self.waits.lock().push(duration);

			if let Some(transport) = &self.transport {
				self.calls_at_wait.lock().push(transport.calls());
			}

			Box::pin(async {})
		}
	}

	/// [`Sleeper`] that never completes; pairs with cancellation tests.
	#[derive(Clone, Copy, Debug, Default)]
	pub struct PendingSleeper;
	impl Sleeper for PendingSleeper {
		fn sleep(&self, _: Duration) -> SleepFuture<'_> {
			Box::pin(std::future::pending())
		}
	}

	/// Builds an active record for `token`, issued now and valid for an hour.
	pub fn token_record(token: &str) -> TokenRecord {
		let now = OffsetDateTime::now_utc();

		TokenRecord::builder()
			.token(token)
			.issued_at(now)
			.expires_at(now + Duration::hours(1))
			.build()
			.expect("Token record fixture should build.")
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
