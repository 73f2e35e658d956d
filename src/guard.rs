//! Quota-aware wrapper around authenticated calls.
//!
//! The API rejects calls beyond the per-account quota with a fixed message. [`RateLimitGuard`]
//! recognises that rejection, waits one full window, and retries the call exactly once. A second
//! rejection, or any other failure, is returned to the caller unchanged.

// crates.io
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::AuthClient,
	config::RateLimitPolicy,
	http::{ApiRequest, ApiResponse},
	obs::{self, CallOutcome, CallSpan, CallStage},
};

/// Boxed future returned by [`Sleeper::sleep`].
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + 'a + Send>>;

/// Source of backoff delays; swapped out in tests to observe waits without sleeping.
pub trait Sleeper
where
	Self: 'static + Send + Sync,
{
	/// Completes after `duration` has elapsed.
	fn sleep(&self, duration: Duration) -> SleepFuture<'_>;
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;
impl Sleeper for TokioSleeper {
	fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
		Box::pin(tokio::time::sleep(duration.unsigned_abs()))
	}
}

/// Lifecycle of one guarded call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallState {
	/// No call issued yet.
	Idle,
	/// First attempt in flight.
	Calling,
	/// First attempt hit the quota.
	RateLimited,
	/// Sleeping through the quota window.
	Waiting,
	/// The single retry is in flight.
	Retrying,
	/// Terminal: a payload was returned.
	Success,
	/// Terminal: an error was returned.
	Failed,
}
impl CallState {
	/// Returns `true` for [`CallState::Success`] and [`CallState::Failed`].
	pub const fn is_terminal(self) -> bool {
		matches!(self, CallState::Success | CallState::Failed)
	}
}

/// Outcome of a guarded call together with the states it passed through.
#[derive(Debug)]
pub struct GuardedOutcome {
	/// Final result handed to the caller.
	pub result: Result<ApiResponse>,
	/// Visited states, starting with [`CallState::Calling`] and ending in a terminal state.
	pub states: Vec<CallState>,
}

/// Executes authenticated calls with one quota-driven retry.
#[derive(Clone)]
pub struct RateLimitGuard {
	auth: AuthClient,
	policy: RateLimitPolicy,
	sleeper: Arc<dyn Sleeper>,
}
impl RateLimitGuard {
	/// Wraps `auth` with the provided quota policy and the tokio timer.
	pub fn new(auth: AuthClient, policy: RateLimitPolicy) -> Self {
		Self::with_sleeper(auth, policy, Arc::new(TokioSleeper))
	}

	/// Wraps `auth` with a custom [`Sleeper`].
	pub fn with_sleeper(auth: AuthClient, policy: RateLimitPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
		Self { auth, policy, sleeper }
	}

	/// Authenticated client used for every attempt.
	pub fn auth(&self) -> &AuthClient {
		&self.auth
	}

	/// Active quota policy.
	pub fn policy(&self) -> &RateLimitPolicy {
		&self.policy
	}

	/// Returns `true` when `err` reports an exhausted quota.
	pub fn is_rate_limited(&self, err: &Error) -> bool {
		match err {
			Error::RateLimitExceeded { .. } => true,
			Error::Server { message, .. } => self.policy.matches(message),
			_ => false,
		}
	}

	/// Performs `request`, waiting one window and retrying once if the quota is exhausted.
	pub async fn guarded_call(&self, request: ApiRequest) -> Result<ApiResponse> {
		self.run(request, None).await.result
	}

	/// Same as [`guarded_call`](Self::guarded_call), abandoning the backoff when `cancel` fires.
	pub async fn guarded_call_with_cancel(
		&self,
		request: ApiRequest,
		cancel: CancellationToken,
	) -> Result<ApiResponse> {
		self.run(request, Some(cancel)).await.result
	}

	/// Performs a guarded call and reports the states it visited.
	pub async fn traced_call(
		&self,
		request: ApiRequest,
		cancel: Option<CancellationToken>,
	) -> GuardedOutcome {
		self.run(request, cancel).await
	}

	async fn run(&self, request: ApiRequest, cancel: Option<CancellationToken>) -> GuardedOutcome {
		const STAGE: CallStage = CallStage::Guard;

		let span = CallSpan::new(STAGE, "guarded_call");

		obs::record_call_outcome(STAGE, CallOutcome::Attempt);

		let outcome = span
			.instrument(async move {
				let mut states = vec![CallState::Calling];
				let first = self.auth.call(request.clone()).await;
				let result = match first {
					Err(err) if self.is_rate_limited(&err) => {
						states.push(CallState::RateLimited);
						obs::warn_event(STAGE, "Request quota exhausted; backing off one window.", &err);
						obs::record_call_outcome(STAGE, CallOutcome::Retry);
						states.push(CallState::Waiting);

						match self.backoff(cancel.as_ref()).await {
							Ok(()) => {
								states.push(CallState::Retrying);

								self.auth.call(request).await
							},
							Err(err) => Err(err),
						}
					},
					other => other,
				};

				states.push(if result.is_ok() { CallState::Success } else { CallState::Failed });

				GuardedOutcome { result, states }
			})
			.await;

		obs::record_result(STAGE, &outcome.result);

		outcome
	}

	async fn backoff(&self, cancel: Option<&CancellationToken>) -> Result<()> {
		let sleep = self.sleeper.sleep(self.policy.window());

		match cancel {
			Some(token) => tokio::select! {
				_ = token.cancelled() => Err(Error::Cancelled),
				_ = sleep => Ok(()),
			},
			None => {
				sleep.await;

				Ok(())
			},
		}
	}
}
impl Debug for RateLimitGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimitGuard")
			.field("auth", &self.auth)
			.field("policy", &self.policy)
			.finish()
	}
}
