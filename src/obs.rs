//! Optional observability helpers for client calls.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `appnexus_client.call` with the `stage` (layer)
//!   and `site` (call site) fields, plus warn events when a token is invalidated or a quota is hit.
//! - Enable `metrics` to increment the `appnexus_client_call_total` counter for every
//!   attempt/success/failure/retry, labeled by `stage` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Layers of a client call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallStage {
	/// Login exchange that mints a token.
	Login,
	/// Authenticated call through the transport.
	Call,
	/// Rate limit guard wrapping the authenticated call.
	Guard,
}
impl CallStage {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallStage::Login => "login",
			CallStage::Call => "call",
			CallStage::Guard => "guard",
		}
	}
}
impl Display for CallStage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallOutcome {
	/// Entry to a stage.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// The stage issued its single permitted retry.
	Retry,
}
impl CallOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallOutcome::Attempt => "attempt",
			CallOutcome::Success => "success",
			CallOutcome::Failure => "failure",
			CallOutcome::Retry => "retry",
		}
	}
}
impl Display for CallOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Records success/failure for a finished stage.
pub(crate) fn record_result<T>(stage: CallStage, result: &Result<T>) {
	match result {
		Ok(_) => record_call_outcome(stage, CallOutcome::Success),
		Err(_) => record_call_outcome(stage, CallOutcome::Failure),
	}
}
