//! Counters for the login exchange.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for login exchanges.
#[derive(Debug, Default)]
pub struct LoginMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	invalidations: AtomicU64,
}
impl LoginMetrics {
	/// Returns the total number of login exchanges started.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of login exchanges that produced a token.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of failed login exchanges.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Returns how often a cached token was rejected by the server.
	pub fn invalidations(&self) -> u64 {
		self.invalidations.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_invalidation(&self) {
		self.invalidations.fetch_add(1, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn counters_track_each_outcome_independently() {
		let metrics = LoginMetrics::default();

		metrics.record_attempt();
		metrics.record_attempt();
		metrics.record_success();
		metrics.record_failure();
		metrics.record_invalidation();

		assert_eq!(metrics.attempts(), 2);
		assert_eq!(metrics.successes(), 1);
		assert_eq!(metrics.failures(), 1);
		assert_eq!(metrics.invalidations(), 1);
	}
}
