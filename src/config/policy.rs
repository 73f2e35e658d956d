//! Request quota policy and the message template used to detect quota rejections.

// self
use crate::{_prelude::*, error::ConfigError};

/// Quota the remote API enforces and how its rejection message reads.
///
/// The API signals an exhausted quota with a plain error message rather than a dedicated code, so
/// detection compares the server message against [`RateLimitPolicy::detection_message`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RateLimitPolicyRepr", into = "RateLimitPolicyRepr")]
pub struct RateLimitPolicy {
	quantity: u32,
	window_seconds: u64,
	message_template: String,
}
impl RateLimitPolicy {
	/// Requests allowed per window unless configured otherwise.
	pub const DEFAULT_QUANTITY: u32 = 100;
	/// Window length in seconds unless configured otherwise.
	pub const DEFAULT_WINDOW_SECONDS: u64 = 60;
	/// Server message for an exhausted quota; `{quantity}` and `{seconds}` are substituted.
	pub const DEFAULT_MESSAGE_TEMPLATE: &'static str = "You have exceeded your request limit of {quantity} per {seconds} seconds for this member, please wait and try again or contact AppNexus for higher limits";

	/// Creates a policy using the default message template.
	pub fn new(quantity: u32, window_seconds: u64) -> Result<Self, ConfigError> {
		if quantity == 0 {
			return Err(ConfigError::NonPositiveQuantity);
		}
		if window_seconds == 0 {
			return Err(ConfigError::NonPositiveWindow);
		}

		Ok(Self {
			quantity,
			window_seconds,
			message_template: Self::DEFAULT_MESSAGE_TEMPLATE.into(),
		})
	}

	/// Replaces the message template.
	///
	/// Templates may use `{quantity}`/`{seconds}` or two positional `%d` markers.
	pub fn with_message_template(mut self, template: impl Into<String>) -> Self {
		self.message_template = template.into();

		self
	}

	/// Requests allowed per window.
	pub fn quantity(&self) -> u32 {
		self.quantity
	}

	/// Window length in seconds.
	pub fn window_seconds(&self) -> u64 {
		self.window_seconds
	}

	/// Raw message template.
	pub fn message_template(&self) -> &str {
		&self.message_template
	}

	/// Backoff duration applied before the single retry.
	pub fn window(&self) -> Duration {
		Duration::seconds(i64::try_from(self.window_seconds).unwrap_or(i64::MAX))
	}

	/// Message the server sends when this quota is exhausted.
	pub fn detection_message(&self) -> String {
		let quantity = self.quantity.to_string();
		let seconds = self.window_seconds.to_string();

		if self.message_template.contains("{quantity}") || self.message_template.contains("{seconds}")
		{
			return self
				.message_template
				.replace("{quantity}", &quantity)
				.replace("{seconds}", &seconds);
		}

		self.message_template.replacen("%d", &quantity, 1).replacen("%d", &seconds, 1)
	}

	/// Returns `true` when `message` is this policy's quota rejection.
	pub fn matches(&self, message: &str) -> bool {
		message == self.detection_message()
	}
}
impl Default for RateLimitPolicy {
	fn default() -> Self {
		Self {
			quantity: Self::DEFAULT_QUANTITY,
			window_seconds: Self::DEFAULT_WINDOW_SECONDS,
			message_template: Self::DEFAULT_MESSAGE_TEMPLATE.into(),
		}
	}
}
impl TryFrom<RateLimitPolicyRepr> for RateLimitPolicy {
	type Error = ConfigError;

	fn try_from(repr: RateLimitPolicyRepr) -> Result<Self, Self::Error> {
		Ok(Self::new(repr.quantity, repr.seconds)?.with_message_template(repr.message))
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
struct RateLimitPolicyRepr {
	quantity: u32,
	seconds: u64,
	message: String,
}
impl Default for RateLimitPolicyRepr {
	fn default() -> Self {
		RateLimitPolicy::default().into()
	}
}
impl From<RateLimitPolicy> for RateLimitPolicyRepr {
	fn from(policy: RateLimitPolicy) -> Self {
		Self {
			quantity: policy.quantity,
			seconds: policy.window_seconds,
			message: policy.message_template,
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn default_policy_renders_the_api_message() {
		let policy = RateLimitPolicy::default();

		assert_eq!(policy.window(), Duration::seconds(60));
		assert!(policy.matches(
			"You have exceeded your request limit of 100 per 60 seconds for this member, please wait and try again or contact AppNexus for higher limits"
		));
		assert!(!policy.matches("Campaign not found"));
	}

	#[test]
	fn templates_accept_named_or_positional_markers() {
		let named = RateLimitPolicy::new(5, 10)
			.expect("Positive limits should be accepted.")
			.with_message_template("limit {quantity}/{seconds}s");
		let positional = RateLimitPolicy::new(5, 10)
			.expect("Positive limits should be accepted.")
			.with_message_template("limit %d/%ds");

		assert_eq!(named.detection_message(), "limit 5/10s");
		assert_eq!(positional.detection_message(), "limit 5/10s");
	}

	#[test]
	fn zero_limits_are_rejected() {
		assert!(matches!(RateLimitPolicy::new(0, 60), Err(ConfigError::NonPositiveQuantity)));
		assert!(matches!(RateLimitPolicy::new(100, 0), Err(ConfigError::NonPositiveWindow)));
	}

	#[test]
	fn deserialization_validates_and_fills_defaults() {
		let policy: RateLimitPolicy = serde_json::from_str("{\"seconds\":30}")
			.expect("Partial policy should deserialize with defaults.");

		assert_eq!(policy.quantity(), RateLimitPolicy::DEFAULT_QUANTITY);
		assert_eq!(policy.window_seconds(), 30);
		assert!(serde_json::from_str::<RateLimitPolicy>("{\"quantity\":0}").is_err());
	}
}
