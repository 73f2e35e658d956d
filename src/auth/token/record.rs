//! Token record structs, lifecycle helpers, and builders.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Current lifecycle status for a token record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Token is usable.
	Active,
	/// Token exceeded its expiry instant.
	Expired,
}

/// Errors produced by [`TokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenRecordBuilderError {
	/// Issued when no token value was provided.
	#[error("Token value is required.")]
	MissingToken,
	/// Issued when the expiry precedes the issued-at instant.
	#[error("Token expiry precedes its issued-at instant.")]
	ExpiryBeforeIssue,
}

/// Authentication token obtained through the login exchange.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
	/// Token secret; callers must avoid logging it.
	pub token: TokenSecret,
	/// Instant the token was obtained.
	pub issued_at: OffsetDateTime,
	/// Expiry instant, when known.
	pub expires_at: Option<OffsetDateTime>,
}
impl TokenRecord {
	/// Returns a builder for constructing records.
	pub fn builder() -> TokenRecordBuilder {
		TokenRecordBuilder::default()
	}

	/// Computes the lifecycle status at a given instant.
	///
	/// Records without an expiry never expire locally; the server decides.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		match self.expires_at {
			Some(expires_at) if instant >= expires_at => TokenStatus::Expired,
			_ => TokenStatus::Active,
		}
	}

	/// Returns `true` if the record has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), TokenStatus::Expired)
	}

	/// Returns `true` if the record is expired relative to the current clock.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}

	/// Time left before expiry at `instant`, if an expiry is known.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Option<Duration> {
		self.expires_at.map(|expires_at| expires_at - instant)
	}
}
impl Debug for TokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRecord")
			.field("token", &"<redacted>")
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`TokenRecord`].
#[derive(Clone, Debug, Default)]
pub struct TokenRecordBuilder {
	token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenRecordBuilder {
	/// Provides the token value.
	pub fn token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	///
	/// A duration that overflows the calendar leaves the record without a local expiry.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces a [`TokenRecord`].
	pub fn build(self) -> Result<TokenRecord, TokenRecordBuilderError> {
		let token = self.token.ok_or(TokenRecordBuilderError::MissingToken)?;

		if token.expose().is_empty() {
			return Err(TokenRecordBuilderError::MissingToken);
		}

		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => Some(instant),
			(None, Some(delta)) => match issued_at.checked_add(delta) {
				Some(instant) => Some(instant),
				None if delta.is_negative() =>
					return Err(TokenRecordBuilderError::ExpiryBeforeIssue),
				None => None,
			},
			(None, None) => None,
		};

		if expires_at.is_some_and(|instant| instant < issued_at) {
			return Err(TokenRecordBuilderError::ExpiryBeforeIssue);
		}

		Ok(TokenRecord { token, issued_at, expires_at })
	}
}
