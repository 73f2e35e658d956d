//! Storage contracts and built-in token store implementations.
//!
//! Every store caches at most one current [`TokenRecord`] per [`StoreKey`]. Stores report absence
//! as `Ok(None)`, never as an error, and treat locally expired records as absent. The
//! [`TokenStore::compare_and_swap`] primitive lets concurrent logins converge on a single token.

pub mod distributed;
pub mod local;
pub mod memory;
#[cfg(feature = "redis")] pub mod redis_cache;

pub use distributed::{CacheClient, CacheFuture, DistributedStore, MemoryCacheClient};
pub use local::LocalCacheStore;
pub use memory::MemoryStore;
#[cfg(feature = "redis")] pub use redis_cache::RedisCacheClient;

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::TokenRecord};

/// Boxed future returned by [`TokenStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract implemented by token stores.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Returns the cached record if present and not known-expired.
	fn load<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<TokenRecord>>;

	/// Unconditionally replaces the cached record.
	fn save<'a>(&'a self, key: &'a StoreKey, record: TokenRecord) -> StoreFuture<'a, ()>;

	/// Removes any cached record.
	fn clear<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, ()>;

	/// Atomically replaces the record if the current token matches `expected`.
	///
	/// `None` expects that no usable token is cached.
	fn compare_and_swap<'a>(
		&'a self,
		key: &'a StoreKey,
		expected: Option<&'a str>,
		replacement: TokenRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome>;
}

/// Result of a token compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The current token matched and the record was replaced.
	Updated,
	/// Another writer published a different token first.
	TokenMismatch,
}

/// Error type produced by [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Unique key identifying the token of one account on one host.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
	/// API username.
	pub username: String,
	/// Normalized API host.
	pub host: String,
}
impl StoreKey {
	/// Builds a key for the provided account and host.
	pub fn new(username: impl Into<String>, host: impl Into<String>) -> Self {
		Self { username: username.into(), host: host.into() }
	}

	/// Stable base64 (no padding) SHA-256 digest of the username and host.
	///
	/// Shared caches use it so raw usernames never appear in cache keys.
	pub fn fingerprint(&self) -> String {
		let mut hasher = Sha256::new();

		hasher.update(self.username.as_bytes());
		hasher.update([0_u8]);
		hasher.update(self.host.as_bytes());

		URL_SAFE_NO_PAD.encode(hasher.finalize())
	}

	/// Builds the cache key used by shared stores.
	pub fn cache_key(&self, prefix: &str) -> String {
		format!("{prefix}{}", self.fingerprint())
	}
}

/// Storage medium selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
	/// Per-instance in-process map.
	#[default]
	InMemory,
	/// Process-wide shared cache.
	LocalCache,
	/// Cache shared across processes through a [`CacheClient`].
	DistributedCache,
}
impl StorageKind {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			StorageKind::InMemory => "in-memory",
			StorageKind::LocalCache => "local-cache",
			StorageKind::DistributedCache => "distributed-cache",
		}
	}
}
impl Display for StorageKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Default prefix for shared cache keys.
pub const DEFAULT_KEY_PREFIX: &str = "appnexus_token_";

/// Settings for [`LocalCacheStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCacheSettings {
	/// Prefix prepended to every cache key.
	pub key_prefix: String,
	/// Optional entry lifetime.
	pub ttl: Option<Duration>,
}
impl Default for LocalCacheSettings {
	fn default() -> Self {
		Self { key_prefix: DEFAULT_KEY_PREFIX.into(), ttl: None }
	}
}

/// Settings for [`DistributedStore`].
#[derive(Clone)]
pub struct DistributedCacheSettings {
	/// Handle to the shared cache.
	pub client: Arc<dyn CacheClient>,
	/// Prefix prepended to every cache key.
	pub key_prefix: String,
	/// Optional entry lifetime.
	pub ttl: Option<Duration>,
}
impl DistributedCacheSettings {
	/// Creates settings with the default key prefix and no TTL.
	pub fn new(client: Arc<dyn CacheClient>) -> Self {
		Self { client, key_prefix: DEFAULT_KEY_PREFIX.into(), ttl: None }
	}

	/// Overrides the key prefix.
	pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.key_prefix = prefix.into();

		self
	}

	/// Sets the entry lifetime.
	pub fn with_ttl(mut self, ttl: Duration) -> Self {
		self.ttl = Some(ttl);

		self
	}
}
impl Debug for DistributedCacheSettings {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DistributedCacheSettings")
			.field("key_prefix", &self.key_prefix)
			.field("ttl", &self.ttl)
			.finish()
	}
}

/// Storage variant plus its typed settings.
#[derive(Clone, Debug, Default)]
pub enum StorageSettings {
	/// See [`MemoryStore`].
	#[default]
	InMemory,
	/// See [`LocalCacheStore`].
	LocalCache(LocalCacheSettings),
	/// See [`DistributedStore`].
	DistributedCache(DistributedCacheSettings),
}
impl StorageSettings {
	/// Returns the tag of the selected variant.
	pub fn kind(&self) -> StorageKind {
		match self {
			Self::InMemory => StorageKind::InMemory,
			Self::LocalCache(_) => StorageKind::LocalCache,
			Self::DistributedCache(_) => StorageKind::DistributedCache,
		}
	}

	/// Constructs the selected store.
	pub fn build(&self) -> Arc<dyn TokenStore> {
		match self {
			Self::InMemory => Arc::new(MemoryStore::default()),
			Self::LocalCache(settings) => Arc::new(LocalCacheStore::new(settings.clone())),
			Self::DistributedCache(settings) => Arc::new(DistributedStore::new(settings.clone())),
		}
	}
}

/// Returns the token of `record` unless it is expired at `now`.
pub(crate) fn current_token(record: Option<&TokenRecord>, now: OffsetDateTime) -> Option<&str> {
	record.filter(|record| !record.is_expired_at(now)).map(|record| record.token.expose())
}

/// Returns `true` when the usable token equals `expected`.
pub(crate) fn token_matches(
	record: Option<&TokenRecord>,
	expected: Option<&str>,
	now: OffsetDateTime,
) -> bool {
	current_token(record, now) == expected
}
