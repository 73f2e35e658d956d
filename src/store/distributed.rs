//! Cross-process [`TokenStore`] that serializes records into a shared cache.
//!
//! The store never talks to the network itself; it hands JSON bytes to a [`CacheClient`]
//! (memcached, redis, ...) and relies on the client's compare-and-swap primitive so that two
//! processes racing to log in converge on one token.

// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	store::{
		self, CompareAndSwapOutcome, DistributedCacheSettings, StoreError, StoreFuture, StoreKey,
		TokenStore,
	},
};

/// Boxed future returned by [`CacheClient`] operations.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Minimal byte-oriented contract for shared caches.
pub trait CacheClient
where
	Self: Send + Sync,
{
	/// Reads the value stored under `key`.
	fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<Vec<u8>>>;

	/// Writes `value` under `key`, replacing anything stored.
	fn set<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Option<Duration>)
	-> CacheFuture<'a, ()>;

	/// Deletes `key`; deleting a missing key succeeds.
	fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()>;

	/// Atomically writes `value` if the stored bytes equal `expected` (`None` means absent).
	///
	/// Returns `true` when the write happened.
	fn compare_and_swap<'a>(
		&'a self,
		key: &'a str,
		expected: Option<&'a [u8]>,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> CacheFuture<'a, bool>;
}

/// Token store writing JSON-encoded records through a [`CacheClient`].
#[derive(Clone, Debug)]
pub struct DistributedStore {
	settings: DistributedCacheSettings,
}
impl DistributedStore {
	/// Creates a store over the provided cache handle.
	pub fn new(settings: DistributedCacheSettings) -> Self {
		Self { settings }
	}

	fn encode(record: &TokenRecord) -> Result<Vec<u8>, StoreError> {
		serde_json::to_vec(record).map_err(|e| StoreError::Serialization {
			message: format!("Failed to serialize token record: {e}"),
		})
	}

	fn decode(bytes: &[u8]) -> Result<TokenRecord, StoreError> {
		serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse cached token record: {e}"),
		})
	}

	fn cache_key(&self, key: &StoreKey) -> String {
		key.cache_key(&self.settings.key_prefix)
	}
}
impl TokenStore for DistributedStore {
	fn load<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<TokenRecord>> {
		Box::pin(async move {
			let bytes = self.settings.client.get(&self.cache_key(key)).await?;

			// Undecodable bytes hold no usable token; the next login overwrites them.
			Ok(bytes
				.and_then(|bytes| Self::decode(&bytes).ok())
				.filter(|record| !record.is_expired()))
		})
	}

	fn save<'a>(&'a self, key: &'a StoreKey, record: TokenRecord) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let bytes = Self::encode(&record)?;

			self.settings.client.set(&self.cache_key(key), bytes, self.settings.ttl).await
		})
	}

	fn clear<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.settings.client.delete(&self.cache_key(key)).await })
	}

	fn compare_and_swap<'a>(
		&'a self,
		key: &'a StoreKey,
		expected: Option<&'a str>,
		replacement: TokenRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			let cache_key = self.cache_key(key);
			let now = OffsetDateTime::now_utc();
			let current_bytes = self.settings.client.get(&cache_key).await?;
			let current = current_bytes.as_deref().and_then(|bytes| Self::decode(bytes).ok());

			if !store::token_matches(current.as_ref(), expected, now) {
				return Ok(CompareAndSwapOutcome::TokenMismatch);
			}

			let bytes = Self::encode(&replacement)?;
			let swapped = self
				.settings
				.client
				.compare_and_swap(&cache_key, current_bytes.as_deref(), bytes, self.settings.ttl)
				.await?;

			Ok(if swapped {
				CompareAndSwapOutcome::Updated
			} else {
				CompareAndSwapOutcome::TokenMismatch
			})
		})
	}
}

type CacheMap = Arc<Mutex<HashMap<String, (Vec<u8>, Option<OffsetDateTime>)>>>;

/// In-process [`CacheClient`] for development and tests.
///
/// Clones share the same map, which lets several stores stand in for several processes.
#[derive(Clone, Debug, Default)]
pub struct MemoryCacheClient(CacheMap);
impl MemoryCacheClient {
	fn live(
		map: &mut HashMap<String, (Vec<u8>, Option<OffsetDateTime>)>,
		key: &str,
	) -> Option<Vec<u8>> {
		let now = OffsetDateTime::now_utc();

		if map.get(key).is_some_and(|(_, evict_at)| evict_at.is_some_and(|at| now >= at)) {
			map.remove(key);
		}

		map.get(key).map(|(bytes, _)| bytes.clone())
	}

	fn evict_at(ttl: Option<Duration>) -> Option<OffsetDateTime> {
		ttl.and_then(|ttl| OffsetDateTime::now_utc().checked_add(ttl))
	}
}
impl CacheClient for MemoryCacheClient {
	fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<Vec<u8>>> {
		Box::pin(async move { Ok(Self::live(&mut self.0.lock(), key)) })
	}

	fn set<'a>(
		&'a self,
		key: &'a str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> CacheFuture<'a, ()> {
		Box::pin(async move {
			self.0.lock().insert(key.to_owned(), (value, Self::evict_at(ttl)));

			Ok(())
		})
	}

	fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()> {
		Box::pin(async move {
			self.0.lock().remove(key);

			Ok(())
		})
	}

	fn compare_and_swap<'a>(
		&'a self,
		key: &'a str,
		expected: Option<&'a [u8]>,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> CacheFuture<'a, bool> {
		Box::pin(async move {
			let mut map = self.0.lock();

			if Self::live(&mut map, key).as_deref() != expected {
				return Ok(false);
			}

			map.insert(key.to_owned(), (value, Self::evict_at(ttl)));

			Ok(true)
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn record(token: &str) -> TokenRecord {
		TokenRecord::builder()
			.token(token)
			.expires_in(Duration::hours(2))
			.build()
			.expect("Distributed fixture should build.")
	}

	fn key() -> StoreKey {
		StoreKey::new("dist-user", "http://api.appnexus.com/")
	}

	#[tokio::test]
	async fn records_are_written_as_json_under_the_prefixed_key() {
		let cache = MemoryCacheClient::default();
		let store = DistributedStore::new(
			DistributedCacheSettings::new(Arc::new(cache.clone())).with_key_prefix("dist_"),
		);
		let saved = record("json-token");

		store.save(&key(), saved.clone()).await.expect("Save should succeed.");

		let raw = cache
			.get(&key().cache_key("dist_"))
			.await
			.expect("Cache read should succeed.")
			.expect("Record should be stored under the prefixed key.");
		let decoded: TokenRecord =
			serde_json::from_slice(&raw).expect("Stored bytes should be JSON.");

		assert_eq!(decoded, saved);
	}

	#[tokio::test]
	async fn corrupted_entries_load_as_absent_and_can_be_replaced() {
		let cache = MemoryCacheClient::default();
		let store = DistributedStore::new(DistributedCacheSettings::new(Arc::new(cache.clone())));

		cache
			.set(&key().cache_key(crate::store::DEFAULT_KEY_PREFIX), b"not-json".to_vec(), None)
			.await
			.expect("Raw write should succeed.");

		assert!(store.load(&key()).await.expect("Load should succeed.").is_none());

		let outcome = store
			.compare_and_swap(&key(), None, record("repaired"))
			.await
			.expect("CAS should replace corrupted entries.");

		assert_eq!(outcome, CompareAndSwapOutcome::Updated);
	}

	#[tokio::test]
	async fn racing_processes_converge_on_one_token() {
		let cache = MemoryCacheClient::default();
		let settings = DistributedCacheSettings::new(Arc::new(cache));
		let process_a = DistributedStore::new(settings.clone());
		let process_b = DistributedStore::new(settings);
		let key = key();
		let (outcome_a, outcome_b) = tokio::join!(
			process_a.compare_and_swap(&key, None, record("token-a")),
			process_b.compare_and_swap(&key, None, record("token-b")),
		);
		let outcomes = [
			outcome_a.expect("CAS A should complete."),
			outcome_b.expect("CAS B should complete."),
		];

		assert_eq!(
			outcomes.iter().filter(|outcome| **outcome == CompareAndSwapOutcome::Updated).count(),
			1
		);

		let seen_a = process_a.load(&key).await.expect("Load A should succeed.");
		let seen_b = process_b.load(&key).await.expect("Load B should succeed.");

		assert_eq!(seen_a, seen_b);
	}

	#[tokio::test]
	async fn unbounded_cache_ttl_keeps_entries() {
		let store = DistributedStore::new(
			DistributedCacheSettings::new(Arc::new(MemoryCacheClient::default()))
				.with_ttl(Duration::MAX),
		);

		store.save(&key(), record("kept")).await.expect("Save should succeed.");

		assert_eq!(
			store
				.compare_and_swap(&key(), Some("kept"), record("rotated"))
				.await
				.expect("CAS should run."),
			CompareAndSwapOutcome::Updated
		);
		assert!(store.load(&key()).await.expect("Load should succeed.").is_some());
	}

	#[tokio::test]
	async fn cache_ttl_evicts_entries() {
		let cache = MemoryCacheClient::default();
		let store =
			DistributedStore::new(DistributedCacheSettings::new(Arc::new(cache)).with_ttl(Duration::ZERO));

		store.save(&key(), record("gone")).await.expect("Save should succeed.");

		assert!(store.load(&key()).await.expect("Load should succeed.").is_none());
	}
}
