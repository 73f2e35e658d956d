//! Process-wide shared [`TokenStore`] backed by a global cache with optional TTL.
//!
//! Every [`LocalCacheStore`] in the process reads and writes the same cache. Two stores configured
//! with the same key prefix observe each other's tokens, so independently constructed clients for
//! one account reuse a single login.

// std
use std::sync::LazyLock;
// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	store::{
		self, CompareAndSwapOutcome, LocalCacheSettings, StoreFuture, StoreKey, TokenStore,
	},
};

static LOCAL_CACHE: LazyLock<RwLock<HashMap<String, LocalEntry>>> = LazyLock::new(Default::default);

#[derive(Clone, Debug)]
struct LocalEntry {
	record: TokenRecord,
	evict_at: Option<OffsetDateTime>,
}
impl LocalEntry {
	fn is_live_at(&self, now: OffsetDateTime) -> bool {
		self.evict_at.is_none_or(|evict_at| now < evict_at)
	}
}

/// Token store sharing a process-wide cache between all instances.
#[derive(Clone, Debug, Default)]
pub struct LocalCacheStore {
	settings: LocalCacheSettings,
}
impl LocalCacheStore {
	/// Creates a store with the provided prefix and TTL.
	pub fn new(settings: LocalCacheSettings) -> Self {
		Self { settings }
	}

	/// Returns the settings the store was built with.
	pub fn settings(&self) -> &LocalCacheSettings {
		&self.settings
	}

	fn entry_for(&self, record: TokenRecord, now: OffsetDateTime) -> LocalEntry {
		// A TTL beyond the calendar range never evicts.
		LocalEntry { record, evict_at: self.settings.ttl.and_then(|ttl| now.checked_add(ttl)) }
	}

	fn live_record(&self, cache_key: &str, now: OffsetDateTime) -> Option<TokenRecord> {
		let evicted = {
			let cache = LOCAL_CACHE.read();

			match cache.get(cache_key) {
				Some(entry) if entry.is_live_at(now) =>
					return Some(entry.record.clone()).filter(|record| !record.is_expired_at(now)),
				Some(_) => true,
				None => false,
			}
		};

		if evicted {
			let mut cache = LOCAL_CACHE.write();

			if cache.get(cache_key).is_some_and(|entry| !entry.is_live_at(now)) {
				cache.remove(cache_key);
			}
		}

		None
	}
}
impl TokenStore for LocalCacheStore {
	fn load<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<TokenRecord>> {
		Box::pin(async move {
			let cache_key = key.cache_key(&self.settings.key_prefix);

			Ok(self.live_record(&cache_key, OffsetDateTime::now_utc()))
		})
	}

	fn save<'a>(&'a self, key: &'a StoreKey, record: TokenRecord) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let cache_key = key.cache_key(&self.settings.key_prefix);
			let entry = self.entry_for(record, OffsetDateTime::now_utc());

			LOCAL_CACHE.write().insert(cache_key, entry);

			Ok(())
		})
	}

	fn clear<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			LOCAL_CACHE.write().remove(&key.cache_key(&self.settings.key_prefix));

			Ok(())
		})
	}

	fn compare_and_swap<'a>(
		&'a self,
		key: &'a StoreKey,
		expected: Option<&'a str>,
		replacement: TokenRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		Box::pin(async move {
			let cache_key = key.cache_key(&self.settings.key_prefix);
			let now = OffsetDateTime::now_utc();
			let mut cache = LOCAL_CACHE.write();
			let current = cache.get(&cache_key).filter(|entry| entry.is_live_at(now));

			if !store::token_matches(current.map(|entry| &entry.record), expected, now) {
				return Ok(CompareAndSwapOutcome::TokenMismatch);
			}

			cache.insert(cache_key, self.entry_for(replacement, now));

			Ok(CompareAndSwapOutcome::Updated)
		})
	}
}
