//! Thread-safe in-memory [`TokenStore`] implementation, private to each store instance.

// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	store::{self, CompareAndSwapOutcome, StoreError, StoreFuture, StoreKey, TokenStore},
};

type StoreMap = Arc<RwLock<HashMap<StoreKey, TokenRecord>>>;

/// Storage backend that keeps records in-process; clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of records held, including expired ones not yet replaced.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no record is held.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn load_now(map: StoreMap, key: StoreKey) -> Option<TokenRecord> {
		let now = OffsetDateTime::now_utc();

		map.read().get(&key).filter(|record| !record.is_expired_at(now)).cloned()
	}

	fn save_now(map: StoreMap, key: StoreKey, record: TokenRecord) -> Result<(), StoreError> {
		map.write().insert(key, record);

		Ok(())
	}

	fn clear_now(map: StoreMap, key: StoreKey) {
		map.write().remove(&key);
	}

	fn cas_now(
		map: StoreMap,
		key: StoreKey,
		expected: Option<&str>,
		replacement: TokenRecord,
	) -> CompareAndSwapOutcome {
		let now = OffsetDateTime::now_utc();
		let mut guard = map.write();

		if store::token_matches(guard.get(&key), expected, now) {
			guard.insert(key, replacement);

			CompareAndSwapOutcome::Updated
		} else {
			CompareAndSwapOutcome::TokenMismatch
		}
	}
}
impl TokenStore for MemoryStore {
	fn load<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<TokenRecord>> {
		let map = self.0.clone();
		let key = key.to_owned();

		Box::pin(async move { Ok(Self::load_now(map, key)) })
	}

	fn save<'a>(&'a self, key: &'a StoreKey, record: TokenRecord) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let key = key.to_owned();

		Box::pin(async move { Self::save_now(map, key, record) })
	}

	fn clear<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let key = key.to_owned();

		Box::pin(async move {
			Self::clear_now(map, key);

			Ok(())
		})
	}

	fn compare_and_swap<'a>(
		&'a self,
		key: &'a StoreKey,
		expected: Option<&'a str>,
		replacement: TokenRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		let map = self.0.clone();
		let key = key.to_owned();

		Box::pin(async move { Ok(Self::cas_now(map, key, expected, replacement)) })
	}
}
