//! Redis-backed [`CacheClient`] for sharing tokens across processes.

// std
use std::sync::LazyLock;
// crates.io
use redis::{Client, RedisError, Script, aio::MultiplexedConnection};
// self
use crate::{
	_prelude::*,
	store::{CacheClient, CacheFuture, StoreError},
};

const COMPARE_AND_SWAP: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
	if current ~= ARGV[2] then return 0 end
elseif current then
	return 0
end
if tonumber(ARGV[4]) > 0 then
	redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
else
	redis.call('SET', KEYS[1], ARGV[3])
end
return 1
";
/// Largest `PX` value kept as an expiry; redis rejects deadlines past its millisecond clock.
const MAX_PX_MILLIS: i128 = (i64::MAX / 2) as i128;

static COMPARE_AND_SWAP_SCRIPT: LazyLock<Script> = LazyLock::new(|| Script::new(COMPARE_AND_SWAP));

/// [`CacheClient`] over a multiplexed redis connection.
#[derive(Clone)]
pub struct RedisCacheClient {
	connection: MultiplexedConnection,
}
impl RedisCacheClient {
	/// Wraps an established connection.
	pub fn new(connection: MultiplexedConnection) -> Self {
		Self { connection }
	}

	/// Opens a multiplexed connection to `url` (e.g. `redis://127.0.0.1/`).
	pub async fn connect(url: &str) -> Result<Self, StoreError> {
		let client = Client::open(url).map_err(backend_error)?;
		let connection = client.get_multiplexed_async_connection().await.map_err(backend_error)?;

		Ok(Self::new(connection))
	}

	/// Milliseconds for `PX`; `0` disables expiry and sub-millisecond TTLs round up.
	///
	/// TTLs beyond the redis clock never expire, matching the in-process stores.
	fn ttl_millis(ttl: Option<Duration>) -> u64 {
		match ttl.map(|ttl| ttl.whole_milliseconds()) {
			None => 0,
			Some(millis) if millis > MAX_PX_MILLIS => 0,
			Some(millis) => u64::try_from(millis).unwrap_or(0).max(1),
		}
	}
}
impl Debug for RedisCacheClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("RedisCacheClient(..)")
	}
}
impl CacheClient for RedisCacheClient {
	fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<Vec<u8>>> {
		let mut connection = self.connection.clone();

		Box::pin(async move {
			let value: Option<Vec<u8>> =
				redis::cmd("GET").arg(key).query_async(&mut connection).await.map_err(backend_error)?;

			Ok(value)
		})
	}

	fn set<'a>(
		&'a self,
		key: &'a str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> CacheFuture<'a, ()> {
		let mut connection = self.connection.clone();

		Box::pin(async move {
			let mut cmd = redis::cmd("SET");

			cmd.arg(key).arg(value);

			match Self::ttl_millis(ttl) {
				0 => {},
				millis => {
					cmd.arg("PX").arg(millis);
				},
			}

			let _: () = cmd.query_async(&mut connection).await.map_err(backend_error)?;

			Ok(())
		})
	}

	fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()> {
		let mut connection = self.connection.clone();

		Box::pin(async move {
			let _: i64 =
				redis::cmd("DEL").arg(key).query_async(&mut connection).await.map_err(backend_error)?;

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
		let mut connection = self.connection.clone();

		Box::pin(async move {
			let swapped: i64 = COMPARE_AND_SWAP_SCRIPT
				.key(key)
				.arg(if expected.is_some() { "1" } else { "0" })
				.arg(expected.unwrap_or_default())
				.arg(value)
				.arg(Self::ttl_millis(ttl))
				.invoke_async(&mut connection)
				.await
				.map_err(backend_error)?;

			Ok(swapped == 1)
		})
	}
}

fn backend_error(e: RedisError) -> StoreError {
	StoreError::Backend { message: format!("Redis command failed: {e}") }
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn ttl_is_expressed_in_positive_milliseconds() {
		assert_eq!(RedisCacheClient::ttl_millis(None), 0);
		assert_eq!(RedisCacheClient::ttl_millis(Some(Duration::seconds(2))), 2_000);
		assert_eq!(RedisCacheClient::ttl_millis(Some(Duration::ZERO)), 1);
		assert_eq!(RedisCacheClient::ttl_millis(Some(Duration::seconds(-3))), 1);
	}

	#[test]
	fn ttl_beyond_the_redis_clock_disables_expiry() {
		assert_eq!(RedisCacheClient::ttl_millis(Some(Duration::MAX)), 0);
		assert_eq!(RedisCacheClient::ttl_millis(Some(Duration::milliseconds(i64::MAX))), 0);
	}

	#[test]
	fn shared_compare_and_swap_script_hashes_the_lua_source() {
		assert_eq!(COMPARE_AND_SWAP_SCRIPT.get_hash(), Script::new(COMPARE_AND_SWAP).get_hash());
	}
}
