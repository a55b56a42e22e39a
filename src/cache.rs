//! Caching of read and search results.
//!
//! Results live in a bounded "hard" tier ordered by insertion. Once the hard
//! tier is full, the oldest result is demoted to a secondary tier instead of
//! being dropped, so it can still be served until it expires or is pushed
//! out of that tier in turn. Each tier holds up to `maximum_size` results.
//! Any write empties both tiers; there is no per-entry invalidation.
use std::{
	num::NonZeroUsize,
	sync::Arc,
	time::{Duration, Instant},
};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};
use url::Url;

use crate::{
	client::DirectoryClient,
	config::{CacheConfig, LockedConfig},
	error::Error,
	operation::{Request, Response},
	statistics::StatisticsSnapshot,
};

/// A cached result
#[derive(Debug, Clone)]
struct CacheEntry {
	/// The cached result
	response: Response,
	/// When the result was stored
	created: Instant,
}

impl CacheEntry {
	/// Whether the result is older than `maximum_age`
	fn is_expired(&self, maximum_age: Duration) -> bool {
		self.created.elapsed() > maximum_age
	}
}

/// Look up a fresh result without touching the tier's order, dropping it if
/// it has expired.
fn get_fresh(
	tier: &mut LruCache<Request, CacheEntry>,
	key: &Request,
	maximum_age: Duration,
) -> Option<Response> {
	let entry = tier.peek(key)?;
	if !entry.is_expired(maximum_age) {
		return Some(entry.response.clone());
	}
	tier.pop(key);
	None
}

/// The two-tier result store.
///
/// Lookups never promote, so both tiers stay in insertion order and the
/// least recently used entry is always the oldest one.
#[derive(Debug)]
pub(crate) struct ResultCache {
	/// Results served first
	hard: LruCache<Request, CacheEntry>,
	/// Results demoted from the hard tier. Expired results are reclaimed from
	/// its oldest end whenever a result is demoted.
	secondary: LruCache<Request, CacheEntry>,
	/// Age after which results are discarded
	maximum_age: Duration,
	/// Incremented on every invalidation, so results computed before an
	/// invalidation are not stored after it
	generation: u64,
}

impl ResultCache {
	/// Create an empty cache.
	pub(crate) fn new(config: &CacheConfig) -> Self {
		let capacity = NonZeroUsize::new(config.maximum_size).unwrap_or(NonZeroUsize::MIN);
		ResultCache {
			hard: LruCache::new(capacity),
			secondary: LruCache::new(capacity),
			maximum_age: config.maximum_age,
			generation: 0,
		}
	}

	/// Look up a result, hard tier first. Secondary hits are not promoted.
	pub(crate) fn get(&mut self, key: &Request) -> Option<Response> {
		get_fresh(&mut self.hard, key, self.maximum_age)
			.or_else(|| get_fresh(&mut self.secondary, key, self.maximum_age))
	}

	/// Store a result as the most recent entry, demoting the oldest hard
	/// entry once the hard tier overflows.
	pub(crate) fn insert(&mut self, key: Request, response: Response) {
		self.secondary.pop(&key);
		self.hard.pop(&key);
		let entry = CacheEntry { response, created: Instant::now() };
		if let Some((oldest, entry)) = self.hard.push(key, entry) {
			trace!(operation = ?oldest.operation(), "Demoting cached result");
			self.secondary.push(oldest, entry);
			self.reclaim();
		}
	}

	/// Drop every cached result.
	pub(crate) fn clear(&mut self) {
		self.hard.clear();
		self.secondary.clear();
		self.generation = self.generation.wrapping_add(1);
	}

	/// Drop expired results from the oldest end of the secondary tier.
	fn reclaim(&mut self) {
		let maximum_age = self.maximum_age;
		while self.secondary.peek_lru().is_some_and(|(_, entry)| entry.is_expired(maximum_age)) {
			self.secondary.pop_lru();
		}
	}

	/// Whether a result is held in the hard tier
	#[cfg(test)]
	pub(crate) fn in_hard_tier(&self, key: &Request) -> bool {
		self.hard.contains(key)
	}

	/// Number of results held across both tiers
	pub(crate) fn len(&self) -> usize {
		self.hard.len() + self.secondary.len()
	}
}

/// Serves repeated reads and searches from memory.
#[derive(Debug)]
pub struct CachingClient {
	/// The wrapped client
	inner: Arc<dyn DirectoryClient>,
	/// Cached results, possibly shared with other connections of the same
	/// provider
	cache: Arc<Mutex<ResultCache>>,
}

impl CachingClient {
	/// Wrap `inner`, caching according to `config`.
	#[must_use]
	pub fn new(inner: Arc<dyn DirectoryClient>, config: &CacheConfig) -> Self {
		Self::with_cache(inner, Arc::new(Mutex::new(ResultCache::new(config))))
	}

	/// Wrap `inner`, storing results in an existing cache.
	pub(crate) fn with_cache(
		inner: Arc<dyn DirectoryClient>,
		cache: Arc<Mutex<ResultCache>>,
	) -> Self {
		CachingClient { inner, cache }
	}

	/// Number of cached results
	#[must_use]
	pub fn len(&self) -> usize {
		self.cache.lock().len()
	}

	/// Whether no results are cached
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl DirectoryClient for CachingClient {
	fn execute(&self, request: &Request) -> Result<Response, Error> {
		if !request.operation().is_cacheable() {
			let result = self.inner.execute(request);
			debug!(operation = ?request.operation(), "Clearing result cache after write");
			self.cache.lock().clear();
			return result;
		}

		let generation = {
			let mut cache = self.cache.lock();
			if let Some(response) = cache.get(request) {
				trace!(operation = ?request.operation(), "Cache hit");
				return Ok(response);
			}
			cache.generation
		};

		let response = self.inner.execute(request)?;
		let mut cache = self.cache.lock();
		if cache.generation == generation {
			cache.insert(request.clone(), response.clone());
		}
		Ok(response)
	}

	fn close(&self) {
		self.cache.lock().clear();
		self.inner.close();
	}

	fn is_connected(&self) -> bool {
		self.inner.is_connected()
	}

	fn connection_url(&self) -> Option<Url> {
		self.inner.connection_url()
	}

	fn statistics(&self) -> Option<StatisticsSnapshot> {
		self.inner.statistics()
	}

	fn configuration(&self) -> &LockedConfig {
		self.inner.configuration()
	}
}
