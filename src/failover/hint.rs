//! Process-wide memory of which server last worked for a given server list.
//!
//! New failover clients start at the remembered server instead of the first
//! configured one, so a process creating many short-lived providers does not
//! dial a dead primary server every time. The hint is never consulted by a
//! running rotation machine.
use std::{
	num::NonZeroUsize,
	time::{Duration, Instant},
};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

/// Number of server lists remembered before the least recently used one is
/// forgotten
pub const MAX_ENTRIES: usize = 50;

/// Last known good server index, keyed by the hash of a server list.
#[derive(Debug)]
pub struct LastKnownGood {
	/// Remembered indices
	state: Mutex<HintState>,
}

/// Contents of [`LastKnownGood`]
#[derive(Debug)]
struct HintState {
	/// Server index by server list hash
	slots: LruCache<u64, usize>,
	/// When the hints were last read or written
	last_used: Option<Instant>,
}

impl HintState {
	/// Forget everything if the hints were unused for longer than `max_age`.
	fn expire(&mut self, max_age: Duration) {
		if self.last_used.is_some_and(|used| used.elapsed() > max_age) && !self.slots.is_empty() {
			debug!(entries = self.slots.len(), "Discarding stale last known good servers");
			self.slots.clear();
		}
	}
}

impl Default for LastKnownGood {
	fn default() -> Self {
		let capacity = NonZeroUsize::new(MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN);
		LastKnownGood {
			state: Mutex::new(HintState { slots: LruCache::new(capacity), last_used: None }),
		}
	}
}

impl LastKnownGood {
	/// Create an empty hint cache.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// The remembered server index for a server list, unless the hints went
	/// unused for longer than `max_age`.
	pub(crate) fn get(&self, key: u64, max_age: Duration) -> Option<usize> {
		let mut state = self.state.lock();
		state.expire(max_age);
		let slot = state.slots.get(&key).copied();
		if slot.is_some() {
			state.last_used = Some(Instant::now());
		}
		slot
	}

	/// Remember `slot` as the working server of a server list.
	pub(crate) fn record(&self, key: u64, slot: usize, max_age: Duration) {
		let mut state = self.state.lock();
		state.expire(max_age);
		state.slots.put(key, slot);
		state.last_used = Some(Instant::now());
	}

	/// Number of remembered server lists
	#[must_use]
	pub fn len(&self) -> usize {
		self.state.lock().slots.len()
	}

	/// Whether nothing is remembered
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::{LastKnownGood, MAX_ENTRIES};

	const LONG: Duration = Duration::from_secs(3600);

	#[test]
	fn remembers_slots() {
		let hints = LastKnownGood::new();
		assert_eq!(hints.get(7, LONG), None);

		hints.record(7, 2, LONG);
		hints.record(8, 1, LONG);
		assert_eq!(hints.get(7, LONG), Some(2));
		assert_eq!(hints.get(8, LONG), Some(1));

		hints.record(7, 1, LONG);
		assert_eq!(hints.get(7, LONG), Some(1));
		assert_eq!(hints.len(), 2);
	}

	#[test]
	fn oldest_entry_is_evicted() {
		let hints = LastKnownGood::new();
		for key in 0..=MAX_ENTRIES as u64 {
			hints.record(key, 1, LONG);
		}
		assert_eq!(hints.len(), MAX_ENTRIES);
		assert_eq!(hints.get(0, LONG), None);
		assert_eq!(hints.get(MAX_ENTRIES as u64, LONG), Some(1));
	}

	#[test]
	fn recently_read_hints_survive_eviction() {
		let hints = LastKnownGood::new();
		for key in 0..MAX_ENTRIES as u64 {
			hints.record(key, 1, LONG);
		}
		assert_eq!(hints.get(0, LONG), Some(1));

		hints.record(MAX_ENTRIES as u64, 2, LONG);
		assert_eq!(hints.get(0, LONG), Some(1));
		assert_eq!(hints.get(1, LONG), None);
	}

	#[test]
	fn stale_hints_are_cleared() {
		let hints = LastKnownGood::new();
		hints.record(1, 1, LONG);
		hints.record(2, 3, LONG);
		std::thread::sleep(Duration::from_millis(30));

		assert_eq!(hints.get(1, Duration::from_millis(10)), None);
		assert!(hints.is_empty(), "Staleness clears every entry");
	}
}
