//! Usage statistics, counted per provider and for the whole process.
use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::{
	client::DirectoryClient,
	config::LockedConfig,
	error::Error,
	operation::{Classification, Request, Response},
};

/// Counters of classified operations. Counters only ever grow and may be
/// updated from any thread.
#[derive(Debug, Default)]
pub struct Statistics {
	/// Read operations started
	reads: AtomicU64,
	/// Write operations started
	writes: AtomicU64,
	/// Searches started
	searches: AtomicU64,
	/// All classified operations started
	total: AtomicU64,
	/// Operations that failed because the server was unavailable
	unavailable: AtomicU64,
	/// When the counters last changed
	timestamps: Mutex<Timestamps>,
}

/// Times of the most recent events
#[derive(Debug, Default, Clone, Copy)]
struct Timestamps {
	/// Start of the last operation
	last_begin: Option<OffsetDateTime>,
	/// End of the last operation
	last_finish: Option<OffsetDateTime>,
	/// Last unavailable error
	last_unavailable: Option<OffsetDateTime>,
}

/// Point-in-time copy of [`Statistics`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
	/// Read operations started
	pub read_count: u64,
	/// Write operations started
	pub write_count: u64,
	/// Searches started
	pub search_count: u64,
	/// All classified operations started
	pub total_count: u64,
	/// Operations that failed because the server was unavailable
	pub unavailable_count: u64,
	/// Start of the last operation
	pub last_begin: Option<OffsetDateTime>,
	/// End of the last operation
	pub last_finish: Option<OffsetDateTime>,
	/// Last unavailable error
	pub last_unavailable: Option<OffsetDateTime>,
}

impl Statistics {
	/// Create zeroed counters.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Count the start of an operation.
	pub(crate) fn record_begin(&self, classification: Classification) {
		let counter = match classification {
			Classification::Read => &self.reads,
			Classification::Write => &self.writes,
			Classification::Search => &self.searches,
		};
		counter.fetch_add(1, Ordering::Relaxed);
		self.total.fetch_add(1, Ordering::Relaxed);
		self.timestamps.lock().last_begin = Some(OffsetDateTime::now_utc());
	}

	/// Record the end of an operation.
	pub(crate) fn record_finish(&self) {
		self.timestamps.lock().last_finish = Some(OffsetDateTime::now_utc());
	}

	/// Count an operation failing because no server could be used.
	pub(crate) fn record_unavailable(&self) {
		self.unavailable.fetch_add(1, Ordering::Relaxed);
		self.timestamps.lock().last_unavailable = Some(OffsetDateTime::now_utc());
	}

	/// Copy the current values.
	#[must_use]
	pub fn snapshot(&self) -> StatisticsSnapshot {
		let timestamps = *self.timestamps.lock();
		StatisticsSnapshot {
			read_count: self.reads.load(Ordering::Relaxed),
			write_count: self.writes.load(Ordering::Relaxed),
			search_count: self.searches.load(Ordering::Relaxed),
			total_count: self.total.load(Ordering::Relaxed),
			unavailable_count: self.unavailable.load(Ordering::Relaxed),
			last_begin: timestamps.last_begin,
			last_finish: timestamps.last_finish,
			last_unavailable: timestamps.last_unavailable,
		}
	}
}

/// Counts every classified operation passing through, in its own counters
/// and in counters shared with every other provider.
#[derive(Debug)]
pub struct StatisticsClient {
	/// The wrapped client
	inner: Arc<dyn DirectoryClient>,
	/// Counters of this provider, shared by all of its connections
	instance: Arc<Statistics>,
	/// Counters of the whole process
	global: Arc<Statistics>,
}

impl StatisticsClient {
	/// Wrap `inner`, additionally counting into `global`.
	#[must_use]
	pub fn new(inner: Arc<dyn DirectoryClient>, global: Arc<Statistics>) -> Self {
		Self::with_instance(inner, Arc::new(Statistics::new()), global)
	}

	/// Wrap `inner`, counting into existing provider counters.
	pub(crate) fn with_instance(
		inner: Arc<dyn DirectoryClient>,
		instance: Arc<Statistics>,
		global: Arc<Statistics>,
	) -> Self {
		StatisticsClient { inner, instance, global }
	}

	/// Both sets of counters
	fn counters(&self) -> [&Statistics; 2] {
		[&*self.instance, &*self.global]
	}
}

impl DirectoryClient for StatisticsClient {
	fn execute(&self, request: &Request) -> Result<Response, Error> {
		let Some(classification) = request.classification() else {
			return self.inner.execute(request);
		};

		for counters in self.counters() {
			counters.record_begin(classification);
		}
		let result = self.inner.execute(request);
		for counters in self.counters() {
			if matches!(&result, Err(err) if err.is_unavailable()) {
				counters.record_unavailable();
			}
			counters.record_finish();
		}
		result
	}

	fn close(&self) {
		self.inner.close();
	}

	fn is_connected(&self) -> bool {
		self.inner.is_connected()
	}

	fn connection_url(&self) -> Option<Url> {
		self.inner.connection_url()
	}

	fn statistics(&self) -> Option<StatisticsSnapshot> {
		Some(self.instance.snapshot())
	}

	fn configuration(&self) -> &LockedConfig {
		self.inner.configuration()
	}
}
