//! Closes connections that hang or sit idle, and transparently reopens them
//! on the next operation.
//!
//! Every [`WatchdogClient`] registers a record with a [`WatchdogRegistry`].
//! The registry runs a single timer thread for all of its records: the
//! thread is started when the first record registers and stopped once the
//! last one is gone, so no thread lingers when no watched connection is
//! alive.
use std::{
	collections::HashMap,
	sync::{
		mpsc::{self, RecvTimeoutError},
		Arc, Weak,
	},
	thread,
	time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
	client::{Connector, DirectoryClient},
	config::{LockedConfig, TIME_FORMAT},
	error::Error,
	operation::{Request, Response},
	statistics::StatisticsSnapshot,
};

/// Check frequency used when no live record specifies one
const DEFAULT_CHECK_FREQUENCY: Duration = Duration::from_secs(5);

/// State of a watched connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogStatus {
	/// The connection is open
	Active,
	/// The connection was closed after a timeout and is reopened on the next
	/// operation
	Idle,
	/// The connection was closed by its owner
	Closed,
}

/// Owner of the timer thread shared by all watched connections.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Debug, Default)]
pub struct WatchdogRegistry {
	/// Registered records and the timer
	inner: Arc<Mutex<RegistryState>>,
}

/// Registered records and the running timer
#[derive(Debug, Default)]
struct RegistryState {
	/// Records by id
	records: HashMap<u64, Weak<Record>>,
	/// Id given to the next record
	next_id: u64,
	/// The timer thread, while records are registered
	timer: Option<Timer>,
}

/// Handle to the running timer thread
#[derive(Debug)]
struct Timer {
	/// Dropping the sender stops the thread
	_stop: mpsc::Sender<()>,
	/// The thread
	thread: thread::JoinHandle<()>,
}

impl WatchdogRegistry {
	/// Create an empty registry. No thread is started until a record
	/// registers.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of registered records
	#[must_use]
	pub fn len(&self) -> usize {
		self.inner.lock().records.len()
	}

	/// Whether no records are registered
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Whether the timer thread is running
	#[must_use]
	pub fn timer_running(&self) -> bool {
		self.inner.lock().timer.as_ref().is_some_and(|timer| !timer.thread.is_finished())
	}

	/// Allocate an id for a new record.
	fn next_id(&self) -> u64 {
		let mut state = self.inner.lock();
		state.next_id += 1;
		state.next_id
	}

	/// Add a record, starting the timer if it is the first one.
	fn register(&self, record: &Arc<Record>) {
		let mut state = self.inner.lock();
		state.records.insert(record.id, Arc::downgrade(record));
		if state.timer.is_none() {
			state.timer = self.start_timer();
		}
	}

	/// Remove a record, stopping the timer if it was the last one.
	fn deregister(&self, id: u64) {
		let mut state = self.inner.lock();
		if state.records.remove(&id).is_none() {
			return;
		}
		if state.records.is_empty() {
			if let Some(timer) = state.timer.take() {
				debug!("Last watched connection gone, stopping watchdog timer");
				// Dropping the timer drops its stop sender, which ends the thread
				drop(timer);
			}
		}
	}

	/// Spawn the timer thread.
	fn start_timer(&self) -> Option<Timer> {
		let (stop, stopped) = mpsc::channel::<()>();
		let registry = Arc::downgrade(&self.inner);
		let spawned =
			thread::Builder::new().name("ldap-watchdog".to_owned()).spawn(move || loop {
				let Some(inner) = registry.upgrade() else { break };
				let frequency = WatchdogRegistry { inner }.check_frequency();
				match stopped.recv_timeout(frequency) {
					Err(RecvTimeoutError::Timeout) => {}
					Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
				}
				let Some(inner) = registry.upgrade() else { break };
				WatchdogRegistry { inner }.check_all();
			});
		match spawned {
			Ok(thread) => {
				debug!("Started watchdog timer");
				Some(Timer { _stop: stop, thread })
			}
			Err(err) => {
				error!("Failed to start watchdog timer, timeouts are not enforced: {err}");
				None
			}
		}
	}

	/// Shortest check frequency of all live records
	fn check_frequency(&self) -> Duration {
		self.inner
			.lock()
			.records
			.values()
			.filter_map(Weak::upgrade)
			.map(|record| record.check_frequency)
			.min()
			.unwrap_or(DEFAULT_CHECK_FREQUENCY)
	}

	/// Run the status check of every live record.
	fn check_all(&self) {
		let records: Vec<Arc<Record>> =
			self.inner.lock().records.values().filter_map(Weak::upgrade).collect();
		for record in records {
			record.check_status();
		}
	}
}

/// Bookkeeping of one watched connection
#[derive(Debug)]
struct Record {
	/// Key in the registry
	id: u64,
	/// Opens replacement connections
	connector: Arc<dyn Connector>,
	/// Configuration replacement connections are opened with
	config: LockedConfig,
	/// Longest time an operation may take
	operation_timeout: Duration,
	/// Longest time the connection may stay unused, `None` for unbounded
	idle_timeout: Option<Duration>,
	/// How often the timer should check this record
	check_frequency: Duration,
	/// Mutable state, shared between callers and the timer
	state: Mutex<RecordState>,
}

/// Mutable part of a [`Record`]
#[derive(Debug)]
struct RecordState {
	/// Current status
	status: WatchdogStatus,
	/// The connection, while active
	client: Option<Arc<dyn DirectoryClient>>,
	/// Operations currently running
	outstanding: usize,
	/// Start of the most recent operation
	last_start: Instant,
	/// End of the most recent operation
	last_finish: Instant,
}

impl Record {
	/// Account for a starting operation and return the connection to run it
	/// on, reopening it first if it was closed after a timeout.
	fn begin(&self) -> Result<Arc<dyn DirectoryClient>, Error> {
		let mut state = self.state.lock();
		if state.status == WatchdogStatus::Closed {
			return Err(Error::Closed);
		}
		state.outstanding += 1;
		state.last_start = Instant::now();

		if state.status == WatchdogStatus::Idle || state.client.is_none() {
			if let Some(stale) = state.client.take() {
				stale.close();
			}
			match self.connector.open(&self.config) {
				Ok(client) => {
					info!(url = %self.config.primary_url(), "Reopened idle connection");
					state.client = Some(client);
					state.status = WatchdogStatus::Active;
				}
				Err(err) => {
					warn!(url = %self.config.primary_url(), "Reopening connection failed: {err}");
					state.outstanding = state.outstanding.saturating_sub(1);
					state.last_finish = Instant::now();
					return Err(err);
				}
			}
		}

		state.client.clone().ok_or_else(|| Error::unavailable("Watched connection is not open"))
	}

	/// Account for a finished operation.
	fn finish(&self) {
		let mut state = self.state.lock();
		state.outstanding = state.outstanding.saturating_sub(1);
		state.last_finish = Instant::now();
	}

	/// Close the connection if an operation or the idle period exceeded its
	/// timeout. Called by the timer.
	fn check_status(&self) {
		let stale = {
			let mut state = self.state.lock();
			if state.status != WatchdogStatus::Active {
				return;
			}
			let reason = if state.outstanding > 0 {
				(state.last_start.elapsed() > self.operation_timeout).then_some("operation timeout")
			} else {
				self.idle_timeout
					.filter(|timeout| state.last_finish.elapsed() > *timeout)
					.map(|_| "idle timeout")
			};
			let Some(reason) = reason else { return };
			info!(
				url = %self.config.primary_url(),
				outstanding = state.outstanding,
				"Closing connection after {reason}"
			);
			state.status = WatchdogStatus::Idle;
			state.client.take()
		};
		if let Some(client) = stale {
			client.close();
		}
	}

	/// Close the connection for good.
	fn close(&self) -> bool {
		let client = {
			let mut state = self.state.lock();
			if state.status == WatchdogStatus::Closed {
				return false;
			}
			state.status = WatchdogStatus::Closed;
			state.client.take()
		};
		if let Some(client) = client {
			client.close();
		}
		true
	}
}

/// Check whether the password of the bind DN has already expired.
fn password_expired(client: &dyn DirectoryClient, config: &LockedConfig) -> bool {
	let request = Request::ReadStringAttribute {
		dn: config.bind_dn.clone(),
		attribute: config.watchdog.password_expiration_attribute.clone(),
	};
	match client.execute(&request) {
		Ok(Response::String(Some(value))) => match PrimitiveDateTime::parse(&value, &TIME_FORMAT) {
			Ok(expiration) => expiration.assume_utc() <= OffsetDateTime::now_utc(),
			Err(err) => {
				debug!("Ignoring malformed password expiration time {value}: {err}");
				false
			}
		},
		Ok(_) => false,
		Err(err) => {
			debug!("Could not read password expiration time: {err}");
			false
		}
	}
}

/// Enforces operation and idle timeouts on the wrapped connection.
#[derive(Debug)]
pub struct WatchdogClient {
	/// State shared with the timer
	record: Arc<Record>,
	/// The registry the record is registered with
	registry: WatchdogRegistry,
}

impl WatchdogClient {
	/// Watch `inner`. Replacement connections are opened through
	/// `connector` with the configuration of `inner`.
	#[must_use]
	pub fn new(
		inner: Arc<dyn DirectoryClient>,
		connector: Arc<dyn Connector>,
		registry: &WatchdogRegistry,
	) -> Self {
		let config = inner.configuration().clone();
		let settings = &config.watchdog;

		let mut idle_timeout = Some(settings.idle_timeout);
		if settings.disable_if_password_expired
			&& !config.bind_dn.is_empty()
			&& password_expired(inner.as_ref(), &config)
		{
			warn!(
				bind_dn = %config.bind_dn,
				"Bind password has expired, idle connections will not be closed"
			);
			idle_timeout = None;
		}

		let now = Instant::now();
		let record = Arc::new(Record {
			id: registry.next_id(),
			connector,
			operation_timeout: settings.operation_timeout,
			idle_timeout,
			check_frequency: settings.check_frequency,
			config,
			state: Mutex::new(RecordState {
				status: WatchdogStatus::Active,
				client: Some(inner),
				outstanding: 0,
				last_start: now,
				last_finish: now,
			}),
		});
		registry.register(&record);
		WatchdogClient { record, registry: registry.clone() }
	}

	/// Current status of the connection
	#[must_use]
	pub fn status(&self) -> WatchdogStatus {
		self.record.state.lock().status
	}

	/// Whether idle connections are closed; disabled when the bind password
	/// has expired
	#[must_use]
	pub fn idle_timeout(&self) -> Option<Duration> {
		self.record.idle_timeout
	}
}

impl DirectoryClient for WatchdogClient {
	fn execute(&self, request: &Request) -> Result<Response, Error> {
		let client = self.record.begin()?;
		let result = client.execute(request);
		self.record.finish();
		result
	}

	fn close(&self) {
		if self.record.close() {
			self.registry.deregister(self.record.id);
		}
	}

	fn is_connected(&self) -> bool {
		let state = self.record.state.lock();
		state.status == WatchdogStatus::Active
			&& state.client.as_ref().is_some_and(|client| client.is_connected())
	}

	fn connection_url(&self) -> Option<Url> {
		Some(self.record.config.primary_url().clone())
	}

	fn statistics(&self) -> Option<StatisticsSnapshot> {
		let client = self.record.state.lock().client.clone();
		client.and_then(|client| client.statistics())
	}

	fn configuration(&self) -> &LockedConfig {
		&self.record.config
	}
}

impl Drop for WatchdogClient {
	fn drop(&mut self) {
		// Owners are expected to close; this only keeps the timer from
		// outliving its last record.
		self.registry.deregister(self.record.id);
	}
}
