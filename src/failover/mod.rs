//! Failover between several directory servers.
//!
//! A [`FailoverClient`] keeps one slot per configured URL and serves every
//! operation from the active slot. When the active server breaks, the
//! rotation machine walks the remaining slots in order until one accepts a
//! connection. After [`FailoverConfig::minimum_failback_time`] without
//! failures, the client moves back to the first server.
//!
//! [`FailoverConfig::minimum_failback_time`]: crate::config::FailoverConfig::minimum_failback_time
use std::{sync::Arc, thread, time::Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
	client::{Connector, DirectoryClient},
	config::{FailoverConfig, LockedConfig},
	error::Error,
	operation::{Request, Response},
	statistics::StatisticsSnapshot,
};

pub mod hint;

pub use self::hint::LastKnownGood;

/// State of the rotation machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
	/// Not connected yet; the active slot is opened on the next operation
	New,
	/// Serving from the active slot
	Okay,
	/// Walking the slots for a working server
	Seeking,
	/// No server could be reached
	Failed,
}

/// One configured server and its connection
#[derive(Debug)]
struct Slot {
	/// The server URL
	url: Url,
	/// Configuration naming only this server
	config: LockedConfig,
	/// The connection, once opened
	client: Option<Arc<dyn DirectoryClient>>,
}

impl Slot {
	/// Close and forget the connection.
	fn close(&mut self) {
		if let Some(client) = self.client.take() {
			client.close();
		}
	}
}

/// Whether two trait objects are the same allocation
fn same_client(a: &Arc<dyn DirectoryClient>, b: &Arc<dyn DirectoryClient>) -> bool {
	Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// Tracks the active slot. Every transition happens under the lock of the
/// owning [`FailoverClient`].
#[derive(Debug)]
struct RotationMachine {
	/// One slot per configured URL, in configuration order
	slots: Vec<Slot>,
	/// Index of the slot in use
	active: usize,
	/// Current state
	state: RotationState,
	/// When the last server failure was observed
	last_failure: Option<Instant>,
	/// Description of the last connection failure
	last_error: Option<String>,
	/// Set once the owner closed the client
	closed: bool,
	/// Opens slot connections
	connector: Arc<dyn Connector>,
	/// Retry and fail-back settings
	settings: FailoverConfig,
	/// Process-wide start slot hints
	hints: Arc<LastKnownGood>,
	/// Key of this server list in `hints`
	hint_key: u64,
}

impl RotationMachine {
	/// Set up one slot per URL. Starts at the last known good slot for this
	/// server list, if one is remembered.
	fn new(
		config: &LockedConfig,
		connector: Arc<dyn Connector>,
		hints: Arc<LastKnownGood>,
	) -> Self {
		let slots: Vec<Slot> = config
			.urls
			.iter()
			.map(|url| Slot { url: url.clone(), config: config.for_url(url), client: None })
			.collect();
		let settings = config.failover.clone();
		let hint_key = config.url_set_hash();

		let hinted = hints
			.get(hint_key, settings.minimum_failback_time)
			.filter(|slot| *slot < slots.len());
		let (active, last_failure) = match hinted {
			Some(slot) => {
				debug!(url = %slots[slot].url, "Starting at last known good server");
				(slot, Some(Instant::now()))
			}
			None => (0, None),
		};

		RotationMachine {
			slots,
			active,
			state: RotationState::New,
			last_failure,
			last_error: None,
			closed: false,
			connector,
			settings,
			hints,
			hint_key,
		}
	}

	/// Open a fresh connection on the active slot, closing any previous one.
	fn open_active(&mut self) -> Result<Arc<dyn DirectoryClient>, Error> {
		let slot = &mut self.slots[self.active];
		slot.close();
		let client = self.connector.open(&slot.config)?;
		slot.client = Some(Arc::clone(&client));
		Ok(client)
	}

	/// Remember a retryable connection failure.
	fn note_failure(&mut self, err: &Error) {
		let url = &self.slots[self.active].url;
		warn!(%url, "Server unavailable: {err}");
		self.last_error = Some(format!("{url}: {err}"));
	}

	/// The error reported once every slot was tried
	fn exhausted(&self) -> Error {
		Error::unavailable(format!(
			"No configured server is reachable, last error: {}",
			self.last_error.as_deref().unwrap_or("none")
		))
	}

	/// Go back to the first server once the last failure is long enough ago.
	fn check_failback(&mut self) {
		if self.state != RotationState::Okay || self.active == 0 {
			return;
		}
		let due = self
			.last_failure
			.map_or(true, |failure| failure.elapsed() > self.settings.minimum_failback_time);
		if due {
			info!(
				from = %self.slots[self.active].url,
				to = %self.slots[0].url,
				"Failing back to first server"
			);
			self.slots[self.active].close();
			self.active = 0;
			self.state = RotationState::New;
		}
	}

	/// The connection of the active slot, connecting or rotating first if
	/// needed.
	fn current_provider(&mut self) -> Result<Arc<dyn DirectoryClient>, Error> {
		if self.closed {
			return Err(Error::Closed);
		}
		self.check_failback();

		if self.state == RotationState::New {
			match self.open_active() {
				Ok(client) => {
					debug!(url = %self.slots[self.active].url, "Connected");
					self.state = RotationState::Okay;
					return Ok(client);
				}
				Err(err) if err.is_retryable() => {
					self.note_failure(&err);
					self.state = RotationState::Failed;
				}
				Err(err) => return Err(err),
			}
		}

		if self.state != RotationState::Okay {
			return self.current_server_is_broken();
		}

		match &self.slots[self.active].client {
			Some(client) => Ok(Arc::clone(client)),
			None => {
				self.state = RotationState::New;
				self.current_provider()
			}
		}
	}

	/// Report that `failed` broke. Rotates unless another caller already
	/// moved away from that connection.
	fn report_broken(&mut self, failed: &Arc<dyn DirectoryClient>) -> Result<(), Error> {
		if self.closed {
			return Err(Error::Closed);
		}
		let still_active = self.state == RotationState::Okay
			&& self.slots[self.active].client.as_ref().is_some_and(|c| same_client(c, failed));
		if !still_active {
			debug!("Broken connection already replaced");
			return Ok(());
		}
		self.current_server_is_broken().map(drop)
	}

	/// Rotate to the next server that accepts a connection. Every slot is
	/// tried once, the broken one last; wrapping around to the first slot
	/// pauses first so an unreachable cluster is not hammered.
	fn current_server_is_broken(&mut self) -> Result<Arc<dyn DirectoryClient>, Error> {
		self.last_failure = Some(Instant::now());
		self.state = RotationState::Seeking;
		self.slots[self.active].close();

		let count = self.slots.len();
		for _ in 0..count {
			self.active = (self.active + 1) % count;
			if self.active == 0 {
				debug!(pause = ?self.settings.rotation_pause, "Tried every server, pausing");
				thread::sleep(self.settings.rotation_pause);
			}
			match self.open_active() {
				Ok(client) => {
					info!(url = %self.slots[self.active].url, "Failed over");
					self.state = RotationState::Okay;
					if self.active != 0 {
						self.hints.record(
							self.hint_key,
							self.active,
							self.settings.minimum_failback_time,
						);
					}
					return Ok(client);
				}
				Err(err) if err.is_retryable() => self.note_failure(&err),
				Err(err) => {
					self.state = RotationState::Failed;
					return Err(err);
				}
			}
		}

		self.state = RotationState::Failed;
		Err(self.exhausted())
	}

	/// Close every slot for good.
	fn close(&mut self) {
		self.closed = true;
		for slot in &mut self.slots {
			slot.close();
		}
	}
}

/// Spreads operations over the configured servers, moving on to the next
/// one when a server becomes unreachable.
#[derive(Debug)]
pub struct FailoverClient {
	/// The rotation machine; its lock serializes all transitions
	machine: Mutex<RotationMachine>,
	/// The complete configuration
	config: LockedConfig,
}

impl FailoverClient {
	/// Create a client for every URL in `config`. No connection is made until
	/// the first operation.
	#[must_use]
	pub fn new(
		config: LockedConfig,
		connector: Arc<dyn Connector>,
		hints: Arc<LastKnownGood>,
	) -> Self {
		let machine = RotationMachine::new(&config, connector, hints);
		FailoverClient { machine: Mutex::new(machine), config }
	}

	/// Current state of the rotation machine
	#[must_use]
	pub fn state(&self) -> RotationState {
		self.machine.lock().state
	}

	/// Index of the active server in the configured URL list
	#[must_use]
	pub fn active_index(&self) -> usize {
		self.machine.lock().active
	}

	/// Connect to the active server now instead of on the first operation.
	pub fn connect(&self) -> Result<(), Error> {
		self.machine.lock().current_provider().map(drop)
	}

	/// Run `request` on the active server, rotating and retrying on
	/// retryable errors.
	fn fail_over_invoke(&self, request: &Request) -> Result<Response, Error> {
		let attempts = self.config.failover.max_retries;
		let mut last_error = None;

		for attempt in 1..=attempts {
			let client = match self.machine.lock().current_provider() {
				Ok(client) => client,
				Err(err) if err.is_retryable() => {
					last_error = Some(err);
					continue;
				}
				Err(err) => return Err(err),
			};

			match client.execute(request) {
				Ok(response) => return Ok(response),
				Err(err) if err.is_retryable() => {
					warn!(
						attempt,
						operation = ?request.operation(),
						url = ?client.connection_url().map(String::from),
						"Retryable error: {err}"
					);
					last_error = Some(err);
					match self.machine.lock().report_broken(&client) {
						Ok(()) => {}
						Err(rotation) if rotation.is_retryable() => last_error = Some(rotation),
						Err(rotation) => return Err(rotation),
					}
				}
				Err(err) => return Err(err),
			}
		}

		Err(Error::unavailable(format!(
			"Giving up after {attempts} attempts: {}",
			last_error.map_or_else(|| "no attempt made".to_owned(), |err| err.to_string())
		)))
	}

	/// The connection of the active slot, without connecting or rotating
	fn active_client(&self) -> Option<Arc<dyn DirectoryClient>> {
		let machine = self.machine.lock();
		if machine.closed || machine.state != RotationState::Okay {
			return None;
		}
		machine.slots[machine.active].client.clone()
	}
}

impl DirectoryClient for FailoverClient {
	fn execute(&self, request: &Request) -> Result<Response, Error> {
		self.fail_over_invoke(request)
	}

	fn close(&self) {
		let mut machine = self.machine.lock();
		if !machine.closed {
			info!(servers = machine.slots.len(), "Closing failover client");
			machine.close();
		}
	}

	fn is_connected(&self) -> bool {
		self.active_client().is_some_and(|client| client.is_connected())
	}

	fn connection_url(&self) -> Option<Url> {
		let machine = self.machine.lock();
		(!machine.closed && machine.state == RotationState::Okay)
			.then(|| machine.slots[machine.active].url.clone())
	}

	fn statistics(&self) -> Option<StatisticsSnapshot> {
		self.active_client().and_then(|client| client.statistics())
	}

	fn configuration(&self) -> &LockedConfig {
		&self.config
	}
}
