//! In-memory directory used by the unit tests of the provider layers.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_docs_in_private_items)]

use std::{
	collections::{BTreeMap, HashMap, HashSet},
	sync::Arc,
	time::Duration,
};

use parking_lot::Mutex;
use url::Url;

use crate::{
	client::{ConnectionState, Connector, DirectoryClient},
	config::LockedConfig,
	entry::DirectoryEntry,
	error::Error,
	operation::{Request, Response},
	statistics::StatisticsSnapshot,
};

#[derive(Debug, Default)]
struct State {
	/// URLs refusing connections
	down: HashSet<String>,
	/// URLs whose open connections fail every operation
	broken: HashSet<String>,
	/// Connections opened per URL
	opens: HashMap<String, usize>,
	/// Operations executed per URL
	calls: HashMap<String, usize>,
	/// Connections closed
	closes: usize,
	/// Time every operation takes
	delay: Duration,
	/// Result code returned by every bind, if set
	bind_error: Option<u32>,
	entries: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

/// A directory shared by every connection opened through it, with switches
/// to take servers down.
#[derive(Clone, Debug, Default)]
pub(crate) struct MockDirectory {
	state: Arc<Mutex<State>>,
}

impl MockDirectory {
	pub(crate) fn new() -> Self {
		let directory = MockDirectory::default();
		directory.add_entry("cn=admin,dc=example,dc=org", &[("cn", "admin")]);
		directory.add_entry(
			"cn=user01,ou=users,dc=example,dc=org",
			&[("cn", "user01"), ("sn", "User1")],
		);
		directory
	}

	pub(crate) fn add_entry(&self, dn: &str, attrs: &[(&str, &str)]) {
		let mut state = self.state.lock();
		let entry = state.entries.entry(dn.to_owned()).or_default();
		for (name, value) in attrs {
			entry.entry((*name).to_owned()).or_default().push((*value).to_owned());
		}
	}

	pub(crate) fn set_down(&self, url: &str, down: bool) {
		let mut state = self.state.lock();
		if down {
			state.down.insert(url.to_owned());
		} else {
			state.down.remove(url);
		}
	}

	pub(crate) fn set_broken(&self, url: &str, broken: bool) {
		let mut state = self.state.lock();
		if broken {
			state.broken.insert(url.to_owned());
		} else {
			state.broken.remove(url);
		}
	}

	pub(crate) fn set_delay(&self, delay: Duration) {
		self.state.lock().delay = delay;
	}

	pub(crate) fn set_bind_error(&self, code: Option<u32>) {
		self.state.lock().bind_error = code;
	}

	pub(crate) fn opens(&self, url: &str) -> usize {
		self.state.lock().opens.get(url).copied().unwrap_or_default()
	}

	pub(crate) fn calls(&self, url: &str) -> usize {
		self.state.lock().calls.get(url).copied().unwrap_or_default()
	}

	pub(crate) fn total_calls(&self) -> usize {
		self.state.lock().calls.values().sum()
	}

	pub(crate) fn closes(&self) -> usize {
		self.state.lock().closes
	}

	fn apply(&self, request: &Request) -> Result<Response, Error> {
		let mut state = self.state.lock();
		let missing = || Error::Operation {
			code: Some(32),
			message: "No such object".to_owned(),
			retryable: false,
		};
		let response = match request {
			Request::ReadStringAttribute { dn, attribute } => {
				let entry = state.entries.get(dn).ok_or_else(missing)?;
				Response::String(entry.get(attribute).and_then(|v| v.first()).cloned())
			}
			Request::ReadStringAttributes { dn, attributes } => {
				let entry = state.entries.get(dn).ok_or_else(missing)?;
				Response::Attributes(
					attributes
						.iter()
						.filter_map(|a| Some((a.clone(), entry.get(a)?.first()?.clone())))
						.collect(),
				)
			}
			Request::ReadMultiStringAttribute { dn, attribute } => {
				let entry = state.entries.get(dn).ok_or_else(missing)?;
				Response::Strings(entry.get(attribute).cloned().unwrap_or_default())
			}
			Request::ReadBinaryAttribute { dn, attribute } => {
				let entry = state.entries.get(dn).ok_or_else(missing)?;
				Response::Binary(
					entry
						.get(attribute)
						.map(|v| v.iter().map(|s| s.as_bytes().to_vec()).collect())
						.unwrap_or_default(),
				)
			}
			Request::CompareStringAttribute { dn, attribute, value } => {
				let entry = state.entries.get(dn).ok_or_else(missing)?;
				Response::Compare(entry.get(attribute).is_some_and(|v| v.contains(value)))
			}
			Request::Search(search) => Response::Entries(
				state
					.entries
					.iter()
					.filter(|(dn, _)| dn.ends_with(&search.base))
					.map(|(dn, attrs)| DirectoryEntry {
						dn: dn.clone(),
						attrs: attrs.clone().into_iter().collect(),
						bin_attrs: BTreeMap::new(),
					})
					.collect(),
			),
			Request::CreateEntry { dn, object_classes, attributes } => {
				let mut entry: BTreeMap<String, Vec<String>> = attributes
					.iter()
					.map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
					.collect();
				entry.insert("objectClass".to_owned(), object_classes.iter().cloned().collect());
				state.entries.insert(dn.clone(), entry);
				Response::Done
			}
			Request::DeleteEntry { dn } => {
				state.entries.remove(dn).ok_or_else(missing)?;
				Response::Done
			}
			Request::WriteStringAttribute { dn, attribute, values, overwrite } => {
				let entry = state.entries.get_mut(dn).ok_or_else(missing)?;
				let current = entry.entry(attribute.clone()).or_default();
				if *overwrite {
					current.clear();
				}
				current.extend(values.iter().cloned());
				Response::Done
			}
			Request::ReplaceStringAttribute { dn, attribute, old_value, new_value } => {
				let entry = state.entries.get_mut(dn).ok_or_else(missing)?;
				let current = entry.entry(attribute.clone()).or_default();
				current.retain(|v| v != old_value);
				current.push(new_value.clone());
				Response::Done
			}
			Request::DeleteStringAttributeValue { dn, attribute, value } => {
				let entry = state.entries.get_mut(dn).ok_or_else(missing)?;
				match value {
					Some(value) => {
						if let Some(current) = entry.get_mut(attribute) {
							current.retain(|v| v != value);
						}
					}
					None => {
						entry.remove(attribute);
					}
				}
				Response::Done
			}
			Request::WriteBinaryAttribute { .. } | Request::RenameEntry { .. } => Response::Done,
			Request::ExtendedOperation { value, .. } => Response::Extended(value.clone()),
		};
		Ok(response)
	}
}

impl Connector for MockDirectory {
	fn open(&self, config: &LockedConfig) -> Result<Arc<dyn DirectoryClient>, Error> {
		let url = config.primary_url().clone();
		let mut state = self.state.lock();
		if state.down.contains(url.as_str()) {
			return Err(Error::unavailable(format!("Connection refused: {url}")));
		}
		if let Some(code) = state.bind_error {
			return Err(Error::Operation {
				code: Some(code),
				message: "Invalid credentials".to_owned(),
				retryable: false,
			});
		}
		*state.opens.entry(url.to_string()).or_default() += 1;
		Ok(Arc::new(MockConnection {
			directory: self.clone(),
			url,
			config: config.clone(),
			state: Mutex::new(ConnectionState::Open),
		}))
	}
}

#[derive(Debug)]
pub(crate) struct MockConnection {
	directory: MockDirectory,
	url: Url,
	config: LockedConfig,
	state: Mutex<ConnectionState>,
}

impl DirectoryClient for MockConnection {
	fn execute(&self, request: &Request) -> Result<Response, Error> {
		self.state.lock().ensure_open()?;
		let delay = {
			let mut state = self.directory.state.lock();
			*state.calls.entry(self.url.to_string()).or_default() += 1;
			if state.broken.contains(self.url.as_str()) {
				return Err(Error::unavailable(format!("Connection reset: {}", self.url)));
			}
			state.delay
		};
		if !delay.is_zero() {
			std::thread::sleep(delay);
		}
		self.directory.apply(request)
	}

	fn close(&self) {
		let mut state = self.state.lock();
		if *state != ConnectionState::Closed {
			*state = ConnectionState::Closed;
			self.directory.state.lock().closes += 1;
		}
	}

	fn is_connected(&self) -> bool {
		*self.state.lock() == ConnectionState::Open
	}

	fn connection_url(&self) -> Option<Url> {
		Some(self.url.clone())
	}

	fn statistics(&self) -> Option<StatisticsSnapshot> {
		None
	}

	fn configuration(&self) -> &LockedConfig {
		&self.config
	}
}

/// A read of the first value of `attribute` on the test user
pub(crate) fn read(attribute: &str) -> Request {
	Request::ReadStringAttribute {
		dn: "cn=user01,ou=users,dc=example,dc=org".to_owned(),
		attribute: attribute.to_owned(),
	}
}

/// An overwriting write of `value` into `attribute` on the test user
pub(crate) fn write(attribute: &str, value: &str) -> Request {
	Request::WriteStringAttribute {
		dn: "cn=user01,ou=users,dc=example,dc=org".to_owned(),
		attribute: attribute.to_owned(),
		values: [value.to_owned()].into(),
		overwrite: true,
	}
}

/// Open a plain connection to the first URL of `config`
pub(crate) fn connect(
	directory: &MockDirectory,
	config: &LockedConfig,
) -> Arc<dyn DirectoryClient> {
	directory.open(config).expect("mock directory refused connection")
}
