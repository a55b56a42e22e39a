#![allow(dead_code)]

use std::{
	collections::{BTreeMap, HashMap, HashSet},
	error::Error,
	sync::Arc,
	time::Duration,
};

use ldap3::{LdapConn, SearchEntry};
use ldap_provider::{
	ConnectionState, Connector, DirectoryClient, DirectoryEntry, Error as ProviderError,
	LockedConfig, Request, Response, StatisticsSnapshot,
};
use parking_lot::Mutex;
use url::Url;

pub const USER: &str = "cn=user01,ou=users,dc=example,dc=org";

/// Configuration for the given servers with short timings
pub fn config(urls: &[&str]) -> ldap_provider::Config {
	let urls = urls.iter().map(|url| Url::parse(url).unwrap()).collect();
	let mut config =
		ldap_provider::Config::new(urls, "cn=admin,dc=example,dc=org", "adminpassword");
	config.failover.rotation_pause = Duration::from_millis(10);
	config.watchdog.check_frequency = Duration::from_millis(50);
	config.watchdog.disable_if_password_expired = false;
	config
}

#[derive(Debug, Default)]
struct State {
	down: HashSet<String>,
	calls: HashMap<String, usize>,
	entries: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

/// A directory kept in memory, shared by every connection opened to it
#[derive(Clone, Debug, Default)]
pub struct MemoryDirectory {
	state: Arc<Mutex<State>>,
}

impl MemoryDirectory {
	pub fn new() -> Self {
		let directory = Self::default();
		directory.state.lock().entries.insert(
			USER.to_owned(),
			BTreeMap::from([
				("cn".to_owned(), vec!["user01".to_owned()]),
				("sn".to_owned(), vec!["User1".to_owned()]),
			]),
		);
		directory
	}

	/// Take a server down, failing its open connections as well
	pub fn set_down(&self, url: &str, down: bool) {
		let mut state = self.state.lock();
		if down {
			state.down.insert(url.to_owned());
		} else {
			state.down.remove(url);
		}
	}

	pub fn calls(&self, url: &str) -> usize {
		self.state.lock().calls.get(url).copied().unwrap_or_default()
	}

	pub fn total_calls(&self) -> usize {
		self.state.lock().calls.values().sum()
	}

	fn apply(&self, url: &Url, request: &Request) -> Result<Response, ProviderError> {
		let mut state = self.state.lock();
		if state.down.contains(url.as_str()) {
			return Err(ProviderError::Unavailable {
				message: format!("Connection reset: {url}"),
				retryable: true,
			});
		}
		*state.calls.entry(url.to_string()).or_default() += 1;

		let missing = || ProviderError::Operation {
			code: Some(32),
			message: "No such object".to_owned(),
			retryable: false,
		};
		let response = match request {
			Request::ReadStringAttribute { dn, attribute } => {
				let entry = state.entries.get(dn).ok_or_else(missing)?;
				Response::String(entry.get(attribute).and_then(|v| v.first()).cloned())
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
			Request::Search(search) => Response::Entries(
				state
					.entries
					.iter()
					.filter(|(dn, _)| dn.ends_with(&search.base))
					.map(|(dn, attrs)| DirectoryEntry {
						dn: dn.clone(),
						attrs: attrs.clone(),
						bin_attrs: BTreeMap::new(),
					})
					.collect(),
			),
			Request::DeleteEntry { dn } => {
				state.entries.remove(dn).ok_or_else(missing)?;
				Response::Done
			}
			other => {
				return Err(ProviderError::Operation {
					code: Some(53),
					message: format!("{:?} is not supported", other.operation()),
					retryable: false,
				})
			}
		};
		Ok(response)
	}
}

impl Connector for MemoryDirectory {
	fn open(&self, config: &LockedConfig) -> Result<Arc<dyn DirectoryClient>, ProviderError> {
		let url = config.primary_url().clone();
		if self.state.lock().down.contains(url.as_str()) {
			return Err(ProviderError::Unavailable {
				message: format!("Connection refused: {url}"),
				retryable: true,
			});
		}
		Ok(Arc::new(MemoryConnection {
			directory: self.clone(),
			url,
			config: config.clone(),
			state: Mutex::new(ConnectionState::Open),
		}))
	}
}

#[derive(Debug)]
struct MemoryConnection {
	directory: MemoryDirectory,
	url: Url,
	config: LockedConfig,
	state: Mutex<ConnectionState>,
}

impl DirectoryClient for MemoryConnection {
	fn execute(&self, request: &Request) -> Result<Response, ProviderError> {
		if *self.state.lock() != ConnectionState::Open {
			return Err(ProviderError::Unavailable {
				message: "Connection is closed".to_owned(),
				retryable: true,
			});
		}
		self.directory.apply(&self.url, request)
	}

	fn close(&self) {
		*self.state.lock() = ConnectionState::Closed;
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

pub fn ldap_connect() -> Result<LdapConn, Box<dyn Error>> {
	let mut ldap = LdapConn::new("ldap://localhost:1389")?;
	ldap.simple_bind("cn=admin,dc=example,dc=org", "adminpassword")?.success()?;
	Ok(ldap)
}

pub fn ldap_add_organizational_unit(ldap: &mut LdapConn, ou: &str) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("ou={},dc=example,dc=org", ou),
		vec![("objectClass", ["organizationalUnit"].into())],
	)?
	.success()?;
	Ok(())
}

pub fn ldap_delete_organizational_unit(
	ldap: &mut LdapConn,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("ou={},dc=example,dc=org", ou))?.success()?;
	Ok(())
}

pub fn ldap_add_user(ldap: &mut LdapConn, cn: &str, sn: &str) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("cn={},ou=users,dc=example,dc=org", cn),
		vec![("objectClass", ["inetOrgPerson"].into()), ("sn", [sn].into())],
	)?
	.success()?;
	Ok(())
}

pub fn ldap_delete_user(ldap: &mut LdapConn, cn: &str) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("cn={},ou=users,dc=example,dc=org", cn))?.success()?;
	Ok(())
}

pub fn ldap_search_user(ldap: &mut LdapConn, cn: &str) -> Result<SearchEntry, Box<dyn Error>> {
	let (result, _res) = ldap
		.search(
			&format!("cn={},ou=users,dc=example,dc=org", cn),
			ldap3::Scope::Base,
			"(objectClass=inetOrgPerson)",
			vec!["*"],
		)?
		.success()?;
	let entry = result.first().ok_or("No entry found")?.clone();
	Ok(SearchEntry::construct(entry))
}
