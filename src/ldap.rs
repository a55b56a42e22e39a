//! Raw client on top of the blocking `ldap3` connection.
//!
//! This is the innermost layer of every provider: one [`LdapClient`] is one
//! bound connection to one server, and it is never reconnected. Reconnecting
//! is left to the watchdog and failover layers wrapping it.

use std::{
	collections::{HashMap, HashSet},
	fmt,
	hash::Hash,
	sync::Arc,
	time::Duration,
};

use ldap3::{exop::Exop, LdapConn, LdapError, LdapResult, Mod, Scope, SearchEntry};
use parking_lot::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::{
	client::{ConnectionState, Connector, DirectoryClient},
	config::LockedConfig,
	entry::DirectoryEntry,
	error::Error,
	operation::{Request, Response},
	statistics::StatisticsSnapshot,
};

/// Result codes after which repeating the request, possibly on another
/// server, may succeed: busy, unavailable and server down
const RETRYABLE_CODES: [u32; 3] = [51, 52, 81];

/// Filter matching any entry, used to read a single entry by DN
const ANY_ENTRY: &str = "(objectClass=*)";

impl From<LdapError> for Error {
	fn from(err: LdapError) -> Self {
		match err {
			LdapError::LdapResult { result } => Error::Operation {
				code: Some(result.rc),
				retryable: RETRYABLE_CODES.contains(&result.rc),
				message: result_message(&result),
			},
			LdapError::FilterParsing | LdapError::AddNoValues => {
				Error::Operation { code: None, message: err.to_string(), retryable: false }
			}
			LdapError::UnknownScheme(_) | LdapError::UrlParsing { .. } => {
				Error::Invalid(err.to_string())
			}
			err => Error::unavailable(err.to_string()),
		}
	}
}

/// Describe a non-success result
fn result_message(result: &LdapResult) -> String {
	if result.text.is_empty() {
		format!("result code {}", result.rc)
	} else {
		format!("result code {}: {}", result.rc, result.text)
	}
}

/// Opens [`LdapClient`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct LdapConnector;

impl Connector for LdapConnector {
	fn open(&self, config: &LockedConfig) -> Result<Arc<dyn DirectoryClient>, Error> {
		Ok(Arc::new(LdapClient::connect(config)?))
	}
}

/// A single bound connection to a directory server
pub struct LdapClient {
	/// The server connected to
	url: Url,
	/// The configuration the connection was opened with
	config: LockedConfig,
	/// The connection, taken out when closed
	conn: Mutex<Option<LdapConn>>,
	/// Lifecycle of the connection
	state: Mutex<ConnectionState>,
}

impl fmt::Debug for LdapClient {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LdapClient")
			.field("url", &self.url.as_str())
			.field("state", &*self.state.lock())
			.finish_non_exhaustive()
	}
}

impl LdapClient {
	/// Connect to the first URL of `config` and bind with the configured
	/// identity. An empty bind DN keeps the connection anonymous.
	pub fn connect(config: &LockedConfig) -> Result<Self, Error> {
		let url = config.primary_url().clone();
		let settings = config.connection.to_settings()?;
		let mut conn = LdapConn::from_url_with_settings(settings, &url)?;

		if !config.bind_dn.is_empty() {
			conn.with_timeout(config.connection.operation_timeout)
				.simple_bind(&config.bind_dn, &config.bind_password)?
				.success()?;
		}
		info!(%url, bind_dn = %config.bind_dn, "Connected to directory server");

		Ok(LdapClient {
			url,
			config: config.clone(),
			conn: Mutex::new(Some(conn)),
			state: Mutex::new(ConnectionState::Open),
		})
	}
}

/// Unbind and drop a connection, logging failures.
fn unbind(url: &Url, mut conn: LdapConn) {
	if let Err(err) = conn.unbind() {
		debug!(%url, "Unbind failed: {err}");
	}
}

impl DirectoryClient for LdapClient {
	fn execute(&self, request: &Request) -> Result<Response, Error> {
		self.state.lock().ensure_open()?;
		let mut guard = self.conn.lock();
		let conn = guard.as_mut().ok_or_else(|| Error::unavailable("Connection is closed"))?;
		let result = run(conn, request, self.config.connection.operation_timeout);

		// Closed while the request was in flight
		if *self.state.lock() == ConnectionState::Closed {
			if let Some(conn) = guard.take() {
				unbind(&self.url, conn);
			}
		}
		result.map_err(Error::from)
	}

	fn close(&self) {
		{
			let mut state = self.state.lock();
			if *state == ConnectionState::Closed {
				return;
			}
			*state = ConnectionState::Closed;
		}
		debug!(url = %self.url, "Closing connection");
		// A request in flight holds the connection; it unbinds once it returns
		if let Some(mut guard) = self.conn.try_lock() {
			if let Some(conn) = guard.take() {
				unbind(&self.url, conn);
			}
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

/// Find the values of an attribute, ignoring the case of its name
fn lookup<'a, V>(attrs: &'a HashMap<String, V>, attribute: &str) -> Option<&'a V> {
	attrs.get(attribute).or_else(|| {
		attrs.iter().find(|(name, _)| name.eq_ignore_ascii_case(attribute)).map(|(_, v)| v)
	})
}

/// Every value of `attribute` in binary form, whether the server sent it as
/// text or not
fn binary_values(entry: &SearchEntry, attribute: &str) -> Vec<Vec<u8>> {
	let text = lookup(&entry.attrs, attribute).into_iter().flatten().map(|v| v.as_bytes().to_vec());
	let bin = lookup(&entry.bin_attrs, attribute).into_iter().flatten().cloned();
	text.chain(bin).collect()
}

/// Read one entry by DN
fn read_entry(
	conn: &mut LdapConn,
	timeout: Duration,
	dn: &str,
	attributes: Vec<&str>,
) -> Result<Option<SearchEntry>, LdapError> {
	let (entries, _) =
		conn.with_timeout(timeout).search(dn, Scope::Base, ANY_ENTRY, attributes)?.success()?;
	Ok(entries.into_iter().next().map(SearchEntry::construct))
}

/// A set of modifications adding or replacing all values of one attribute
fn write_mods<S: AsRef<[u8]> + Eq + Hash>(
	attribute: S,
	values: HashSet<S>,
	overwrite: bool,
) -> Vec<Mod<S>> {
	if overwrite {
		vec![Mod::Replace(attribute, values)]
	} else {
		vec![Mod::Add(attribute, values)]
	}
}

/// Perform `request` on `conn`
fn run(conn: &mut LdapConn, request: &Request, timeout: Duration) -> Result<Response, LdapError> {
	let response = match request {
		Request::ReadStringAttribute { dn, attribute } => {
			let entry = read_entry(conn, timeout, dn, vec![attribute.as_str()])?;
			Response::String(
				entry
					.as_ref()
					.and_then(|entry| lookup(&entry.attrs, attribute))
					.and_then(|values| values.first().cloned()),
			)
		}
		Request::ReadStringAttributes { dn, attributes } => {
			let names = attributes.iter().map(String::as_str).collect();
			let entry = read_entry(conn, timeout, dn, names)?;
			Response::Attributes(
				entry
					.map(|entry| {
						attributes
							.iter()
							.filter_map(|name| {
								Some((name.clone(), lookup(&entry.attrs, name)?.first()?.clone()))
							})
							.collect()
					})
					.unwrap_or_default(),
			)
		}
		Request::ReadMultiStringAttribute { dn, attribute } => {
			let entry = read_entry(conn, timeout, dn, vec![attribute.as_str()])?;
			Response::Strings(
				entry
					.as_ref()
					.and_then(|entry| lookup(&entry.attrs, attribute))
					.cloned()
					.unwrap_or_default(),
			)
		}
		Request::ReadBinaryAttribute { dn, attribute } => {
			let entry = read_entry(conn, timeout, dn, vec![attribute.as_str()])?;
			Response::Binary(
				entry.map(|entry| binary_values(&entry, attribute)).unwrap_or_default(),
			)
		}
		Request::CompareStringAttribute { dn, attribute, value } => Response::Compare(
			conn.with_timeout(timeout).compare(dn, attribute, value.as_bytes())?.equal()?,
		),
		Request::Search(search) => {
			let (entries, _) = conn
				.with_timeout(timeout)
				.search(&search.base, search.scope.into(), &search.filter, search.attr_filter())?
				.success()?;
			Response::Entries(
				entries
					.into_iter()
					.map(|entry| DirectoryEntry::from(SearchEntry::construct(entry)))
					.collect(),
			)
		}
		Request::CreateEntry { dn, object_classes, attributes } => {
			let mut attrs: Vec<(&str, HashSet<&str>)> = vec![(
				"objectClass",
				object_classes.iter().map(String::as_str).collect(),
			)];
			attrs.extend(attributes.iter().map(|(name, values)| {
				(name.as_str(), values.iter().map(String::as_str).collect())
			}));
			conn.with_timeout(timeout).add(dn, attrs)?.success()?;
			Response::Done
		}
		Request::DeleteEntry { dn } => {
			conn.with_timeout(timeout).delete(dn)?.success()?;
			Response::Done
		}
		Request::WriteStringAttribute { dn, attribute, values, overwrite } => {
			let values = values.iter().map(String::as_str).collect();
			conn.with_timeout(timeout)
				.modify(dn, write_mods(attribute.as_str(), values, *overwrite))?
				.success()?;
			Response::Done
		}
		Request::ReplaceStringAttribute { dn, attribute, old_value, new_value } => {
			let mods = vec![
				Mod::Delete(attribute.as_str(), HashSet::from([old_value.as_str()])),
				Mod::Add(attribute.as_str(), HashSet::from([new_value.as_str()])),
			];
			conn.with_timeout(timeout).modify(dn, mods)?.success()?;
			Response::Done
		}
		Request::DeleteStringAttributeValue { dn, attribute, value } => {
			let values = value.iter().map(String::as_str).collect();
			conn.with_timeout(timeout)
				.modify(dn, vec![Mod::Delete(attribute.as_str(), values)])?
				.success()?;
			Response::Done
		}
		Request::WriteBinaryAttribute { dn, attribute, values, overwrite } => {
			let values = values.iter().map(Vec::as_slice).collect();
			conn.with_timeout(timeout)
				.modify(dn, write_mods(attribute.as_bytes(), values, *overwrite))?
				.success()?;
			Response::Done
		}
		Request::RenameEntry { dn, new_rdn, new_superior } => {
			conn.with_timeout(timeout)
				.modifydn(dn, new_rdn, true, new_superior.as_deref())?
				.success()?;
			Response::Done
		}
		Request::ExtendedOperation { oid, value } => {
			let exop = Exop { name: Some(oid.clone()), val: value.clone() };
			let (response, _) = conn.with_timeout(timeout).extended(exop)?.success()?;
			Response::Extended(response.val)
		}
	};
	Ok(response)
}
