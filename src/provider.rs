//! Typed access to a directory.
use std::{
	collections::{BTreeMap, BTreeSet},
	sync::Arc,
};

use url::Url;

use crate::{
	client::DirectoryClient,
	config::LockedConfig,
	entry::DirectoryEntry,
	error::Error,
	operation::{Request, Response, SearchRequest},
	statistics::{Statistics, StatisticsSnapshot},
};

/// A directory provider: typed operations over an assembled client stack.
///
/// Providers are cheap to clone; clones share the stack. Created by
/// [`ProviderFactory::create_provider`](crate::ProviderFactory::create_provider).
#[derive(Debug, Clone)]
pub struct Provider {
	/// The outermost layer of the stack
	client: Arc<dyn DirectoryClient>,
	/// Counters of this provider, if statistics are enabled
	statistics: Option<Arc<Statistics>>,
}

/// Collect borrowed strings into an owned set
fn owned_set(values: &[&str]) -> BTreeSet<String> {
	values.iter().map(|value| (*value).to_owned()).collect()
}

impl Provider {
	/// Wrap an assembled stack.
	#[must_use]
	pub fn new(client: Arc<dyn DirectoryClient>, statistics: Option<Arc<Statistics>>) -> Self {
		Provider { client, statistics }
	}

	/// Run `request`, extracting the expected kind of response
	fn call<T>(
		&self,
		request: &Request,
		extract: impl FnOnce(Response) -> Result<T, Response>,
	) -> Result<T, Error> {
		let response = self.client.execute(request)?;
		extract(response).map_err(|response| {
			Error::Invalid(format!(
				"Unexpected response to {:?}: {response:?}",
				request.operation()
			))
		})
	}

	/// Run a modifying `request`
	fn modify(&self, request: &Request) -> Result<(), Error> {
		self.call(request, |response| match response {
			Response::Done => Ok(()),
			other => Err(other),
		})
	}

	/// First value of `attribute` on the entry `dn`, `None` if the attribute
	/// is absent.
	pub fn read_string_attribute(
		&self,
		dn: &str,
		attribute: &str,
	) -> Result<Option<String>, Error> {
		let request =
			Request::ReadStringAttribute { dn: dn.to_owned(), attribute: attribute.to_owned() };
		self.call(&request, |response| match response {
			Response::String(value) => Ok(value),
			other => Err(other),
		})
	}

	/// First values of several attributes on the entry `dn`. Absent
	/// attributes are left out of the result.
	pub fn read_string_attributes(
		&self,
		dn: &str,
		attributes: &[&str],
	) -> Result<BTreeMap<String, String>, Error> {
		let request =
			Request::ReadStringAttributes { dn: dn.to_owned(), attributes: owned_set(attributes) };
		self.call(&request, |response| match response {
			Response::Attributes(values) => Ok(values),
			other => Err(other),
		})
	}

	/// Every value of `attribute` on the entry `dn`.
	pub fn read_multi_string_attribute(
		&self,
		dn: &str,
		attribute: &str,
	) -> Result<Vec<String>, Error> {
		let request = Request::ReadMultiStringAttribute {
			dn: dn.to_owned(),
			attribute: attribute.to_owned(),
		};
		self.call(&request, |response| match response {
			Response::Strings(values) => Ok(values),
			other => Err(other),
		})
	}

	/// Every value of `attribute` on the entry `dn` in binary form.
	pub fn read_binary_attribute(&self, dn: &str, attribute: &str) -> Result<Vec<Vec<u8>>, Error> {
		let request =
			Request::ReadBinaryAttribute { dn: dn.to_owned(), attribute: attribute.to_owned() };
		self.call(&request, |response| match response {
			Response::Binary(values) => Ok(values),
			other => Err(other),
		})
	}

	/// Ask the server whether `attribute` of the entry `dn` holds `value`.
	/// Useful for attributes which can be compared but not read, like
	/// passwords on most servers.
	pub fn compare_string_attribute(
		&self,
		dn: &str,
		attribute: &str,
		value: &str,
	) -> Result<bool, Error> {
		let request = Request::CompareStringAttribute {
			dn: dn.to_owned(),
			attribute: attribute.to_owned(),
			value: value.to_owned(),
		};
		self.call(&request, |response| match response {
			Response::Compare(equal) => Ok(equal),
			other => Err(other),
		})
	}

	/// Perform a search.
	pub fn search(&self, search: SearchRequest) -> Result<Vec<DirectoryEntry>, Error> {
		self.call(&Request::Search(search), |response| match response {
			Response::Entries(entries) => Ok(entries),
			other => Err(other),
		})
	}

	/// Add the entry `dn`.
	pub fn create_entry(
		&self,
		dn: &str,
		object_classes: &[&str],
		attributes: &[(&str, &[&str])],
	) -> Result<(), Error> {
		let mut attrs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
		for (name, values) in attributes {
			attrs.entry((*name).to_owned()).or_default().extend(owned_set(values));
		}
		self.modify(&Request::CreateEntry {
			dn: dn.to_owned(),
			object_classes: owned_set(object_classes),
			attributes: attrs,
		})
	}

	/// Delete the entry `dn`.
	pub fn delete_entry(&self, dn: &str) -> Result<(), Error> {
		self.modify(&Request::DeleteEntry { dn: dn.to_owned() })
	}

	/// Add `values` to `attribute`, replacing all existing values if
	/// `overwrite` is set.
	pub fn write_string_attribute(
		&self,
		dn: &str,
		attribute: &str,
		values: &[&str],
		overwrite: bool,
	) -> Result<(), Error> {
		self.modify(&Request::WriteStringAttribute {
			dn: dn.to_owned(),
			attribute: attribute.to_owned(),
			values: owned_set(values),
			overwrite,
		})
	}

	/// Swap `old_value` of `attribute` for `new_value` in one modification.
	pub fn replace_string_attribute(
		&self,
		dn: &str,
		attribute: &str,
		old_value: &str,
		new_value: &str,
	) -> Result<(), Error> {
		self.modify(&Request::ReplaceStringAttribute {
			dn: dn.to_owned(),
			attribute: attribute.to_owned(),
			old_value: old_value.to_owned(),
			new_value: new_value.to_owned(),
		})
	}

	/// Remove `value` from `attribute`, or the whole attribute if `value` is
	/// `None`.
	pub fn delete_string_attribute_value(
		&self,
		dn: &str,
		attribute: &str,
		value: Option<&str>,
	) -> Result<(), Error> {
		self.modify(&Request::DeleteStringAttributeValue {
			dn: dn.to_owned(),
			attribute: attribute.to_owned(),
			value: value.map(str::to_owned),
		})
	}

	/// Binary counterpart of [`Provider::write_string_attribute`].
	pub fn write_binary_attribute(
		&self,
		dn: &str,
		attribute: &str,
		values: &[&[u8]],
		overwrite: bool,
	) -> Result<(), Error> {
		self.modify(&Request::WriteBinaryAttribute {
			dn: dn.to_owned(),
			attribute: attribute.to_owned(),
			values: values.iter().map(|value| value.to_vec()).collect(),
			overwrite,
		})
	}

	/// Give the entry `dn` a new RDN, optionally moving it below
	/// `new_superior`. The old RDN value is removed.
	pub fn rename_entry(
		&self,
		dn: &str,
		new_rdn: &str,
		new_superior: Option<&str>,
	) -> Result<(), Error> {
		self.modify(&Request::RenameEntry {
			dn: dn.to_owned(),
			new_rdn: new_rdn.to_owned(),
			new_superior: new_superior.map(str::to_owned),
		})
	}

	/// Send the extended operation `oid` and return the response value.
	pub fn extended_operation(
		&self,
		oid: &str,
		value: Option<&[u8]>,
	) -> Result<Option<Vec<u8>>, Error> {
		let request =
			Request::ExtendedOperation { oid: oid.to_owned(), value: value.map(<[u8]>::to_vec) };
		self.call(&request, |response| match response {
			Response::Extended(value) => Ok(value),
			other => Err(other),
		})
	}

	/// Close every connection. Further operations fail with
	/// [`Error::Closed`] when failover is in use, or with an unavailable
	/// error otherwise.
	pub fn close(&self) {
		self.client.close();
	}

	/// Whether a connection is currently open
	#[must_use]
	pub fn is_connected(&self) -> bool {
		self.client.is_connected()
	}

	/// Usage counters of this provider, if statistics are enabled
	#[must_use]
	pub fn statistics(&self) -> Option<StatisticsSnapshot> {
		self.statistics.as_ref().map(|statistics| statistics.snapshot())
	}

	/// The URL of the server in use, `None` while not connected
	#[must_use]
	pub fn current_connection_url(&self) -> Option<Url> {
		self.client.connection_url()
	}

	/// The locked configuration the provider was created from
	#[must_use]
	pub fn configuration(&self) -> &LockedConfig {
		self.client.configuration()
	}
}
