//! Directory operations, their arguments and results, and the table
//! classifying each operation as a read, a write or a search.
//!
//! Every decorator in the provider stack decides what to do with a request
//! by asking [`Operation::classification`]. A misclassified operation would,
//! for example, let a modification slip past the cache invalidation, so the
//! table below is the single source of truth.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entry::DirectoryEntry;

/// How an operation interacts with the directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
	/// Reads data from a single entry
	Read,
	/// Modifies the directory
	Write,
	/// Enumerates entries
	Search,
}

/// Every operation of the provider surface, including the local ones which
/// never reach a server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
	/// Read the first value of an attribute
	ReadStringAttribute,
	/// Read the first value of several attributes
	ReadStringAttributes,
	/// Read every value of an attribute
	ReadMultiStringAttribute,
	/// Read every value of an attribute in binary form
	ReadBinaryAttribute,
	/// Compare an attribute against a value on the server
	CompareStringAttribute,
	/// Search a subtree
	Search,
	/// Add a new entry
	CreateEntry,
	/// Delete an entry
	DeleteEntry,
	/// Add or overwrite attribute values
	WriteStringAttribute,
	/// Swap one attribute value for another
	ReplaceStringAttribute,
	/// Remove one or all values of an attribute
	DeleteStringAttributeValue,
	/// Add or overwrite binary attribute values
	WriteBinaryAttribute,
	/// Change the RDN or the parent of an entry
	RenameEntry,
	/// Send an extended operation
	ExtendedOperation,
	/// Ask whether the connection is open
	IsConnected,
	/// Ask for the URL of the server in use
	ConnectionUrl,
	/// Ask for usage statistics
	Statistics,
	/// Ask for the bound configuration
	Configuration,
	/// Release the connection
	Close,
}

impl Operation {
	/// Look up the classification of this operation. Local operations return
	/// `None`.
	#[must_use]
	pub const fn classification(self) -> Option<Classification> {
		match self {
			Operation::ReadStringAttribute
			| Operation::ReadStringAttributes
			| Operation::ReadMultiStringAttribute
			| Operation::ReadBinaryAttribute
			| Operation::CompareStringAttribute => Some(Classification::Read),
			Operation::Search => Some(Classification::Search),
			Operation::CreateEntry
			| Operation::DeleteEntry
			| Operation::WriteStringAttribute
			| Operation::ReplaceStringAttribute
			| Operation::DeleteStringAttributeValue
			| Operation::WriteBinaryAttribute
			| Operation::RenameEntry
			| Operation::ExtendedOperation => Some(Classification::Write),
			Operation::IsConnected
			| Operation::ConnectionUrl
			| Operation::Statistics
			| Operation::Configuration
			| Operation::Close => None,
		}
	}

	/// Whether results of this operation may be served from a cache.
	#[must_use]
	pub const fn is_cacheable(self) -> bool {
		matches!(self.classification(), Some(Classification::Read | Classification::Search))
	}

	/// Whether this operation modifies the directory.
	#[must_use]
	pub const fn is_write(self) -> bool {
		matches!(self.classification(), Some(Classification::Write))
	}
}

/// Search scope, relative to the search base.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
	/// Only the base entry itself
	Base,
	/// The immediate children of the base entry
	OneLevel,
	/// The base entry and everything below it
	Subtree,
}

impl From<SearchScope> for ldap3::Scope {
	fn from(scope: SearchScope) -> Self {
		match scope {
			SearchScope::Base => ldap3::Scope::Base,
			SearchScope::OneLevel => ldap3::Scope::OneLevel,
			SearchScope::Subtree => ldap3::Scope::Subtree,
		}
	}
}

/// Parameters of a search.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchRequest {
	/// The DN the search starts from
	pub base: String,
	/// An RFC 4515 search filter
	pub filter: String,
	/// How deep to search
	pub scope: SearchScope,
	/// Attributes to return. An empty set returns all user attributes.
	pub attributes: BTreeSet<String>,
}

impl SearchRequest {
	/// A subtree search returning all user attributes.
	pub fn subtree(base: impl Into<String>, filter: impl Into<String>) -> Self {
		SearchRequest {
			base: base.into(),
			filter: filter.into(),
			scope: SearchScope::Subtree,
			attributes: BTreeSet::new(),
		}
	}

	/// Returns the list of attributes the server should return.
	#[must_use]
	pub fn attr_filter(&self) -> Vec<String> {
		if self.attributes.is_empty() {
			vec!["*".to_owned()]
		} else {
			self.attributes.iter().cloned().collect()
		}
	}
}

/// A directory operation together with its arguments. Requests are hashable
/// so the complete request can serve as a cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Request {
	/// See [`Operation::ReadStringAttribute`]
	ReadStringAttribute {
		/// Entry to read
		dn: String,
		/// Attribute to read
		attribute: String,
	},
	/// See [`Operation::ReadStringAttributes`]
	ReadStringAttributes {
		/// Entry to read
		dn: String,
		/// Attributes to read
		attributes: BTreeSet<String>,
	},
	/// See [`Operation::ReadMultiStringAttribute`]
	ReadMultiStringAttribute {
		/// Entry to read
		dn: String,
		/// Attribute to read
		attribute: String,
	},
	/// See [`Operation::ReadBinaryAttribute`]
	ReadBinaryAttribute {
		/// Entry to read
		dn: String,
		/// Attribute to read
		attribute: String,
	},
	/// See [`Operation::CompareStringAttribute`]
	CompareStringAttribute {
		/// Entry to compare against
		dn: String,
		/// Attribute to compare
		attribute: String,
		/// Value to compare with
		value: String,
	},
	/// See [`Operation::Search`]
	Search(SearchRequest),
	/// See [`Operation::CreateEntry`]
	CreateEntry {
		/// DN of the new entry
		dn: String,
		/// Values of the `objectClass` attribute
		object_classes: BTreeSet<String>,
		/// Further attributes of the new entry
		attributes: BTreeMap<String, BTreeSet<String>>,
	},
	/// See [`Operation::DeleteEntry`]
	DeleteEntry {
		/// Entry to delete
		dn: String,
	},
	/// See [`Operation::WriteStringAttribute`]
	WriteStringAttribute {
		/// Entry to modify
		dn: String,
		/// Attribute to modify
		attribute: String,
		/// Values to write
		values: BTreeSet<String>,
		/// Replace existing values instead of adding to them
		overwrite: bool,
	},
	/// See [`Operation::ReplaceStringAttribute`]
	ReplaceStringAttribute {
		/// Entry to modify
		dn: String,
		/// Attribute to modify
		attribute: String,
		/// Value to remove
		old_value: String,
		/// Value to add in its place
		new_value: String,
	},
	/// See [`Operation::DeleteStringAttributeValue`]
	DeleteStringAttributeValue {
		/// Entry to modify
		dn: String,
		/// Attribute to modify
		attribute: String,
		/// Value to remove; `None` removes the whole attribute
		value: Option<String>,
	},
	/// See [`Operation::WriteBinaryAttribute`]
	WriteBinaryAttribute {
		/// Entry to modify
		dn: String,
		/// Attribute to modify
		attribute: String,
		/// Values to write
		values: BTreeSet<Vec<u8>>,
		/// Replace existing values instead of adding to them
		overwrite: bool,
	},
	/// See [`Operation::RenameEntry`]
	RenameEntry {
		/// Entry to rename
		dn: String,
		/// The new relative DN
		new_rdn: String,
		/// Moves the entry below a new parent if set
		new_superior: Option<String>,
	},
	/// See [`Operation::ExtendedOperation`]
	ExtendedOperation {
		/// OID naming the operation
		oid: String,
		/// Encoded request value
		value: Option<Vec<u8>>,
	},
}

impl Request {
	/// The operation this request performs.
	#[must_use]
	pub const fn operation(&self) -> Operation {
		match self {
			Request::ReadStringAttribute { .. } => Operation::ReadStringAttribute,
			Request::ReadStringAttributes { .. } => Operation::ReadStringAttributes,
			Request::ReadMultiStringAttribute { .. } => Operation::ReadMultiStringAttribute,
			Request::ReadBinaryAttribute { .. } => Operation::ReadBinaryAttribute,
			Request::CompareStringAttribute { .. } => Operation::CompareStringAttribute,
			Request::Search(_) => Operation::Search,
			Request::CreateEntry { .. } => Operation::CreateEntry,
			Request::DeleteEntry { .. } => Operation::DeleteEntry,
			Request::WriteStringAttribute { .. } => Operation::WriteStringAttribute,
			Request::ReplaceStringAttribute { .. } => Operation::ReplaceStringAttribute,
			Request::DeleteStringAttributeValue { .. } => Operation::DeleteStringAttributeValue,
			Request::WriteBinaryAttribute { .. } => Operation::WriteBinaryAttribute,
			Request::RenameEntry { .. } => Operation::RenameEntry,
			Request::ExtendedOperation { .. } => Operation::ExtendedOperation,
		}
	}

	/// Shorthand for `self.operation().classification()`.
	#[must_use]
	pub const fn classification(&self) -> Option<Classification> {
		self.operation().classification()
	}

	/// The entry the request targets, for logging. Extended operations have
	/// none.
	#[must_use]
	pub fn target(&self) -> Option<&str> {
		match self {
			Request::ReadStringAttribute { dn, .. }
			| Request::ReadStringAttributes { dn, .. }
			| Request::ReadMultiStringAttribute { dn, .. }
			| Request::ReadBinaryAttribute { dn, .. }
			| Request::CompareStringAttribute { dn, .. }
			| Request::CreateEntry { dn, .. }
			| Request::DeleteEntry { dn }
			| Request::WriteStringAttribute { dn, .. }
			| Request::ReplaceStringAttribute { dn, .. }
			| Request::DeleteStringAttributeValue { dn, .. }
			| Request::WriteBinaryAttribute { dn, .. }
			| Request::RenameEntry { dn, .. } => Some(dn),
			Request::Search(search) => Some(&search.base),
			Request::ExtendedOperation { .. } => None,
		}
	}
}

/// The result of a [`Request`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
	/// The modification was applied
	Done,
	/// First value of an attribute, if present
	String(Option<String>),
	/// All values of an attribute
	Strings(Vec<String>),
	/// First values of several attributes, keyed by attribute name. Absent
	/// attributes are left out.
	Attributes(BTreeMap<String, String>),
	/// All values of a binary attribute
	Binary(Vec<Vec<u8>>),
	/// Outcome of a comparison
	Compare(bool),
	/// Entries found by a search
	Entries(Vec<DirectoryEntry>),
	/// Response value of an extended operation
	Extended(Option<Vec<u8>>),
}
