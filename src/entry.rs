//! Directory entries returned by searches, and helper methods for extracting
//! data from them.
use std::collections::BTreeMap;

use ldap3::SearchEntry;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// An entry returned by a search.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
	/// Distinguished name of the entry
	pub dn: String,
	/// Attributes with valid UTF-8 values
	pub attrs: BTreeMap<String, Vec<String>>,
	/// Attributes with values that are not valid UTF-8
	pub bin_attrs: BTreeMap<String, Vec<Vec<u8>>>,
}

impl From<SearchEntry> for DirectoryEntry {
	fn from(entry: SearchEntry) -> Self {
		DirectoryEntry {
			dn: entry.dn,
			attrs: entry.attrs.into_iter().collect(),
			bin_attrs: entry.bin_attrs.into_iter().collect(),
		}
	}
}

/// An extension trait for search results that provides convenience methods
/// for extracting data.
pub trait SearchEntryExt {
	/// Get every textual value of an attribute.
	fn attr_all(&self, attr: &str) -> Option<&[String]>;

	/// Get every value of an attribute which is not valid UTF-8.
	fn bin_attr_all(&self, attr: &str) -> Option<&[Vec<u8>]>;

	/// Get the first value of an attribute. Will return `None` if attribute
	/// value is not valid UTF-8.
	fn attr_first(&self, attr: &str) -> Option<&str> {
		self.attr_all(attr)?.first().map(String::as_str)
	}

	/// Get the first value of an attribute, in binary form
	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]> {
		if let Some(attr) = self.attr_all(attr) {
			return attr.first().map(String::as_bytes);
		}
		self.bin_attr_all(attr)?.first().map(Vec::as_slice)
	}

	/// Get every value of an attribute in binary form, regardless of whether
	/// the server sent it as text.
	fn bin_values(&self, attr: &str) -> Vec<Vec<u8>> {
		let text = self.attr_all(attr).unwrap_or_default().iter().map(|v| v.as_bytes().to_vec());
		let bin = self.bin_attr_all(attr).unwrap_or_default().iter().cloned();
		text.chain(bin).collect()
	}

	/// Get the first value of an attribute, interpreted as a boolean.
	fn bool_first(&self, attr: &str) -> Option<Result<bool, Error>> {
		match self.attr_first(attr) {
			Some("TRUE") => Some(Ok(true)),
			Some("FALSE") => Some(Ok(false)),
			Some(_) => Some(Err(Error::Invalid(attr.to_owned()))),
			None => None,
		}
	}
}

impl SearchEntryExt for SearchEntry {
	fn attr_all(&self, attr: &str) -> Option<&[String]> {
		self.attrs.get(attr).map(Vec::as_slice)
	}

	fn bin_attr_all(&self, attr: &str) -> Option<&[Vec<u8>]> {
		self.bin_attrs.get(attr).map(Vec::as_slice)
	}
}

impl SearchEntryExt for DirectoryEntry {
	fn attr_all(&self, attr: &str) -> Option<&[String]> {
		self.attrs.get(attr).map(Vec::as_slice)
	}

	fn bin_attr_all(&self, attr: &str) -> Option<&[Vec<u8>]> {
		self.bin_attrs.get(attr).map(Vec::as_slice)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use ldap3::SearchEntry;

	use super::{DirectoryEntry, SearchEntryExt};

	#[test]
	fn attr_first() {
		let entry = SearchEntry {
			dn: String::from("dontcare"),
			attrs: [(
				String::from("name"),
				vec![String::from("Foo Bar"), String::from("Bar McBaz")],
			)]
			.into_iter()
			.collect(),
			bin_attrs: HashMap::default(),
		};
		assert_eq!(
			entry.attr_first("attribute_does_not_exist"),
			None,
			"Undefined attributes should return None"
		);
		assert_eq!(entry.attr_first("name"), Some("Foo Bar"), "Should return the first value");
		assert_ne!(entry.attr_first("name"), Some("Bar McBaz"), "Should return the correct value");
	}

	#[test]
	fn converted_entry_keeps_binary_values() {
		let entry = SearchEntry {
			dn: String::from("cn=foo,dc=example,dc=org"),
			attrs: [(String::from("enabled"), vec![String::from("TRUE")])].into_iter().collect(),
			bin_attrs: [(String::from("objectGUID"), vec![vec![0xff, 0x00, 0x13]])]
				.into_iter()
				.collect(),
		};
		let entry = DirectoryEntry::from(entry);

		assert_eq!(entry.dn, "cn=foo,dc=example,dc=org");
		assert_eq!(entry.bin_attr_first("objectGUID"), Some(&[0xff, 0x00, 0x13][..]));
		assert_eq!(entry.bin_values("enabled"), vec![b"TRUE".to_vec()]);
		assert!(matches!(entry.bool_first("enabled"), Some(Ok(true))));
		assert!(entry.bool_first("missing").is_none());
	}
}
