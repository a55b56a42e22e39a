//! Error codes

use crate::operation::Operation;

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// No directory server could be reached, or the connection to it broke.
	/// Retrying later may succeed.
	#[error("Directory unavailable: {message}")]
	Unavailable {
		/// Description of the underlying failure
		message: String,
		/// Whether the failure may go away by trying again or trying another
		/// server
		retryable: bool,
	},
	/// The server rejected the request itself.
	#[error("Operation failed: {message}")]
	Operation {
		/// The LDAP result code, if the server returned one
		code: Option<u32>,
		/// Description of the failure
		message: String,
		/// Whether the server indicated the request may succeed when repeated
		retryable: bool,
	},
	/// A modifying operation was attempted against a read-only provider.
	#[error("{0:?} rejected, the provider is configured read-only")]
	ReadOnly(Operation),
	/// The provider was closed by its owner.
	#[error("Provider is closed")]
	Closed,
	/// The contents of a configuration value or a response did not conform
	/// to the expected syntax.
	#[error("Malformed data: {0}")]
	Invalid(String),
	/// Reading key material failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Shorthand for a retryable [`Error::Unavailable`].
	pub(crate) fn unavailable(message: impl Into<String>) -> Self {
		Error::Unavailable { message: message.into(), retryable: true }
	}

	/// Whether the failover layer may rotate to another server and repeat
	/// the request after this error.
	#[must_use]
	pub fn is_retryable(&self) -> bool {
		match self {
			Error::Unavailable { retryable, .. } | Error::Operation { retryable, .. } => {
				*retryable
			}
			Error::ReadOnly(_) | Error::Closed | Error::Invalid(_) | Error::Io(_) => false,
		}
	}

	/// Whether this error means the server could not be used at all, as
	/// opposed to the server refusing the request.
	#[must_use]
	pub fn is_unavailable(&self) -> bool {
		matches!(self, Error::Unavailable { .. })
	}
}
