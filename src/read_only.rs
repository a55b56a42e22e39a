//! Rejects modifications before they reach the directory.
use std::sync::Arc;

use tracing::warn;
use url::Url;

use crate::{
	client::DirectoryClient,
	config::LockedConfig,
	error::Error,
	operation::{Request, Response},
	statistics::StatisticsSnapshot,
};

/// Lets every operation through except writes, which fail with
/// [`Error::ReadOnly`].
#[derive(Debug)]
pub struct ReadOnlyClient {
	/// The wrapped client
	inner: Arc<dyn DirectoryClient>,
}

impl ReadOnlyClient {
	/// Wrap `inner`.
	#[must_use]
	pub fn new(inner: Arc<dyn DirectoryClient>) -> Self {
		ReadOnlyClient { inner }
	}
}

impl DirectoryClient for ReadOnlyClient {
	fn execute(&self, request: &Request) -> Result<Response, Error> {
		let operation = request.operation();
		if operation.is_write() {
			warn!(?operation, dn = request.target(), "Rejected write on read-only provider");
			return Err(Error::ReadOnly(operation));
		}
		self.inner.execute(request)
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
		self.inner.statistics()
	}

	fn configuration(&self) -> &LockedConfig {
		self.inner.configuration()
	}
}
