//! The interface shared by raw connections and every layer wrapping them.
//!
//! A [`Connector`] opens raw connections; a [`DirectoryClient`] executes
//! requests over one. Each resilience layer is itself a [`DirectoryClient`]
//! holding an inner one, so layers compose in any order.
use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
	config::LockedConfig,
	error::Error,
	operation::{Request, Response},
	statistics::StatisticsSnapshot,
};

/// A connection to a directory, possibly wrapped by resilience layers.
///
/// All methods take `&self`; implementations synchronize internally so one
/// client can be shared between threads. Calls block until the operation
/// completed or failed.
pub trait DirectoryClient: fmt::Debug + Send + Sync {
	/// Perform a directory operation.
	fn execute(&self, request: &Request) -> Result<Response, Error>;

	/// Release the connection. Idempotent, never fails.
	fn close(&self);

	/// Whether the connection is currently open.
	fn is_connected(&self) -> bool;

	/// The URL of the server currently in use, if any.
	fn connection_url(&self) -> Option<Url>;

	/// Usage statistics, if a statistics layer is part of the stack.
	fn statistics(&self) -> Option<StatisticsSnapshot>;

	/// The configuration this client was opened with.
	fn configuration(&self) -> &LockedConfig;
}

/// Opens connections to the server named by a configuration.
pub trait Connector: fmt::Debug + Send + Sync {
	/// Open and bind a connection to the first URL of `config`.
	fn open(&self, config: &LockedConfig) -> Result<Arc<dyn DirectoryClient>, Error>;
}

/// Lifecycle of a single connection. Transitions only go forward; a closed
/// connection is never reopened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
	/// Created, not yet connected
	New,
	/// Connected and bound
	Open,
	/// Closed
	Closed,
}

impl ConnectionState {
	/// Fail unless the connection is open.
	pub(crate) fn ensure_open(self) -> Result<(), Error> {
		match self {
			ConnectionState::Open => Ok(()),
			ConnectionState::New => Err(Error::unavailable("Connection has not been opened")),
			ConnectionState::Closed => Err(Error::unavailable("Connection is closed")),
		}
	}
}
