//! Resilient access to LDAP directory servers.
//!
//! A [`Provider`] turns a single fragile, blocking LDAP connection into a
//! client that survives server outages. Every provider is a stack of layers,
//! each wrapping the next and each optional per configuration:
//!
//! * **failover** spreads operations over several servers, rotating to the
//!   next one when the active server breaks and failing back to the first
//!   once it has been quiet for long enough
//! * **statistics** counts reads, writes and searches per provider and
//!   across the process
//! * **cache** serves repeated reads and searches from memory until the next
//!   write
//! * **read-only** rejects every modification before it reaches a server
//! * **watchdog** closes connections that sat idle or hung in an operation,
//!   and transparently reopens them on the next use
//!
//! Which of these a request passes through is decided by the
//! [classification](operation::Operation::classification) of its operation.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource.
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//!
//! # Getting started
//! ```no_run
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use url::Url;
//! use ldap_provider::{Config, ProviderFactory};
//!
//! // Configuration can also be deserialized with serde. It's hand-constructed
//! // here for demonstration purposes.
//! let mut config = Config::new(
//!     vec![Url::parse("ldap://ldap1.example.org")?, Url::parse("ldap://ldap2.example.org")?],
//!     "cn=admin,dc=example,dc=org",
//!     "verysecret",
//! );
//! config.cache.enabled = true;
//!
//! let provider = ProviderFactory::global().create_provider(config)?;
//! let name = provider.read_string_attribute("cn=user01,ou=users,dc=example,dc=org", "sn")?;
//! println!("Surname: {name:?}, served by {:?}", provider.current_connection_url());
//! provider.close();
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * All I/O is blocking. A call occupies its thread until the server
//!   answers or the operation timeout expires.
//! * A connection closed by the watchdog while an operation is in flight is
//!   only released once that operation returns.
//! * Cached results are dropped on any write through the same provider, but
//!   writes by other clients are only picked up once results expire.

mod cache;
mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod factory;
pub mod failover;
pub mod ldap;
pub mod operation;
pub mod provider;
mod read_only;
pub mod statistics;
#[cfg(test)]
mod testing;
pub mod watchdog;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	cache::CachingClient,
	client::{ConnectionState, Connector, DirectoryClient},
	config::{
		CacheConfig, Config, ConnectionConfig, FailoverConfig, LockedConfig, TLSConfig,
		WatchdogConfig,
	},
	entry::{DirectoryEntry, SearchEntryExt},
	error::Error,
	factory::{ProviderFactory, SharedState},
	failover::{FailoverClient, LastKnownGood, RotationState},
	operation::{Classification, Operation, Request, Response, SearchRequest, SearchScope},
	provider::Provider,
	read_only::ReadOnlyClient,
	statistics::{Statistics, StatisticsClient, StatisticsSnapshot},
	watchdog::{WatchdogClient, WatchdogRegistry, WatchdogStatus},
};
