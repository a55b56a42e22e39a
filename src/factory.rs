//! Assembly of providers.
//!
//! A [`ProviderFactory`] owns the state shared by every provider it creates:
//! the process-wide statistics, the last known good server hints and the
//! watchdog registry with its timer thread. [`ProviderFactory::global`] is the
//! factory most applications use; tests and embedders needing isolation
//! construct their own.
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
	cache::{CachingClient, ResultCache},
	client::{Connector, DirectoryClient},
	config::{Config, LockedConfig},
	error::Error,
	failover::{FailoverClient, LastKnownGood},
	ldap::LdapConnector,
	provider::Provider,
	read_only::ReadOnlyClient,
	statistics::{Statistics, StatisticsClient, StatisticsSnapshot},
	watchdog::{WatchdogClient, WatchdogRegistry},
};

/// State shared by all providers of one factory. Dropping the last provider
/// of a factory stops the watchdog timer; the counters and hints live as long
/// as the factory.
#[derive(Debug, Default)]
pub struct SharedState {
	/// Counters across every provider
	statistics: Arc<Statistics>,
	/// Start slot hints for failover clients
	hints: Arc<LastKnownGood>,
	/// Watchdog records and timer
	watchdog: WatchdogRegistry,
}

impl SharedState {
	/// Fresh counters, no hints, no watchdog timer running.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Counters across every provider
	#[must_use]
	pub fn statistics(&self) -> StatisticsSnapshot {
		self.statistics.snapshot()
	}

	/// Start slot hints for failover clients
	#[must_use]
	pub fn hints(&self) -> &LastKnownGood {
		&self.hints
	}

	/// Watchdog records and timer
	#[must_use]
	pub fn watchdog(&self) -> &WatchdogRegistry {
		&self.watchdog
	}
}

/// Per-provider counters plus the process-wide ones
#[derive(Debug)]
struct Counters {
	/// Counters of the provider
	instance: Arc<Statistics>,
	/// Counters of the factory
	global: Arc<Statistics>,
}

/// Opens a raw connection and wraps it in the layers enabled by the
/// configuration, innermost first: watchdog, read-only, cache, statistics.
///
/// A failover client opens every slot through one of these, so all slots of a
/// provider share its cache and counters.
#[derive(Debug)]
struct StackConnector {
	/// Opens raw connections
	raw: Arc<dyn Connector>,
	/// Registry to watch connections with, if the watchdog is enabled
	watchdog: Option<WatchdogRegistry>,
	/// Whether writes are rejected
	read_only: bool,
	/// Result store, if caching is enabled
	cache: Option<Arc<Mutex<ResultCache>>>,
	/// Counters, if statistics are enabled
	counters: Option<Counters>,
}

impl Connector for StackConnector {
	fn open(&self, config: &LockedConfig) -> Result<Arc<dyn DirectoryClient>, Error> {
		let mut client = self.raw.open(config)?;
		if let Some(registry) = &self.watchdog {
			client = Arc::new(WatchdogClient::new(client, Arc::clone(&self.raw), registry));
		}
		if self.read_only {
			client = Arc::new(ReadOnlyClient::new(client));
		}
		if let Some(cache) = &self.cache {
			client = Arc::new(CachingClient::with_cache(client, Arc::clone(cache)));
		}
		if let Some(counters) = &self.counters {
			client = Arc::new(StatisticsClient::with_instance(
				client,
				Arc::clone(&counters.instance),
				Arc::clone(&counters.global),
			));
		}
		Ok(client)
	}
}

/// Creates providers over a [`Connector`].
#[derive(Debug)]
pub struct ProviderFactory {
	/// Opens raw connections
	connector: Arc<dyn Connector>,
	/// State shared by every provider of this factory
	shared: SharedState,
}

impl ProviderFactory {
	/// A factory opening raw connections through `connector`.
	#[must_use]
	pub fn new(connector: Arc<dyn Connector>) -> Self {
		ProviderFactory { connector, shared: SharedState::new() }
	}

	/// A factory connecting to real servers with `ldap3`.
	#[must_use]
	pub fn ldap() -> Self {
		Self::new(Arc::new(LdapConnector))
	}

	/// The process-wide factory, created on first use.
	#[must_use]
	pub fn global() -> &'static ProviderFactory {
		/// The factory behind [`ProviderFactory::global`]
		static GLOBAL: OnceLock<ProviderFactory> = OnceLock::new();
		GLOBAL.get_or_init(ProviderFactory::ldap)
	}

	/// Lock `config` and build a provider from it.
	///
	/// With failover in use (enabled, or more than one URL), no connection is
	/// made until the first operation. Otherwise the single server is
	/// connected now and connection errors are returned here.
	pub fn create_provider(&self, config: Config) -> Result<Provider, Error> {
		let config = config.lock()?;
		let counters = config.statistics.then(|| Counters {
			instance: Arc::new(Statistics::new()),
			global: Arc::clone(&self.shared.statistics),
		});
		let statistics = counters.as_ref().map(|counters| Arc::clone(&counters.instance));

		let stack = StackConnector {
			raw: Arc::clone(&self.connector),
			watchdog: config.watchdog.enabled.then(|| self.shared.watchdog.clone()),
			read_only: config.read_only,
			cache: config
				.cache
				.enabled
				.then(|| Arc::new(Mutex::new(ResultCache::new(&config.cache)))),
			counters,
		};
		debug!(
			urls = config.urls.len(),
			failover = config.failover.enabled,
			watchdog = config.watchdog.enabled,
			cache = config.cache.enabled,
			read_only = config.read_only,
			"Creating provider"
		);

		let client: Arc<dyn DirectoryClient> =
			if config.failover.enabled || config.urls.len() > 1 {
				Arc::new(FailoverClient::new(
					config,
					Arc::new(stack),
					Arc::clone(&self.shared.hints),
				))
			} else {
				stack.open(&config)?
			};
		Ok(Provider::new(client, statistics))
	}

	/// Counters across every provider created by this factory
	#[must_use]
	pub fn global_statistics(&self) -> StatisticsSnapshot {
		self.shared.statistics()
	}

	/// State shared by the providers of this factory
	#[must_use]
	pub fn shared(&self) -> &SharedState {
		&self.shared
	}
}
