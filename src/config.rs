//! Config for the LDAP provider.
use std::{
	collections::hash_map::DefaultHasher,
	fs::File,
	hash::{Hash, Hasher},
	io::BufReader,
	ops::Deref,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use ldap3::LdapConnSettings;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Configuration for which variant of ISO8601 to use for parsing and
/// serializing time. Configured according the syntax definition
/// `( 1.3.6.1.4.1.1466.115.121.1.24 DESC 'Generalized Time' )` described in
/// RFC4517 section 3.1.13
pub const TIME_FORMAT: &[time::format_description::FormatItem] =
	time::macros::format_description!("[year][month][day][hour][minute][second]Z");

/// URL schemes the provider knows how to connect with
const SUPPORTED_SCHEMES: [&str; 3] = ["ldap", "ldaps", "ldapi"];

/// LDAP provider configuration.
///
/// A configuration is edited freely until it is [locked](Config::lock). Only
/// locked configurations are accepted by the provider stack.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
	/// The URLs of the servers to connect to, in order of preference.
	/// Supports ldap, ldaps, and ldapi schemes
	pub urls: Vec<Url>,
	/// The DN to bind as. Empty for an anonymous bind
	#[serde(default)]
	pub bind_dn: String,
	/// The password of the bind DN
	#[serde(default)]
	pub bind_password: String,
	/// Connection settings.
	#[serde(default)]
	pub connection: ConnectionConfig,
	/// Rotation between several servers
	#[serde(default)]
	pub failover: FailoverConfig,
	/// Idle and operation timeouts
	#[serde(default)]
	pub watchdog: WatchdogConfig,
	/// Result caching
	#[serde(default)]
	pub cache: CacheConfig,
	/// Whether to collect usage statistics
	#[serde(default = "default_true")]
	pub statistics: bool,
	/// Reject every operation that would modify the directory
	#[serde(default)]
	pub read_only: bool,
}

/// Serde default helper
const fn default_true() -> bool {
	true
}

/// Configuration for how to connect to the LDAP server
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	pub timeout: u64,

	/// LDAP operation timeout. For search per reply.
	pub operation_timeout: Duration,

	/// TLS config
	pub tls: TLSConfig,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		ConnectionConfig {
			timeout: 5,
			operation_timeout: Duration::from_secs(30),
			tls: TLSConfig::default(),
		}
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TLSConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	pub starttls: bool,

	/// Disable verification of TLS certificates
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,

	/// Path of the TLS client key to use for the connection
	pub client_key_path: Option<PathBuf>,

	/// Path of the TLS client certificate to use for the connection
	pub client_certificate_path: Option<PathBuf>,
}

/// Configuration for rotating between the configured servers
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
	/// Wrap the connection in the failover layer even if only one URL is
	/// configured. Always on with more than one URL.
	pub enabled: bool,
	/// How many times a single operation is attempted before giving up
	pub max_retries: u32,
	/// How long to stay on a fallback server after the last failure before
	/// trying the first server again
	pub minimum_failback_time: Duration,
	/// Pause before starting another pass over all servers
	pub rotation_pause: Duration,
}

impl Default for FailoverConfig {
	fn default() -> Self {
		FailoverConfig {
			enabled: true,
			max_retries: 4,
			minimum_failback_time: Duration::from_secs(90),
			rotation_pause: Duration::from_secs(1),
		}
	}
}

/// Configuration of the connection watchdog
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
	/// Close connections that hang or sit idle
	pub enabled: bool,
	/// Longest time an operation may take before the connection is closed
	pub operation_timeout: Duration,
	/// Longest time a connection may stay unused before it is closed
	pub idle_timeout: Duration,
	/// How often connections are checked
	pub check_frequency: Duration,
	/// Keep idle connections open if the bind password has expired, as
	/// binding again would fail
	pub disable_if_password_expired: bool,
	/// Attribute of the bind entry holding the password expiration time in
	/// generalized time syntax
	pub password_expiration_attribute: String,
}

impl Default for WatchdogConfig {
	fn default() -> Self {
		WatchdogConfig {
			enabled: true,
			operation_timeout: Duration::from_secs(60),
			idle_timeout: Duration::from_secs(30),
			check_frequency: Duration::from_secs(5),
			disable_if_password_expired: true,
			password_expiration_attribute: "passwordExpirationTime".to_owned(),
		}
	}
}

/// Configuration of the result cache
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
	/// Cache results of reads and searches
	pub enabled: bool,
	/// Number of results kept before older ones are demoted. Demoted results
	/// go to a secondary tier of the same size, so up to twice this many
	/// results can be held until they expire.
	pub maximum_size: usize,
	/// Age after which a cached result is discarded
	pub maximum_age: Duration,
}

impl Default for CacheConfig {
	fn default() -> Self {
		CacheConfig { enabled: false, maximum_size: 128, maximum_age: Duration::from_secs(1) }
	}
}

impl Config {
	/// A configuration for the given servers with every other setting left at
	/// its default.
	#[must_use]
	pub fn new(
		urls: Vec<Url>,
		bind_dn: impl Into<String>,
		bind_password: impl Into<String>,
	) -> Self {
		Config {
			urls,
			bind_dn: bind_dn.into(),
			bind_password: bind_password.into(),
			connection: ConnectionConfig::default(),
			failover: FailoverConfig::default(),
			watchdog: WatchdogConfig::default(),
			cache: CacheConfig::default(),
			statistics: true,
			read_only: false,
		}
	}

	/// Validate the configuration and freeze it.
	pub fn lock(self) -> Result<LockedConfig, Error> {
		self.validate()?;
		Ok(LockedConfig(Arc::new(self)))
	}

	/// Check the settings for consistency.
	fn validate(&self) -> Result<(), Error> {
		if self.urls.is_empty() {
			return Err(Error::Invalid("At least one server URL is required".to_owned()));
		}
		if let Some(url) = self.urls.iter().find(|url| !SUPPORTED_SCHEMES.contains(&url.scheme()))
		{
			return Err(Error::Invalid(format!("Unsupported URL scheme in {url}")));
		}
		if self.failover.max_retries == 0 {
			return Err(Error::Invalid("failover.max_retries must be at least 1".to_owned()));
		}
		if self.cache.enabled && self.cache.maximum_size == 0 {
			return Err(Error::Invalid("cache.maximum_size must be at least 1".to_owned()));
		}
		if self.watchdog.enabled && self.watchdog.check_frequency.is_zero() {
			return Err(Error::Invalid("watchdog.check_frequency must not be zero".to_owned()));
		}
		Ok(())
	}
}

/// A validated configuration which can no longer change. Cloning shares the
/// same frozen value; use [`LockedConfig::to_unlocked`] to get an editable
/// copy.
#[derive(Clone, Debug)]
pub struct LockedConfig(Arc<Config>);

impl Deref for LockedConfig {
	type Target = Config;

	fn deref(&self) -> &Config {
		&self.0
	}
}

impl LockedConfig {
	/// An unlocked copy of this configuration.
	#[must_use]
	pub fn to_unlocked(&self) -> Config {
		(*self.0).clone()
	}

	/// The first configured URL, the one a single connection is made to.
	#[must_use]
	pub fn primary_url(&self) -> &Url {
		// Validation guarantees at least one URL
		&self.0.urls[0]
	}

	/// Derive the configuration of a single failover slot: identical, except
	/// that only `url` is configured.
	#[must_use]
	pub(crate) fn for_url(&self, url: &Url) -> LockedConfig {
		let mut config = self.to_unlocked();
		config.urls = vec![url.clone()];
		LockedConfig(Arc::new(config))
	}

	/// Hash identifying the ordered list of configured servers.
	#[must_use]
	pub(crate) fn url_set_hash(&self) -> u64 {
		let mut hasher = DefaultHasher::new();
		for url in &self.0.urls {
			url.as_str().hash(&mut hasher);
		}
		hasher.finish()
	}
}

impl ConnectionConfig {
	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let mut roots = rustls::RootCertStore::empty();
			let root_certificates = read_certificates(path)?;
			if root_certificates.is_empty() {
				return Err(Error::Invalid("Could not read root certificate".to_owned()));
			}
			for certificate in &root_certificates {
				roots
					.add(certificate)
					.map_err(|_| Error::Invalid("Could not read root certificate".to_owned()))?;
			}

			let builder = rustls::ClientConfig::builder()
				.with_safe_defaults()
				.with_root_certificates(roots);

			let client_config =
				match (&self.tls.client_key_path, &self.tls.client_certificate_path) {
					(Some(key_path), Some(cert_path)) => {
						let chain = read_certificates(cert_path)?;
						let key = read_private_key(key_path)?;
						builder.with_client_auth_cert(chain, key).map_err(|_| {
							Error::Invalid("Could not read client certificates".to_owned())
						})?
					}
					(None, None) => builder.with_no_client_auth(),
					_ => Err(Error::Invalid(
						"Both a client certificate and key file in PKCS8 format must be specified"
							.to_owned(),
					))?,
				};
			settings = settings.set_config(Arc::new(client_config));
		}
		Ok(settings)
	}
}

/// Read every PEM encoded certificate in a file
fn read_certificates(path: &Path) -> Result<Vec<rustls::Certificate>, Error> {
	let mut reader = BufReader::new(File::open(path)?);
	Ok(rustls_pemfile::certs(&mut reader)?.into_iter().map(rustls::Certificate).collect())
}

/// Read the first PKCS8 private key in a file
fn read_private_key(path: &Path) -> Result<rustls::PrivateKey, Error> {
	let mut reader = BufReader::new(File::open(path)?);
	rustls_pemfile::pkcs8_private_keys(&mut reader)?
		.into_iter()
		.next()
		.map(rustls::PrivateKey)
		.ok_or_else(|| Error::Invalid("No PKCS8 private key found".to_owned()))
}

#[cfg(test)]
impl Config {
	/// Returns an example configuration for the given servers, with the
	/// watchdog and failover timings shortened for tests
	pub(crate) fn example(urls: &[&str]) -> Self {
		let urls = urls.iter().filter_map(|url| Url::parse(url).ok()).collect();
		let mut config = Config::new(urls, "cn=admin,dc=example,dc=org", "adminpassword");
		config.failover.rotation_pause = Duration::from_millis(10);
		config.watchdog.check_frequency = Duration::from_millis(20);
		config.watchdog.disable_if_password_expired = false;
		config
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used, clippy::expect_used, clippy::items_after_statements)]

	use std::{io::ErrorKind, path::PathBuf};

	use time::PrimitiveDateTime;

	use super::{Config, TIME_FORMAT};
	use crate::{config::TLSConfig, error, ConnectionConfig};

	#[test]
	fn test_time_config() -> Result<(), Box<dyn std::error::Error>> {
		PrimitiveDateTime::parse("20130516200520Z", &TIME_FORMAT)?;

		Ok(())
	}

	#[test]
	fn test_lock_validation() {
		assert!(Config::example(&["ldap://one:389", "ldaps://two:636"]).lock().is_ok());

		assert!(matches!(Config::example(&[]).lock(), Err(error::Error::Invalid(_))));
		assert!(matches!(
			Config::example(&["http://one:389"]).lock(),
			Err(error::Error::Invalid(_))
		));

		let mut config = Config::example(&["ldap://one:389"]);
		config.failover.max_retries = 0;
		assert!(matches!(config.lock(), Err(error::Error::Invalid(_))));

		let mut config = Config::example(&["ldap://one:389"]);
		config.cache.enabled = true;
		config.cache.maximum_size = 0;
		assert!(matches!(config.lock(), Err(error::Error::Invalid(_))));
	}

	#[test]
	fn test_unlocked_copy() {
		let locked = Config::example(&["ldap://one:389", "ldap://two:389"]).lock().unwrap();

		let mut copy = locked.to_unlocked();
		copy.read_only = true;
		copy.urls.pop();

		assert!(!locked.read_only, "Editing the copy must not touch the locked value");
		assert_eq!(locked.urls.len(), 2);
		assert!(copy.lock().unwrap().read_only);
	}

	#[test]
	fn test_slot_config() {
		let locked = Config::example(&["ldap://one:389", "ldap://two:389"]).lock().unwrap();
		let slot = locked.for_url(&locked.urls[1]);

		assert_eq!(slot.urls.len(), 1);
		assert_eq!(slot.primary_url().as_str(), "ldap://two:389");
		assert_eq!(slot.bind_dn, locked.bind_dn);
		assert_ne!(slot.url_set_hash(), locked.url_set_hash());
		assert_eq!(
			locked.url_set_hash(),
			Config::example(&["ldap://one:389", "ldap://two:389"]).lock().unwrap().url_set_hash()
		);
	}

	#[test]
	fn test_tls_config() {
		// invalid crt test
		assert!(matches!(
			ConnectionConfig {
				tls: TLSConfig {
					client_key_path: None,
					client_certificate_path: None,
					root_certificates_path: Some(PathBuf::from("src/config.rs")),
					starttls: false,
					no_tls_verify: false,
				},
				timeout: 5,
				operation_timeout: std::time::Duration::from_secs(5),
			}
			.to_settings()
			.err()
			.unwrap(),
			error::Error::Invalid(_)
		));

		// invalid path test
		assert!(matches!(
			ConnectionConfig {
				tls: TLSConfig {
					client_key_path: Some(PathBuf::from("invalid_path")),
					client_certificate_path: Some(PathBuf::from("invalid_path")),
					root_certificates_path: Some(PathBuf::from("invalid_path")),
					starttls: false,
					no_tls_verify: false,
				},
				timeout: 5,
				operation_timeout: std::time::Duration::from_secs(5),
			}
			.to_settings()
			.err()
			.unwrap(),
			error::Error::Io(io_err) if io_err.kind() == ErrorKind::NotFound
		));

		// no custom roots
		assert!(ConnectionConfig::default().to_settings().is_ok());
	}
}
